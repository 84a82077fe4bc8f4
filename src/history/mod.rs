use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use crate::analysis::RunAnalysis;
use crate::protocol::{Profile, TelemetrySample};
use crate::sequencer::TestMode;

/// Completed runs kept on disk; oldest evicted first beyond this
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed { error: String },
}

/// One sealed test run, created at sequence start and appended on finalize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub mode: TestMode,
    pub profile: Profile,
    pub samples: Vec<TelemetrySample>,
    pub started_at: i64,
    pub ended_at: i64,
    pub outcome: RunOutcome,
    pub analysis: RunAnalysis,
}

/// Bounded persisted log of completed runs.
///
/// The whole ring is written as one JSON array after every append. Loading
/// is best-effort: missing or corrupt data yields an empty history.
pub struct HistoryStore {
    path: PathBuf,
    runs: VecDeque<TestRun>,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let runs = match fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<Vec<TestRun>>(&json) {
                Ok(runs) => runs.into(),
                Err(e) => {
                    log::warn!("Corrupt run history at {:?}, starting empty: {:#}", path, e);
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };

        Self { path, runs }
    }

    /// Default on-disk location under the platform data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thrustbench")
            .join("history.json")
    }

    /// Append one sealed run, evicting the oldest beyond capacity
    pub fn append(&mut self, run: TestRun) -> Result<()> {
        self.runs.push_back(run);
        while self.runs.len() > HISTORY_CAPACITY {
            self.runs.pop_front();
        }
        self.persist()
    }

    pub fn runs(&self) -> Vec<&TestRun> {
        self.runs.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn latest(&self) -> Option<&TestRun> {
        self.runs.back()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create run history directory")?;
        }
        let runs: Vec<&TestRun> = self.runs.iter().collect();
        let json = serde_json::to_string_pretty(&runs)
            .context("Failed to serialize run history")?;
        fs::write(&self.path, json)
            .context(format!("Failed to write run history to {:?}", self.path))?;
        Ok(())
    }
}
