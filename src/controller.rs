use anyhow::Result;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::events::BenchEvent;
use crate::history::{HistoryStore, TestRun};
use crate::protocol::{Profile, StatusMask, TelemetrySample};
use crate::sequencer::{TestMode, TestSequencer};
use crate::session::{CommandChannel, DeviceSession, SafetyWatchdog, TelemetryHub};
use crate::transport::Transport;

/// Facade wiring the session, sequencer, and history together.
///
/// This is the boundary the presentation layer talks to: commands go in,
/// [`BenchEvent`]s come out on one broadcast bus. Every dependency is
/// constructor-injected; there are no process-wide singletons.
pub struct BenchController {
    session: DeviceSession,
    sequencer: TestSequencer,
    commands: CommandChannel,
    hub: TelemetryHub,
    history: Arc<Mutex<HistoryStore>>,
    events: broadcast::Sender<BenchEvent>,
}

impl BenchController {
    pub fn new(transport: Arc<dyn Transport>, history_path: PathBuf) -> Self {
        let (events, _) = broadcast::channel(256);
        let commands = CommandChannel::new();
        let hub = TelemetryHub::new();
        let watchdog = SafetyWatchdog::new(commands.clone(), events.clone());
        let session = DeviceSession::new(
            transport,
            commands.clone(),
            hub.clone(),
            watchdog,
            events.clone(),
        );
        let history = Arc::new(Mutex::new(HistoryStore::open(history_path)));
        let sequencer = TestSequencer::new(
            commands.clone(),
            hub.clone(),
            Arc::clone(&history),
            events.clone(),
        );

        Self {
            session,
            sequencer,
            commands,
            hub,
            history,
            events,
        }
    }

    /// Subscribe to the core's event stream
    pub fn subscribe(&self) -> broadcast::Receiver<BenchEvent> {
        self.events.subscribe()
    }

    pub async fn connect(&self) -> Result<String> {
        self.session.connect().await
    }

    /// Disconnect, cancelling any active run first
    pub async fn disconnect(&self) {
        if self.sequencer.is_running() {
            self.sequencer.stop();
            self.sequencer.join().await;
        }
        self.session.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn start_test(&self, mode: TestMode) -> Result<()> {
        self.sequencer.start(mode)
    }

    pub fn stop_test(&self) {
        self.sequencer.stop();
    }

    pub fn is_test_running(&self) -> bool {
        self.sequencer.is_running()
    }

    /// Operator confirmation for KV estimation voltage steps
    pub fn confirm_step(&self) {
        self.sequencer.confirm_step();
    }

    pub async fn arm(&self) -> Result<()> {
        self.commands.send("arm", Value::Null).await
    }

    pub async fn disarm(&self) -> Result<()> {
        self.commands.send("disarm", Value::Null).await
    }

    /// Zero the thrust load cell
    pub async fn tare(&self) -> Result<()> {
        self.commands.send("tare", Value::Null).await
    }

    /// Ask the device to resend its profile catalog
    pub async fn request_profiles(&self) -> Result<()> {
        self.commands.send("get_profiles", Value::Null).await
    }

    /// Make a stored profile the device's active one
    pub async fn select_profile(&self, name: &str) -> Result<()> {
        self.commands
            .send("set_profile", json!({ "name": name }))
            .await
    }

    pub fn last_telemetry(&self) -> Option<TelemetrySample> {
        self.hub.last_sample()
    }

    pub fn last_status(&self) -> StatusMask {
        self.hub.last_status()
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.hub.profiles()
    }

    pub fn active_profile(&self) -> Option<Profile> {
        self.hub.active_profile()
    }

    pub fn firmware(&self) -> Option<String> {
        self.hub.firmware()
    }

    pub fn history_runs(&self) -> Vec<TestRun> {
        self.history
            .lock()
            .unwrap()
            .runs()
            .into_iter()
            .cloned()
            .collect()
    }
}
