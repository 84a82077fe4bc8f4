use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outbound command envelope.
///
/// Serializes to UTF-8 JSON as `{"cmd": ..., <payload fields>, "timestamp": <epoch-ms>}`.
/// Immutable once constructed; the channel queues it as-is.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub cmd: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    pub timestamp: i64,
}

impl Command {
    /// Command with no payload fields
    pub fn bare(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            payload: Map::new(),
            timestamp: epoch_ms(),
        }
    }

    /// Command with payload fields taken from a JSON object.
    ///
    /// Non-object values are ignored; the envelope keys win on collision.
    pub fn new(cmd: &str, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                log::warn!("command {} payload is not an object: {}", cmd, other);
                Map::new()
            }
        };
        Self {
            cmd: cmd.to_string(),
            payload,
            timestamp: epoch_ms(),
        }
    }

    /// Encode for transmission over the write characteristic
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to encode command envelope")
    }
}

pub(crate) fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
