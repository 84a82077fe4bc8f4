use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::profile::Profile;
use super::status::{StatusFlags, StatusMask};

/// One telemetry row, produced by the device at ~200 ms cadence.
///
/// `throttle_pct` here is the device's own (unsynchronized) view; the
/// sequencer's sampler replaces it with the commanded value when building a
/// run's sample series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySample {
    pub timestamp: f64,
    #[serde(rename = "throttle")]
    pub throttle_pct: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub rpm: f64,
    #[serde(rename = "thrust")]
    pub thrust_grams: f64,
    #[serde(rename = "escTemp")]
    pub esc_temp_c: f64,
    #[serde(rename = "motorTemp")]
    pub motor_temp_c: f64,
}

/// Status payload, accepted either as a pre-packed integer or as named
/// boolean flags. Firmware is believed to emit only the packed form, but the
/// named form is part of the contract and both paths are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReport {
    pub status: Option<u32>,
    #[serde(flatten)]
    pub flags: StatusFlags,
}

impl StatusReport {
    pub fn mask(&self) -> StatusMask {
        match self.status {
            Some(packed) => StatusMask(packed),
            None => self.flags.pack(),
        }
    }
}

/// Discovery metadata from the optional read-only characteristic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub firmware: Option<String>,
    pub battery: Option<f64>,
    pub temperature: Option<f64>,
    pub rssi: Option<i32>,
}

/// Inbound notification payload, discriminated by the `type` tag.
///
/// Unknown tags land in `Unknown` and are ignored by the session pump.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryMessage {
    #[serde(rename = "data")]
    Data(TelemetrySample),
    #[serde(rename = "status")]
    Status(StatusReport),
    #[serde(rename = "profiles")]
    Profiles { profiles: Vec<Profile> },
    #[serde(rename = "profile")]
    Profile { profile: Profile },
    #[serde(rename = "cur_profile")]
    CurrentProfile { name: String },
    #[serde(rename = "version")]
    Version { firmware: String },
    #[serde(rename = "ack", alias = "ACK")]
    Ack { command: String },
    #[serde(rename = "device_info")]
    DeviceInfo(DeviceInfo),
    #[serde(other)]
    Unknown,
}

/// Parse one notification payload (UTF-8 JSON).
///
/// Callers log and drop failures; decode errors never stall the pipeline.
pub fn decode(raw: &[u8]) -> Result<TelemetryMessage> {
    serde_json::from_slice(raw).context("Failed to decode telemetry payload")
}
