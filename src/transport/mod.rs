pub mod mock;
pub mod traits;

pub use traits::{LinkEvent, Peripheral, Transport};

/// Primary bench service UUID
pub const SERVICE_UUID: &str = "8e40f0a0-1c94-4d57-a8c1-2f3b6d1e9b10";
/// Write characteristic: command envelopes
pub const COMMAND_CHAR_UUID: &str = "8e40f0a1-1c94-4d57-a8c1-2f3b6d1e9b10";
/// Notify characteristic: telemetry and event envelopes
pub const TELEMETRY_CHAR_UUID: &str = "8e40f0a2-1c94-4d57-a8c1-2f3b6d1e9b10";
/// Optional read-only characteristic: application discovery metadata
pub const DEVICE_INFO_CHAR_UUID: &str = "8e40f0a3-1c94-4d57-a8c1-2f3b6d1e9b10";
