pub mod command;
pub mod profile;
pub mod status;
pub mod telemetry;

pub use command::Command;
pub use profile::{Profile, THROTTLE_RAW_MAX, THROTTLE_RAW_MIN};
pub use status::{StatusFlags, StatusMask};
pub use telemetry::{decode, DeviceInfo, StatusReport, TelemetryMessage, TelemetrySample};
