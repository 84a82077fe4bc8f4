pub mod command_channel;
pub mod device_session;
pub mod hub;
pub mod watchdog;

pub use command_channel::{CommandChannel, INTER_COMMAND_DELAY};
pub use device_session::DeviceSession;
pub use hub::TelemetryHub;
pub use watchdog::{SafetyWatchdog, DISARM_GRACE};
