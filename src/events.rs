use crate::history::RunOutcome;
use crate::protocol::{DeviceInfo, StatusMask, TelemetrySample};

/// Everything the presentation layer can observe from the core.
///
/// Emitted on one broadcast bus; the core never reaches into a view layer.
#[derive(Debug, Clone)]
pub enum BenchEvent {
    Connected { name: String },
    Disconnected { requested: bool },
    Telemetry(TelemetrySample),
    Status(StatusMask),
    ProfilesSynced { count: usize },
    ActiveProfile { name: String },
    FirmwareVersion { firmware: String },
    Ack { command: String },
    DeviceInfo(DeviceInfo),
    /// Watchdog disarmed an armed, non-spinning motor
    AutoDisarmed,
    RunStarted { mode: String },
    /// Periodic progress for long holds (endurance), once per second
    RunProgress { elapsed_s: u64, total_s: u64 },
    /// KV estimation is waiting for the operator to adjust supply voltage
    AwaitingOperator { step: u32, of: u32 },
    RunMessage(String),
    RunFinished { outcome: RunOutcome },
}
