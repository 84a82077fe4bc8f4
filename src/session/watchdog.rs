use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use super::command_channel::CommandChannel;
use crate::events::BenchEvent;
use crate::protocol::StatusMask;

/// How long armed-but-not-spinning must hold before the motor is disarmed
pub const DISARM_GRACE: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    PendingDisarm,
    Disarming,
}

struct WatchdogState {
    phase: Phase,
    last_status: StatusMask,
    timer: Option<JoinHandle<()>>,
}

/// Auto-disarms a motor left armed without spinning.
///
/// `Idle -> PendingDisarm` when status shows armed and not spinning; a single
/// grace timer is started. Recovery before expiry cancels the timer with no
/// side effects. At expiry the condition is re-checked against the latest
/// status and exactly one `disarm` command is issued. Never raises errors to
/// the caller; a failed disarm is logged and the watchdog returns to idle.
#[derive(Clone)]
pub struct SafetyWatchdog {
    commands: CommandChannel,
    events: broadcast::Sender<BenchEvent>,
    state: Arc<Mutex<WatchdogState>>,
}

impl SafetyWatchdog {
    pub fn new(commands: CommandChannel, events: broadcast::Sender<BenchEvent>) -> Self {
        Self {
            commands,
            events,
            state: Arc::new(Mutex::new(WatchdogState {
                phase: Phase::Idle,
                last_status: StatusMask(0),
                timer: None,
            })),
        }
    }

    /// Feed one decoded status update
    pub fn observe(&self, mask: StatusMask) {
        let mut state = self.state.lock().unwrap();
        state.last_status = mask;

        let at_risk = mask.armed() && !mask.spinning();
        match state.phase {
            Phase::Idle if at_risk => {
                state.phase = Phase::PendingDisarm;
                log::debug!("Motor armed without spinning, disarm pending");
                let watchdog = self.clone();
                state.timer = Some(tokio::spawn(async move {
                    sleep(DISARM_GRACE).await;
                    watchdog.on_grace_expired().await;
                }));
            }
            Phase::PendingDisarm if !at_risk => {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                state.phase = Phase::Idle;
                log::debug!("Motor recovered before grace expiry, disarm cancelled");
            }
            // Disarming: status churn is ignored until the command settles
            _ => {}
        }
    }

    async fn on_grace_expired(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.timer = None;

            let still_at_risk =
                state.last_status.armed() && !state.last_status.spinning();
            if state.phase != Phase::PendingDisarm || !still_at_risk {
                state.phase = Phase::Idle;
                return;
            }
            state.phase = Phase::Disarming;
        }

        log::warn!(
            "Motor armed without spinning for {:?}, auto-disarming",
            DISARM_GRACE
        );
        match self.commands.send("disarm", Value::Null).await {
            Ok(()) => {
                let _ = self.events.send(BenchEvent::AutoDisarmed);
            }
            Err(e) => {
                // Returning to idle regardless avoids re-entrant disarm storms
                log::error!("Auto-disarm failed: {:#}", e);
            }
        }

        self.state.lock().unwrap().phase = Phase::Idle;
    }

    /// Cancel any pending timer and return to idle (session teardown)
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.phase = Phase::Idle;
        state.last_status = StatusMask(0);
    }
}
