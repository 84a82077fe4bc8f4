use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

use thrustbench::events::BenchEvent;
use thrustbench::protocol::status::{BIT_MOTOR_ARMED, BIT_MOTOR_SPINNING};
use thrustbench::protocol::StatusMask;
use thrustbench::session::{CommandChannel, SafetyWatchdog};
use thrustbench::transport::mock::{MockLink, MockPeripheral};
use thrustbench::transport::Peripheral;

const ARMED: StatusMask = StatusMask(1 << BIT_MOTOR_ARMED);
const ARMED_SPINNING: StatusMask =
    StatusMask((1 << BIT_MOTOR_ARMED) | (1 << BIT_MOTOR_SPINNING));

struct Harness {
    watchdog: SafetyWatchdog,
    link: MockLink,
    events: broadcast::Receiver<BenchEvent>,
}

async fn setup() -> Harness {
    let link = MockLink::new();
    let mut peripheral = MockPeripheral::new("bench-rig", link.clone());
    peripheral.connect().await.unwrap();

    let channel = CommandChannel::new();
    channel.bind(Arc::new(peripheral));

    let (tx, events) = broadcast::channel(64);
    Harness {
        watchdog: SafetyWatchdog::new(channel, tx),
        link,
        events,
    }
}

fn disarm_count(link: &MockLink) -> usize {
    link.command_names().iter().filter(|c| *c == "disarm").count()
}

#[tokio::test(start_paused = true)]
async fn test_armed_without_spinning_disarms_after_grace() {
    let mut h = setup().await;

    h.watchdog.observe(ARMED);
    sleep(Duration::from_millis(2200)).await;

    assert_eq!(disarm_count(&h.link), 1);
    assert!(matches!(h.events.try_recv(), Ok(BenchEvent::AutoDisarmed)));
}

#[tokio::test(start_paused = true)]
async fn test_spinning_before_expiry_cancels_disarm() {
    let mut h = setup().await;

    h.watchdog.observe(ARMED);
    sleep(Duration::from_millis(1900)).await;
    h.watchdog.observe(ARMED_SPINNING);
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(disarm_count(&h.link), 0);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disarm_before_expiry_cancels_timer() {
    let h = setup().await;

    h.watchdog.observe(ARMED);
    sleep(Duration::from_millis(500)).await;
    h.watchdog.observe(StatusMask(0));
    sleep(Duration::from_millis(3000)).await;

    assert_eq!(disarm_count(&h.link), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_status_starts_only_one_timer() {
    let h = setup().await;

    // Status arrives at the notification cadence while the timer is pending
    for _ in 0..8 {
        h.watchdog.observe(ARMED);
        sleep(Duration::from_millis(200)).await;
    }
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(disarm_count(&h.link), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_disarm_returns_to_idle() {
    let h = setup().await;
    h.link.set_fail_writes(true);

    h.watchdog.observe(ARMED);
    sleep(Duration::from_millis(2500)).await;

    // Write failed, nothing recorded, but a new risk window starts cleanly
    assert_eq!(disarm_count(&h.link), 0);
    h.link.set_fail_writes(false);
    h.watchdog.observe(ARMED);
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(disarm_count(&h.link), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_cancels_pending_timer() {
    let h = setup().await;

    h.watchdog.observe(ARMED);
    h.watchdog.reset();
    sleep(Duration::from_millis(3000)).await;

    assert_eq!(disarm_count(&h.link), 0);
}
