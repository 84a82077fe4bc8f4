use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::sleep;

use thrustbench::events::BenchEvent;
use thrustbench::history::{HistoryStore, RunOutcome};
use thrustbench::protocol::{Profile, TelemetrySample};
use thrustbench::sequencer::{
    pct_to_raw, EnduranceParams, InternalResistanceParams, KvEstimationParams, SweepParams,
    TestMode, TestSequencer, RAMP_POINTS,
};
use thrustbench::session::{CommandChannel, TelemetryHub};
use thrustbench::transport::mock::{MockLink, MockPeripheral};
use thrustbench::transport::Peripheral;

fn bench_profile(arm_throttle_raw: u16) -> Profile {
    Profile {
        name: "bench".to_string(),
        motor_kv: 2300,
        prop_diameter: 5.0,
        prop_pitch: 4.5,
        prop_blades: 3,
        battery_cell_count: 4,
        motor_poles: 14,
        motor_reverse: false,
        arm_throttle_raw,
        max_rpm: 30000.0,
        max_esc_temp: 90.0,
        max_motor_temp: 95.0,
        max_current: 40.0,
        max_thrust: 1200.0,
    }
}

struct Harness {
    sequencer: TestSequencer,
    link: MockLink,
    hub: TelemetryHub,
    history: Arc<Mutex<HistoryStore>>,
    events: broadcast::Sender<BenchEvent>,
    _dir: TempDir,
}

async fn setup(arm_throttle_raw: u16) -> Harness {
    let link = MockLink::new();
    let mut peripheral = MockPeripheral::new("bench-rig", link.clone());
    peripheral.connect().await.unwrap();

    let commands = CommandChannel::new();
    commands.bind(Arc::new(peripheral));

    let hub = TelemetryHub::new();
    hub.replace_profiles(vec![bench_profile(arm_throttle_raw)]);
    hub.set_active_profile("bench");

    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(Mutex::new(HistoryStore::open(dir.path().join("history.json"))));
    let (events, _) = broadcast::channel(1024);

    Harness {
        sequencer: TestSequencer::new(
            commands,
            hub.clone(),
            Arc::clone(&history),
            events.clone(),
        ),
        link,
        hub,
        history,
        events,
        _dir: dir,
    }
}

/// Raw values of every throttle command written so far, in order
fn throttle_values(link: &MockLink) -> Vec<u64> {
    link.writes()
        .iter()
        .filter_map(|(_, payload)| serde_json::from_slice::<serde_json::Value>(payload).ok())
        .filter(|v| v["cmd"] == "throttle")
        .filter_map(|v| v["value"].as_u64())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_sweep_issues_expected_throttle_sequence() {
    let h = setup(48).await;

    h.sequencer
        .start(TestMode::Sweep(SweepParams {
            start_pct: 0.0,
            end_pct: 20.0,
            step_pct: 10.0,
            dwell_s: 0.0,
            repeat: 1,
        }))
        .unwrap();
    h.sequencer.join().await;

    let values = throttle_values(&h.link);
    // Ramp 0 -> start(0): 26 commands at the floor encoding
    assert_eq!(&values[..RAMP_POINTS], &[48u64; RAMP_POINTS]);
    // Sweep-up phase: 0%, 10%, 20% in that order
    assert_eq!(values[RAMP_POINTS], u64::from(pct_to_raw(0.0)));
    assert_eq!(values[RAMP_POINTS + 1], u64::from(pct_to_raw(10.0)));
    assert_eq!(values[RAMP_POINTS + 2], u64::from(pct_to_raw(20.0)));
    // Ramp end -> 0: 26 commands settling at the floor, then raw motor stop
    assert_eq!(values.len(), RAMP_POINTS + 3 + RAMP_POINTS + 1);
    assert_eq!(values[values.len() - 2], 48);
    assert_eq!(*values.last().unwrap(), 0);

    assert!(!h.sequencer.is_running());
    assert!(!h.sequencer.is_stopping());
}

#[tokio::test(start_paused = true)]
async fn test_throttle_never_goes_below_arm_floor() {
    // armThrottleRaw 448 maps to a floor of ~20%
    let h = setup(448).await;

    h.sequencer
        .start(TestMode::Sweep(SweepParams {
            start_pct: 0.0,
            end_pct: 10.0,
            step_pct: 5.0,
            dwell_s: 0.0,
            repeat: 1,
        }))
        .unwrap();
    h.sequencer.join().await;

    let values = throttle_values(&h.link);
    let (stop, commanded) = values.split_last().unwrap();
    assert!(commanded.iter().all(|v| *v >= 448), "{:?}", commanded);
    // The final raw motor stop is the one value below the floor
    assert_eq!(*stop, 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_rejected_without_active_profile() {
    let h = setup(48).await;
    h.hub.clear();

    let err = h
        .sequencer
        .start(TestMode::Sweep(SweepParams::default()))
        .unwrap_err();
    assert!(err.to_string().contains("No active profile"));
}

#[tokio::test(start_paused = true)]
async fn test_start_rejected_while_running() {
    let h = setup(48).await;

    h.sequencer
        .start(TestMode::Endurance(EnduranceParams {
            throttle_pct: 40.0,
            duration_min: 1.0,
            cooldown_pct: None,
            cooldown_s: 0.0,
        }))
        .unwrap();
    assert!(h
        .sequencer
        .start(TestMode::Sweep(SweepParams::default()))
        .is_err());

    h.sequencer.stop();
    h.sequencer.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ramps_down_and_finalizes() {
    let h = setup(48).await;
    let mut events = h.events.subscribe();

    h.sequencer
        .start(TestMode::Endurance(EnduranceParams {
            throttle_pct: 50.0,
            duration_min: 5.0,
            cooldown_pct: None,
            cooldown_s: 0.0,
        }))
        .unwrap();

    // Let the ramp-up finish and the hold begin, then cancel
    sleep(Duration::from_secs(10)).await;
    h.sequencer.stop();
    assert!(h.sequencer.is_stopping());
    h.sequencer.join().await;

    assert!(!h.sequencer.is_running());
    assert!(!h.sequencer.is_stopping());

    // Safety ramp: 26 points from 50% down to the floor, then motor stop
    let values = throttle_values(&h.link);
    let tail = &values[values.len() - RAMP_POINTS - 1..];
    assert_eq!(tail[0], u64::from(pct_to_raw(50.0)));
    assert_eq!(tail[RAMP_POINTS - 1], 48);
    assert_eq!(tail[RAMP_POINTS], 0);

    let mut outcome = None;
    while let Ok(event) = events.try_recv() {
        if let BenchEvent::RunFinished { outcome: o } = event {
            outcome = Some(o);
        }
    }
    assert_eq!(outcome, Some(RunOutcome::Cancelled));

    // Partial data is preserved, not discarded
    let history = h.history.lock().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.latest().unwrap().outcome, RunOutcome::Cancelled);
    assert!(!history.latest().unwrap().samples.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_fails_run_but_still_finalizes() {
    let h = setup(48).await;
    let mut events = h.events.subscribe();
    h.link.set_fail_writes(true);

    h.sequencer
        .start(TestMode::Sweep(SweepParams::default()))
        .unwrap();
    h.sequencer.join().await;

    assert!(!h.sequencer.is_running());
    let mut outcome = None;
    while let Ok(event) = events.try_recv() {
        if let BenchEvent::RunFinished { outcome: o } = event {
            outcome = Some(o);
        }
    }
    assert!(matches!(outcome, Some(RunOutcome::Failed { .. })));

    // No throttle was ever issued, so there is nothing to record
    assert!(h.history.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sampler_pairs_commanded_throttle_with_telemetry() {
    let h = setup(48).await;

    h.hub.record_sample(TelemetrySample {
        throttle_pct: 99.0, // device-side throttle field must be ignored
        voltage: 15.5,
        rpm: 9000.0,
        ..Default::default()
    });

    h.sequencer
        .start(TestMode::Endurance(EnduranceParams {
            throttle_pct: 30.0,
            duration_min: 0.1,
            cooldown_pct: None,
            cooldown_s: 0.0,
        }))
        .unwrap();
    h.sequencer.join().await;

    let history = h.history.lock().unwrap();
    let run = history.latest().unwrap();
    assert!(!run.samples.is_empty());

    // Rows carry the commanded percentage, clamped to [floor, 100]
    assert!(run.samples.iter().all(|s| s.throttle_pct <= 100.0));
    assert!(run.samples.iter().any(|s| (s.throttle_pct - 30.0).abs() < 1e-9));
    assert!(run.samples.iter().all(|s| s.voltage == 15.5));
    assert!(run.samples.iter().all(|s| s.throttle_pct != 99.0));
}

#[tokio::test(start_paused = true)]
async fn test_kv_run_waits_for_operator_and_completes() {
    let h = setup(48).await;

    h.hub.record_sample(TelemetrySample {
        voltage: 16.0,
        rpm: 36800.0,
        current: 2.0,
        ..Default::default()
    });

    // Stand in for the operator: confirm every voltage step
    let mut events = h.events.subscribe();
    let sequencer = h.sequencer.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, BenchEvent::AwaitingOperator { .. }) {
                sequencer.confirm_step();
            }
        }
    });

    h.sequencer
        .start(TestMode::KvEstimation(KvEstimationParams {
            throttle_pct: 15.0,
            voltage_steps: 3,
            dwell_s: 1.0,
            current_ceiling_a: 5.0,
        }))
        .unwrap();
    h.sequencer.join().await;

    let history = h.history.lock().unwrap();
    assert_eq!(history.latest().unwrap().outcome, RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_kv_run_aborts_over_current_ceiling() {
    let h = setup(48).await;

    h.hub.record_sample(TelemetrySample {
        voltage: 16.0,
        rpm: 36800.0,
        current: 12.0,
        ..Default::default()
    });

    let mut events = h.events.subscribe();
    let sequencer = h.sequencer.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, BenchEvent::AwaitingOperator { .. }) {
                sequencer.confirm_step();
            }
        }
    });

    h.sequencer
        .start(TestMode::KvEstimation(KvEstimationParams {
            throttle_pct: 15.0,
            voltage_steps: 3,
            dwell_s: 1.0,
            current_ceiling_a: 5.0,
        }))
        .unwrap();
    h.sequencer.join().await;

    let history = h.history.lock().unwrap();
    match &history.latest().unwrap().outcome {
        RunOutcome::Failed { error } => assert!(error.contains("ceiling")),
        other => panic!("expected failed run, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_ir_run_returns_to_baseline_between_pulses() {
    let h = setup(48).await;

    h.sequencer
        .start(TestMode::InternalResistance(InternalResistanceParams {
            baseline_pct: 20.0,
            pulse_amplitude_pct: 30.0,
            pulse_s: 0.2,
            rest_s: 0.2,
            pulses: 2,
        }))
        .unwrap();
    h.sequencer.join().await;

    let values = throttle_values(&h.link);
    let baseline = u64::from(pct_to_raw(20.0));
    let pulse = u64::from(pct_to_raw(50.0));

    // After the ramp to baseline: pulse, baseline, pulse, baseline
    let pulse_section = &values[RAMP_POINTS..RAMP_POINTS + 4];
    assert_eq!(pulse_section, &[pulse, baseline, pulse, baseline]);
}
