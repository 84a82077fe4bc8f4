pub mod cancel;
pub mod modes;
pub mod throttle;

pub use cancel::CancelToken;
pub use modes::{
    EnduranceParams, InternalResistanceParams, KvEstimationParams, MappingParams,
    StepResponseParams, SweepParams, TestMode, ThermalStressParams,
};
pub use throttle::{pct_to_raw, raw_to_pct, ThrottleActuator, RAMP_POINTS};

use anyhow::{anyhow, bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant};

use crate::analysis;
use crate::events::BenchEvent;
use crate::history::{HistoryStore, RunOutcome, TestRun};
use crate::protocol::command::epoch_ms;
use crate::protocol::{Profile, TelemetrySample};
use crate::session::{CommandChannel, TelemetryHub};

/// Cadence of the background sampler during an active run
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
/// Ramp window for the safety ramp-down on cancellation or error
pub const CANCEL_RAMP: Duration = Duration::from_millis(2500);
/// Default window for the ramps framing each mode's dwell phases
const MODE_RAMP: Duration = Duration::from_secs(2);

struct RunState {
    running: bool,
    stopping: bool,
    samples: Vec<TelemetrySample>,
}

/// Drives one of the seven throttle test algorithms against the device.
///
/// One run at a time; `running`/`stopping` are mutually exclusive with
/// `false/false` the only stable idle state. Every run finalizes the same
/// way regardless of outcome: sampler stopped, partial data analyzed and
/// appended to history, buffer cleared, `RunFinished` emitted. Clonable
/// handle over shared state.
#[derive(Clone)]
pub struct TestSequencer {
    commands: CommandChannel,
    hub: TelemetryHub,
    history: Arc<Mutex<HistoryStore>>,
    events: broadcast::Sender<BenchEvent>,
    state: Arc<Mutex<RunState>>,
    operator: Arc<Notify>,
    cancel: Arc<Mutex<Option<CancelToken>>>,
    run_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TestSequencer {
    pub fn new(
        commands: CommandChannel,
        hub: TelemetryHub,
        history: Arc<Mutex<HistoryStore>>,
        events: broadcast::Sender<BenchEvent>,
    ) -> Self {
        Self {
            commands,
            hub,
            history,
            events,
            state: Arc::new(Mutex::new(RunState {
                running: false,
                stopping: false,
                samples: Vec::new(),
            })),
            operator: Arc::new(Notify::new()),
            cancel: Arc::new(Mutex::new(None)),
            run_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().unwrap().stopping
    }

    /// Begin a test run.
    ///
    /// Requires a bound command channel and an active profile to snapshot;
    /// rejects while another run is active.
    pub fn start(&self, mode: TestMode) -> Result<()> {
        if !self.commands.is_bound() {
            bail!("Not connected");
        }
        let profile = self
            .hub
            .active_profile()
            .ok_or_else(|| anyhow!("No active profile on device"))?;
        profile.validate()?;

        let token = CancelToken::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.running || state.stopping {
                bail!("A test run is already active");
            }
            state.running = true;
            state.stopping = false;
            state.samples.clear();
        }
        *self.cancel.lock().unwrap() = Some(token.clone());

        log::info!("Starting {} run with profile {}", mode.name(), profile.name);
        let _ = self.events.send(BenchEvent::RunStarted {
            mode: mode.name().to_string(),
        });

        let actuator = ThrottleActuator::new(self.commands.clone(), profile.arm_floor_pct());
        let sequencer = self.clone();
        let handle = tokio::spawn(async move {
            sequencer.run(mode, profile, actuator, token).await;
        });
        *self.run_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request cancellation of the active run.
    ///
    /// Cooperative: the run observes the token at its next checkpoint, then
    /// performs the fixed safety ramp-down before settling to idle.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.running || state.stopping {
                return;
            }
            state.stopping = true;
        }
        if let Some(token) = self.cancel.lock().unwrap().as_ref() {
            token.cancel();
        }
        log::info!("Run cancellation requested");
    }

    /// Operator confirmation for KV estimation voltage steps
    pub fn confirm_step(&self) {
        self.operator.notify_one();
    }

    /// Wait for the active run task to finish (test support and shutdown)
    pub async fn join(&self) {
        let handle = self.run_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(
        self,
        mode: TestMode,
        profile: Profile,
        actuator: ThrottleActuator,
        token: CancelToken,
    ) {
        let started_at = epoch_ms();
        let sampler_stop = Arc::new(AtomicBool::new(false));
        let sampler = tokio::spawn(sample_loop(
            Arc::clone(&self.state),
            self.hub.clone(),
            actuator.clone(),
            Arc::clone(&sampler_stop),
        ));

        let result = self.run_mode(&mode, &actuator, &token).await;

        let outcome = match result {
            Ok(()) => RunOutcome::Completed,
            Err(_) if token.is_cancelled() => RunOutcome::Cancelled,
            Err(e) => {
                log::error!("{} run failed: {:#}", mode.name(), e);
                let _ = self
                    .events
                    .send(BenchEvent::RunMessage(format!("Run failed: {:#}", e)));
                RunOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };

        // Safety requirement, not an optimization: a cancelled or failed run
        // still ramps down to the arm floor before settling to idle.
        if outcome != RunOutcome::Completed {
            let current = actuator.current_pct();
            log::warn!(
                "Ramping down from {:.1}% to arm floor after {:?}",
                current,
                outcome
            );
            let uninterruptible = CancelToken::new();
            if let Err(e) = actuator
                .ramp(current, actuator.floor_pct(), CANCEL_RAMP, &uninterruptible)
                .await
            {
                log::error!("Safety ramp-down failed: {:#}", e);
            }
        }
        if let Err(e) = actuator.motor_stop().await {
            log::error!("Motor stop failed: {:#}", e);
        }

        sampler_stop.store(true, Ordering::SeqCst);
        let _ = sampler.await;

        self.finalize(mode, profile, started_at, outcome).await;
    }

    async fn finalize(
        &self,
        mode: TestMode,
        profile: Profile,
        started_at: i64,
        outcome: RunOutcome,
    ) {
        let samples = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.samples)
        };

        if !samples.is_empty() {
            let analysis = analysis::analyze(&mode, &samples);
            let run = TestRun {
                mode,
                profile,
                samples,
                started_at,
                ended_at: epoch_ms(),
                outcome: outcome.clone(),
                analysis,
            };
            if let Err(e) = self.history.lock().unwrap().append(run) {
                log::error!("Failed to persist run history: {:#}", e);
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.stopping = false;
        }
        *self.cancel.lock().unwrap() = None;

        log::info!("Run finalized: {:?}", outcome);
        let _ = self.events.send(BenchEvent::RunFinished { outcome });
    }

    async fn run_mode(
        &self,
        mode: &TestMode,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        match mode {
            TestMode::Sweep(p) => self.run_sweep(p, actuator, token).await,
            TestMode::StepResponse(p) => self.run_step_response(p, actuator, token).await,
            TestMode::Endurance(p) => self.run_endurance(p, actuator, token).await,
            TestMode::InternalResistance(p) => self.run_ir(p, actuator, token).await,
            TestMode::KvEstimation(p) => self.run_kv(p, actuator, token).await,
            TestMode::ThermalStress(p) => self.run_thermal(p, actuator, token).await,
            TestMode::Mapping(p) => self.run_mapping(p, actuator, token).await,
        }
    }

    async fn sweep_pass(
        &self,
        start_pct: f64,
        end_pct: f64,
        step_pct: f64,
        dwell_s: f64,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        if step_pct <= 0.0 {
            bail!("Sweep step must be positive, got {}", step_pct);
        }

        actuator.ramp(0.0, start_pct, MODE_RAMP, token).await?;
        let mut pct = start_pct;
        while pct <= end_pct + 1e-9 {
            token.checkpoint()?;
            actuator.send_pct(pct).await?;
            dwell(dwell_s).await;
            pct += step_pct;
        }
        actuator.ramp(end_pct, 0.0, MODE_RAMP, token).await
    }

    async fn run_sweep(
        &self,
        p: &SweepParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        for pass in 0..p.repeat.max(1) {
            log::debug!("Sweep pass {}/{}", pass + 1, p.repeat.max(1));
            self.sweep_pass(p.start_pct, p.end_pct, p.step_pct, p.dwell_s, actuator, token)
                .await?;
        }
        Ok(())
    }

    async fn run_step_response(
        &self,
        p: &StepResponseParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        actuator.ramp(0.0, p.low_pct, MODE_RAMP, token).await?;
        for cycle in 0..p.cycles {
            log::debug!("Step cycle {}/{}", cycle + 1, p.cycles);
            token.checkpoint()?;
            actuator.ramp(p.low_pct, p.high_pct, MODE_RAMP, token).await?;
            dwell(p.on_s).await;
            actuator.ramp(p.high_pct, p.low_pct, MODE_RAMP, token).await?;
            dwell(p.off_s).await;
        }
        actuator.ramp(p.low_pct, 0.0, MODE_RAMP, token).await
    }

    async fn run_endurance(
        &self,
        p: &EnduranceParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        actuator.ramp(0.0, p.throttle_pct, MODE_RAMP, token).await?;

        let total_s = (p.duration_min * 60.0).round().max(0.0) as u64;
        for elapsed_s in 1..=total_s {
            token.checkpoint()?;
            sleep(Duration::from_secs(1)).await;
            let _ = self.events.send(BenchEvent::RunProgress { elapsed_s, total_s });
        }

        actuator.ramp(p.throttle_pct, 0.0, MODE_RAMP, token).await?;

        if let Some(cooldown_pct) = p.cooldown_pct {
            token.checkpoint()?;
            actuator.send_pct(cooldown_pct).await?;
            dwell(p.cooldown_s).await;
            token.checkpoint()?;
            actuator.ramp(cooldown_pct, 0.0, MODE_RAMP, token).await?;
        }
        Ok(())
    }

    async fn run_ir(
        &self,
        p: &InternalResistanceParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        actuator.ramp(0.0, p.baseline_pct, MODE_RAMP, token).await?;
        for pulse in 0..p.pulses {
            log::debug!("IR pulse {}/{}", pulse + 1, p.pulses);
            token.checkpoint()?;
            actuator
                .send_pct(p.baseline_pct + p.pulse_amplitude_pct)
                .await?;
            dwell(p.pulse_s).await;
            actuator.send_pct(p.baseline_pct).await?;
            dwell(p.rest_s).await;
        }
        actuator.ramp(p.baseline_pct, 0.0, MODE_RAMP, token).await
    }

    async fn run_kv(
        &self,
        p: &KvEstimationParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        actuator.ramp(0.0, p.throttle_pct, MODE_RAMP, token).await?;

        for step in 1..=p.voltage_steps {
            token.checkpoint()?;
            let _ = self.events.send(BenchEvent::AwaitingOperator {
                step,
                of: p.voltage_steps,
            });
            self.wait_for_operator(token).await?;

            let ticks = (p.dwell_s / SAMPLE_INTERVAL.as_secs_f64()).ceil().max(1.0) as u32;
            let mut voltage_sum = 0.0;
            let mut rpm_sum = 0.0;
            let mut count = 0u32;
            for _ in 0..ticks {
                token.checkpoint()?;
                sleep(SAMPLE_INTERVAL).await;
                if let Some(sample) = self.hub.last_sample() {
                    if sample.current > p.current_ceiling_a {
                        bail!(
                            "Current {:.2} A exceeded KV test ceiling {:.2} A",
                            sample.current,
                            p.current_ceiling_a
                        );
                    }
                    voltage_sum += sample.voltage;
                    rpm_sum += sample.rpm;
                    count += 1;
                }
            }
            if count > 0 {
                let mean_v = voltage_sum / f64::from(count);
                let mean_rpm = rpm_sum / f64::from(count);
                log::info!(
                    "KV step {}/{}: mean {:.2} V at {:.0} rpm",
                    step,
                    p.voltage_steps,
                    mean_v,
                    mean_rpm
                );
                let _ = self.events.send(BenchEvent::RunMessage(format!(
                    "Step {}: {:.2} V, {:.0} rpm",
                    step, mean_v, mean_rpm
                )));
            }
        }

        actuator.ramp(p.throttle_pct, 0.0, MODE_RAMP, token).await
    }

    async fn run_thermal(
        &self,
        p: &ThermalStressParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        actuator.ramp(0.0, p.first_pct, MODE_RAMP, token).await?;
        dwell(p.first_s).await;
        token.checkpoint()?;
        actuator.ramp(p.first_pct, p.second_pct, MODE_RAMP, token).await?;
        dwell(p.second_s).await;
        token.checkpoint()?;
        actuator.ramp(p.second_pct, 0.0, MODE_RAMP, token).await
    }

    async fn run_mapping(
        &self,
        p: &MappingParams,
        actuator: &ThrottleActuator,
        token: &CancelToken,
    ) -> Result<()> {
        for pass in 0..p.passes.max(1) {
            log::debug!("Mapping pass {}/{}", pass + 1, p.passes.max(1));
            self.sweep_pass(0.0, p.peak_pct, p.step_pct, p.dwell_s, actuator, token)
                .await?;
        }
        Ok(())
    }

    /// Wait until the operator confirms the next step, polling cancellation
    async fn wait_for_operator(&self, token: &CancelToken) -> Result<()> {
        loop {
            token.checkpoint()?;
            tokio::select! {
                _ = self.operator.notified() => return Ok(()),
                _ = sleep(Duration::from_millis(200)) => {}
            }
        }
    }
}

async fn dwell(seconds: f64) {
    if seconds > 0.0 {
        sleep(Duration::from_secs_f64(seconds)).await;
    }
}

/// Background sampler: one row per 200 ms, pairing last-known telemetry with
/// the commanded throttle. Idle until the run's first throttle command.
async fn sample_loop(
    state: Arc<Mutex<RunState>>,
    hub: TelemetryHub,
    actuator: ThrottleActuator,
    stop: Arc<AtomicBool>,
) {
    let mut ticker = interval(SAMPLE_INTERVAL);
    let mut epoch: Option<Instant> = None;

    loop {
        ticker.tick().await;
        if stop.load(Ordering::SeqCst) {
            return;
        }
        if !actuator.any_issued() {
            continue;
        }

        let elapsed = match epoch {
            Some(t0) => t0.elapsed().as_secs_f64(),
            None => {
                epoch = Some(Instant::now());
                0.0
            }
        };

        let mut row = hub.last_sample().unwrap_or_default();
        row.timestamp = elapsed;
        row.throttle_pct = actuator.current_pct();
        state.lock().unwrap().samples.push(row);
    }
}
