use anyhow::Result;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

use super::cancel::CancelToken;
use crate::protocol::{THROTTLE_RAW_MAX, THROTTLE_RAW_MIN};
use crate::session::CommandChannel;

/// Points per ramp, endpoints included (25 steps)
pub const RAMP_POINTS: usize = 26;

/// Map a throttle percentage onto the device's raw encoding
pub fn pct_to_raw(pct: f64) -> u16 {
    let clamped = pct.clamp(0.0, 100.0);
    let span = f64::from(THROTTLE_RAW_MAX - THROTTLE_RAW_MIN);
    THROTTLE_RAW_MIN + (clamped / 100.0 * span).round() as u16
}

pub fn raw_to_pct(raw: u16) -> f64 {
    let raw = raw.clamp(THROTTLE_RAW_MIN, THROTTLE_RAW_MAX);
    f64::from(raw - THROTTLE_RAW_MIN) / f64::from(THROTTLE_RAW_MAX - THROTTLE_RAW_MIN) * 100.0
}

#[derive(Default)]
struct Track {
    current_pct: f64,
    issued: bool,
}

/// Issues throttle commands for one run, clamped to the profile's arm floor.
///
/// The recorded commanded percentage is what the sampler pairs with incoming
/// telemetry, not the device's own throttle field.
#[derive(Clone)]
pub struct ThrottleActuator {
    commands: CommandChannel,
    floor_pct: f64,
    track: Arc<Mutex<Track>>,
}

impl ThrottleActuator {
    pub fn new(commands: CommandChannel, floor_pct: f64) -> Self {
        Self {
            commands,
            floor_pct,
            track: Arc::new(Mutex::new(Track::default())),
        }
    }

    pub fn floor_pct(&self) -> f64 {
        self.floor_pct
    }

    /// Commanded throttle as of the last issued command
    pub fn current_pct(&self) -> f64 {
        self.track.lock().unwrap().current_pct
    }

    /// Whether any throttle command has been issued this run
    pub fn any_issued(&self) -> bool {
        self.track.lock().unwrap().issued
    }

    /// Clamp, encode, and issue one throttle command.
    ///
    /// Requests below the arm floor yield the floor's encoding; a run never
    /// commands the device below its arm throttle.
    pub async fn send_pct(&self, pct: f64) -> Result<()> {
        let clamped = pct.clamp(self.floor_pct, 100.0);
        let raw = pct_to_raw(clamped);
        self.commands.send("throttle", json!({ "value": raw })).await?;

        let mut track = self.track.lock().unwrap();
        track.current_pct = clamped;
        track.issued = true;
        Ok(())
    }

    /// Ramp between two levels: exactly [`RAMP_POINTS`] evenly spaced
    /// commands with `duration / 25` sleeps between steps. The token is
    /// checked between steps, never mid-write or mid-sleep.
    pub async fn ramp(
        &self,
        from_pct: f64,
        to_pct: f64,
        duration: Duration,
        token: &CancelToken,
    ) -> Result<()> {
        let pause = duration / (RAMP_POINTS as u32 - 1);
        for i in 0..RAMP_POINTS {
            token.checkpoint()?;
            let t = i as f64 / (RAMP_POINTS - 1) as f64;
            self.send_pct(from_pct + (to_pct - from_pct) * t).await?;
            if i + 1 < RAMP_POINTS {
                sleep(pause).await;
            }
        }
        Ok(())
    }

    /// Raw motor-stop (0), below the commandable throttle range
    pub async fn motor_stop(&self) -> Result<()> {
        self.commands.send("throttle", json!({ "value": 0 })).await?;
        self.track.lock().unwrap().current_pct = 0.0;
        Ok(())
    }
}
