use std::sync::{Arc, Mutex};

use crate::protocol::{Profile, StatusMask, TelemetrySample};

#[derive(Default)]
struct HubState {
    last_sample: Option<TelemetrySample>,
    last_status: StatusMask,
    profiles: Vec<Profile>,
    active_profile: Option<String>,
    firmware: Option<String>,
}

/// Last-known device state shared by the sequencer, watchdog, and UI.
///
/// Single slot, last-write-wins; there is no staleness guarantee beyond the
/// notification cadence. Telemetry updates land here unconditionally so idle
/// monitoring and in-run sampling read the same source of truth.
#[derive(Clone, Default)]
pub struct TelemetryHub {
    state: Arc<Mutex<HubState>>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(&self, sample: TelemetrySample) {
        self.state.lock().unwrap().last_sample = Some(sample);
    }

    pub fn last_sample(&self) -> Option<TelemetrySample> {
        self.state.lock().unwrap().last_sample.clone()
    }

    pub fn record_status(&self, mask: StatusMask) {
        self.state.lock().unwrap().last_status = mask;
    }

    pub fn last_status(&self) -> StatusMask {
        self.state.lock().unwrap().last_status
    }

    pub fn replace_profiles(&self, profiles: Vec<Profile>) {
        self.state.lock().unwrap().profiles = profiles;
    }

    pub fn upsert_profile(&self, profile: Profile) {
        let mut state = self.state.lock().unwrap();
        match state.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => state.profiles.push(profile),
        }
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.state.lock().unwrap().profiles.clone()
    }

    pub fn set_active_profile(&self, name: &str) {
        self.state.lock().unwrap().active_profile = Some(name.to_string());
    }

    /// The catalog entry matching the device's current profile name
    pub fn active_profile(&self) -> Option<Profile> {
        let state = self.state.lock().unwrap();
        let name = state.active_profile.as_deref()?;
        state.profiles.iter().find(|p| p.name == name).cloned()
    }

    pub fn set_firmware(&self, firmware: &str) {
        self.state.lock().unwrap().firmware = Some(firmware.to_string());
    }

    pub fn firmware(&self) -> Option<String> {
        self.state.lock().unwrap().firmware.clone()
    }

    /// Return to the clean no-device state (session teardown)
    pub fn clear(&self) {
        *self.state.lock().unwrap() = HubState::default();
    }
}
