use serde::{Deserialize, Serialize};

/// The seven throttle-driven test algorithms and their parameters.
///
/// Serde-tagged by `mode` so runs persist with their full configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TestMode {
    Sweep(SweepParams),
    StepResponse(StepResponseParams),
    Endurance(EnduranceParams),
    InternalResistance(InternalResistanceParams),
    KvEstimation(KvEstimationParams),
    ThermalStress(ThermalStressParams),
    Mapping(MappingParams),
}

impl TestMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sweep(_) => "sweep",
            Self::StepResponse(_) => "step_response",
            Self::Endurance(_) => "endurance",
            Self::InternalResistance(_) => "internal_resistance",
            Self::KvEstimation(_) => "kv_estimation",
            Self::ThermalStress(_) => "thermal_stress",
            Self::Mapping(_) => "mapping",
        }
    }
}

/// Stepped throttle sweep with a dwell at each level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepParams {
    pub start_pct: f64,
    pub end_pct: f64,
    pub step_pct: f64,
    pub dwell_s: f64,
    pub repeat: u32,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            start_pct: 10.0,
            end_pct: 80.0,
            step_pct: 10.0,
            dwell_s: 3.0,
            repeat: 1,
        }
    }
}

/// Alternating low/high throttle square wave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponseParams {
    pub low_pct: f64,
    pub high_pct: f64,
    pub on_s: f64,
    pub off_s: f64,
    pub cycles: u32,
}

impl Default for StepResponseParams {
    fn default() -> Self {
        Self {
            low_pct: 15.0,
            high_pct: 60.0,
            on_s: 2.0,
            off_s: 2.0,
            cycles: 5,
        }
    }
}

/// Long constant-throttle hold with optional cooldown segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnduranceParams {
    pub throttle_pct: f64,
    pub duration_min: f64,
    pub cooldown_pct: Option<f64>,
    pub cooldown_s: f64,
}

impl Default for EnduranceParams {
    fn default() -> Self {
        Self {
            throttle_pct: 50.0,
            duration_min: 5.0,
            cooldown_pct: Some(15.0),
            cooldown_s: 30.0,
        }
    }
}

/// Load pulses around a baseline for voltage-sag measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalResistanceParams {
    pub baseline_pct: f64,
    pub pulse_amplitude_pct: f64,
    pub pulse_s: f64,
    pub rest_s: f64,
    pub pulses: u32,
}

impl Default for InternalResistanceParams {
    fn default() -> Self {
        Self {
            baseline_pct: 20.0,
            pulse_amplitude_pct: 30.0,
            pulse_s: 1.0,
            rest_s: 2.0,
            pulses: 8,
        }
    }
}

/// Constant low throttle across operator-adjusted supply voltages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvEstimationParams {
    pub throttle_pct: f64,
    pub voltage_steps: u32,
    pub dwell_s: f64,
    pub current_ceiling_a: f64,
}

impl Default for KvEstimationParams {
    fn default() -> Self {
        Self {
            throttle_pct: 15.0,
            voltage_steps: 4,
            dwell_s: 4.0,
            current_ceiling_a: 5.0,
        }
    }
}

/// Two throttle segments with independent durations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalStressParams {
    pub first_pct: f64,
    pub first_s: f64,
    pub second_pct: f64,
    pub second_s: f64,
}

impl Default for ThermalStressParams {
    fn default() -> Self {
        Self {
            first_pct: 70.0,
            first_s: 60.0,
            second_pct: 40.0,
            second_s: 120.0,
        }
    }
}

/// Repeated fixed sweep passes for throttle/thrust mapping by averaging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingParams {
    pub passes: u32,
    pub peak_pct: f64,
    pub step_pct: f64,
    pub dwell_s: f64,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            passes: 3,
            peak_pct: 90.0,
            step_pct: 10.0,
            dwell_s: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tag_round_trip() {
        let mode = TestMode::Sweep(SweepParams::default());
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["mode"], "sweep");

        let back: TestMode = serde_json::from_value(json).unwrap();
        assert_eq!(back, mode);
    }

    #[test]
    fn test_mode_names_match_tags() {
        let mode = TestMode::KvEstimation(KvEstimationParams::default());
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["mode"], mode.name());
    }
}
