use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Raw throttle range used by the device's DShot-style encoding.
/// 0 is motor-stop; 48 is the lowest commandable throttle.
pub const THROTTLE_RAW_MIN: u16 = 48;
pub const THROTTLE_RAW_MAX: u16 = 2047;

/// Motor/propeller/battery limits for one device-side test profile.
///
/// Exactly one profile is active on the device at a time; the core treats it
/// as read-only context for clamping throttle and contextualizing limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    #[serde(rename = "motorKV")]
    pub motor_kv: u32,
    pub prop_diameter: f64,
    pub prop_pitch: f64,
    pub prop_blades: u32,
    pub battery_cell_count: u32,
    pub motor_poles: u32,
    pub motor_reverse: bool,
    pub arm_throttle_raw: u16,
    #[serde(rename = "maxRPM")]
    pub max_rpm: f64,
    #[serde(rename = "maxESCTemp")]
    pub max_esc_temp: f64,
    pub max_motor_temp: f64,
    pub max_current: f64,
    pub max_thrust: f64,
}

impl Profile {
    pub fn validate(&self) -> Result<()> {
        if self.motor_poles < 2 || self.motor_poles % 2 != 0 {
            bail!(
                "Profile {}: motor poles must be even and >= 2, got {}",
                self.name,
                self.motor_poles
            );
        }
        if self.arm_throttle_raw < THROTTLE_RAW_MIN || self.arm_throttle_raw > THROTTLE_RAW_MAX {
            bail!(
                "Profile {}: arm throttle {} outside raw range {}..={}",
                self.name,
                self.arm_throttle_raw,
                THROTTLE_RAW_MIN,
                THROTTLE_RAW_MAX
            );
        }
        Ok(())
    }

    /// Arm floor as a throttle percentage, mapped linearly from the raw range.
    ///
    /// The sequencer never commands below this value while a run is active.
    pub fn arm_floor_pct(&self) -> f64 {
        let raw = self
            .arm_throttle_raw
            .clamp(THROTTLE_RAW_MIN, THROTTLE_RAW_MAX);
        f64::from(raw - THROTTLE_RAW_MIN)
            / f64::from(THROTTLE_RAW_MAX - THROTTLE_RAW_MIN)
            * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(arm_raw: u16, poles: u32) -> Profile {
        Profile {
            name: "test".to_string(),
            motor_kv: 2300,
            prop_diameter: 5.0,
            prop_pitch: 4.5,
            prop_blades: 3,
            battery_cell_count: 4,
            motor_poles: poles,
            motor_reverse: false,
            arm_throttle_raw: arm_raw,
            max_rpm: 30000.0,
            max_esc_temp: 90.0,
            max_motor_temp: 95.0,
            max_current: 40.0,
            max_thrust: 1200.0,
        }
    }

    #[test]
    fn test_arm_floor_at_raw_minimum_is_zero() {
        assert_eq!(profile(48, 14).arm_floor_pct(), 0.0);
    }

    #[test]
    fn test_arm_floor_at_raw_maximum_is_full() {
        assert_eq!(profile(2047, 14).arm_floor_pct(), 100.0);
    }

    #[test]
    fn test_validate_rejects_odd_poles() {
        assert!(profile(48, 7).validate().is_err());
        assert!(profile(48, 0).validate().is_err());
        assert!(profile(48, 14).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_arm_throttle() {
        assert!(profile(47, 14).validate().is_err());
        assert!(profile(2048, 14).validate().is_err());
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let json = serde_json::to_value(profile(100, 14)).unwrap();
        assert!(json.get("motorKV").is_some());
        assert!(json.get("armThrottleRaw").is_some());
        assert!(json.get("maxRPM").is_some());
        assert!(json.get("maxESCTemp").is_some());
    }
}
