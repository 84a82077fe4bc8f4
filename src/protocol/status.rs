use serde::{Deserialize, Serialize};

// Bit positions are part of the firmware wire contract. Order:
// init flags (0-4), task flags (5-7), runtime flags (8-14), warnings (15-21).
pub const BIT_CFG_OK: u32 = 0;
pub const BIT_DSHOT_OK: u32 = 1;
pub const BIT_KISS_TELEM_OK: u32 = 2;
pub const BIT_LOAD_CELL_OK: u32 = 3;
pub const BIT_TEMP_SENSOR_OK: u32 = 4;
pub const BIT_DSHOT_TASK: u32 = 5;
pub const BIT_KISS_TASK: u32 = 6;
pub const BIT_SENSOR_TASK: u32 = 7;
pub const BIT_MOTOR_ARMED: u32 = 8;
pub const BIT_MOTOR_SPINNING: u32 = 9;
pub const BIT_DSHOT_SEND_OK: u32 = 10;
pub const BIT_KISS_READ_OK: u32 = 11;
pub const BIT_TARE_OK: u32 = 12;
pub const BIT_LOAD_READ_OK: u32 = 13;
pub const BIT_TEMP_READ_OK: u32 = 14;
pub const BIT_WARN_BATTERY_LOW: u32 = 15;
pub const BIT_WARN_ESC_OVERHEAT: u32 = 16;
pub const BIT_WARN_MOTOR_OVERHEAT: u32 = 17;
pub const BIT_WARN_OVER_CURRENT: u32 = 18;
pub const BIT_WARN_OVER_RPM: u32 = 19;
pub const BIT_WARN_MOTOR_STALL: u32 = 20;
pub const BIT_WARN_PROFILE_STORE_FULL: u32 = 21;

const WARNING_MASK: u32 = 0b111_1111 << BIT_WARN_BATTERY_LOW;

/// Packed 22-bit device status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMask(pub u32);

impl StatusMask {
    pub fn bit(&self, position: u32) -> bool {
        self.0 & (1 << position) != 0
    }

    pub fn armed(&self) -> bool {
        self.bit(BIT_MOTOR_ARMED)
    }

    pub fn spinning(&self) -> bool {
        self.bit(BIT_MOTOR_SPINNING)
    }

    pub fn has_warnings(&self) -> bool {
        self.0 & WARNING_MASK != 0
    }

    /// Human-readable names of the warning bits currently set
    pub fn active_warnings(&self) -> Vec<&'static str> {
        const WARNINGS: [(u32, &str); 7] = [
            (BIT_WARN_BATTERY_LOW, "battery-low"),
            (BIT_WARN_ESC_OVERHEAT, "esc-overheat"),
            (BIT_WARN_MOTOR_OVERHEAT, "motor-overheat"),
            (BIT_WARN_OVER_CURRENT, "over-current"),
            (BIT_WARN_OVER_RPM, "over-rpm"),
            (BIT_WARN_MOTOR_STALL, "motor-stall"),
            (BIT_WARN_PROFILE_STORE_FULL, "profile-store-full"),
        ];

        WARNINGS
            .iter()
            .filter(|(bit, _)| self.bit(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Named-boolean form of the status word.
///
/// Firmware normally sends the packed integer, but the named form is part of
/// the wire contract and must pack to the identical mask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFlags {
    pub cfg_ok: bool,
    pub dshot_ok: bool,
    pub kiss_telem_ok: bool,
    pub load_cell_ok: bool,
    pub temp_sensor_ok: bool,
    pub dshot_task: bool,
    pub kiss_task: bool,
    pub sensor_task: bool,
    pub motor_armed: bool,
    pub motor_spinning: bool,
    pub dshot_send_ok: bool,
    pub kiss_read_ok: bool,
    pub tare_ok: bool,
    pub load_read_ok: bool,
    pub temp_read_ok: bool,
    pub warn_battery_low: bool,
    pub warn_esc_overheat: bool,
    pub warn_motor_overheat: bool,
    pub warn_over_current: bool,
    pub warn_over_rpm: bool,
    pub warn_motor_stall: bool,
    pub warn_profile_store_full: bool,
}

impl StatusFlags {
    pub fn pack(&self) -> StatusMask {
        let bits = [
            (BIT_CFG_OK, self.cfg_ok),
            (BIT_DSHOT_OK, self.dshot_ok),
            (BIT_KISS_TELEM_OK, self.kiss_telem_ok),
            (BIT_LOAD_CELL_OK, self.load_cell_ok),
            (BIT_TEMP_SENSOR_OK, self.temp_sensor_ok),
            (BIT_DSHOT_TASK, self.dshot_task),
            (BIT_KISS_TASK, self.kiss_task),
            (BIT_SENSOR_TASK, self.sensor_task),
            (BIT_MOTOR_ARMED, self.motor_armed),
            (BIT_MOTOR_SPINNING, self.motor_spinning),
            (BIT_DSHOT_SEND_OK, self.dshot_send_ok),
            (BIT_KISS_READ_OK, self.kiss_read_ok),
            (BIT_TARE_OK, self.tare_ok),
            (BIT_LOAD_READ_OK, self.load_read_ok),
            (BIT_TEMP_READ_OK, self.temp_read_ok),
            (BIT_WARN_BATTERY_LOW, self.warn_battery_low),
            (BIT_WARN_ESC_OVERHEAT, self.warn_esc_overheat),
            (BIT_WARN_MOTOR_OVERHEAT, self.warn_motor_overheat),
            (BIT_WARN_OVER_CURRENT, self.warn_over_current),
            (BIT_WARN_OVER_RPM, self.warn_over_rpm),
            (BIT_WARN_MOTOR_STALL, self.warn_motor_stall),
            (BIT_WARN_PROFILE_STORE_FULL, self.warn_profile_store_full),
        ];

        let mut mask = 0u32;
        for (bit, set) in bits {
            if set {
                mask |= 1 << bit;
            }
        }
        StatusMask(mask)
    }

    pub fn unpack(mask: StatusMask) -> Self {
        Self {
            cfg_ok: mask.bit(BIT_CFG_OK),
            dshot_ok: mask.bit(BIT_DSHOT_OK),
            kiss_telem_ok: mask.bit(BIT_KISS_TELEM_OK),
            load_cell_ok: mask.bit(BIT_LOAD_CELL_OK),
            temp_sensor_ok: mask.bit(BIT_TEMP_SENSOR_OK),
            dshot_task: mask.bit(BIT_DSHOT_TASK),
            kiss_task: mask.bit(BIT_KISS_TASK),
            sensor_task: mask.bit(BIT_SENSOR_TASK),
            motor_armed: mask.bit(BIT_MOTOR_ARMED),
            motor_spinning: mask.bit(BIT_MOTOR_SPINNING),
            dshot_send_ok: mask.bit(BIT_DSHOT_SEND_OK),
            kiss_read_ok: mask.bit(BIT_KISS_READ_OK),
            tare_ok: mask.bit(BIT_TARE_OK),
            load_read_ok: mask.bit(BIT_LOAD_READ_OK),
            temp_read_ok: mask.bit(BIT_TEMP_READ_OK),
            warn_battery_low: mask.bit(BIT_WARN_BATTERY_LOW),
            warn_esc_overheat: mask.bit(BIT_WARN_ESC_OVERHEAT),
            warn_motor_overheat: mask.bit(BIT_WARN_MOTOR_OVERHEAT),
            warn_over_current: mask.bit(BIT_WARN_OVER_CURRENT),
            warn_over_rpm: mask.bit(BIT_WARN_OVER_RPM),
            warn_motor_stall: mask.bit(BIT_WARN_MOTOR_STALL),
            warn_profile_store_full: mask.bit(BIT_WARN_PROFILE_STORE_FULL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let flags = StatusFlags {
            cfg_ok: true,
            dshot_ok: true,
            motor_armed: true,
            warn_over_rpm: true,
            warn_profile_store_full: true,
            ..Default::default()
        };

        let mask = flags.pack();
        assert_eq!(StatusFlags::unpack(mask), flags);
    }

    #[test]
    fn test_bit_positions_match_wire_contract() {
        let flags = StatusFlags {
            motor_armed: true,
            motor_spinning: true,
            warn_battery_low: true,
            ..Default::default()
        };

        let mask = flags.pack();
        assert_eq!(mask.0, (1 << 8) | (1 << 9) | (1 << 15));
        assert!(mask.armed());
        assert!(mask.spinning());
        assert!(mask.has_warnings());
    }

    #[test]
    fn test_active_warnings_names() {
        let mask = StatusMask((1 << BIT_WARN_ESC_OVERHEAT) | (1 << BIT_WARN_MOTOR_STALL));
        assert_eq!(mask.active_warnings(), vec!["esc-overheat", "motor-stall"]);
        assert!(!StatusMask(0).has_warnings());
    }

    #[test]
    fn test_all_22_bits_round_trip() {
        let mask = StatusMask((1 << 22) - 1);
        let flags = StatusFlags::unpack(mask);
        assert_eq!(flags.pack(), mask);
    }
}
