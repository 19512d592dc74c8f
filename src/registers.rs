use uuid::Uuid;

/// Transport-resolved identity of a register, valid only for the current
/// connection. The BLE driver assigns these when service discovery completes.
pub type Handle = u16;

/// Powerpal custom service containing the metering characteristics.
pub const POWERPAL_SERVICE_UUID: Uuid = Uuid::from_u128(0x59DAABCD_12F4_25A6_7D4F_55961DCE4205);

const PAIRING_CODE_UUID: Uuid = Uuid::from_u128(0x59DA0011_12F4_25A6_7D4F_55961DCE4205);
const READING_BATCH_SIZE_UUID: Uuid = Uuid::from_u128(0x59DA0013_12F4_25A6_7D4F_55961DCE4205);
const MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x59DA0001_12F4_25A6_7D4F_55961DCE4205);
const LED_SENSITIVITY_UUID: Uuid = Uuid::from_u128(0x59DA0008_12F4_25A6_7D4F_55961DCE4205);
const DEVICE_API_KEY_SEED_UUID: Uuid = Uuid::from_u128(0x59DA0009_12F4_25A6_7D4F_55961DCE4205);
const DEVICE_SERIAL_UUID: Uuid = Uuid::from_u128(0x59DA0010_12F4_25A6_7D4F_55961DCE4205);

// Standard SIG characteristics: battery level (0x180F/0x2A19) and firmware
// revision string (0x2A26).
const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);
const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002A26_0000_1000_8000_00805F9B34FB);

/// The addressable registers the meter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    PairingCode,
    ReadingBatchSize,
    Measurement,
    Battery,
    Firmware,
    LedSensitivity,
    DeviceSerial,
    DeviceApiKeySeed,
}

impl Register {
    pub const ALL: [Register; 8] = [
        Register::PairingCode,
        Register::ReadingBatchSize,
        Register::Measurement,
        Register::Battery,
        Register::Firmware,
        Register::LedSensitivity,
        Register::DeviceSerial,
        Register::DeviceApiKeySeed,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            Register::PairingCode => PAIRING_CODE_UUID,
            Register::ReadingBatchSize => READING_BATCH_SIZE_UUID,
            Register::Measurement => MEASUREMENT_UUID,
            Register::Battery => BATTERY_LEVEL_UUID,
            Register::Firmware => FIRMWARE_REVISION_UUID,
            Register::LedSensitivity => LED_SENSITIVITY_UUID,
            Register::DeviceSerial => DEVICE_SERIAL_UUID,
            Register::DeviceApiKeySeed => DEVICE_API_KEY_SEED_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Register> {
        Register::ALL.iter().copied().find(|r| r.uuid() == uuid)
    }

    /// Exact payload length expected on reads, where the protocol fixes one.
    pub fn expected_len(self) -> Option<usize> {
        match self {
            Register::PairingCode | Register::ReadingBatchSize => Some(4),
            Register::Battery => Some(1),
            Register::DeviceSerial => Some(4),
            Register::DeviceApiKeySeed => Some(16),
            _ => None,
        }
    }

    pub fn readable(self) -> bool {
        !matches!(self, Register::PairingCode)
    }

    pub fn writable(self) -> bool {
        matches!(
            self,
            Register::PairingCode | Register::ReadingBatchSize | Register::Measurement
        )
    }

    pub fn notifiable(self) -> bool {
        matches!(
            self,
            Register::PairingCode
                | Register::ReadingBatchSize
                | Register::Measurement
                | Register::Battery
        )
    }
}

/// Register-to-handle mapping resolved at discovery time. Handles are not
/// stable across reconnects, so the session discards the map on disconnect.
#[derive(Debug, Clone, Default)]
pub struct HandleMap {
    entries: Vec<(Register, Handle)>,
}

impl HandleMap {
    pub fn insert(&mut self, register: Register, handle: Handle) {
        self.entries.retain(|(r, _)| *r != register);
        self.entries.push((register, handle));
    }

    pub fn handle(&self, register: Register) -> Option<Handle> {
        self.entries
            .iter()
            .find(|(r, _)| *r == register)
            .map(|(_, h)| *h)
    }

    pub fn register(&self, handle: Handle) -> Option<Register> {
        self.entries
            .iter()
            .find(|(_, h)| *h == handle)
            .map(|(r, _)| *r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_distinct() {
        for a in Register::ALL {
            for b in Register::ALL {
                if a != b {
                    assert_ne!(a.uuid(), b.uuid());
                }
            }
        }
    }

    #[test]
    fn from_uuid_round_trips() {
        for register in Register::ALL {
            assert_eq!(Register::from_uuid(register.uuid()), Some(register));
        }
        assert_eq!(Register::from_uuid(POWERPAL_SERVICE_UUID), None);
    }

    #[test]
    fn handle_map_resolves_both_ways() {
        let mut map = HandleMap::default();
        map.insert(Register::Measurement, 0x14);
        map.insert(Register::Battery, 0x10);
        assert_eq!(map.handle(Register::Measurement), Some(0x14));
        assert_eq!(map.register(0x10), Some(Register::Battery));
        assert_eq!(map.register(0x99), None);
        assert_eq!(map.handle(Register::Firmware), None);
    }

    #[test]
    fn handle_map_insert_replaces() {
        let mut map = HandleMap::default();
        map.insert(Register::Battery, 1);
        map.insert(Register::Battery, 2);
        assert_eq!(map.handle(Register::Battery), Some(2));
        assert_eq!(map.register(1), None);
    }
}
