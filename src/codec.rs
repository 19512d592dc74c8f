use log::debug;

/// Longest payload rendered by [`format_hex_dump`]; anything beyond this is
/// truncated rather than formatted.
pub const HEX_DUMP_MAX: usize = 32;

/// One measurement notification: pulses counted within the preceding
/// reporting interval, stamped with the interval start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Interval start, seconds since the Unix epoch.
    pub timestamp: u32,
    pub pulse_count: u16,
}

/// Battery level payload is a single byte holding the percentage directly.
/// Any other length is a malformed packet and yields nothing.
pub fn decode_battery(data: &[u8]) -> Option<u8> {
    if data.len() != 1 {
        debug!("battery payload has length {}, expected 1", data.len());
        return None;
    }
    Some(data[0])
}

/// Measurement payloads carry a little-endian u32 timestamp followed by a
/// little-endian u16 pulse count. Packets shorter than 6 bytes are dropped;
/// trailing bytes beyond the first 6 are unused by this monitor.
pub fn decode_measurement(data: &[u8]) -> Option<Measurement> {
    if data.len() < 6 {
        debug!("measurement payload has length {}, expected >= 6", data.len());
        return None;
    }
    let timestamp = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let pulse_count = u16::from_le_bytes([data[4], data[5]]);
    Some(Measurement {
        timestamp,
        pulse_count,
    })
}

/// The device id is the serial register hex-encoded in reverse byte order,
/// matching the id printed on the meter and used in the cloud upload path.
pub fn decode_device_id(data: &[u8]) -> String {
    let reversed: Vec<u8> = data.iter().rev().copied().collect();
    hex::encode(reversed)
}

/// The api key is the seed register hex-encoded in wire order with dashes
/// inserted before byte indices 4, 6, 8 and 10, giving the usual
/// 8-4-4-4-12 UUID grouping for a 16-byte seed.
pub fn decode_api_key(data: &[u8]) -> String {
    let mut key = String::with_capacity(data.len() * 2 + 4);
    for (i, byte) in data.iter().enumerate() {
        if i == 4 || i == 6 || i == 8 || i == 10 {
            key.push('-');
        }
        key.push_str(&hex::encode([*byte]));
    }
    key
}

/// Diagnostic hex rendering of a raw payload, truncated at [`HEX_DUMP_MAX`]
/// bytes.
pub fn format_hex_dump(data: &[u8]) -> String {
    let end = data.len().min(HEX_DUMP_MAX);
    hex::encode(&data[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_single_byte() {
        assert_eq!(decode_battery(&[87]), Some(87));
    }

    #[test]
    fn battery_wrong_length_dropped() {
        assert_eq!(decode_battery(&[]), None);
        assert_eq!(decode_battery(&[1, 2]), None);
    }

    #[test]
    fn measurement_little_endian() {
        // 2021-09-24T12:12:03Z = 0x614DB833, 50 pulses
        let data = [0x33, 0xb8, 0x4d, 0x61, 0x32, 0x00];
        let m = decode_measurement(&data).unwrap();
        assert_eq!(m.timestamp, 0x614d_b833);
        assert_eq!(m.pulse_count, 50);
    }

    #[test]
    fn measurement_high_pulse_count() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x01, 0x02];
        assert_eq!(decode_measurement(&data).unwrap().pulse_count, 0x0201);
    }

    #[test]
    fn measurement_trailing_bytes_ignored() {
        let data = [0x10, 0x00, 0x00, 0x00, 0x05, 0x00, 0xff, 0xff];
        let m = decode_measurement(&data).unwrap();
        assert_eq!(m.timestamp, 0x10);
        assert_eq!(m.pulse_count, 5);
    }

    #[test]
    fn measurement_short_payload_dropped() {
        assert_eq!(decode_measurement(&[0x33, 0xb8, 0x4d, 0x61, 0x32]), None);
        assert_eq!(decode_measurement(&[]), None);
    }

    #[test]
    fn device_id_reverses_byte_order() {
        assert_eq!(decode_device_id(&[0x01, 0x02, 0x03, 0x04]), "04030201");
    }

    #[test]
    fn api_key_uuid_grouping() {
        let seed: [u8; 16] = [
            0xde, 0xad, 0xbe, 0xef, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99,
            0xaa, 0xbb,
        ];
        let key = decode_api_key(&seed);
        assert_eq!(key, "deadbeef-0011-2233-4455-66778899aabb");
        assert_eq!(key.len(), 36);
    }

    #[test]
    fn hex_dump_truncates_at_cap() {
        let data = [0xabu8; 40];
        let dump = format_hex_dump(&data);
        assert_eq!(dump.len(), HEX_DUMP_MAX * 2);
        assert!(dump.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn hex_dump_short_input() {
        assert_eq!(format_hex_dump(&[0x01, 0x0f]), "010f");
    }
}
