use log::{debug, warn};
use serde::Serialize;

/// Number of readings collected before an upload is triggered. The cloud API
/// expects batches of exactly this size.
pub const BATCH_CAPACITY: usize = 15;

/// One derived reading held for upload.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoredReading {
    pub timestamp: u32,
    pub pulses: u16,
    pub watt_hours: u32,
    pub cost: f64,
    pub is_peak: bool,
}

/// Outbound HTTP collaborator for batch uploads. The session supplies the
/// per-device endpoint and auth headers once the device identity is known;
/// the batcher supplies the body and triggers the send.
pub trait CloudUploader {
    fn set_url(&mut self, url: String);
    fn set_headers(&mut self, headers: Vec<(String, String)>);
    fn set_body(&mut self, body: String);
    fn send(&mut self);
}

/// Fixed-capacity ring of readings, flushed as one JSON array when full.
pub struct ReadingBatcher {
    slots: [StoredReading; BATCH_CAPACITY],
    cursor: usize,
}

impl ReadingBatcher {
    pub fn new() -> Self {
        Self {
            slots: [StoredReading::default(); BATCH_CAPACITY],
            cursor: 0,
        }
    }

    /// Store one reading at the cursor. Filling the last slot flushes the
    /// batch synchronously before returning.
    pub fn record(
        &mut self,
        reading: StoredReading,
        uploader: &mut dyn CloudUploader,
        identity_known: bool,
    ) {
        self.slots[self.cursor] = reading;
        self.cursor += 1;
        if self.cursor == BATCH_CAPACITY {
            self.flush(uploader, identity_known);
        }
    }

    /// Reset the cursor and, if the device identity is resolved, upload all
    /// slots as one JSON array. Without an identity the cycle's readings are
    /// discarded.
    pub fn flush(&mut self, uploader: &mut dyn CloudUploader, identity_known: bool) {
        self.cursor = 0;
        if !identity_known {
            debug!("skipping cloud upload, device id or api key not yet known");
            return;
        }
        match serde_json::to_string(&self.slots[..]) {
            Ok(body) => {
                uploader.set_body(body);
                uploader.send();
            }
            Err(e) => warn!("Failed to serialize reading batch: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeUploader {
        bodies: Vec<String>,
        sends: usize,
    }

    impl CloudUploader for FakeUploader {
        fn set_url(&mut self, _url: String) {}
        fn set_headers(&mut self, _headers: Vec<(String, String)>) {}
        fn set_body(&mut self, body: String) {
            self.bodies.push(body);
        }
        fn send(&mut self) {
            self.sends += 1;
        }
    }

    fn reading(n: u16) -> StoredReading {
        StoredReading {
            timestamp: 1_632_487_923 + u32::from(n),
            pulses: n,
            watt_hours: u32::from(n),
            cost: f64::from(n) * 0.25,
            is_peak: false,
        }
    }

    #[test]
    fn fifteenth_record_triggers_exactly_one_flush() {
        let mut batcher = ReadingBatcher::new();
        let mut uploader = FakeUploader::default();
        for n in 0..14 {
            batcher.record(reading(n), &mut uploader, true);
            assert_eq!(uploader.sends, 0);
        }
        batcher.record(reading(14), &mut uploader, true);
        assert_eq!(uploader.sends, 1);
    }

    #[test]
    fn body_is_json_array_of_fifteen() {
        let mut batcher = ReadingBatcher::new();
        let mut uploader = FakeUploader::default();
        for n in 0..15 {
            batcher.record(reading(n), &mut uploader, true);
        }
        let body: serde_json::Value = serde_json::from_str(&uploader.bodies[0]).unwrap();
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), BATCH_CAPACITY);
        assert_eq!(entries[0]["pulses"], 0);
        assert_eq!(entries[14]["pulses"], 14);
        assert_eq!(entries[14]["timestamp"], 1_632_487_937u32);
        for entry in entries {
            assert_eq!(entry["is_peak"], false);
        }
    }

    #[test]
    fn cursor_restarts_after_flush() {
        let mut batcher = ReadingBatcher::new();
        let mut uploader = FakeUploader::default();
        for n in 0..30 {
            batcher.record(reading(n), &mut uploader, true);
        }
        assert_eq!(uploader.sends, 2);
        let body: serde_json::Value = serde_json::from_str(&uploader.bodies[1]).unwrap();
        assert_eq!(body[0]["pulses"], 15);
    }

    #[test]
    fn missing_identity_discards_cycle() {
        let mut batcher = ReadingBatcher::new();
        let mut uploader = FakeUploader::default();
        for n in 0..15 {
            batcher.record(reading(n), &mut uploader, false);
        }
        assert_eq!(uploader.sends, 0);
        // The cursor still restarted, so the next full cycle uploads.
        for n in 0..15 {
            batcher.record(reading(n), &mut uploader, true);
        }
        assert_eq!(uploader.sends, 1);
    }
}
