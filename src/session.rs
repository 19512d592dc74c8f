use log::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::batch::{CloudUploader, ReadingBatcher, StoredReading};
use crate::codec;
use crate::mqtt::Sink;
use crate::registers::{Handle, HandleMap, Register};

/// Completion status reported by the transport for a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Ok,
    Failed,
}

impl GattStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, GattStatus::Ok)
    }
}

/// Transport-delivered events, in the order the underlying operations
/// complete. The transport must deliver these serially per connection.
#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    Disconnected,
    DiscoveryComplete { handles: HandleMap },
    /// Transport-level pairing/bonding finished; authentication with the
    /// meter itself starts here.
    PairingComplete { success: bool },
    ReadComplete {
        handle: Handle,
        status: GattStatus,
        data: Vec<u8>,
    },
    WriteComplete { handle: Handle, status: GattStatus },
    Notify { handle: Handle, data: Vec<u8> },
}

/// Register I/O for the transport to submit. Submissions are fire-and-forget;
/// completions come back later as [`Event`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Read(Handle),
    Write { handle: Handle, data: Vec<u8> },
    RegisterNotify(Handle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connected,
    Authenticating,
    Configuring,
    Streaming,
}

/// Drives the meter from "just connected" to "streaming measurements".
///
/// After the transport reports pairing complete, the 4-byte pairing code is
/// written to the meter. Its confirmation unlocks the configuration script:
/// read the reading batch size (correcting it with a write if it differs from
/// the configured interval), the device identity registers, battery and the
/// diagnostic registers. Once the batch size is settled, measurement
/// notifications are armed and every notification flows through the codec
/// into the accumulator, the sinks and (when a cloud uploader is configured)
/// the reading batcher.
///
/// There is no retry path: a failed submission or completion is logged and
/// dropped, and the session stalls in place until the transport disconnects,
/// which resets everything except the accumulator totals and the device
/// identity.
pub struct Session {
    state: State,
    authenticated: bool,
    handles: HandleMap,
    pairing_code: [u8; 4],
    reading_batch_size: [u8; 4],
    accumulator: Accumulator,
    battery_sink: Option<Box<dyn Sink>>,
    power_sink: Option<Box<dyn Sink>>,
    energy_sink: Option<Box<dyn Sink>>,
    daily_energy_sink: Option<Box<dyn Sink>>,
    cloud: Option<Box<dyn CloudUploader>>,
    batcher: ReadingBatcher,
    api_root: String,
    energy_cost: f64,
    device_id: Option<String>,
    api_key: Option<String>,
}

impl Session {
    pub fn new(pairing_code: u32, notification_interval: u8, accumulator: Accumulator) -> Self {
        Self {
            state: State::Disconnected,
            authenticated: false,
            handles: HandleMap::default(),
            pairing_code: pairing_code.to_le_bytes(),
            reading_batch_size: [notification_interval, 0, 0, 0],
            accumulator,
            battery_sink: None,
            power_sink: None,
            energy_sink: None,
            daily_energy_sink: None,
            cloud: None,
            batcher: ReadingBatcher::new(),
            api_root: String::new(),
            energy_cost: 0.0,
            device_id: None,
            api_key: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_battery_sink(&mut self, sink: Box<dyn Sink>) {
        self.battery_sink = Some(sink);
    }

    pub fn set_power_sink(&mut self, sink: Box<dyn Sink>) {
        self.power_sink = Some(sink);
    }

    pub fn set_energy_sink(&mut self, sink: Box<dyn Sink>) {
        self.energy_sink = Some(sink);
    }

    pub fn set_daily_energy_sink(&mut self, sink: Box<dyn Sink>) {
        self.daily_energy_sink = Some(sink);
    }

    pub fn set_cloud(&mut self, uploader: Box<dyn CloudUploader>, api_root: String, energy_cost: f64) {
        self.cloud = Some(uploader);
        self.api_root = api_root;
        self.energy_cost = energy_cost;
        self.apply_device_id();
        self.apply_api_key();
    }

    /// Pre-provisioned device id; the DeviceSerial read is skipped when set.
    pub fn set_device_id(&mut self, device_id: String) {
        self.device_id = Some(device_id);
        self.apply_device_id();
    }

    /// Pre-provisioned api key; the DeviceApiKeySeed read is skipped when set.
    pub fn set_api_key(&mut self, api_key: String) {
        self.api_key = Some(api_key);
        self.apply_api_key();
    }

    /// Feed one transport event through the machine and collect the register
    /// I/O to submit in response.
    pub fn handle_event(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Connected => {
                self.state = State::Connected;
                Vec::new()
            }
            Event::Disconnected => {
                info!("Disconnected, session state reset");
                self.state = State::Disconnected;
                self.authenticated = false;
                self.handles = HandleMap::default();
                Vec::new()
            }
            Event::DiscoveryComplete { handles } => {
                self.handles = handles;
                self.state = State::Authenticating;
                Vec::new()
            }
            Event::PairingComplete { success } => self.on_pairing_complete(success),
            Event::ReadComplete {
                handle,
                status,
                data,
            } => self.on_read(handle, status, &data),
            Event::WriteComplete { handle, status } => self.on_write(handle, status),
            Event::Notify { handle, data } => self.on_notify(handle, &data),
        }
    }

    fn on_pairing_complete(&mut self, success: bool) -> Vec<Action> {
        if !success {
            warn!("Transport pairing failed, not authenticating");
            return Vec::new();
        }
        match self.handles.handle(Register::PairingCode) {
            Some(handle) => {
                info!("Writing pairing code to meter");
                vec![Action::Write {
                    handle,
                    data: self.pairing_code.to_vec(),
                }]
            }
            None => {
                warn!("Pairing complete but no pairing code register resolved");
                Vec::new()
            }
        }
    }

    fn on_write(&mut self, handle: Handle, status: GattStatus) -> Vec<Action> {
        if !status.is_ok() {
            warn!("Write to handle {} failed", handle);
            return Vec::new();
        }
        match self.handles.register(handle) {
            Some(Register::PairingCode) if !self.authenticated => self.begin_configuring(),
            Some(Register::PairingCode) => {
                // Redelivered confirmation; the configuration script must
                // not run twice.
                debug!("Duplicate pairing code confirmation ignored");
                Vec::new()
            }
            Some(Register::ReadingBatchSize) => self.arm_measurements(),
            other => {
                warn!("Write confirmation for unmatched handle {} ({:?})", handle, other);
                Vec::new()
            }
        }
    }

    /// Pairing code accepted: kick off the configuration reads. Identity
    /// reads are skipped when pre-provisioned, battery only matters if a
    /// consumer is attached, firmware and led sensitivity are diagnostic.
    fn begin_configuring(&mut self) -> Vec<Action> {
        self.authenticated = true;
        self.state = State::Configuring;
        info!("Authenticated, reading meter configuration");

        let mut actions = Vec::new();
        if let Some(handle) = self.handles.handle(Register::ReadingBatchSize) {
            actions.push(Action::Read(handle));
        }
        if self.api_key.is_none() {
            if let Some(handle) = self.handles.handle(Register::DeviceApiKeySeed) {
                actions.push(Action::Read(handle));
            }
        }
        if self.device_id.is_none() {
            if let Some(handle) = self.handles.handle(Register::DeviceSerial) {
                actions.push(Action::Read(handle));
            }
        }
        if self.battery_sink.is_some() {
            if let Some(handle) = self.handles.handle(Register::Battery) {
                actions.push(Action::Read(handle));
                actions.push(Action::RegisterNotify(handle));
            }
        }
        if let Some(handle) = self.handles.handle(Register::Firmware) {
            actions.push(Action::Read(handle));
        }
        if let Some(handle) = self.handles.handle(Register::LedSensitivity) {
            actions.push(Action::Read(handle));
        }
        actions
    }

    /// Batch size settled: subscribe to measurements and start streaming.
    fn arm_measurements(&mut self) -> Vec<Action> {
        match self.handles.handle(Register::Measurement) {
            Some(handle) => {
                info!("Subscribing to measurement notifications");
                self.state = State::Streaming;
                vec![Action::RegisterNotify(handle)]
            }
            None => {
                warn!("No measurement register resolved, cannot stream");
                Vec::new()
            }
        }
    }

    fn on_read(&mut self, handle: Handle, status: GattStatus, data: &[u8]) -> Vec<Action> {
        if !status.is_ok() {
            warn!("Read from handle {} failed", handle);
            return Vec::new();
        }
        let register = self.handles.register(handle);
        if let Some(register) = register {
            if let Some(expected) = register.expected_len() {
                if data.len() != expected {
                    warn!(
                        "{:?} payload has length {}, expected {}",
                        register,
                        data.len(),
                        expected
                    );
                    return Vec::new();
                }
            }
        }
        match register {
            Some(Register::ReadingBatchSize) => {
                debug!("Reading batch size: 0x{}", codec::format_hex_dump(data));
                if data[0] != self.reading_batch_size[0] {
                    info!(
                        "Correcting reading batch size {} -> {}",
                        data[0], self.reading_batch_size[0]
                    );
                    vec![Action::Write {
                        handle,
                        data: self.reading_batch_size.to_vec(),
                    }]
                } else {
                    self.arm_measurements()
                }
            }
            Some(Register::Battery) => {
                self.publish_battery(data);
                Vec::new()
            }
            Some(Register::Firmware) => {
                debug!("Firmware: 0x{}", codec::format_hex_dump(data));
                Vec::new()
            }
            Some(Register::LedSensitivity) => {
                debug!("Led sensitivity: 0x{}", codec::format_hex_dump(data));
                Vec::new()
            }
            Some(Register::DeviceSerial) => {
                let device_id = codec::decode_device_id(data);
                info!("Meter device id: {}", device_id);
                self.device_id = Some(device_id);
                self.apply_device_id();
                Vec::new()
            }
            Some(Register::DeviceApiKeySeed) => {
                let api_key = codec::decode_api_key(data);
                info!("Meter api key: {}", api_key);
                self.api_key = Some(api_key);
                self.apply_api_key();
                Vec::new()
            }
            other => {
                warn!("Read completion for unmatched handle {} ({:?})", handle, other);
                Vec::new()
            }
        }
    }

    fn on_notify(&mut self, handle: Handle, data: &[u8]) -> Vec<Action> {
        match self.handles.register(handle) {
            Some(Register::Battery) => self.publish_battery(data),
            Some(Register::Measurement) => self.ingest_measurement(data),
            other => warn!("Notification for unmatched handle {} ({:?})", handle, other),
        }
        Vec::new()
    }

    fn publish_battery(&mut self, data: &[u8]) {
        debug!("Battery: 0x{}", codec::format_hex_dump(data));
        if let Some(percent) = codec::decode_battery(data) {
            if let Some(sink) = self.battery_sink.as_mut() {
                sink.publish(f64::from(percent));
            }
        }
    }

    fn ingest_measurement(&mut self, data: &[u8]) {
        debug!("Measurement: 0x{}", codec::format_hex_dump(data));
        let Some(measurement) = codec::decode_measurement(data) else {
            return;
        };
        let reading = self.accumulator.ingest(&measurement);
        info!(
            "Timestamp: {}, Pulses: {}, Average watts within interval: {:.1}",
            measurement.timestamp, measurement.pulse_count, reading.watts
        );

        if let Some(sink) = self.power_sink.as_mut() {
            sink.publish(reading.watts);
        }
        if let Some(sink) = self.energy_sink.as_mut() {
            sink.publish(reading.lifetime_kwh);
        }
        if let Some(sink) = self.daily_energy_sink.as_mut() {
            sink.publish(reading.daily_kwh);
        }

        if let Some(cloud) = self.cloud.as_mut() {
            let pulses_per_kwh = self.accumulator.pulses_per_kwh();
            let stored = StoredReading {
                timestamp: measurement.timestamp,
                pulses: measurement.pulse_count,
                watt_hours: (f64::from(measurement.pulse_count) * (pulses_per_kwh / 1000.0))
                    .round() as u32,
                cost: f64::from(measurement.pulse_count) / pulses_per_kwh * self.energy_cost,
                is_peak: false,
            };
            let identity_known = self.device_id.is_some() && self.api_key.is_some();
            self.batcher.record(stored, cloud.as_mut(), identity_known);
        }
    }

    fn apply_device_id(&mut self) {
        if let (Some(device_id), Some(cloud)) = (&self.device_id, self.cloud.as_mut()) {
            cloud.set_url(format!("{}{}", self.api_root, device_id));
        }
    }

    fn apply_api_key(&mut self) {
        if let (Some(api_key), Some(cloud)) = (&self.api_key, self.cloud.as_mut()) {
            cloud.set_headers(vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), api_key.clone()),
            ]);
        }
    }
}
