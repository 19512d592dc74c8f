use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "powerpalmon",
    about = "Powerpal BLE energy meter reader, MQTT publisher and cloud uploader"
)]
pub struct Config {
    /// Device name or address substring to match when scanning
    #[arg(long, default_value = "Powerpal")]
    pub device: String,

    /// Pairing code printed on the meter
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=999_999))]
    pub pairing_code: u32,

    /// Reporting interval in seconds, written to the meter as the reading
    /// batch size
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=60))]
    pub notification_interval: u8,

    /// Meter calibration constant (pulses per kWh)
    #[arg(long)]
    pub pulses_per_kwh: f64,

    /// BLE scan duration in seconds
    #[arg(long, default_value_t = 10)]
    pub scan_secs: u64,

    /// MQTT broker hostname (omit to disable MQTT publishing)
    #[arg(long)]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT client ID prefix
    #[arg(long, default_value = "powerpalmon")]
    pub mqtt_client_id: String,

    /// MQTT topic prefix; values are published to <prefix>/power,
    /// <prefix>/energy, <prefix>/daily_energy and <prefix>/battery
    #[arg(long, default_value = "tele/powerpal")]
    pub mqtt_topic: String,

    /// Upload reading batches to the cloud collector
    #[arg(long)]
    pub cloud_upload: bool,

    /// Energy unit cost used for uploaded readings (required with
    /// --cloud-upload)
    #[arg(long)]
    pub cost_per_kwh: Option<f64>,

    /// Collector endpoint; the device id is appended once known
    #[arg(long, default_value = "https://readings.powerpal.net/api/v1/meter_reading/")]
    pub api_root: String,

    /// Pre-provisioned 8-hex-digit device id (read from the meter if omitted)
    #[arg(long)]
    pub device_id: Option<String>,

    /// Pre-provisioned api key (read from the meter if omitted)
    #[arg(long)]
    pub api_key: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.cloud_upload && self.cost_per_kwh.is_none() {
            bail!("--cloud-upload requires --cost-per-kwh");
        }
        Ok(())
    }
}
