mod accumulator;
mod batch;
mod ble;
mod cloud;
mod codec;
mod config;
mod mqtt;
mod registers;
mod session;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::time::Duration;

use crate::mqtt::MqttSink;
use crate::session::{Event, Session};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = config::Config::parse();
    config.validate()?;
    info!("Starting powerpalmon");

    let mut accumulator =
        accumulator::Accumulator::new(config.pulses_per_kwh, config.notification_interval);
    accumulator.set_clock(Box::new(accumulator::SystemClock));
    info!("Pulse multiplier: {}", accumulator.pulse_multiplier());

    let mut session = Session::new(config.pairing_code, config.notification_interval, accumulator);

    if let Some(host) = &config.mqtt_host {
        let sink = |name: &str| {
            Box::new(MqttSink::new(
                host,
                config.mqtt_port,
                format!("{}-{}", config.mqtt_client_id, name),
                format!("{}/{}", config.mqtt_topic, name),
            ))
        };
        session.set_power_sink(sink("power"));
        session.set_energy_sink(sink("energy"));
        session.set_daily_energy_sink(sink("daily_energy"));
        session.set_battery_sink(sink("battery"));
        info!(
            "Publishing power/energy/daily_energy/battery to {}:{} under {}",
            host, config.mqtt_port, config.mqtt_topic
        );
    }

    if config.cloud_upload {
        session.set_cloud(
            Box::new(cloud::HttpUploader::new()),
            config.api_root.clone(),
            config.cost_per_kwh.unwrap_or(0.0),
        );
        info!("Cloud upload enabled via {}", config.api_root);
    }
    if let Some(device_id) = &config.device_id {
        session.set_device_id(device_id.clone());
    }
    if let Some(api_key) = &config.api_key {
        session.set_api_key(api_key.clone());
    }

    let adapter = ble::get_adapter().await?;
    loop {
        let peripheral = match ble::find_meter(&adapter, &config.device, config.scan_secs).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                error!("{}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if let Err(e) = ble::run_connection(&peripheral, &mut session).await {
            error!("Connection error: {}", e);
        }
        session.handle_event(Event::Disconnected);
        warn!("Link lost, rescanning");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
