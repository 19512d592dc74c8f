use anyhow::{Context, Result};
use log::{info, warn};
use rumqttc::{Client, MqttOptions, QoS};
use std::time::Duration;

/// A measurement consumer. Battery percent, instantaneous power and energy
/// totals each go to their own sink; a sink that is not configured simply
/// never sees the value.
pub trait Sink {
    fn publish(&mut self, value: f64);
}

/// Publishes each value to an MQTT topic.
/// Uses QoS 0 (fire-and-forget) with one short-lived connection per publish.
pub struct MqttSink {
    host: String,
    port: u16,
    client_id: String,
    topic: String,
}

impl MqttSink {
    pub fn new(host: &str, port: u16, client_id: String, topic: String) -> Self {
        Self {
            host: host.to_string(),
            port,
            client_id,
            topic,
        }
    }

    fn try_publish(&self, value: f64) -> Result<()> {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_keep_alive(Duration::from_secs(60));

        let (client, mut connection) = Client::new(opts, 10);

        client
            .publish(
                &self.topic,
                QoS::AtMostOnce,
                false,
                value.to_string().into_bytes(),
            )
            .context("Failed to queue MQTT publish")?;

        // rumqttc requires driving the event loop to actually send the packet
        for event in connection.iter() {
            match event {
                Ok(rumqttc::Event::Outgoing(rumqttc::Outgoing::Publish(_))) => {
                    info!("Published {} to {}", value, self.topic);
                    break;
                }
                Ok(rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                Err(e) => return Err(anyhow::anyhow!("MQTT connection error: {}", e)),
                _ => continue,
            }
        }

        client.disconnect().ok();
        Ok(())
    }
}

impl Sink for MqttSink {
    fn publish(&mut self, value: f64) {
        if let Err(e) = self.try_publish(value) {
            warn!("Failed to publish to {}: {}", self.topic, e);
        }
    }
}
