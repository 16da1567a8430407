use crate::common::Event;
use crate::config::MqttSettings;
use crate::intake::source::EventSource;
use futures::stream::{BoxStream, StreamExt};
use rumqttc::{AsyncClient, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const RECONNECT_PAUSE: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

/// Broker options shared by the inbound and outbound connections. `role`
/// keeps their client ids distinct.
pub fn mqtt_options(settings: &MqttSettings, role: &str) -> MqttOptions {
    let client_id = format!("frigate-analyzer-{}-{}", role, std::process::id());
    let mut options = MqttOptions::new(client_id, settings.broker.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
    if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, settings.password.clone().unwrap_or_default());
    }
    options
}

/// Subscribes to the recorder's event topic and yields parsed events.
pub struct MqttEventSource {
    options: MqttOptions,
    topic: String,
    buffer: usize,
}

impl MqttEventSource {
    pub fn new(settings: &MqttSettings, buffer: usize) -> Self {
        Self {
            options: mqtt_options(settings, "events"),
            topic: settings.events_topic.clone(),
            buffer: buffer.max(1),
        }
    }
}

impl EventSource for MqttEventSource {
    fn into_stream(self: Box<Self>) -> BoxStream<'static, Event> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let (client, mut eventloop) = AsyncClient::new(self.options, REQUEST_CAPACITY);
        let topic = self.topic;

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                        // Subscriptions do not survive a clean-session reconnect.
                        info!(%topic, "Connected to MQTT broker, subscribing");
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            warn!(%topic, "Failed to subscribe: {}", e);
                        }
                    }
                    Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                        let Some(event) = decode_event(&publish.topic, &publish.payload) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            debug!("Event stream dropped, stopping MQTT intake");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        if tx.is_closed() {
                            break;
                        }
                        tokio::time::sleep(RECONNECT_PAUSE).await;
                    }
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

fn decode_event(topic: &str, payload: &[u8]) -> Option<Event> {
    match Event::from_frigate_json(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(%topic, "Ignoring message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_differ_per_role() {
        let settings = MqttSettings::default();
        let inbound = mqtt_options(&settings, "events");
        let outbound = mqtt_options(&settings, "results");
        assert_ne!(inbound.client_id(), outbound.client_id());
        assert_eq!(inbound.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn undecodable_payloads_are_skipped() {
        assert!(decode_event("frigate/events", b"\xff\xfe").is_none());
        assert!(decode_event("frigate/available", b"online").is_none());
        let event = decode_event(
            "frigate/events",
            br#"{"type": "new", "after": {"id": "e1", "camera": "Tuin", "label": "bird"}}"#,
        )
        .unwrap();
        assert_eq!(event.id, "e1");
    }
}
