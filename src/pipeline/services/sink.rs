use crate::common::DetectionResult;
use crate::config::MqttSettings;
use crate::error::PublishError;
use crate::intake::mqtt::mqtt_options;
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives every successful verdict exactly once.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, result: &DetectionResult) -> Result<(), PublishError>;
}

/// Publishes results to the broker at-least-once.
pub struct MqttResultSink {
    client: AsyncClient,
    topic: String,
    detected_field: String,
    connection: JoinHandle<()>,
}

impl MqttResultSink {
    /// Must be called inside a tokio runtime: the connection is driven by a
    /// spawned task until the sink is dropped.
    pub fn connect(settings: &MqttSettings) -> Self {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(settings, "results"), 32);
        let connection = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        info!("Result publisher connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Result publisher connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            topic: settings.result_topic.clone(),
            detected_field: settings.detected_field.clone(),
            connection,
        }
    }
}

impl Drop for MqttResultSink {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

#[async_trait]
impl ResultSink for MqttResultSink {
    async fn publish(&self, result: &DetectionResult) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&result.to_payload(&self.detected_field))
            .map_err(|e| PublishError::Encode(e.to_string()))?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        debug!(event_id = %result.event_id, topic = %self.topic, "Result queued for broker");
        Ok(())
    }
}

/// Logs results instead of publishing them (`--dry-run`).
pub struct LogSink {
    detected_field: String,
}

impl LogSink {
    pub fn new(detected_field: impl Into<String>) -> Self {
        Self {
            detected_field: detected_field.into(),
        }
    }
}

#[async_trait]
impl ResultSink for LogSink {
    async fn publish(&self, result: &DetectionResult) -> Result<(), PublishError> {
        info!(
            event_id = %result.event_id,
            payload = %result.to_payload(&self.detected_field),
            "Dry run, result not published"
        );
        Ok(())
    }
}
