use crate::mqtt::PublishAcks;
use async_trait::async_trait;
use common::domain::{ChangeNotifier, DomainError, DomainResult};
use rumqttc::AsyncClient;
use std::time::Duration;
use tracing::debug;

/// Payload announcing that new geofence events exist
pub const NOTIFICATION_PAYLOAD: &str = "geofence";

/// Build the per-subject notification topic, e.g. `trackbox/alice/events`
pub fn notification_topic(prefix: &str, subject_id: &str) -> String {
    format!("{}/{}/events", prefix, subject_id)
}

/// ChangeNotifier that publishes over MQTT
///
/// Publishes with QoS 1 and returns once the broker has acknowledged the
/// message. The PUBACK is observed by the event loop that drives `client`,
/// which must feed its events into the same [`PublishAcks`]. A notification
/// that is not acknowledged within `timeout` fails.
pub struct MqttChangeNotifier {
    client: AsyncClient,
    acks: PublishAcks,
    topic_prefix: String,
    timeout: Duration,
}

impl MqttChangeNotifier {
    pub fn new(
        client: AsyncClient,
        acks: PublishAcks,
        topic_prefix: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            acks,
            topic_prefix,
            timeout,
        }
    }
}

#[async_trait]
impl ChangeNotifier for MqttChangeNotifier {
    async fn notify_change(&self, subject_id: &str) -> DomainResult<()> {
        let topic = notification_topic(&self.topic_prefix, subject_id);

        let ack = self
            .acks
            .publish(&self.client, &topic, NOTIFICATION_PAYLOAD)
            .map_err(|e| {
                DomainError::NotificationError(format!("failed to publish to {}: {}", topic, e))
            })?;

        match tokio::time::timeout(self.timeout, ack).await {
            Ok(Ok(())) => {
                debug!(topic = %topic, "change notification acknowledged");
                Ok(())
            }
            Ok(Err(_)) => Err(DomainError::NotificationError(format!(
                "acknowledgement for {} was dropped",
                topic
            ))),
            Err(_) => Err(DomainError::NotificationError(format!(
                "not acknowledged within {:?} on {}",
                self.timeout, topic
            ))),
        }
    }
}
