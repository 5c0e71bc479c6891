use crate::domain::{
    check_delivery, decode_transition_event, map_transition_event, parse_topic, DeliveryDecision,
};
use bytes::Bytes;
use common::domain::{ChangeNotifier, DomainResult, GeofenceEventRepository};
use std::sync::Arc;
use tracing::{debug, instrument, warn, Span};

/// A single delivery handed over by the transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Set by the broker when this copy is a redelivery
    pub duplicate: bool,
    pub message_id: u16,
}

/// Why a well-formed message was dropped without side effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    NotTransition { message_type: String },
    Duplicate,
}

/// Result of a successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Discarded(DiscardReason),
    /// The event was written. `notified` is false when the change
    /// notification could not be published; the run still counts as a success.
    Persisted { notified: bool },
}

/// Domain service that turns tracker transition messages into stored
/// geofence events
///
/// Flow:
/// 1. Decode the JSON payload
/// 2. Drop anything that is not a `transition`
/// 3. Drop broker-flagged redeliveries
/// 4. Derive the subject from the topic and map to a GeofenceEvent
/// 5. Append the event via the repository trait
/// 6. Announce the change via the notifier trait (best effort)
///
/// Runs carry no state between messages, so the service can be shared by
/// concurrently executing tasks.
pub struct TransitionIngestionService {
    repository: Arc<dyn GeofenceEventRepository>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl TransitionIngestionService {
    pub fn new(
        repository: Arc<dyn GeofenceEventRepository>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            repository,
            notifier,
        }
    }

    /// Run one inbound message through the pipeline
    ///
    /// Decode, topic and persistence failures abort the run and are returned
    /// to the caller; no notification is sent for them. A failed notification
    /// is logged here and reported through [`RunOutcome::Persisted`].
    #[instrument(
        skip_all,
        fields(
            topic = %message.topic,
            message_id = message.message_id,
            duplicate = message.duplicate,
            subject_id = tracing::field::Empty,
            device_id = tracing::field::Empty,
        )
    )]
    pub async fn process_message(&self, message: &InboundMessage) -> DomainResult<RunOutcome> {
        let transition = decode_transition_event(&message.payload)?;

        if !transition.is_transition() {
            debug!(message_type = %transition.message_type, "ignoring non-transition message");
            return Ok(RunOutcome::Discarded(DiscardReason::NotTransition {
                message_type: transition.message_type,
            }));
        }

        if check_delivery(message.duplicate, message.message_id) == DeliveryDecision::Skip {
            return Ok(RunOutcome::Discarded(DiscardReason::Duplicate));
        }

        let parsed = parse_topic(&message.topic)?;
        let span = Span::current();
        span.record("subject_id", parsed.subject_id.as_str());
        if let Some(device_id) = parsed.device_id.as_deref() {
            span.record("device_id", device_id);
        }

        let geofence_event = map_transition_event(&transition, &parsed.subject_id)?;

        debug!(
            event = %geofence_event.event,
            geofence = %geofence_event.target_entity_id,
            event_time = %geofence_event.event_time,
            device_id = parsed.device_id.as_deref().unwrap_or_default(),
            tracker_id = %transition.tracker_id,
            trigger = %transition.trigger,
            latitude = transition.latitude,
            longitude = transition.longitude,
            accuracy = transition.accuracy,
            "storing geofence event"
        );

        self.repository.insert_event(&geofence_event).await?;

        let notified = match self.notifier.notify_change(&parsed.subject_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "event stored but change notification failed");
                false
            }
        };

        Ok(RunOutcome::Persisted { notified })
    }
}
