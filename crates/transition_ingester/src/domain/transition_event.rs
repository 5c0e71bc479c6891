use common::domain::{DomainError, DomainResult};
use serde::Deserialize;

/// Message type of the only payloads the ingester acts on
pub const TRANSITION_MESSAGE_TYPE: &str = "transition";

/// Location tracker message as published on `owntracks/{user}/{device}/event`
///
/// Every field is optional on the wire: anything missing decodes to its zero
/// value and unknown fields are ignored. Only `_type`, `tst`, `desc` and
/// `event` feed into the stored event; the tracker id, trigger and position
/// fields are logged alongside it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransitionEvent {
    #[serde(rename = "_type")]
    pub message_type: String,

    /// Seconds since the Unix epoch at which the transition happened
    #[serde(rename = "tst")]
    pub timestamp: i64,

    /// Name of the region that was entered or left
    #[serde(rename = "desc")]
    pub description: String,

    /// Transition kind, e.g. `enter` or `leave`
    pub event: String,

    #[serde(rename = "wtst")]
    pub waypoint_created_at: i64,

    #[serde(rename = "lat")]
    pub latitude: f64,

    #[serde(rename = "long")]
    pub longitude: f64,

    #[serde(rename = "acc")]
    pub accuracy: f64,

    #[serde(rename = "tid")]
    pub tracker_id: String,

    #[serde(rename = "t")]
    pub trigger: String,
}

impl TransitionEvent {
    pub fn is_transition(&self) -> bool {
        self.message_type == TRANSITION_MESSAGE_TYPE
    }
}

/// Decode a raw MQTT payload into a [`TransitionEvent`]
///
/// Fails only when the payload is not a well-formed JSON object (or a field
/// has the wrong JSON type); missing fields are not an error.
pub fn decode_transition_event(payload: &[u8]) -> DomainResult<TransitionEvent> {
    serde_json::from_slice(payload).map_err(|e| DomainError::PayloadDecodeError(e.to_string()))
}
