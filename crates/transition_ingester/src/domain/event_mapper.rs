use crate::domain::TransitionEvent;
use chrono::DateTime;
use common::domain::{
    DomainError, DomainResult, GeofenceEvent, GEOFENCE_ENTITY_TYPE, USER_ENTITY_TYPE,
};

/// Project a decoded transition onto the stored event shape
///
/// The subject comes from the topic, not the payload. `tst` is read as
/// seconds since the Unix epoch in UTC.
pub fn map_transition_event(
    transition: &TransitionEvent,
    subject_id: &str,
) -> DomainResult<GeofenceEvent> {
    if subject_id.is_empty() {
        return Err(DomainError::InvalidTopic(
            "Subject ID cannot be empty".to_string(),
        ));
    }

    let event_time = DateTime::from_timestamp(transition.timestamp, 0).ok_or_else(|| {
        DomainError::PayloadDecodeError(format!(
            "Timestamp {} is out of range",
            transition.timestamp
        ))
    })?;

    Ok(GeofenceEvent {
        event: transition.event.clone(),
        entity_type: USER_ENTITY_TYPE.to_string(),
        entity_id: subject_id.to_string(),
        target_entity_type: GEOFENCE_ENTITY_TYPE.to_string(),
        target_entity_id: transition.description.clone(),
        event_time,
    })
}
