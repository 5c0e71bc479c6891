use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity type recorded for the tracked subject of a geofence event
pub const USER_ENTITY_TYPE: &str = "user";

/// Entity type recorded for the region a subject entered or left
pub const GEOFENCE_ENTITY_TYPE: &str = "geofence";

/// Domain entity for a geofence transition, as persisted to the event store
///
/// Built once per accepted transition message and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub event: String,
    pub entity_type: String,
    pub entity_id: String,
    pub target_entity_type: String,
    pub target_entity_id: String,
    pub event_time: DateTime<Utc>,
}

/// Repository trait for geofence event storage
/// Infrastructure layer (e.g., PostgreSQL) implements this trait
///
/// Implementations must be safe to share between concurrently running
/// ingestion tasks.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GeofenceEventRepository: Send + Sync {
    /// Append a single event to the store
    ///
    /// Every call creates a new record, even when an identical event was
    /// stored before.
    async fn insert_event(&self, event: &GeofenceEvent) -> DomainResult<()>;
}

/// Trait for announcing that new events exist for a subject
///
/// Implementations should:
/// - Publish a lightweight signal to a subject-scoped topic
/// - Request delivery acknowledgment and bound the wait
/// - Return error if the publish fails or times out
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify_change(&self, subject_id: &str) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_geofence_event_serializes_camel_case() {
        let event = GeofenceEvent {
            event: "enter".to_string(),
            entity_type: USER_ENTITY_TYPE.to_string(),
            entity_id: "bob".to_string(),
            target_entity_type: GEOFENCE_ENTITY_TYPE.to_string(),
            target_entity_id: "home".to_string(),
            event_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "enter");
        assert_eq!(json["entityType"], "user");
        assert_eq!(json["entityId"], "bob");
        assert_eq!(json["targetEntityType"], "geofence");
        assert_eq!(json["targetEntityId"], "home");
        assert_eq!(json["eventTime"], "2023-11-14T22:13:20Z");
    }
}
