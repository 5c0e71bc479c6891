use crate::domain::{DomainError, DomainResult, GeofenceEvent, GeofenceEventRepository};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::{debug, instrument};

const INSERT_GEOFENCE_EVENT: &str = "INSERT INTO geofence_events (event, entity_type, entity_id, target_entity_type, target_entity_id, event_time)
     VALUES ($1, $2, $3, $4, $5, $6)";

/// PostgreSQL implementation of GeofenceEventRepository
///
/// The `geofence_events` table is append-only: there is no unique key on the
/// event columns, so replays of the same transition produce separate rows.
#[derive(Clone)]
pub struct PostgresGeofenceEventRepository {
    client: PostgresClient,
}

impl PostgresGeofenceEventRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GeofenceEventRepository for PostgresGeofenceEventRepository {
    #[instrument(skip(self, event), fields(entity_id = %event.entity_id, target_entity_id = %event.target_entity_id))]
    async fn insert_event(&self, event: &GeofenceEvent) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .execute(
                INSERT_GEOFENCE_EVENT,
                &[
                    &event.event,
                    &event.entity_type,
                    &event.entity_id,
                    &event.target_entity_type,
                    &event.target_entity_id,
                    &event.event_time,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(rows_inserted = rows, "stored geofence event");

        Ok(())
    }
}
