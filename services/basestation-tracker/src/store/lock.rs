//! Session locking for persisted aircraft
//!
//! An address can be seen again long after its last tracking session ended.
//! A persisted record that has gone `time_to_lock` without being seen is
//! locked, and the next write for that address starts a new record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::TrackingStore;
use crate::error::StoreError;
use crate::tracking::{TrackedAircraft, TrackingStatus};

/// Resolves the active persisted record for an address
pub struct AircraftLockManager {
    store: Arc<dyn TrackingStore>,
    time_to_lock: chrono::Duration,
}

impl AircraftLockManager {
    pub fn new(store: Arc<dyn TrackingStore>, time_to_lock: Duration) -> Self {
        Self {
            store,
            time_to_lock: chrono::Duration::milliseconds(time_to_lock.as_millis() as i64),
        }
    }

    /// Latest unlocked record for the address, if it belongs to the same session
    ///
    /// The record is in the same session when `reference - last_seen` is below
    /// `time_to_lock`. Otherwise it is locked here and `None` is returned.
    pub async fn get_active_aircraft(
        &self,
        address: &str,
        reference: DateTime<Utc>,
    ) -> Result<Option<TrackedAircraft>, StoreError> {
        let Some(mut latest) = self.store.get_latest_aircraft(address).await? else {
            return Ok(None);
        };

        if latest.status == TrackingStatus::Locked {
            return Ok(None);
        }

        if reference.signed_duration_since(latest.last_seen) < self.time_to_lock {
            return Ok(Some(latest));
        }

        debug!(
            "Locking aircraft {} (record {}, last seen {})",
            address, latest.id, latest.last_seen
        );
        latest.status = TrackingStatus::Locked;
        self.store.write_aircraft(&latest).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    async fn setup(last_seen: DateTime<Utc>) -> (Arc<MemoryStore>, AircraftLockManager) {
        let store = Arc::new(MemoryStore::new());
        store.write_aircraft(&TrackedAircraft::new("406A3D", last_seen)).await.unwrap();
        let manager = AircraftLockManager::new(store.clone(), Duration::from_secs(600));
        (store, manager)
    }

    #[tokio::test]
    async fn test_recent_record_is_active() {
        let now = Utc::now();
        let (_, manager) = setup(now - ChronoDuration::seconds(30)).await;
        let active = manager.get_active_aircraft("406A3D", now).await.unwrap();
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn test_boundary_locks_record() {
        let now = Utc::now();
        let (store, manager) = setup(now - ChronoDuration::seconds(600)).await;

        assert!(manager.get_active_aircraft("406A3D", now).await.unwrap().is_none());
        let latest = store.get_latest_aircraft("406A3D").await.unwrap().unwrap();
        assert_eq!(latest.status, TrackingStatus::Locked);

        // Locked records are never reused
        let later = manager.get_active_aircraft("406A3D", latest.last_seen).await.unwrap();
        assert!(later.is_none());
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let (_, manager) = setup(Utc::now()).await;
        assert!(manager.get_active_aircraft("4CA2D8", Utc::now()).await.unwrap().is_none());
    }
}
