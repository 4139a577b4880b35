//! Shared access to the measurement store.
//!
//! [`PersistenceLayer`] owns the [`Store`] behind an async mutex. The mutex
//! is the single serialization point for the capture service, the flush
//! timer and the synchronizer, so concurrent writers never interleave inside
//! a transaction.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use cyface_store::{MeasurementQuery, Store, StoredMeasurement};
use cyface_types::{
    Acceleration, GeoLocation, Measurement, MeasurementId, MeasurementStatus, Modality, Track,
};

use crate::error::Result;
use crate::installation::InstallationIdentifier;

/// Cloneable handle to the measurement store.
#[derive(Debug, Clone)]
pub struct PersistenceLayer {
    store: Arc<Mutex<Store>>,
}

impl PersistenceLayer {
    /// Wrap an open store.
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Store::open(path.as_ref())?;
        info!("Opened measurement store at {}", path.as_ref().display());
        Ok(Self::new(store))
    }

    /// Open an in-memory store, for tests and ephemeral sessions.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    /// Lock the store for a sequence of operations.
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().await
    }

    /// Create a new open measurement.
    pub async fn create_measurement(&self, timestamp: i64, modality: Modality) -> Result<StoredMeasurement> {
        Ok(self.lock().await.create_measurement(timestamp, modality)?)
    }

    /// Open a new track on a measurement.
    pub async fn append_track(&self, measurement_id: MeasurementId) -> Result<Track> {
        Ok(self.lock().await.append_track(measurement_id)?)
    }

    /// Append points to the measurement's current track.
    pub async fn save(
        &self,
        measurement_id: MeasurementId,
        locations: &[GeoLocation],
        accelerations: &[Acceleration],
    ) -> Result<()> {
        Ok(self
            .lock()
            .await
            .save(measurement_id, locations, accelerations)?)
    }

    /// Load a measurement with all tracks.
    pub async fn load(&self, measurement_id: MeasurementId) -> Result<Measurement> {
        Ok(self.lock().await.load(measurement_id)?)
    }

    /// Load only the tracks of a measurement.
    pub async fn load_tracks(&self, measurement_id: MeasurementId) -> Result<Vec<Track>> {
        Ok(self.lock().await.load_tracks(measurement_id)?)
    }

    /// Summary of a single measurement.
    pub async fn get_measurement(&self, measurement_id: MeasurementId) -> Result<Option<StoredMeasurement>> {
        Ok(self.lock().await.get_measurement(measurement_id)?)
    }

    /// List measurement summaries.
    pub async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
        Ok(self.lock().await.query_measurements(query)?)
    }

    /// Measurements that are finished and not yet synchronized, oldest first.
    pub async fn pending_measurements(&self) -> Result<Vec<StoredMeasurement>> {
        let query = MeasurementQuery::new()
            .status(MeasurementStatus::Finished)
            .oldest_first();
        self.query_measurements(&query).await
    }

    /// Number of stored measurements.
    pub async fn count_measurements(&self) -> Result<u64> {
        Ok(self.lock().await.count_measurements()?)
    }

    /// Number of stored locations of a measurement.
    pub async fn count_locations(&self, measurement_id: MeasurementId) -> Result<u64> {
        Ok(self.lock().await.count_locations(measurement_id)?)
    }

    /// Number of stored acceleration samples of a measurement.
    pub async fn count_accelerations(&self, measurement_id: MeasurementId) -> Result<u64> {
        Ok(self.lock().await.count_accelerations(measurement_id)?)
    }

    /// Change a measurement's status.
    pub async fn update_status(&self, measurement_id: MeasurementId, status: MeasurementStatus) -> Result<()> {
        Ok(self.lock().await.update_status(measurement_id, status)?)
    }

    /// Mark a measurement as accepted by the collector.
    pub async fn mark_synchronized(&self, measurement_id: MeasurementId) -> Result<()> {
        Ok(self.lock().await.mark_synchronized(measurement_id)?)
    }

    /// Finish measurements left open or paused by an earlier session.
    pub async fn finish_capturing_measurements(&self) -> Result<usize> {
        Ok(self.lock().await.finish_capturing_measurements()?)
    }

    /// Delete a measurement and all its data.
    pub async fn delete(&self, measurement_id: MeasurementId) -> Result<()> {
        Ok(self.lock().await.delete(measurement_id)?)
    }

    /// Delete every measurement.
    pub async fn delete_all(&self) -> Result<usize> {
        Ok(self.lock().await.delete_all()?)
    }

    /// Drop acceleration samples of a measurement, keeping its track geometry.
    pub async fn clean(&self, measurement_id: MeasurementId) -> Result<usize> {
        Ok(self.lock().await.clean(measurement_id)?)
    }

    /// The installation identifier, created and persisted on first use.
    pub async fn installation_id(&self, identifier: &InstallationIdentifier) -> Result<String> {
        let store = self.lock().await;
        identifier.get_or_init(&*store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_store() {
        let persistence = PersistenceLayer::in_memory().unwrap();
        let other = persistence.clone();

        let measurement = persistence
            .create_measurement(1_000, Modality::Walking)
            .await
            .unwrap();
        other
            .save(measurement.id, &[GeoLocation::new(1_000, 51.0, 13.0, 1.0, 3.0)], &[])
            .await
            .unwrap();

        assert_eq!(persistence.count_locations(measurement.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_measurements_excludes_open_and_synchronized() {
        let persistence = PersistenceLayer::in_memory().unwrap();
        let open = persistence.create_measurement(1, Modality::Car).await.unwrap();
        let finished = persistence.create_measurement(2, Modality::Car).await.unwrap();
        let synced = persistence.create_measurement(3, Modality::Car).await.unwrap();

        persistence
            .update_status(finished.id, MeasurementStatus::Finished)
            .await
            .unwrap();
        persistence.mark_synchronized(synced.id).await.unwrap();

        let pending = persistence.pending_measurements().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![finished.id]);
        assert_ne!(open.id, finished.id);
    }
}
