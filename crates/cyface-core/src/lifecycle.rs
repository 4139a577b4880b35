//! Data capturing lifecycle.
//!
//! [`DataCapturingService`] drives the `Idle → Running ⇄ Paused → Idle`
//! state machine. While running, sensor callbacks feed a [`CaptureBuffer`]
//! and a background timer flushes it into the store every
//! [`CaptureConfig::flush_interval`]. Stopping or pausing cancels the timer
//! and performs one last flush, so no buffered point is lost.
//!
//! Lifecycle calls are serialized by an async mutex; a second caller waits
//! until the first transition has completed.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cyface_store::{MeasurementQuery, StoredMeasurement};
use cyface_types::{
    Acceleration, GeoLocation, Measurement, MeasurementId, MeasurementStatus, Modality, Track,
    now_millis,
};

use crate::buffer::CaptureBuffer;
use crate::config::CaptureConfig;
use crate::error::{Error, LifecycleError, Result};
use crate::events::{CapturingEvent, EventDispatcher, EventReceiver};
use crate::filter::LocationFilter;
use crate::persistence::PersistenceLayer;
use crate::sensors::{DiskSpaceProbe, SensorEventSource, SensorListener};

/// Externally visible capture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// No measurement is being captured.
    Idle,
    /// Sensors are delivering data into the active measurement.
    Running,
    /// The active measurement is suspended; sensors are stopped.
    Paused,
}

/// Identifier of the measurement currently receiving flushes.
type ActiveMeasurement = Arc<RwLock<Option<MeasurementId>>>;

fn read_active(active: &ActiveMeasurement) -> Option<MeasurementId> {
    *active.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_active(active: &ActiveMeasurement, id: Option<MeasurementId>) {
    *active.write().unwrap_or_else(PoisonError::into_inner) = id;
}

/// Moves buffered points into the store.
#[derive(Clone)]
struct Flusher {
    buffer: Arc<CaptureBuffer>,
    persistence: PersistenceLayer,
    events: EventDispatcher,
    active: ActiveMeasurement,
    disk: Option<Arc<dyn DiskSpaceProbe>>,
    low_disk_space_bytes: u64,
}

impl Flusher {
    /// Persist everything buffered into the active measurement.
    ///
    /// Returns the number of points written.
    async fn flush(&self) -> Result<usize> {
        let measurement_id = read_active(&self.active).ok_or(Error::NoActiveMeasurement)?;

        let snapshot = self.buffer.drain();
        if snapshot.is_empty() {
            self.check_disk_space();
            return Ok(0);
        }

        if let Err(e) = self
            .persistence
            .save(measurement_id, &snapshot.locations, &snapshot.accelerations)
            .await
        {
            // Keep the points for the next attempt.
            self.buffer.restore(snapshot);
            return Err(e);
        }

        self.events.send(CapturingEvent::DataFlushed {
            measurement_id,
            locations: snapshot.locations.len(),
            accelerations: snapshot.accelerations.len(),
        });
        self.check_disk_space();
        Ok(snapshot.len())
    }

    fn check_disk_space(&self) {
        if let Some(probe) = &self.disk
            && let Some(available_bytes) = probe.available_bytes()
            && available_bytes < self.low_disk_space_bytes
        {
            warn!(available_bytes, "Low disk space");
            self.events
                .send(CapturingEvent::LowDiskSpace { available_bytes });
        }
    }
}

/// Background task flushing the buffer at a fixed period.
struct FlushTimer {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushTimer {
    fn spawn(flusher: Flusher, period: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            // The first tick fires one period after start, not immediately.
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Flush timer cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match flusher.flush().await {
                            Ok(_) => {}
                            Err(Error::NoActiveMeasurement) => {
                                error!("Flush timer fired without an active measurement, stopping timer");
                                flusher.events.send(CapturingEvent::Error {
                                    message: Error::NoActiveMeasurement.to_string(),
                                });
                                break;
                            }
                            Err(e) => {
                                warn!("Periodic flush failed: {}", e);
                                flusher.events.send(CapturingEvent::Error {
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        });

        Self {
            cancel_token,
            handle,
        }
    }

    /// Cancel the timer and wait until any in-progress flush has finished.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.handle.await {
            error!("Flush timer task failed: {}", e);
        }
    }
}

/// Sensor listener feeding the capture buffer.
struct CaptureListener {
    buffer: Arc<CaptureBuffer>,
    filter: LocationFilter,
    events: EventDispatcher,
}

impl SensorListener for CaptureListener {
    fn on_location(&self, location: GeoLocation) {
        match self.filter.check(&location, now_millis()) {
            Ok(()) => {
                self.buffer.push_location(location);
                self.events
                    .send(CapturingEvent::GeoLocationAcquired { location });
            }
            Err(reason) => {
                debug!(%reason, "Discarding location");
                self.events.send(CapturingEvent::LocationRejected { reason });
            }
        }
    }

    fn on_acceleration(&self, sample: Acceleration) {
        self.buffer.push_acceleration(sample);
    }
}

struct Session {
    state: CaptureState,
    measurement: Option<StoredMeasurement>,
    timer: Option<FlushTimer>,
}

/// Orchestrates sensor subscription, buffering and persistence.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cyface_core::{CaptureConfig, DataCapturingService, MockSensorSource, PersistenceLayer};
/// use cyface_types::Modality;
///
/// # async fn example() -> cyface_core::Result<()> {
/// let config = CaptureConfig::load_default().unwrap_or_default();
/// let persistence = PersistenceLayer::open(&config.storage.path)?;
/// let service = DataCapturingService::new(config, persistence, Arc::new(MockSensorSource::new()));
///
/// let measurement = service.start(Modality::Bicycle).await?;
/// service.pause().await?;
/// service.resume().await?;
/// let finished = service.stop().await?;
/// assert_eq!(finished.id, measurement.id);
/// # Ok(())
/// # }
/// ```
pub struct DataCapturingService {
    config: CaptureConfig,
    persistence: PersistenceLayer,
    sensors: Arc<dyn SensorEventSource>,
    disk: Option<Arc<dyn DiskSpaceProbe>>,
    events: EventDispatcher,
    buffer: Arc<CaptureBuffer>,
    active: ActiveMeasurement,
    session: Mutex<Session>,
}

impl std::fmt::Debug for DataCapturingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCapturingService")
            .field("config", &self.config)
            .field("active", &read_active(&self.active))
            .finish_non_exhaustive()
    }
}

impl DataCapturingService {
    /// Create a service in the `Idle` state.
    pub fn new(
        config: CaptureConfig,
        persistence: PersistenceLayer,
        sensors: Arc<dyn SensorEventSource>,
    ) -> Self {
        let events = EventDispatcher::new(config.event_buffer);
        Self {
            config,
            persistence,
            sensors,
            disk: None,
            events,
            buffer: Arc::new(CaptureBuffer::new()),
            active: Arc::new(RwLock::new(None)),
            session: Mutex::new(Session {
                state: CaptureState::Idle,
                measurement: None,
                timer: None,
            }),
        }
    }

    /// Report free space through `probe` after each flush.
    #[must_use]
    pub fn with_disk_probe(mut self, probe: Arc<dyn DiskSpaceProbe>) -> Self {
        self.disk = Some(probe);
        self
    }

    /// Publish events on an existing dispatcher instead of a private one.
    #[must_use]
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    fn flusher(&self) -> Flusher {
        Flusher {
            buffer: Arc::clone(&self.buffer),
            persistence: self.persistence.clone(),
            events: self.events.clone(),
            active: Arc::clone(&self.active),
            disk: self.disk.clone(),
            low_disk_space_bytes: self.config.low_disk_space_bytes,
        }
    }

    fn listener(&self) -> Arc<dyn SensorListener> {
        Arc::new(CaptureListener {
            buffer: Arc::clone(&self.buffer),
            filter: LocationFilter::from_config(&self.config),
            events: self.events.clone(),
        })
    }

    /// The capture configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// The persistence layer shared with other components.
    pub fn persistence(&self) -> &PersistenceLayer {
        &self.persistence
    }

    /// The event dispatcher shared with other components.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribe to capture events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CaptureState {
        self.session.lock().await.state
    }

    /// The measurement being captured, if any.
    pub async fn current_measurement(&self) -> Option<StoredMeasurement> {
        self.session.lock().await.measurement.clone()
    }

    /// Start capturing a new measurement.
    ///
    /// Any measurement left open or paused by an earlier session is finished
    /// first. Calling `start` while already running logs a warning and
    /// returns the active measurement.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AlreadyPaused`] when capturing is paused
    /// - [`Error::SensorUnavailable`] when sensors cannot be started; the
    ///   newly created measurement is removed again
    pub async fn start(&self, modality: Modality) -> Result<StoredMeasurement> {
        let mut session = self.session.lock().await;
        match session.state {
            CaptureState::Running => {
                warn!("start() called while capturing is running, ignoring");
                return session.measurement.clone().ok_or(Error::NoActiveMeasurement);
            }
            CaptureState::Paused => return Err(LifecycleError::AlreadyPaused.into()),
            CaptureState::Idle => {}
        }

        let dangling = self.persistence.finish_capturing_measurements().await?;
        if dangling > 0 {
            warn!(dangling, "Finished measurements left over from a previous session");
        }

        let stale = self.buffer.drain();
        if !stale.is_empty() {
            warn!(points = stale.len(), "Discarding points received while idle");
        }

        let measurement = self
            .persistence
            .create_measurement(now_millis(), modality)
            .await?;
        self.persistence.append_track(measurement.id).await?;
        write_active(&self.active, Some(measurement.id));

        if let Err(e) = self.sensors.start_updates(self.listener()).await {
            error!(measurement_id = measurement.id, "Failed to start sensors: {}", e);
            write_active(&self.active, None);
            if let Err(cleanup) = self.persistence.delete(measurement.id).await {
                warn!("Failed to remove measurement {}: {}", measurement.id, cleanup);
            }
            return Err(e);
        }

        session.timer = Some(FlushTimer::spawn(
            self.flusher(),
            self.config.flush_interval(),
        ));
        session.state = CaptureState::Running;
        session.measurement = Some(measurement.clone());

        info!(measurement_id = measurement.id, %modality, "Capturing started");
        self.events.send(CapturingEvent::ServiceStarted {
            measurement_id: measurement.id,
            modality,
        });
        Ok(measurement)
    }

    /// Suspend capturing. Buffered data is flushed into the current track.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotRunning`] when idle
    /// - [`LifecycleError::AlreadyPaused`] when already paused
    pub async fn pause(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.state {
            CaptureState::Idle => return Err(LifecycleError::NotRunning.into()),
            CaptureState::Paused => return Err(LifecycleError::AlreadyPaused.into()),
            CaptureState::Running => {}
        }
        let measurement_id = Self::active_id(&session)?;

        self.sensors.stop_updates().await?;
        if let Some(timer) = session.timer.take() {
            timer.shutdown().await;
        }
        if let Err(e) = self
            .flush_with_status(measurement_id, MeasurementStatus::Paused)
            .await
        {
            self.recover_running(&mut session, measurement_id, &e).await;
            return Err(e);
        }

        session.state = CaptureState::Paused;
        Self::set_status(&mut session, MeasurementStatus::Paused);

        info!(measurement_id, "Capturing paused");
        self.events
            .send(CapturingEvent::ServicePaused { measurement_id });
        Ok(())
    }

    /// Continue a paused measurement in a new track.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotPaused`] when idle
    /// - [`LifecycleError::AlreadyRunning`] when running
    pub async fn resume(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.state {
            CaptureState::Idle => return Err(LifecycleError::NotPaused.into()),
            CaptureState::Running => return Err(LifecycleError::AlreadyRunning.into()),
            CaptureState::Paused => {}
        }
        let measurement_id = Self::active_id(&session)?;

        if let Err(e) = self.sensors.start_updates(self.listener()).await {
            error!(measurement_id, "Failed to restart sensors: {}", e);
            return Err(e);
        }
        let track = match self.reopen(measurement_id).await {
            Ok(track) => track,
            Err(e) => {
                error!(measurement_id, "Failed to open a new track: {}", e);
                if let Err(stop) = self.sensors.stop_updates().await {
                    warn!("Failed to stop sensors cleanly: {}", stop);
                }
                let dropped = self.buffer.drain();
                if !dropped.is_empty() {
                    warn!(points = dropped.len(), "Discarding points received while resuming");
                }
                return Err(e);
            }
        };
        Self::set_status(&mut session, MeasurementStatus::Open);

        session.timer = Some(FlushTimer::spawn(
            self.flusher(),
            self.config.flush_interval(),
        ));
        session.state = CaptureState::Running;
        if let Some(measurement) = session.measurement.as_mut() {
            measurement.track_count = track.index + 1;
        }

        info!(measurement_id, track = track.index, "Capturing resumed");
        self.events.send(CapturingEvent::ServiceResumed {
            measurement_id,
            track: track.index,
        });
        Ok(())
    }

    /// Stop capturing and finish the measurement.
    ///
    /// Sensors are unsubscribed and the flush timer is cancelled before a
    /// final flush, so every point received before `stop` was called is
    /// persisted. Returns the finished measurement's summary.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotRunning`] when idle
    /// - [`LifecycleError::IsPaused`] when paused; resume first
    /// - [`Error::Store`] when the final flush fails; capturing continues and
    ///   `stop` may be called again. If the measurement was removed from the
    ///   store meanwhile, the service is `Idle` afterwards
    pub async fn stop(&self) -> Result<StoredMeasurement> {
        let mut session = self.session.lock().await;
        match session.state {
            CaptureState::Idle => return Err(LifecycleError::NotRunning.into()),
            CaptureState::Paused => return Err(LifecycleError::IsPaused.into()),
            CaptureState::Running => {}
        }
        let measurement_id = Self::active_id(&session)?;

        if let Err(e) = self.sensors.stop_updates().await {
            warn!("Failed to stop sensors cleanly: {}", e);
        }
        if let Some(timer) = session.timer.take() {
            timer.shutdown().await;
        }
        let flushed = match self
            .flush_with_status(measurement_id, MeasurementStatus::Finished)
            .await
        {
            Ok(flushed) => flushed,
            Err(e) => {
                self.recover_running(&mut session, measurement_id, &e).await;
                return Err(e);
            }
        };
        debug!(measurement_id, flushed, "Final flush complete");

        write_active(&self.active, None);
        session.measurement = None;
        session.state = CaptureState::Idle;

        let summary = self
            .persistence
            .get_measurement(measurement_id)
            .await?
            .ok_or(cyface_store::Error::NotFound(measurement_id))?;

        info!(
            measurement_id,
            locations = summary.location_count,
            accelerations = summary.acceleration_count,
            "Capturing stopped"
        );
        self.events
            .send(CapturingEvent::ServiceStopped { measurement_id });
        Ok(summary)
    }

    /// Final flush followed by the status change of a pause or stop.
    async fn flush_with_status(
        &self,
        measurement_id: MeasurementId,
        status: MeasurementStatus,
    ) -> Result<usize> {
        let flushed = self.flusher().flush().await?;
        self.persistence.update_status(measurement_id, status).await?;
        Ok(flushed)
    }

    /// Reopen a paused measurement in a new track.
    ///
    /// The status is changed first so a failed track insert leaves no empty
    /// track behind.
    async fn reopen(&self, measurement_id: MeasurementId) -> Result<Track> {
        self.persistence
            .update_status(measurement_id, MeasurementStatus::Open)
            .await?;
        match self.persistence.append_track(measurement_id).await {
            Ok(track) => Ok(track),
            Err(e) => {
                if let Err(revert) = self
                    .persistence
                    .update_status(measurement_id, MeasurementStatus::Paused)
                    .await
                {
                    warn!(measurement_id, "Failed to restore paused status: {}", revert);
                }
                Err(e)
            }
        }
    }

    /// Bring a session whose pause or stop failed after the sensors were
    /// unsubscribed back into a consistent state.
    ///
    /// When the measurement no longer exists the session ends and the service
    /// is `Idle`. Otherwise sensors and flush timer are restarted and the
    /// service keeps `Running`; if the sensors refuse, it ends up `Paused`.
    async fn recover_running(
        &self,
        session: &mut Session,
        measurement_id: MeasurementId,
        cause: &Error,
    ) {
        self.events.send(CapturingEvent::Error {
            message: cause.to_string(),
        });

        if matches!(cause, Error::Store(cyface_store::Error::NotFound(id)) if *id == measurement_id)
        {
            let dropped = self.buffer.drain();
            error!(
                measurement_id,
                points = dropped.len(),
                "Active measurement is gone from the store, ending capture"
            );
            write_active(&self.active, None);
            session.measurement = None;
            session.state = CaptureState::Idle;
            return;
        }

        match self.sensors.start_updates(self.listener()).await {
            Ok(()) => {
                warn!(measurement_id, "Transition failed, capturing continues: {}", cause);
                session.timer = Some(FlushTimer::spawn(
                    self.flusher(),
                    self.config.flush_interval(),
                ));
                session.state = CaptureState::Running;
            }
            Err(e) => {
                error!(measurement_id, "Failed to restart sensors: {}", e);
                if let Err(e) = self
                    .persistence
                    .update_status(measurement_id, MeasurementStatus::Paused)
                    .await
                {
                    warn!(measurement_id, "Failed to record paused status: {}", e);
                }
                session.state = CaptureState::Paused;
                Self::set_status(session, MeasurementStatus::Paused);
            }
        }
    }

    /// Flush the buffer into the active measurement now.
    ///
    /// # Errors
    ///
    /// [`Error::NoActiveMeasurement`] when no measurement is being captured.
    pub async fn flush(&self) -> Result<usize> {
        self.flusher().flush().await
    }

    /// Load a stored measurement.
    pub async fn load_measurement(&self, measurement_id: MeasurementId) -> Result<Measurement> {
        self.persistence.load(measurement_id).await
    }

    /// List stored measurements.
    pub async fn list_measurements(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
        self.persistence.query_measurements(query).await
    }

    /// Delete a stored measurement.
    ///
    /// # Errors
    ///
    /// [`Error::MeasurementActive`] when the measurement is being captured.
    pub async fn delete_measurement(&self, measurement_id: MeasurementId) -> Result<()> {
        let session = self.session.lock().await;
        if session
            .measurement
            .as_ref()
            .is_some_and(|m| m.id == measurement_id)
        {
            return Err(Error::MeasurementActive(measurement_id));
        }
        self.persistence.delete(measurement_id).await
    }

    /// Delete every stored measurement.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::IsRunning`] or [`LifecycleError::IsPaused`] unless idle.
    pub async fn delete_all_measurements(&self) -> Result<usize> {
        let session = self.session.lock().await;
        match session.state {
            CaptureState::Running => Err(LifecycleError::IsRunning.into()),
            CaptureState::Paused => Err(LifecycleError::IsPaused.into()),
            CaptureState::Idle => self.persistence.delete_all().await,
        }
    }

    fn active_id(session: &Session) -> Result<MeasurementId> {
        session
            .measurement
            .as_ref()
            .map(|m| m.id)
            .ok_or(Error::NoActiveMeasurement)
    }

    fn set_status(session: &mut Session, status: MeasurementStatus) {
        if let Some(measurement) = session.measurement.as_mut() {
            measurement.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSensorSource;

    fn service() -> (DataCapturingService, Arc<MockSensorSource>) {
        let sensors = Arc::new(MockSensorSource::new());
        let service = DataCapturingService::new(
            CaptureConfig::default(),
            PersistenceLayer::in_memory().unwrap(),
            sensors.clone(),
        );
        (service, sensors)
    }

    #[tokio::test]
    async fn test_flush_without_measurement_is_an_error() {
        let (service, _) = service();
        assert!(matches!(
            service.flush().await,
            Err(Error::NoActiveMeasurement)
        ));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_points() {
        let (service, sensors) = service();
        let measurement = service.start(Modality::Car).await.unwrap();
        sensors.push_acceleration(Acceleration::new(now_millis(), 0.0, 0.0, 9.81));

        // Remove the row under the running service so the save fails.
        service.persistence().delete(measurement.id).await.unwrap();
        assert!(service.flush().await.is_err());
        assert_eq!(service.buffer.counts(), (0, 1));
    }

    #[tokio::test]
    async fn test_listener_filters_locations() {
        let (service, _) = service();
        let listener = service.listener();
        let mut events = service.subscribe();

        listener.on_location(GeoLocation::new(now_millis(), 51.0, 13.0, 2.0, 25.0));
        listener.on_location(GeoLocation::new(now_millis(), 51.0, 13.0, 2.0, 15.0));

        assert_eq!(service.buffer.counts(), (1, 0));
        assert!(matches!(
            events.recv().await.unwrap(),
            CapturingEvent::LocationRejected { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CapturingEvent::GeoLocationAcquired { .. }
        ));
    }
}
