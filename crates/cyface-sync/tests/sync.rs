//! Integration tests for the synchronizer.
//!
//! The collector is replaced by [`MockUploader`] and [`MockAuthenticator`];
//! measurements live in an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use cyface_core::{
    Acceleration, CaptureConfig, CapturingEvent, DataCapturingService, EventDispatcher,
    EventReceiver, GeoLocation, InstallationIdentifier, MeasurementId, MeasurementStatus,
    MockSensorSource, Modality, PersistenceLayer,
};
use cyface_sync::{
    AfterSync, MockAuthenticator, MockNetwork, MockOutcome, MockUploader, RetryConfig,
    SerializationError, SyncConfig, SyncError, Synchronizer, deserialize,
};
use cyface_types::now_millis;
use tracing_subscriber::EnvFilter;

struct Harness {
    persistence: PersistenceLayer,
    events: EventDispatcher,
    uploader: Arc<MockUploader>,
    auth: Arc<MockAuthenticator>,
    network: Arc<MockNetwork>,
    sync: Synchronizer,
}

fn config() -> SyncConfig {
    SyncConfig {
        retry: RetryConfig::new(2)
            .initial_delay(Duration::from_millis(10))
            .jitter(false),
        ..SyncConfig::new("https://collector.test/api/v4")
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness(config: SyncConfig) -> Harness {
    init_tracing();
    let persistence = PersistenceLayer::in_memory().unwrap();
    let events = EventDispatcher::default();
    let uploader = Arc::new(MockUploader::new());
    let auth = Arc::new(MockAuthenticator::new());
    let network = Arc::new(MockNetwork::new(true));

    let sync = Synchronizer::builder(config, persistence.clone())
        .events(events.clone())
        .uploader(uploader.clone())
        .authenticator(auth.clone())
        .network(network.clone())
        .build()
        .unwrap();

    Harness {
        persistence,
        events,
        uploader,
        auth,
        network,
        sync,
    }
}

async fn measurement(
    persistence: &PersistenceLayer,
    timestamp: i64,
    locations: usize,
    status: MeasurementStatus,
) -> MeasurementId {
    let stored = persistence
        .create_measurement(timestamp, Modality::Bicycle)
        .await
        .unwrap();
    let fixes: Vec<GeoLocation> = (0..locations)
        .map(|i| {
            let offset = i as i64 * 1_000;
            GeoLocation::new(timestamp + offset, 51.05 + i as f64 * 0.0001, 13.73, 4.0, 6.5)
        })
        .collect();
    let samples: Vec<Acceleration> = (0..5)
        .map(|i| Acceleration::new(timestamp + i * 10, 0.1, 0.2, 9.81))
        .collect();
    persistence.save(stored.id, &fixes, &samples).await.unwrap();
    persistence.update_status(stored.id, status).await.unwrap();
    stored.id
}

async fn finished(persistence: &PersistenceLayer) -> MeasurementId {
    measurement(persistence, 1_000, 3, MeasurementStatus::Finished).await
}

async fn status(persistence: &PersistenceLayer, id: MeasurementId) -> Option<MeasurementStatus> {
    persistence
        .get_measurement(id)
        .await
        .unwrap()
        .map(|m| m.status)
}

/// Wait for the next success or failure notification.
async fn outcome(events: &mut EventReceiver) -> CapturingEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                event @ (CapturingEvent::SynchronizationSucceeded { .. }
                | CapturingEvent::SynchronizationFailed { .. }) => return event,
                _ => {}
            }
        }
    })
    .await
    .expect("no synchronization outcome")
}

// =============================================================================
// Status handling
// =============================================================================

#[tokio::test]
async fn test_created_marks_synchronized_and_cleans() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    let mut events = h.events.subscribe();

    h.sync.sync(id).await.unwrap();

    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Synchronized));
    assert_eq!(h.persistence.count_locations(id).await.unwrap(), 3);
    assert_eq!(h.persistence.count_accelerations(id).await.unwrap(), 0);
    assert_eq!(
        events.recv().await.unwrap(),
        CapturingEvent::SynchronizationStarted { measurement_id: id }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CapturingEvent::SynchronizationSucceeded { measurement_id: id }
    );
}

#[tokio::test]
async fn test_conflict_counts_as_success() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.uploader.push_outcomes([MockOutcome::Status(409)]);

    h.sync.sync(id).await.unwrap();

    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Synchronized));
}

#[tokio::test]
async fn test_server_error_leaves_measurement_pending() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    let mut events = h.events.subscribe();
    h.uploader.push_outcomes([MockOutcome::Status(500)]);

    let result = h.sync.sync(id).await;

    assert!(matches!(result, Err(SyncError::UnexpectedStatus { status: 500, .. })));
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Finished));
    assert_eq!(h.persistence.count_accelerations(id).await.unwrap(), 5);
    assert_eq!(h.uploader.upload_count(), 1);
    assert!(matches!(
        outcome(&mut events).await,
        CapturingEvent::SynchronizationFailed { measurement_id, .. } if measurement_id == id
    ));
}

#[tokio::test]
async fn test_service_unavailable_is_not_retried() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.uploader.push_outcomes([MockOutcome::Status(503)]);

    assert!(h.sync.sync(id).await.is_err());
    assert_eq!(h.uploader.upload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_retried() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.uploader
        .push_outcomes([MockOutcome::TransportError, MockOutcome::TransportError]);

    h.sync.sync(id).await.unwrap();

    assert_eq!(h.uploader.upload_count(), 3);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Synchronized));
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_exhaust_retries() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.uploader.push_outcomes([MockOutcome::TransportError; 3]);

    assert!(matches!(h.sync.sync(id).await, Err(SyncError::Transport(_))));
    assert_eq!(h.uploader.upload_count(), 3);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Finished));
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_unauthorized_triggers_one_relogin() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.uploader.push_outcomes([MockOutcome::Status(401)]);

    h.sync.sync(id).await.unwrap();

    assert_eq!(h.auth.call_count(), 2);
    let tokens: Vec<String> = h.uploader.requests().into_iter().map(|r| r.token).collect();
    assert_eq!(tokens, vec!["token-1", "token-2"]);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Synchronized));
}

#[tokio::test]
async fn test_repeated_unauthorized_fails() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.uploader
        .push_outcomes([MockOutcome::Status(401), MockOutcome::Status(401)]);

    assert!(matches!(h.sync.sync(id).await, Err(SyncError::NotAuthenticated)));
    assert_eq!(h.uploader.upload_count(), 2);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Finished));
}

#[tokio::test]
async fn test_rejected_login_uploads_nothing() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.auth.set_should_fail(true);

    assert!(matches!(h.sync.sync(id).await, Err(SyncError::Auth(_))));
    assert_eq!(h.auth.call_count(), 1);
    assert_eq!(h.uploader.upload_count(), 0);
}

// =============================================================================
// Post-sync policy
// =============================================================================

#[tokio::test]
async fn test_keep_policy_retains_samples() {
    let h = harness(SyncConfig {
        after_sync: AfterSync::Keep,
        ..config()
    });
    let id = finished(&h.persistence).await;

    h.sync.sync(id).await.unwrap();

    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Synchronized));
    assert_eq!(h.persistence.count_accelerations(id).await.unwrap(), 5);
}

#[tokio::test]
async fn test_delete_policy_removes_measurement() {
    let h = harness(SyncConfig {
        after_sync: AfterSync::Delete,
        ..config()
    });
    let id = finished(&h.persistence).await;

    h.sync.sync(id).await.unwrap();

    assert_eq!(status(&h.persistence, id).await, None);
}

// =============================================================================
// Eligibility
// =============================================================================

#[tokio::test]
async fn test_open_measurement_is_rejected() {
    let h = harness(config());
    let id = measurement(&h.persistence, 1_000, 3, MeasurementStatus::Open).await;

    assert!(matches!(
        h.sync.sync(id).await,
        Err(SyncError::MeasurementNotFinished(m)) if m == id
    ));
    assert_eq!(h.uploader.upload_count(), 0);
}

#[tokio::test]
async fn test_synchronized_measurement_is_skipped() {
    let h = harness(config());
    let id = finished(&h.persistence).await;

    h.sync.sync(id).await.unwrap();
    h.sync.sync(id).await.unwrap();

    assert_eq!(h.uploader.upload_count(), 1);
}

#[tokio::test]
async fn test_measurement_without_locations_fails() {
    let h = harness(config());
    let id = measurement(&h.persistence, 1_000, 0, MeasurementStatus::Finished).await;

    assert!(matches!(
        h.sync.sync(id).await,
        Err(SyncError::Serialization(SerializationError::NoLocations(m))) if m == id
    ));
    assert_eq!(h.uploader.upload_count(), 0);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Finished));
}

#[tokio::test]
async fn test_unknown_measurement_fails() {
    let h = harness(config());
    assert!(matches!(h.sync.sync(99).await, Err(SyncError::Core(_))));
}

// =============================================================================
// Passes
// =============================================================================

#[tokio::test]
async fn test_force_sync_reports_each_measurement() {
    let h = harness(config());
    let first = measurement(&h.persistence, 1_000, 2, MeasurementStatus::Finished).await;
    let second = measurement(&h.persistence, 2_000, 2, MeasurementStatus::Finished).await;
    let third = measurement(&h.persistence, 3_000, 2, MeasurementStatus::Finished).await;
    let open = measurement(&h.persistence, 4_000, 2, MeasurementStatus::Open).await;
    h.uploader.push_outcomes([
        MockOutcome::Status(201),
        MockOutcome::Status(500),
        MockOutcome::Status(201),
    ]);

    let report = h.sync.force_sync().await.unwrap();

    assert_eq!(report.synchronized, vec![first, third]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, second);
    assert!(!report.cancelled);
    assert_eq!(status(&h.persistence, open).await, Some(MeasurementStatus::Open));

    // The failed one is picked up by the next pass.
    let report = h.sync.force_sync().await.unwrap();
    assert_eq!(report.synchronized, vec![second]);
}

#[tokio::test]
async fn test_upload_carries_payload_and_metadata() {
    let h = harness(config());
    let id = finished(&h.persistence).await;

    h.sync.sync(id).await.unwrap();

    let device_id = h
        .persistence
        .installation_id(&InstallationIdentifier::new())
        .await
        .unwrap();
    let requests = h.uploader.requests();
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    assert_eq!(request.metadata.device_id, device_id);
    assert_eq!(request.metadata.file_name(), format!("{}_{}.cyf", device_id, id));
    assert_eq!(request.metadata.location_count, 3);
    assert_eq!(request.metadata.start_location.timestamp, 1_000);
    assert_eq!(request.metadata.end_location.timestamp, 3_000);

    let decoded = deserialize(&request.payload).unwrap();
    assert_eq!(decoded.locations.len(), 3);
    assert_eq!(decoded.accelerations.len(), 5);
    assert_eq!(decoded.locations[0].accuracy, 6.5);
}

// =============================================================================
// Event-driven synchronization
// =============================================================================

#[tokio::test]
async fn test_activated_synchronizer_uploads_after_stop() {
    let h = harness(config());
    let sensors = Arc::new(MockSensorSource::new());
    let service = DataCapturingService::new(
        CaptureConfig::default(),
        h.persistence.clone(),
        sensors.clone(),
    )
    .with_events(h.events.clone());
    let mut events = h.events.subscribe();
    h.sync.activate();
    assert!(h.sync.is_active());

    let measurement = service.start(Modality::Walking).await.unwrap();
    sensors.push_location(GeoLocation::new(now_millis(), 51.05, 13.73, 1.2, 4.0));
    sensors.push_location(GeoLocation::new(now_millis(), 51.0501, 13.73, 1.2, 4.0));
    service.stop().await.unwrap();

    assert_eq!(
        outcome(&mut events).await,
        CapturingEvent::SynchronizationSucceeded {
            measurement_id: measurement.id
        }
    );
    assert_eq!(
        status(&h.persistence, measurement.id).await,
        Some(MeasurementStatus::Synchronized)
    );

    h.sync.deactivate().await;
    assert!(!h.sync.is_active());
}

#[tokio::test]
async fn test_metered_network_defers_upload() {
    let h = harness(config());
    h.network.set_unmetered(false);
    let id = finished(&h.persistence).await;
    let mut events = h.events.subscribe();
    h.sync.activate();

    h.events
        .send(CapturingEvent::ServiceStopped { measurement_id: id });
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.uploader.upload_count(), 0);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Finished));

    h.network.set_unmetered(true);
    h.events
        .send(CapturingEvent::ServiceStopped { measurement_id: id });
    assert_eq!(
        outcome(&mut events).await,
        CapturingEvent::SynchronizationSucceeded { measurement_id: id }
    );

    h.sync.deactivate().await;
}

#[tokio::test]
async fn test_network_change_runs_deferred_pass() {
    let h = harness(config());
    h.network.set_unmetered(false);
    let id = finished(&h.persistence).await;

    assert!(h.sync.network_changed().await.unwrap().is_none());
    assert_eq!(h.uploader.upload_count(), 0);

    h.network.set_unmetered(true);
    let report = h.sync.network_changed().await.unwrap().unwrap();

    assert_eq!(report.synchronized, vec![id]);
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Synchronized));
}

#[tokio::test]
async fn test_failed_cleanup_keeps_measurement_synchronized() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurements.db");
    let persistence = PersistenceLayer::open(&path).unwrap();
    let id = finished(&persistence).await;

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER keep_samples BEFORE DELETE ON accelerations
         BEGIN SELECT RAISE(ABORT, 'samples are locked'); END;",
    )
    .unwrap();
    drop(raw);

    let sync = Synchronizer::builder(config(), persistence.clone())
        .uploader(Arc::new(MockUploader::new()))
        .authenticator(Arc::new(MockAuthenticator::new()))
        .build()
        .unwrap();

    let report = sync.force_sync().await.unwrap();

    assert_eq!(report.synchronized, vec![id]);
    assert!(report.failed.is_empty());
    assert_eq!(status(&persistence, id).await, Some(MeasurementStatus::Synchronized));
    assert_eq!(persistence.count_accelerations(id).await.unwrap(), 5);
}

#[tokio::test]
async fn test_metered_network_allowed_when_not_restricted() {
    let h = harness(SyncConfig {
        unmetered_only: false,
        ..config()
    });
    h.network.set_unmetered(false);
    let id = finished(&h.persistence).await;
    let mut events = h.events.subscribe();
    h.sync.activate();

    h.events
        .send(CapturingEvent::ServiceStopped { measurement_id: id });

    assert_eq!(
        outcome(&mut events).await,
        CapturingEvent::SynchronizationSucceeded { measurement_id: id }
    );
    h.sync.deactivate().await;
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_cancels_upload_in_flight() {
    let h = harness(config());
    h.uploader.set_latency(Duration::from_secs(60));
    let id = finished(&h.persistence).await;
    let mut events = h.events.subscribe();
    h.sync.activate();

    h.events
        .send(CapturingEvent::ServiceStopped { measurement_id: id });
    while h.uploader.upload_count() == 0 {
        sleep(Duration::from_millis(10)).await;
    }

    h.sync.deactivate().await;

    assert!(!h.sync.is_active());
    assert_eq!(status(&h.persistence, id).await, Some(MeasurementStatus::Finished));
    assert_eq!(h.persistence.count_accelerations(id).await.unwrap(), 5);
    match outcome(&mut events).await {
        CapturingEvent::SynchronizationFailed {
            measurement_id,
            error,
        } => {
            assert_eq!(measurement_id, id);
            assert_eq!(error, SyncError::Cancelled.to_string());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // A later explicit pass still uploads it.
    h.uploader.set_latency(Duration::ZERO);
    let report = h.sync.force_sync().await.unwrap();
    assert_eq!(report.synchronized, vec![id]);
}

#[tokio::test]
async fn test_activate_twice_keeps_one_listener() {
    let h = harness(config());
    let id = finished(&h.persistence).await;
    h.sync.activate();
    h.sync.activate();
    let mut events = h.events.subscribe();

    h.events
        .send(CapturingEvent::ServiceStopped { measurement_id: id });
    outcome(&mut events).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(h.uploader.upload_count(), 1);
    h.sync.deactivate().await;
}
