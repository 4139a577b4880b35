//! Measurement synchronization.
//!
//! [`Synchronizer`] uploads finished measurements to the collector. It can be
//! driven explicitly with [`Synchronizer::sync`] and
//! [`Synchronizer::force_sync`], or activated to react to capture events:
//! every [`CapturingEvent::ServiceStopped`] starts a pass over all pending
//! measurements, provided the network policy allows it.
//!
//! Only one pass runs at a time. A measurement is marked synchronized only
//! after the collector answered 201 or 409; every other outcome leaves it
//! untouched for the next pass.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cyface_core::{
    CapturingEvent, EventDispatcher, InstallationIdentifier, Measurement, MeasurementId,
    PersistenceLayer,
};

use crate::auth::{self, Authenticator, Token};
use crate::config::{AfterSync, SyncConfig};
use crate::error::{Result, SyncError};
use crate::metadata::UploadMetadata;
use crate::network::{AlwaysUnmetered, NetworkMonitor};
use crate::retry::with_retry;
use crate::serializer;
use crate::uploader::{HttpUploader, UploadRequest, UploadResponse, Uploader};

/// Outcome of a pass over pending measurements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Measurements the collector accepted.
    pub synchronized: Vec<MeasurementId>,
    /// Measurements that failed, with the error message.
    pub failed: Vec<(MeasurementId, String)>,
    /// Whether the pass was cut short by [`Synchronizer::deactivate`].
    pub cancelled: bool,
}

/// Builder for [`Synchronizer`].
///
/// Collaborators that are not set are derived from the configuration: an
/// [`HttpUploader`] for the collector URL and the authenticator named in
/// [`SyncConfig::auth`].
pub struct SynchronizerBuilder {
    config: SyncConfig,
    persistence: PersistenceLayer,
    events: Option<EventDispatcher>,
    authenticator: Option<Arc<dyn Authenticator>>,
    uploader: Option<Arc<dyn Uploader>>,
    network: Option<Arc<dyn NetworkMonitor>>,
    installation: Option<Arc<InstallationIdentifier>>,
}

impl SynchronizerBuilder {
    /// Share an event dispatcher, usually the capture service's.
    #[must_use]
    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    /// Use a custom authenticator.
    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Use a custom uploader.
    #[must_use]
    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Use a custom network monitor.
    #[must_use]
    pub fn network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Share an installation identifier cache.
    #[must_use]
    pub fn installation(mut self, installation: Arc<InstallationIdentifier>) -> Self {
        self.installation = Some(installation);
        self
    }

    /// Build the synchronizer.
    pub fn build(self) -> Result<Synchronizer> {
        let uploader: Arc<dyn Uploader> = match self.uploader {
            Some(uploader) => uploader,
            None => Arc::new(HttpUploader::new(
                &self.config.collector_url,
                self.config.request_timeout(),
            )?),
        };
        let authenticator: Arc<dyn Authenticator> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::from(auth::from_config(&self.config)?),
        };

        Ok(Synchronizer {
            inner: Arc::new(Inner {
                config: self.config,
                persistence: self.persistence,
                events: self.events.unwrap_or_default(),
                authenticator,
                uploader,
                network: self
                    .network
                    .unwrap_or_else(|| Arc::new(AlwaysUnmetered) as Arc<dyn NetworkMonitor>),
                installation: self.installation.unwrap_or_default(),
                token: AsyncMutex::new(None),
                pass: AsyncMutex::new(()),
                cancel: Mutex::new(CancellationToken::new()),
                listener: Mutex::new(None),
            }),
        })
    }
}

struct Inner {
    config: SyncConfig,
    persistence: PersistenceLayer,
    events: EventDispatcher,
    authenticator: Arc<dyn Authenticator>,
    uploader: Arc<dyn Uploader>,
    network: Arc<dyn NetworkMonitor>,
    installation: Arc<InstallationIdentifier>,
    token: AsyncMutex<Option<Token>>,
    pass: AsyncMutex<()>,
    cancel: Mutex<CancellationToken>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Uploads finished measurements to the collector.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("collector_url", &self.inner.config.collector_url)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Start building a synchronizer.
    pub fn builder(config: SyncConfig, persistence: PersistenceLayer) -> SynchronizerBuilder {
        SynchronizerBuilder {
            config,
            persistence,
            events: None,
            authenticator: None,
            uploader: None,
            network: None,
            installation: None,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The event dispatcher synchronization events are sent to.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Log in again and cache the new token.
    pub async fn authenticate(&self) -> Result<Token> {
        self.invalidate_token().await;
        self.token().await
    }

    /// Upload one measurement.
    ///
    /// Already synchronized measurements succeed without an upload;
    /// measurements still being captured fail with
    /// [`SyncError::MeasurementNotFinished`].
    pub async fn sync(&self, measurement_id: MeasurementId) -> Result<()> {
        let cancel = self.cancel_token();
        let _pass = self.inner.pass.lock().await;
        self.sync_one(measurement_id, &cancel).await
    }

    /// Upload every pending measurement, oldest first, ignoring the network
    /// policy.
    pub async fn force_sync(&self) -> Result<SyncReport> {
        let cancel = self.cancel_token();
        let _pass = self.inner.pass.lock().await;
        self.run_pass(&cancel).await
    }

    /// Run the pass a metered connection held back, if uploads are now allowed.
    ///
    /// Hosts call this when connectivity changes. Returns `None` while the
    /// connection is still metered and `unmetered_only` is set.
    pub async fn network_changed(&self) -> Result<Option<SyncReport>> {
        if !self.network_allows_upload() {
            debug!("Connection still metered, uploads stay deferred");
            return Ok(None);
        }
        let cancel = self.cancel_token();
        let _pass = self.inner.pass.lock().await;
        self.run_pass(&cancel).await.map(Some)
    }

    /// Start reacting to capture events.
    ///
    /// Must be called from within a tokio runtime. Calling it again while
    /// active has no effect. Uploads deferred by a metered connection wait
    /// for the next finished measurement, [`Synchronizer::network_changed`]
    /// or [`Synchronizer::force_sync`].
    pub fn activate(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Synchronizer already active");
            return;
        }

        let events = self.inner.events.subscribe();
        let cancel = self.cancel_token();
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(listen(weak, events, cancel)));
        info!("Synchronizer activated");
    }

    /// Stop reacting to capture events and cancel any upload in flight.
    ///
    /// A cancelled upload leaves its measurement unsynchronized.
    pub async fn deactivate(&self) {
        let previous = {
            let mut cancel = self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *cancel, CancellationToken::new())
        };
        previous.cancel();

        let handle = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
            && !e.is_cancelled()
        {
            warn!("Synchronizer listener ended abnormally: {}", e);
        }
        info!("Synchronizer deactivated");
    }

    /// Whether the event listener is running.
    pub fn is_active(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn cancel_token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn on_measurement_finished(&self, measurement_id: MeasurementId, cancel: &CancellationToken) {
        if !self.network_allows_upload() {
            info!(
                measurement_id,
                "Deferring synchronization until an unmetered connection is available"
            );
            return;
        }

        let _pass = self.inner.pass.lock().await;
        match self.run_pass(cancel).await {
            Ok(report) => debug!(
                synchronized = report.synchronized.len(),
                failed = report.failed.len(),
                cancelled = report.cancelled,
                "Automatic synchronization finished"
            ),
            Err(e) => warn!("Automatic synchronization failed: {}", e),
        }
    }

    fn network_allows_upload(&self) -> bool {
        !self.inner.config.unmetered_only || self.inner.network.is_unmetered()
    }

    async fn run_pass(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let pending = self.inner.persistence.pending_measurements().await?;
        let mut report = SyncReport::default();

        for measurement in pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.sync_one(measurement.id, cancel).await {
                Ok(()) => report.synchronized.push(measurement.id),
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => report.failed.push((measurement.id, e.to_string())),
            }
        }

        info!(
            synchronized = report.synchronized.len(),
            failed = report.failed.len(),
            "Synchronization pass complete"
        );
        Ok(report)
    }

    async fn sync_one(&self, measurement_id: MeasurementId, cancel: &CancellationToken) -> Result<()> {
        let measurement = self.inner.persistence.load(measurement_id).await?;
        if measurement.is_synchronized() {
            debug!(measurement_id, "Measurement already synchronized");
            return Ok(());
        }
        if measurement.status.is_capturing() {
            return Err(SyncError::MeasurementNotFinished(measurement_id));
        }

        self.inner
            .events
            .send(CapturingEvent::SynchronizationStarted { measurement_id });

        let result = self.transmit(&measurement, cancel).await;
        match &result {
            Ok(()) => {
                info!(measurement_id, "Measurement synchronized");
                self.inner
                    .events
                    .send(CapturingEvent::SynchronizationSucceeded { measurement_id });
            }
            Err(e) => {
                warn!(measurement_id, "Synchronization failed: {}", e);
                self.inner.events.send(CapturingEvent::SynchronizationFailed {
                    measurement_id,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn transmit(&self, measurement: &Measurement, cancel: &CancellationToken) -> Result<()> {
        let request = self.prepare(measurement).await?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            response = self.exchange(&request) => response,
        }?;

        self.commit(measurement.id, response).await
    }

    async fn prepare(&self, measurement: &Measurement) -> Result<UploadRequest> {
        let device_id = self
            .inner
            .persistence
            .installation_id(&self.inner.installation)
            .await?;
        let metadata =
            UploadMetadata::from_measurement(&device_id, measurement, &self.inner.config.device)?;
        let payload = serializer::serialize(measurement)?;
        Ok(UploadRequest { metadata, payload })
    }

    /// Upload, logging in again once if the collector refuses the token.
    async fn exchange(&self, request: &UploadRequest) -> Result<UploadResponse> {
        let response = self.upload_authorized(request).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!("Collector refused the token, logging in again");
        self.invalidate_token().await;
        let response = self.upload_authorized(request).await?;
        if response.is_unauthorized() {
            self.invalidate_token().await;
            return Err(SyncError::NotAuthenticated);
        }
        Ok(response)
    }

    async fn upload_authorized(&self, request: &UploadRequest) -> Result<UploadResponse> {
        let token = self.token().await?;
        let token = &token;
        let uploader = &self.inner.uploader;
        with_retry(&self.inner.config.retry, "upload", || {
            uploader.upload(request, token)
        })
        .await
    }

    async fn commit(&self, measurement_id: MeasurementId, response: UploadResponse) -> Result<()> {
        if !response.is_created() && !response.is_conflict() {
            return Err(SyncError::UnexpectedStatus {
                status: response.status,
                body: response.body,
            });
        }
        if response.is_conflict() {
            debug!(measurement_id, "Collector already has this measurement");
        }

        self.inner
            .persistence
            .mark_synchronized(measurement_id)
            .await?;
        // Already synchronized; cleanup failures are only logged.
        if let Err(e) = self.apply_after_sync(measurement_id).await {
            warn!(
                measurement_id,
                policy = ?self.inner.config.after_sync,
                "Post-sync cleanup failed: {}",
                e
            );
        }
        Ok(())
    }

    async fn apply_after_sync(&self, measurement_id: MeasurementId) -> Result<()> {
        let persistence = &self.inner.persistence;
        match self.inner.config.after_sync {
            AfterSync::Keep => {}
            AfterSync::Clean => {
                let removed = persistence.clean(measurement_id).await?;
                debug!(measurement_id, removed, "Dropped synchronized acceleration samples");
            }
            AfterSync::Delete => persistence.delete(measurement_id).await?,
        }
        Ok(())
    }

    async fn token(&self) -> Result<Token> {
        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let authenticator = &self.inner.authenticator;
        let token = with_retry(&self.inner.config.retry, "login", || async move {
            authenticator.authenticate().await.map_err(SyncError::from)
        })
        .await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        self.inner.token.lock().await.take();
    }
}

async fn listen(
    inner: Weak<Inner>,
    mut events: cyface_core::EventReceiver,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(CapturingEvent::ServiceStopped { measurement_id }) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Synchronizer { inner }
                    .on_measurement_finished(measurement_id, &cancel)
                    .await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Synchronizer lagged behind capture events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Synchronizer listener stopped");
}
