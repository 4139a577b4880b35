//! Mock collector for testing.
//!
//! [`MockUploader`] and [`MockAuthenticator`] stand in for the collector so
//! synchronizer behavior can be tested without a network.
//!
//! # Features
//!
//! - **Scripted answers**: queue status codes or transport failures per upload
//! - **Request recording**: inspect metadata, payload and token of each upload
//! - **Latency simulation**: delay answers to exercise cancellation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::auth::{Authenticator, Token};
use crate::error::{AuthError, Result, SyncError};
use crate::metadata::UploadMetadata;
use crate::network::NetworkMonitor;
use crate::uploader::{UploadRequest, UploadResponse, Uploader};

/// Scripted result of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Answer with this status code.
    Status(u16),
    /// Fail as if the connection was reset.
    TransportError,
}

/// An upload as the mock received it.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    /// Form fields.
    pub metadata: UploadMetadata,
    /// Binary payload.
    pub payload: Bytes,
    /// Bearer token.
    pub token: String,
}

/// A scriptable collector.
///
/// Queued outcomes are consumed in order; once the queue is empty every
/// upload is answered with the default status (201).
#[derive(Debug)]
pub struct MockUploader {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    default_status: AtomicU16,
    latency: Mutex<Duration>,
    requests: Mutex<Vec<RecordedUpload>>,
    upload_count: AtomicU32,
}

impl Default for MockUploader {
    fn default() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default_status: AtomicU16::new(201),
            latency: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            upload_count: AtomicU32::new(0),
        }
    }
}

impl MockUploader {
    /// Create a mock that accepts every upload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next uploads.
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(outcomes);
    }

    /// Status returned once the queue is empty.
    pub fn set_default_status(&self, status: u16) {
        self.default_status.store(status, Ordering::SeqCst);
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Number of upload attempts, including failed ones.
    pub fn upload_count(&self) -> u32 {
        self.upload_count.load(Ordering::SeqCst)
    }

    /// Every upload received so far.
    pub fn requests(&self) -> Vec<RecordedUpload> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| MockOutcome::Status(self.default_status.load(Ordering::SeqCst)))
    }
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(&self, request: &UploadRequest, token: &Token) -> Result<UploadResponse> {
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedUpload {
                metadata: request.metadata.clone(),
                payload: request.payload.clone(),
                token: token.as_str().to_string(),
            });

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_outcome() {
            MockOutcome::Status(status) => Ok(UploadResponse {
                status,
                body: String::new(),
            }),
            MockOutcome::TransportError => Err(SyncError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "mock connection reset",
            ))),
        }
    }
}

/// Issues `token-1`, `token-2`, ... on successive logins.
#[derive(Debug, Default)]
pub struct MockAuthenticator {
    calls: AtomicU32,
    should_fail: AtomicBool,
}

impl MockAuthenticator {
    /// Create an authenticator that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent logins fail with a 401 rejection.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Number of login attempts.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate(&self) -> std::result::Result<Token, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected { status: 401 });
        }
        Ok(Token::new(format!("token-{}", call)))
    }
}

/// A switchable network monitor.
#[derive(Debug)]
pub struct MockNetwork {
    unmetered: AtomicBool,
}

impl MockNetwork {
    /// Create a monitor reporting `unmetered`.
    pub fn new(unmetered: bool) -> Self {
        Self {
            unmetered: AtomicBool::new(unmetered),
        }
    }

    /// Change the reported connection type.
    pub fn set_unmetered(&self, unmetered: bool) {
        self.unmetered.store(unmetered, Ordering::SeqCst);
    }
}

impl NetworkMonitor for MockNetwork {
    fn is_unmetered(&self) -> bool {
        self.unmetered.load(Ordering::SeqCst)
    }
}
