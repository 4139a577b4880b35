//! Bearer token acquisition.
//!
//! The collector accepts uploads carrying `Authorization: Bearer <token>`.
//! [`StaticTokenAuthenticator`] hands out a pre-issued token;
//! [`CredentialsAuthenticator`] logs in with a username and password.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AuthConfig, SyncConfig};
use crate::error::{AuthError, SyncError};

/// A bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wrap a raw token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Obtains bearer tokens from the collector.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Exchange the configured credentials for a token.
    async fn authenticate(&self) -> Result<Token, AuthError>;
}

/// Returns a pre-supplied token.
#[derive(Debug, Clone)]
pub struct StaticTokenAuthenticator {
    token: Token,
}

impl StaticTokenAuthenticator {
    /// Use `token` for every request.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Token::new(token),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self) -> Result<Token, AuthError> {
        Ok(self.token.clone())
    }
}

/// Fails every request; used when no authentication is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredAuthenticator;

#[async_trait]
impl Authenticator for UnconfiguredAuthenticator {
    async fn authenticate(&self) -> Result<Token, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Logs in at `{collector}/login` with a username and password.
///
/// The token is taken from the response's `Authorization` header.
#[derive(Clone)]
pub struct CredentialsAuthenticator {
    client: Client,
    login_url: String,
    username: String,
    password: String,
}

impl fmt::Debug for CredentialsAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsAuthenticator")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl CredentialsAuthenticator {
    /// Create an authenticator for the collector at `collector_url`.
    pub fn new(
        collector_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Self::with_client(collector_url, username, password, client)
    }

    /// Create an authenticator with a custom reqwest Client.
    pub fn with_client(
        collector_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        client: Client,
    ) -> Result<Self, SyncError> {
        let base_url = crate::uploader::normalize_url(collector_url)?;
        Ok(Self {
            client,
            login_url: format!("{}/login", base_url),
            username: username.into(),
            password: password.into(),
        })
    }

    /// The login endpoint.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }
}

#[async_trait]
impl Authenticator for CredentialsAuthenticator {
    async fn authenticate(&self) -> Result<Token, AuthError> {
        debug!(url = %self.login_url, "Logging in");
        let response = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let token = response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingToken)?;

        info!(username = %self.username, "Authenticated with collector");
        Ok(Token::new(token))
    }
}

/// Build the authenticator described by `config`.
pub fn from_config(config: &SyncConfig) -> Result<Box<dyn Authenticator>, SyncError> {
    Ok(match &config.auth {
        AuthConfig::None => Box::new(UnconfiguredAuthenticator),
        AuthConfig::Token { token } => Box::new(StaticTokenAuthenticator::new(token.clone())),
        AuthConfig::Credentials { username, password } => Box::new(CredentialsAuthenticator::new(
            &config.collector_url,
            username.clone(),
            password.clone(),
            config.request_timeout(),
        )?),
    })
}
