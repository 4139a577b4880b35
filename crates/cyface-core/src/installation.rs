//! Installation identifier.
//!
//! Every installation carries a random UUID that the collector uses to tell
//! devices apart. It is generated once, persisted under
//! [`INSTALLATION_ID_KEY`] and cached for the rest of the process.

use std::sync::{Mutex, PoisonError};

use tracing::info;
use uuid::Uuid;

use cyface_store::Preferences;

use crate::error::Result;

/// Preference key holding the installation identifier.
pub const INSTALLATION_ID_KEY: &str = "installation_id";

/// Lazily initialized, process-wide installation identifier.
#[derive(Debug, Default)]
pub struct InstallationIdentifier {
    cached: Mutex<Option<String>>,
}

impl InstallationIdentifier {
    /// Create an uninitialized identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the identifier, loading or generating it on first use.
    ///
    /// Concurrent first callers observe the same value; the lock is held
    /// across the load-or-generate step.
    pub fn get_or_init<P: Preferences + ?Sized>(&self, preferences: &P) -> Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let id = match preferences.get_preference(INSTALLATION_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                preferences.set_preference(INSTALLATION_ID_KEY, &id)?;
                info!(installation_id = %id, "Generated installation identifier");
                id
            }
        };

        *cached = Some(id.clone());
        Ok(id)
    }
}
