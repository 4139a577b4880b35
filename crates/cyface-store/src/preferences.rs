//! Key/value preferences.
//!
//! Small pieces of process-wide state (such as the installation identifier)
//! are persisted through the [`Preferences`] trait. [`Store`](crate::Store)
//! implements it on top of the `preferences` table; [`MemoryPreferences`]
//! keeps values in memory for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Persistent string key/value storage.
pub trait Preferences {
    /// Read the value stored under `key`.
    fn get_preference(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_preference(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory [`Preferences`] implementation.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    /// Create an empty preference map.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| Error::InvalidData("preferences lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::InvalidData("preferences lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
