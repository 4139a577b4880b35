//! Connectivity checks.

/// Reports whether the current connection may be used for bulk uploads.
pub trait NetworkMonitor: Send + Sync {
    /// Whether the active connection is unmetered (e.g. Wi-Fi).
    fn is_unmetered(&self) -> bool;
}

/// Treats every connection as unmetered.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysUnmetered;

impl NetworkMonitor for AlwaysUnmetered {
    fn is_unmetered(&self) -> bool {
        true
    }
}
