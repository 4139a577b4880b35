//! In-memory capture buffer.
//!
//! Sensor callbacks append to the buffer from platform threads while the
//! flush timer drains it from the runtime. A drain atomically swaps the
//! contents for empty collections, so every sample lands in exactly one
//! snapshot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cyface_types::{Acceleration, GeoLocation};

/// Data drained from the buffer in one flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferSnapshot {
    /// Accepted locations in arrival order.
    pub locations: Vec<GeoLocation>,
    /// Acceleration samples in arrival order.
    pub accelerations: Vec<Acceleration>,
}

impl BufferSnapshot {
    /// Whether the snapshot holds no data.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.accelerations.is_empty()
    }

    /// Total number of points in the snapshot.
    pub fn len(&self) -> usize {
        self.locations.len() + self.accelerations.len()
    }
}

/// Thread-safe append/drain buffer for sensor points.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    inner: Mutex<BufferSnapshot>,
}

impl CaptureBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking appender cannot leave the vectors half-written, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, BufferSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an accepted location.
    pub fn push_location(&self, location: GeoLocation) {
        self.lock().locations.push(location);
    }

    /// Append an acceleration sample.
    pub fn push_acceleration(&self, sample: Acceleration) {
        self.lock().accelerations.push(sample);
    }

    /// Take everything buffered so far, leaving the buffer empty.
    pub fn drain(&self) -> BufferSnapshot {
        std::mem::take(&mut *self.lock())
    }

    /// Put a drained snapshot back in front of anything buffered since.
    ///
    /// Used when persisting a snapshot failed, so the next flush retries it.
    pub fn restore(&self, mut snapshot: BufferSnapshot) {
        let mut inner = self.lock();
        snapshot.locations.append(&mut inner.locations);
        snapshot.accelerations.append(&mut inner.accelerations);
        *inner = snapshot;
    }

    /// Number of buffered locations and accelerations.
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.locations.len(), inner.accelerations.len())
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    fn location(timestamp: i64) -> GeoLocation {
        GeoLocation::new(timestamp, 51.0, 13.0, 1.0, 5.0)
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = CaptureBuffer::new();
        buffer.push_location(location(1));
        buffer.push_acceleration(Acceleration::new(1, 0.0, 0.0, 9.81));
        assert_eq!(buffer.counts(), (1, 1));

        let snapshot = buffer.drain();
        assert_eq!(snapshot.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_restore_keeps_order() {
        let buffer = CaptureBuffer::new();
        buffer.push_location(location(1));
        let snapshot = buffer.drain();
        buffer.push_location(location(2));

        buffer.restore(snapshot);

        let timestamps: Vec<i64> = buffer.drain().locations.iter().map(|l| l.timestamp).collect();
        assert_eq!(timestamps, vec![1, 2]);
    }

    #[test]
    fn test_concurrent_append_and_drain_loses_nothing() {
        const WRITERS: i64 = 4;
        const PER_WRITER: i64 = 2_500;

        let buffer = Arc::new(CaptureBuffer::new());
        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        buffer.push_location(location(w * PER_WRITER + i));
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while writers.iter().any(|w| !w.is_finished()) {
            seen.extend(buffer.drain().locations);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        seen.extend(buffer.drain().locations);

        let unique: HashSet<i64> = seen.iter().map(|l| l.timestamp).collect();
        assert_eq!(seen.len() as i64, WRITERS * PER_WRITER);
        assert_eq!(unique.len(), seen.len());
    }

    proptest! {
        /// Any interleaving of appends and drains yields every point exactly once, in order.
        #[test]
        fn prop_drains_partition_appends(ops in prop::collection::vec(any::<bool>(), 0..200)) {
            let buffer = CaptureBuffer::new();
            let mut next = 0i64;
            let mut drained = Vec::new();

            for append in ops {
                if append {
                    buffer.push_location(location(next));
                    next += 1;
                } else {
                    drained.extend(buffer.drain().locations.into_iter().map(|l| l.timestamp));
                }
            }
            drained.extend(buffer.drain().locations.into_iter().map(|l| l.timestamp));

            prop_assert_eq!(drained, (0..next).collect::<Vec<_>>());
        }
    }
}
