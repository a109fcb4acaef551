//! Bounded, strictly time-ordered pose history for one remote entity.

use std::collections::VecDeque;

use glam::Vec3;

/// Default number of snapshots kept per entity.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 30;

/// One timestamped pose sample. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Vec3,
    /// Radians.
    pub yaw: f32,
    /// Radians.
    pub pitch: f32,
    pub timestamp_ms: i64,
}

impl Snapshot {
    pub fn new(position: Vec3, yaw: f32, pitch: f32, timestamp_ms: i64) -> Self {
        Self {
            position,
            yaw,
            pitch,
            timestamp_ms,
        }
    }
}

/// Capped ring of snapshots with strictly increasing timestamps.
///
/// The oldest entry is evicted on overflow. A snapshot whose timestamp does
/// not move past the newest stored one is rejected.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    samples: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAPACITY)
    }
}

impl SnapshotBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `snapshot`. Returns `false` if it was rejected as stale.
    pub fn push(&mut self, snapshot: Snapshot) -> bool {
        if let Some(newest) = self.samples.back()
            && snapshot.timestamp_ms <= newest.timestamp_ms
        {
            tracing::trace!(
                rejected = snapshot.timestamp_ms,
                newest = newest.timestamp_ms,
                "dropping out-of-order snapshot"
            );
            return false;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(snapshot);
        true
    }

    /// Find the adjacent pair `(a, b)` with `a.ts <= render_time <= b.ts`,
    /// scanning oldest to newest.
    pub fn bracketing_pair(&self, render_time_ms: i64) -> Option<(&Snapshot, &Snapshot)> {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .find(|(a, b)| a.timestamp_ms <= render_time_ms && render_time_ms <= b.timestamp_ms)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.samples.front()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
