//! Durable mirror of each shipment's last known location.
//!
//! The cache is the source of truth for simulation continuation. The mirror is
//! written after every successful cache write, independently and without any
//! cross-store transaction, so it may lag or diverge when a mirror write fails.
//! External consumers that read the durable store get eventual consistency.

#[cfg(feature = "mysql")]
pub mod mysql;

use std::collections::HashMap;

use async_trait::async_trait;
#[cfg(feature = "mysql")]
pub use mysql::MySqlLocationMirror;
use parking_lot::RwLock;

use crate::model::{LocationSnapshot, ShipmentId};

/// Best-effort, non-authoritative location persistence.
#[async_trait]
pub trait LocationMirror: Send + Sync {
    /// Records `snapshot` and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// - `MirrorError::Backend` - If the durable store rejected the write
    async fn update_last_known_location(
        &self,
        snapshot: &LocationSnapshot,
    ) -> Result<u64, MirrorError>;
}

/// Errors from durable location writes.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Durable store error: {reason}")]
    Backend { reason: String },
}

/// Mirror that keeps the latest snapshot per shipment in memory.
#[derive(Debug, Default)]
pub struct InMemoryLocationMirror {
    rows: RwLock<MirrorRows>,
}

#[derive(Debug, Default)]
struct MirrorRows {
    latest: HashMap<ShipmentId, LocationSnapshot>,
    writes: usize,
}

impl InMemoryLocationMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent snapshot written for `shipment_id`.
    pub fn latest(&self, shipment_id: &ShipmentId) -> Option<LocationSnapshot> {
        self.rows.read().latest.get(shipment_id).cloned()
    }

    /// Total number of writes received.
    pub fn write_count(&self) -> usize {
        self.rows.read().writes
    }

    /// Number of shipments with a recorded location.
    pub fn shipment_count(&self) -> usize {
        self.rows.read().latest.len()
    }
}

#[async_trait]
impl LocationMirror for InMemoryLocationMirror {
    async fn update_last_known_location(
        &self,
        snapshot: &LocationSnapshot,
    ) -> Result<u64, MirrorError> {
        let mut rows = self.rows.write();
        rows.writes += 1;
        rows.latest
            .insert(snapshot.shipment_id.clone(), snapshot.clone());
        Ok(1)
    }
}

/// Mirror used when no durable store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLocationMirror;

#[async_trait]
impl LocationMirror for DisabledLocationMirror {
    async fn update_last_known_location(
        &self,
        snapshot: &LocationSnapshot,
    ) -> Result<u64, MirrorError> {
        tracing::trace!(
            "No durable store configured, skipping location for {}",
            snapshot.shipment_id
        );
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, latitude: f64, timestamp_ms: i64) -> LocationSnapshot {
        LocationSnapshot {
            shipment_id: ShipmentId::parse(id).unwrap(),
            latitude,
            longitude: 13.4,
            bearing: 0.0,
            timestamp_ms,
        }
    }

    #[tokio::test]
    async fn test_in_memory_mirror_keeps_one_row_per_shipment() {
        let mirror = InMemoryLocationMirror::new();
        for step in 0..100 {
            let latitude = 52.0 + f64::from(step) * 0.001;
            mirror
                .update_last_known_location(&snapshot("A", latitude, i64::from(step)))
                .await
                .unwrap();
        }
        mirror
            .update_last_known_location(&snapshot("B", 48.0, 7))
            .await
            .unwrap();

        assert_eq!(mirror.write_count(), 101);
        assert_eq!(mirror.shipment_count(), 2);
        let latest = mirror.latest(&ShipmentId::parse("A").unwrap()).unwrap();
        assert_eq!(latest.timestamp_ms, 99);
        assert!(mirror.latest(&ShipmentId::parse("C").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_disabled_mirror_affects_no_rows() {
        let affected = DisabledLocationMirror
            .update_last_known_location(&snapshot("A", 52.0, 0))
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }
}
