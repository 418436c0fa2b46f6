//! Failure-injecting collaborators for exercising error paths.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::mirror::{LocationMirror, MirrorError};
use crate::model::{LocationSnapshot, ShipmentId, SimulatedVehicle, TickJob};
use crate::queue::{MessageId, QueueError, TickQueue};
use crate::store::{ActiveSimulationRegistry, SimulationStateStore, StoreError};

/// State store wrapper that fails selected reads and a budget of writes.
pub struct FlakyStateStore {
    inner: Arc<dyn SimulationStateStore>,
    failing_writes: AtomicUsize,
    failing_reads: Mutex<HashSet<ShipmentId>>,
}

impl FlakyStateStore {
    pub fn new(inner: Arc<dyn SimulationStateStore>) -> Self {
        Self {
            inner,
            failing_writes: AtomicUsize::new(0),
            failing_reads: Mutex::new(HashSet::new()),
        }
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Makes every read of `shipment_id` fail.
    pub fn fail_reads_for(&self, shipment_id: &ShipmentId) {
        self.failing_reads.lock().insert(shipment_id.clone());
    }

    fn take_write_failure(&self) -> Result<(), StoreError> {
        let remaining = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(StoreError::Backend {
                reason: "Mock write failure".to_string(),
            }),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl SimulationStateStore for FlakyStateStore {
    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<SimulatedVehicle>, StoreError> {
        let failing = self.failing_reads.lock().contains(shipment_id);
        if failing {
            return Err(StoreError::Backend {
                reason: "Mock read failure".to_string(),
            });
        }
        self.inner.get(shipment_id).await
    }

    async fn set(&self, vehicle: &SimulatedVehicle) -> Result<(), StoreError> {
        self.take_write_failure()?;
        self.inner.set(vehicle).await
    }

    async fn compare_and_set(
        &self,
        vehicle: &SimulatedVehicle,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        self.take_write_failure()?;
        self.inner.compare_and_set(vehicle, expected_version).await
    }

    async fn delete(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        self.inner.delete(shipment_id).await
    }
}

/// State store that lets a rival write land just before the first
/// compare-and-set, reproducing two deliveries racing on one shipment.
pub struct InterleavingStateStore {
    inner: Arc<dyn SimulationStateStore>,
    rival: Mutex<Option<SimulatedVehicle>>,
}

impl InterleavingStateStore {
    pub fn new(inner: Arc<dyn SimulationStateStore>, rival: SimulatedVehicle) -> Self {
        Self {
            inner,
            rival: Mutex::new(Some(rival)),
        }
    }
}

#[async_trait]
impl SimulationStateStore for InterleavingStateStore {
    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<SimulatedVehicle>, StoreError> {
        self.inner.get(shipment_id).await
    }

    async fn set(&self, vehicle: &SimulatedVehicle) -> Result<(), StoreError> {
        self.inner.set(vehicle).await
    }

    async fn compare_and_set(
        &self,
        vehicle: &SimulatedVehicle,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let rival = self.rival.lock().take();
        if let Some(rival) = rival {
            self.inner.set(&rival).await?;
        }
        self.inner.compare_and_set(vehicle, expected_version).await
    }

    async fn delete(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        self.inner.delete(shipment_id).await
    }
}

/// Registry whose every call fails.
#[derive(Debug, Default)]
pub struct UnreachableRegistry;

fn registry_unreachable() -> StoreError {
    StoreError::Backend {
        reason: "Mock registry unreachable".to_string(),
    }
}

#[async_trait]
impl ActiveSimulationRegistry for UnreachableRegistry {
    async fn list(&self) -> Result<Vec<ShipmentId>, StoreError> {
        Err(registry_unreachable())
    }

    async fn add(&self, _shipment_id: &ShipmentId) -> Result<(), StoreError> {
        Err(registry_unreachable())
    }

    async fn remove(&self, _shipment_id: &ShipmentId) -> Result<(), StoreError> {
        Err(registry_unreachable())
    }
}

/// Mirror whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingLocationMirror;

#[async_trait]
impl LocationMirror for FailingLocationMirror {
    async fn update_last_known_location(
        &self,
        _snapshot: &LocationSnapshot,
    ) -> Result<u64, MirrorError> {
        Err(MirrorError::Backend {
            reason: "Mock durable store failure".to_string(),
        })
    }
}

/// Queue that records published jobs and rejects selected shipments.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    published: Mutex<Vec<(Url, TickJob)>>,
    rejected: Mutex<HashSet<ShipmentId>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes publishing a job for `shipment_id` fail.
    pub fn reject(&self, shipment_id: &ShipmentId) {
        self.rejected.lock().insert(shipment_id.clone());
    }

    pub fn published(&self) -> Vec<(Url, TickJob)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl TickQueue for RecordingQueue {
    async fn publish(&self, target_url: &Url, job: &TickJob) -> Result<MessageId, QueueError> {
        if self.rejected.lock().contains(&job.shipment_id) {
            return Err(QueueError::Rejected {
                status: 503,
                body: "Mock queue rejection".to_string(),
            });
        }
        let mut published = self.published.lock();
        published.push((target_url.clone(), job.clone()));
        Ok(MessageId(format!("msg-{}", published.len())))
    }
}
