//! Periodic fan-out of tick jobs.
//!
//! Each pass scans the active registry and decides, per shipment and
//! independently of every other shipment, whether to enqueue a tick, skip it
//! or clean the entry up. One shipment's failure is recorded in its outcome and
//! never stops the rest of the pass.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::DispatchConfig;
use crate::model::{ShipmentId, SimulationStatus, TickJob};
use crate::queue::{MessageId, TickQueue};
use crate::store::{ActiveSimulationRegistry, SimulationStateStore, StoreError};

/// Why a registry entry was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupReason {
    StateNotFound,
    TerminalStatus(SimulationStatus),
}

impl std::fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateNotFound => write!(f, "state not found"),
            Self::TerminalStatus(status) => write!(f, "terminal status {status}"),
        }
    }
}

/// What happened to one shipment during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued { message_id: MessageId },
    Skipped { status: SimulationStatus },
    Cleaned { reason: CleanupReason },
    /// Left registered and retried on the next pass.
    Failed { reason: String },
}

/// Outcome of one shipment within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentDispatch {
    pub shipment_id: ShipmentId,
    pub outcome: DispatchOutcome,
}

/// Counts reported by an enqueue pass; the four outcome counts always sum to
/// `found_active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueSummary {
    pub found_active: usize,
    pub enqueued_count: usize,
    pub skipped_count: usize,
    pub cleanup_count: usize,
    pub error_count: usize,
}

impl EnqueueSummary {
    fn from_dispatches(dispatches: &[ShipmentDispatch]) -> Self {
        let mut summary = Self {
            found_active: dispatches.len(),
            ..Self::default()
        };
        for dispatch in dispatches {
            match dispatch.outcome {
                DispatchOutcome::Enqueued { .. } => summary.enqueued_count += 1,
                DispatchOutcome::Skipped { .. } => summary.skipped_count += 1,
                DispatchOutcome::Cleaned { .. } => summary.cleanup_count += 1,
                DispatchOutcome::Failed { .. } => summary.error_count += 1,
            }
        }
        summary
    }
}

/// Result of one scheduler pass.
#[derive(Debug, Clone, Default)]
pub struct SchedulerPass {
    pub summary: EnqueueSummary,
    pub dispatches: Vec<ShipmentDispatch>,
}

/// Errors that fail a whole pass.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to read active simulations: {0}")]
    RegistryUnavailable(#[source] StoreError),
}

/// Scans active simulations and enqueues tick jobs for moving vehicles.
pub struct TickScheduler {
    registry: Arc<dyn ActiveSimulationRegistry>,
    states: Arc<dyn SimulationStateStore>,
    queue: Arc<dyn TickQueue>,
    dispatch: DispatchConfig,
    max_concurrency: usize,
}

impl TickScheduler {
    pub fn new(
        registry: Arc<dyn ActiveSimulationRegistry>,
        states: Arc<dyn SimulationStateStore>,
        queue: Arc<dyn TickQueue>,
        dispatch: DispatchConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            states,
            queue,
            dispatch,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Runs one enqueue pass over every registered shipment.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::RegistryUnavailable` - If the active set could not be read
    pub async fn run_pass(&self) -> Result<SchedulerPass, SchedulerError> {
        let shipment_ids = self
            .registry
            .list()
            .await
            .map_err(SchedulerError::RegistryUnavailable)?;

        if shipment_ids.is_empty() {
            tracing::debug!("No active simulations to tick");
            return Ok(SchedulerPass::default());
        }

        tracing::debug!("Scanning {} active simulations", shipment_ids.len());

        let dispatches: Vec<ShipmentDispatch> = futures::stream::iter(shipment_ids)
            .map(|shipment_id| async move {
                let outcome = self.dispatch_one(&shipment_id).await;
                ShipmentDispatch {
                    shipment_id,
                    outcome,
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let summary = EnqueueSummary::from_dispatches(&dispatches);
        tracing::info!(
            "Tick pass: {} active, {} enqueued, {} skipped, {} cleaned, {} errors",
            summary.found_active,
            summary.enqueued_count,
            summary.skipped_count,
            summary.cleanup_count,
            summary.error_count
        );

        Ok(SchedulerPass {
            summary,
            dispatches,
        })
    }

    async fn dispatch_one(&self, shipment_id: &ShipmentId) -> DispatchOutcome {
        let vehicle = match self.states.get(shipment_id).await {
            Ok(vehicle) => vehicle,
            Err(e) => {
                tracing::warn!("Failed to load state for {}: {}", shipment_id, e);
                return DispatchOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let Some(vehicle) = vehicle else {
            return self
                .clean_up(shipment_id, CleanupReason::StateNotFound)
                .await;
        };

        match vehicle.status {
            SimulationStatus::EnRoute => self.enqueue(shipment_id).await,
            status if status.is_terminal() => {
                self.clean_up(shipment_id, CleanupReason::TerminalStatus(status))
                    .await
            }
            status => {
                tracing::debug!("Skipping {} in status {}", shipment_id, status);
                DispatchOutcome::Skipped { status }
            }
        }
    }

    async fn enqueue(&self, shipment_id: &ShipmentId) -> DispatchOutcome {
        let target = match self.dispatch.tick_target_url() {
            Ok(target) => target,
            Err(e) => {
                tracing::error!("Cannot resolve tick target for {}: {}", shipment_id, e);
                return DispatchOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let job = TickJob {
            shipment_id: shipment_id.clone(),
        };
        match self.queue.publish(&target, &job).await {
            Ok(message_id) => {
                tracing::debug!("Enqueued tick for {} as {}", shipment_id, message_id);
                DispatchOutcome::Enqueued { message_id }
            }
            Err(e) => {
                tracing::warn!("Failed to enqueue tick for {}: {}", shipment_id, e);
                DispatchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn clean_up(&self, shipment_id: &ShipmentId, reason: CleanupReason) -> DispatchOutcome {
        match self.registry.remove(shipment_id).await {
            Ok(()) => {
                tracing::info!("Removed {} from active simulations: {}", shipment_id, reason);
                DispatchOutcome::Cleaned { reason }
            }
            Err(e) => {
                tracing::warn!("Failed to remove {} from active simulations: {}", shipment_id, e);
                DispatchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Runs a pass every `interval` until the returned task is aborted.
///
/// Passes never overlap; a pass that overruns the interval delays the next
/// one instead of queueing a burst.
pub fn spawn_scheduler_loop(scheduler: Arc<TickScheduler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = scheduler.run_pass().await {
                tracing::error!("Tick pass failed: {}", e);
            }
        }
    })
}
