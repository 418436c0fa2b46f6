//! In-process work queue with at-least-once delivery semantics.

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;
use waypoint_core::{MessageId, QueueError, TickJob, TickQueue};

use crate::rng::DeterministicRng;

/// How the queue misbehaves on delivery.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    /// Probability that a message is delivered a second time.
    pub duplicate_rate: f64,
    /// Deliver each drained batch in random order.
    pub shuffle: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            duplicate_rate: 0.0,
            shuffle: false,
        }
    }
}

/// One delivery of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub target_url: Url,
    pub job: TickJob,
    /// True for the redelivered copy of a message.
    pub redelivery: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub published: u64,
    pub delivered: u64,
    pub redelivered: u64,
}

struct QueueState {
    pending: Vec<(MessageId, Url, TickJob)>,
    next_id: u64,
    stats: QueueStats,
    rng: DeterministicRng,
}

/// Holds published jobs until drained, then hands them out with seeded
/// duplicates and reordering.
pub struct InMemoryTickQueue {
    config: DeliveryConfig,
    state: Mutex<QueueState>,
}

impl InMemoryTickQueue {
    pub fn new(config: DeliveryConfig, rng: DeterministicRng) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                next_id: 0,
                stats: QueueStats::default(),
                rng,
            }),
        }
    }

    /// Queue that delivers exactly once, in publish order.
    pub fn reliable() -> Self {
        Self::new(DeliveryConfig::default(), DeterministicRng::from_seed(0))
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    /// Takes every pending message and returns the deliveries for it.
    pub fn drain(&self) -> Vec<Delivery> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);

        let mut deliveries = Vec::with_capacity(pending.len());
        for (message_id, target_url, job) in pending {
            let duplicate = state.rng.random_bool(self.config.duplicate_rate);
            deliveries.push(Delivery {
                message_id: message_id.clone(),
                target_url: target_url.clone(),
                job: job.clone(),
                redelivery: false,
            });
            if duplicate {
                deliveries.push(Delivery {
                    message_id,
                    target_url,
                    job,
                    redelivery: true,
                });
            }
        }

        if self.config.shuffle {
            state.rng.shuffle(&mut deliveries);
        }

        state.stats.delivered += deliveries.len() as u64;
        state.stats.redelivered += deliveries.iter().filter(|d| d.redelivery).count() as u64;
        deliveries
    }
}

#[async_trait]
impl TickQueue for InMemoryTickQueue {
    async fn publish(&self, target_url: &Url, job: &TickJob) -> Result<MessageId, QueueError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let message_id = MessageId(format!("sim-{:06}", state.next_id));
        state
            .pending
            .push((message_id.clone(), target_url.clone(), job.clone()));
        state.stats.published += 1;
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use waypoint_core::ShipmentId;

    use super::*;

    fn job(raw: &str) -> TickJob {
        TickJob {
            shipment_id: ShipmentId::parse(raw).unwrap(),
        }
    }

    fn target() -> Url {
        Url::parse("http://localhost:3000/api/simulation/tick").unwrap()
    }

    #[tokio::test]
    async fn test_reliable_queue_delivers_once_in_order() {
        let queue = InMemoryTickQueue::reliable();
        let first = queue.publish(&target(), &job("A")).await.unwrap();
        queue.publish(&target(), &job("B")).await.unwrap();

        assert_eq!(first, MessageId("sim-000001".to_string()));
        assert_eq!(queue.pending_len(), 2);

        let deliveries = queue.drain();
        let ids: Vec<&str> = deliveries.iter().map(|d| d.job.shipment_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(deliveries.iter().all(|d| !d.redelivery));
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_follow_rate_and_keep_message_id() {
        let queue = InMemoryTickQueue::new(
            DeliveryConfig {
                duplicate_rate: 1.0,
                shuffle: true,
            },
            DeterministicRng::from_seed(9),
        );
        for i in 0..5 {
            queue.publish(&target(), &job(&format!("S-{i}"))).await.unwrap();
        }

        let deliveries = queue.drain();
        assert_eq!(deliveries.len(), 10);
        for copy in deliveries.iter().filter(|d| d.redelivery) {
            assert!(
                deliveries
                    .iter()
                    .any(|d| !d.redelivery && d.message_id == copy.message_id && d.job == copy.job)
            );
        }
        assert_eq!(
            queue.stats(),
            QueueStats {
                published: 5,
                delivered: 10,
                redelivered: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_same_seed_same_delivery_order() {
        let make = || {
            InMemoryTickQueue::new(
                DeliveryConfig {
                    duplicate_rate: 0.5,
                    shuffle: true,
                },
                DeterministicRng::from_seed(1234),
            )
        };
        let (a, b) = (make(), make());
        for i in 0..20 {
            a.publish(&target(), &job(&format!("S-{i}"))).await.unwrap();
            b.publish(&target(), &job(&format!("S-{i}"))).await.unwrap();
        }

        assert_eq!(a.drain(), b.drain());
    }
}
