//! Work queue used to fan tick jobs out to the tick endpoint.
//!
//! Delivery is at-least-once and unordered across shipments; the tick
//! processor is written to tolerate both.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ConfigError, QueueConfig};
use crate::model::TickJob;

/// Identifier the queue assigns to a published message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publishes tick jobs for later delivery.
#[async_trait]
pub trait TickQueue: Send + Sync {
    /// Schedules `job` for delivery to `target_url`.
    ///
    /// # Errors
    ///
    /// - `QueueError::Rejected` - If the queue refused the message
    /// - `QueueError::Transport` - If the queue could not be reached
    async fn publish(&self, target_url: &Url, job: &TickJob) -> Result<MessageId, QueueError>;
}

/// Errors from publishing to the work queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Queue transport error: {reason}")]
    Transport { reason: String },

    #[error("Cannot publish to target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("Unexpected queue response: {reason}")]
    InvalidResponse { reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

/// HTTP publish client for a QStash-compatible queue.
///
/// Built once at startup; construction fails when credentials are missing so
/// a misconfigured deployment never starts instead of silently not ticking.
#[derive(Debug, Clone)]
pub struct HttpTickQueue {
    client: reqwest::Client,
    publish_base: Url,
    token: String,
}

impl HttpTickQueue {
    /// Creates the client from validated queue configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingValue` - If no queue token is configured
    /// - `ConfigError::InvalidUrl` - If the endpoint cannot be parsed
    /// - `ConfigError::Initialization` - If the HTTP client cannot be built
    pub fn from_config(config: &QueueConfig) -> Result<Self, ConfigError> {
        let token = config
            .token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingValue {
                name: "WAYPOINT_QUEUE_TOKEN",
            })?;

        let endpoint = Url::parse(&config.endpoint).map_err(|e| ConfigError::InvalidUrl {
            url: config.endpoint.clone(),
            reason: e.to_string(),
        })?;
        let publish_base = endpoint
            .join("/v2/publish/")
            .map_err(|e| ConfigError::InvalidUrl {
                url: config.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Initialization {
                component: "queue http client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            publish_base,
            token,
        })
    }

    fn publish_url(&self, target_url: &Url) -> Result<Url, QueueError> {
        // The destination travels verbatim as the path suffix, not as a relative join
        Url::parse(&format!("{}{}", self.publish_base, target_url)).map_err(|e| {
            QueueError::InvalidTarget {
                url: target_url.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl TickQueue for HttpTickQueue {
    async fn publish(&self, target_url: &Url, job: &TickJob) -> Result<MessageId, QueueError> {
        let publish_url = self.publish_url(target_url)?;

        let response = self
            .client
            .post(publish_url)
            .bearer_auth(&self.token)
            .json(job)
            .send()
            .await
            .map_err(|e| QueueError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PublishResponse =
            response
                .json()
                .await
                .map_err(|e| QueueError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        Ok(MessageId(parsed.message_id))
    }
}
