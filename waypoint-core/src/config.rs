//! Centralized configuration for Waypoint.
//!
//! All tunable parameters and deployment settings live here so that
//! collaborators are constructed once, at startup, from validated values.

use std::time::Duration;

use url::Url;

/// Central configuration for all Waypoint components.
#[derive(Debug, Clone, Default)]
pub struct WaypointConfig {
    pub simulation: SimulationConfig,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub cache: CacheConfig,
    pub durable: DurableConfig,
    pub scheduler: SchedulerConfig,
}

/// Movement model parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Vehicle speed in metres per second
    pub base_speed_mps: f64,
    /// Distance ahead of the vehicle used to derive its heading
    pub lookahead_meters: f64,
    /// Compare-and-set attempts per tick before reporting a conflict
    pub max_write_attempts: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_speed_mps: 15.0, // 54 km/h
            lookahead_meters: 5.0,
            max_write_attempts: 3,
        }
    }
}

/// Work queue client configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Base URL of the publish API
    pub endpoint: String,
    /// Bearer token; the HTTP client refuses to start without one
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://qstash.upstash.io".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Where queued tick jobs get delivered.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Publicly reachable base URL of this deployment
    pub public_base_url: Option<String>,
    pub tick_path: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            public_base_url: None,
            tick_path: "/api/simulation/tick".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Resolves the URL the queue should invoke for each tick job.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingValue` - If no public base URL is configured
    /// - `ConfigError::InvalidUrl` - If the base URL or path cannot be parsed
    pub fn tick_target_url(&self) -> Result<Url, ConfigError> {
        let base = self
            .public_base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingValue {
                name: "WAYPOINT_PUBLIC_URL",
            })?;

        let base = Url::parse(base).map_err(|e| ConfigError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;

        base.join(&self.tick_path)
            .map_err(|e| ConfigError::InvalidUrl {
                url: self.tick_path.clone(),
                reason: e.to_string(),
            })
    }
}

/// Key-value cache holding simulation state and the active set.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    /// Prefix for per-shipment state keys
    pub key_prefix: String,
    /// Key of the set of active shipment IDs
    pub active_set_key: String,
    /// Expiry applied to every state write
    pub state_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "simulation:".to_string(),
            active_set_key: "simulations:active".to_string(),
            state_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Durable store mirrored with the last known location.
#[derive(Debug, Clone, Default)]
pub struct DurableConfig {
    pub database_url: Option<String>,
}

/// Periodic enqueue pass settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Upper bound on shipments dispatched concurrently within one pass
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_concurrency: 32,
        }
    }
}

impl WaypointConfig {
    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(speed) = env_parse::<f64>("WAYPOINT_BASE_SPEED_MPS") {
            config.simulation.base_speed_mps = speed;
        }

        if let Some(meters) = env_parse::<f64>("WAYPOINT_LOOKAHEAD_METERS") {
            config.simulation.lookahead_meters = meters;
        }

        if let Ok(endpoint) = std::env::var("WAYPOINT_QUEUE_URL") {
            config.queue.endpoint = endpoint;
        }

        if let Ok(token) = std::env::var("WAYPOINT_QUEUE_TOKEN") {
            config.queue.token = Some(token);
        }

        if let Ok(url) = std::env::var("WAYPOINT_PUBLIC_URL") {
            config.dispatch.public_base_url = Some(url);
        }

        if let Ok(url) = std::env::var("WAYPOINT_REDIS_URL") {
            config.cache.redis_url = Some(url);
        }

        if let Ok(url) = std::env::var("WAYPOINT_DATABASE_URL") {
            config.durable.database_url = Some(url);
        }

        if let Some(seconds) = env_parse::<u64>("WAYPOINT_TICK_INTERVAL_SECS") {
            config.scheduler.interval = Duration::from_secs(seconds);
        }

        if let Some(limit) = env_parse::<usize>("WAYPOINT_MAX_CONCURRENCY") {
            config.scheduler.max_concurrency = limit;
        }

        config
    }

    /// Creates a configuration for tests and local simulation runs.
    pub fn for_testing() -> Self {
        Self {
            dispatch: DispatchConfig {
                public_base_url: Some("http://localhost:3000".to_string()),
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(1),
                max_concurrency: 8,
            },
            ..Default::default()
        }
    }

    /// Checks values that would make the movement model or scheduler nonsensical.
    ///
    /// # Errors
    ///
    /// - `ConfigError::OutOfRange` - If a numeric setting is outside its valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_positive_finite(self.simulation.base_speed_mps) {
            return Err(ConfigError::OutOfRange {
                name: "base_speed_mps",
                reason: format!("must be positive, got {}", self.simulation.base_speed_mps),
            });
        }
        let lookahead = self.simulation.lookahead_meters;
        if !lookahead.is_finite() || lookahead < 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "lookahead_meters",
                reason: format!(
                    "must be finite and not negative, got {}",
                    self.simulation.lookahead_meters
                ),
            });
        }
        if self.simulation.max_write_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max_write_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                name: "interval",
                reason: "must be longer than zero".to_string(),
            });
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn is_positive_finite(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Missing or invalid deployment configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {name}")]
    MissingValue { name: &'static str },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Setting {name} out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },

    #[error("Failed to initialize {component}: {reason}")]
    Initialization {
        component: &'static str,
        reason: String,
    },
}
