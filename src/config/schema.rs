//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::observability::logging::Level;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment name (development, staging, production).
    pub environment: String,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-client admission control.
    pub rate_limit: RateLimitConfig,

    /// Token lifetimes and housekeeping.
    pub auth: AuthConfig,

    /// Background task execution.
    pub background: BackgroundConfig,

    /// Structured logging.
    pub logging: LoggingConfig,

    /// Metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            background: BackgroundConfig::default(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. When false every request is admitted.
    pub enabled: bool,

    /// Bucket capacity (maximum burst per client).
    pub capacity: u32,

    /// Tokens added to each bucket per second.
    pub refill_rate_per_second: f64,

    /// How often idle clients are swept, in seconds.
    pub sweep_interval_secs: u64,

    /// Clients unseen for longer than this are evicted, in seconds.
    pub idle_eviction_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4,
            refill_rate_per_second: 2.0,
            sweep_interval_secs: 60,
            idle_eviction_secs: 180,
        }
    }
}

/// Token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of authentication tokens in seconds.
    pub authentication_ttl_secs: u64,

    /// Lifetime of activation tokens in seconds.
    pub activation_ttl_secs: u64,

    /// How often expired tokens are purged from the store, in seconds.
    pub purge_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authentication_ttl_secs: 24 * 60 * 60,
            activation_ttl_secs: 3 * 24 * 60 * 60,
            purge_interval_secs: 300,
        }
    }
}

/// Background runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Optional cap on concurrently running tasks. Unset means unbounded.
    pub max_concurrency: Option<usize>,

    /// How long shutdown waits for in-flight tasks, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            drain_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Entries below this level are dropped (info, error, fatal, off).
    pub min_level: Level,

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            min_level: Level::Info,
            filter: "gatekeep=info,tower_http=info".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
