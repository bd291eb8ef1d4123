//! Reporter configuration consumed by the dispatch engine.
//!
//! A [`ReporterConfig`] describes one reporting destination: where payloads
//! go, which credential they report under, and how aggressively the queue
//! may drain. The live configuration of a queue is held in a [`ConfigCell`]
//! so the reporting layer can swap it atomically while the dispatcher keeps
//! reading a consistent snapshot.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use thiserror::Error;

/// Default ingestion endpoint for the hosted service.
pub const DEFAULT_ENDPOINT: &str = "https://api.faultline.io/item/";
/// Default deployment environment attached to payload envelopes.
pub const DEFAULT_ENVIRONMENT: &str = "production";
/// Default ceiling on sends per queue per minute.
pub const DEFAULT_MAX_REPORTS_PER_MINUTE: u32 = 60;
/// Default bound on pending payloads per queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Errors raised when a configuration fails validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Invalid user supplied configuration.
    #[error("invalid reporter configuration: {0}")]
    Invalid(String),
}

/// Configuration for one reporting destination.
#[derive(Clone, Debug)]
pub struct ReporterConfig {
    /// Credential identifying the destination project. `None` (or empty)
    /// leaves the queue registered but unserviced until a token arrives.
    pub access_token: Option<String>,
    /// Deployment environment recorded on payload envelopes.
    pub environment: String,
    /// Ingestion endpoint receiving payload POSTs.
    pub endpoint: String,
    /// Ceiling on sends per queue per minute; the queue self-throttles to
    /// one dequeue per `60 s / max_reports_per_minute`.
    pub max_reports_per_minute: u32,
    /// Field names whose values are redacted before serialization.
    pub scrub_fields: Vec<String>,
    /// Pending payloads retained per queue; the oldest is evicted on
    /// overflow.
    pub queue_depth: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            environment: DEFAULT_ENVIRONMENT.to_owned(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            max_reports_per_minute: DEFAULT_MAX_REPORTS_PER_MINUTE,
            scrub_fields: Vec::new(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ReporterConfig {
    /// Configuration for `access_token` with every other field defaulted.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    /// Override the deployment environment.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Override the ingestion endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the per-queue send ceiling.
    pub fn with_max_reports_per_minute(mut self, max_reports_per_minute: u32) -> Self {
        self.max_reports_per_minute = max_reports_per_minute;
        self
    }

    /// Override the scrub field list.
    pub fn with_scrub_fields(mut self, scrub_fields: Vec<String>) -> Self {
        self.scrub_fields = scrub_fields;
        self
    }

    /// Override the pending payload bound.
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// The access token, treating an empty string as absent.
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|token| !token.is_empty())
    }

    /// Minimum wall-clock spacing between two dequeues from one queue.
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_secs(60) / self.max_reports_per_minute.max(1)
    }

    /// Check the configuration for values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reports_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "max_reports_per_minute must be positive".to_owned(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "queue_depth must be positive".to_owned(),
            ));
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".to_owned()));
        }
        Ok(())
    }
}

/// Shared, swappable view of a queue's current configuration.
///
/// Readers take a cheap `Arc` snapshot; a snapshot stays coherent for the
/// duration of one send even while a replacement lands.
pub struct ConfigCell {
    inner: RwLock<Arc<ReporterConfig>>,
}

impl ConfigCell {
    /// Wrap an initial configuration.
    pub fn new(config: ReporterConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Snapshot of the current configuration.
    pub fn current(&self) -> Arc<ReporterConfig> {
        self.inner.read().clone()
    }

    /// Install `config`, returning the configuration it replaced.
    pub fn replace(&self, config: ReporterConfig) -> Arc<ReporterConfig> {
        let mut guard = self.inner.write();
        std::mem::replace(&mut guard, Arc::new(config))
    }
}
