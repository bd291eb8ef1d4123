//! User-facing reporting facade over the dispatch engine.
//!
//! A [`Reporter`] owns one payload queue registered with a dispatcher. It
//! wraps whatever the caller hands it in a small envelope (environment,
//! severity, capture time) and enqueues the result; delivery happens on
//! the dispatcher's worker thread.

use std::{fmt, str::FromStr, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::{ConfigError, ReporterConfig},
    dispatcher::{Dispatcher, RegistryError},
    payload::Payload,
    queue::PayloadQueue,
};

/// Severity attached to reported items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl Level {
    /// Canonical lowercase name, as the ingestion service expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

/// Errors raised while constructing or reconfiguring a reporter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Serialize)]
struct Envelope<'a> {
    environment: &'a str,
    level: &'static str,
    /// Unix timestamp of the moment the item was reported.
    timestamp: i64,
    body: &'a Value,
}

/// Handle applications report through. Dropping a reporter unregisters its
/// queue unless the queue is pinned.
pub struct Reporter {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<PayloadQueue>,
}

impl Reporter {
    /// Reporter whose queue is registered with `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>, config: ReporterConfig) -> Result<Self, ReporterError> {
        Self::build(dispatcher, config, false)
    }

    /// Reporter whose queue stays registered for the process lifetime;
    /// dropping the handle leaves the queue draining.
    pub fn pinned(
        dispatcher: Arc<Dispatcher>,
        config: ReporterConfig,
    ) -> Result<Self, ReporterError> {
        Self::build(dispatcher, config, true)
    }

    fn build(
        dispatcher: Arc<Dispatcher>,
        config: ReporterConfig,
        pinned: bool,
    ) -> Result<Self, ReporterError> {
        config.validate()?;
        let queue = if pinned {
            PayloadQueue::pinned(config, dispatcher.events().clone())
        } else {
            PayloadQueue::new(config, dispatcher.events().clone())
        };
        dispatcher.register(&queue)?;
        Ok(Self { dispatcher, queue })
    }

    /// Report a plain message at `level`.
    pub fn report(&self, level: Level, message: &str) {
        self.report_value(level, serde_json::json!({ "message": { "body": message } }));
    }

    /// Report an arbitrary JSON body at `level`.
    pub fn report_value(&self, level: Level, body: Value) {
        let config = self.queue.config();
        let envelope = Envelope {
            environment: &config.environment,
            level: level.as_str(),
            timestamp: Utc::now().timestamp(),
            body: &body,
        };
        match serde_json::to_value(&envelope) {
            Ok(value) => self.queue.enqueue(Payload::new(value)),
            Err(err) => log::warn!("reporter: could not build payload envelope: {err}"),
        }
    }

    pub fn debug(&self, message: &str) {
        self.report(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.report(Level::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.report(Level::Critical, message);
    }

    /// Replace the reporter's configuration and move its queue to the new
    /// token's bucket. Pending payloads are preserved.
    pub fn reconfigure(&self, config: ReporterConfig) -> Result<(), ReporterError> {
        config.validate()?;
        self.queue.replace_config(config);
        self.dispatcher.config_changed(&self.queue)?;
        Ok(())
    }

    pub fn queue(&self) -> &Arc<PayloadQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if !self.queue.is_pinned()
            && let Err(err) = self.dispatcher.unregister(&self.queue)
        {
            log::warn!("reporter: could not unregister queue on drop: {err}");
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("queue", &self.queue)
            .finish()
    }
}
