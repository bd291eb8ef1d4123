//! Client-side error and event reporting with asynchronous delivery.
//!
//! Application code hands payloads to a [`Reporter`]; a [`Dispatcher`]
//! drains the per-reporter queues on a background thread, enforces
//! per-access-token rate limits with adaptive backoff, retries transient
//! transport failures, and broadcasts [`InternalEvent`]s to registered
//! observers. Delivery is in-memory and best-effort: nothing survives a
//! process restart, and producers only learn about failures by watching
//! the event bus.
//!
//! ```no_run
//! use faultline::{Dispatcher, Reporter, ReporterConfig};
//!
//! let dispatcher = Dispatcher::global().clone();
//! let reporter = Reporter::new(
//!     dispatcher,
//!     ReporterConfig::new("project-access-token").with_environment("staging"),
//! )?;
//! reporter.error("cache node unreachable");
//! # Ok::<(), faultline::ReporterError>(())
//! ```

pub mod config;
pub mod dispatcher;
mod drop_warner;
pub mod events;
pub mod payload;
pub mod queue;
pub mod reporter;
pub mod transport;

pub use config::{ConfigError, ReporterConfig};
pub use dispatcher::{BackoffPolicy, Dispatcher, DispatcherConfig, RegistryError};
pub use events::{EventBus, EventObserver, InternalEvent, SubscriptionId};
pub use payload::Payload;
pub use queue::PayloadQueue;
pub use reporter::{Level, Reporter, ReporterError};
pub use transport::{ApiResponse, HttpTransport, Transport, TransportError};
