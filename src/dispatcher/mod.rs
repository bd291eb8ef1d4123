//! Asynchronous dispatch engine.
//!
//! The [`Dispatcher`] owns every registered [`PayloadQueue`], grouped into
//! per-access-token buckets. A background worker drains the queues on a
//! fixed poll interval, honouring two independent throttles: the per-queue
//! send spacing derived from the reporter's configuration, and the
//! per-token adaptive backoff driven by too-many-requests responses.
//!
//! Ordering is FIFO within a queue and unspecified across queues or
//! tokens. Buckets are walked in key order each pass, so no token can
//! starve another as long as it is not itself rate limited.

mod backoff;
mod bucket;
mod worker;

pub use backoff::{BackoffPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};

use std::{
    collections::BTreeMap,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::Sender;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    events::EventBus,
    queue::PayloadQueue,
    transport::{HttpTransport, Transport},
};

use bucket::TokenBucket;

/// Pause between service passes over the registered queues.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Send attempts per payload per pass when the transport keeps failing.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 3;
/// Consecutive API errors tolerated for one head before it is discarded.
pub const DEFAULT_MAX_PAYLOAD_FAILURES: u32 = 5;

/// Tuning for a [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Pause between service passes.
    pub poll_interval: Duration,
    /// Attempts per payload per pass while the transport reports
    /// network-class errors.
    pub transport_retries: u32,
    /// Delay schedule applied to a token after a too-many-requests
    /// response.
    pub backoff: BackoffPolicy,
    /// When true, a rate-limited token ends the whole pass so every token
    /// yields together; when false only the limited token's remaining
    /// queues are skipped.
    pub rate_limit_halts_tick: bool,
    /// Consecutive API errors tolerated for one head before it is
    /// discarded. Zero disables the guard and retries forever.
    pub max_payload_failures: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            backoff: BackoffPolicy::default(),
            rate_limit_halts_tick: true,
            max_payload_failures: DEFAULT_MAX_PAYLOAD_FAILURES,
        }
    }
}

/// Errors raised at the registration boundary. These are programmer
/// errors; the engine never swallows them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("queue is already registered")]
    AlreadyRegistered,
    #[error("queue is not registered")]
    NotRegistered,
    #[error("pinned queues cannot be unregistered")]
    PinnedQueue,
}

/// Everything the worker needs a consistent view of: the queue set and the
/// token buckets indexing it.
#[derive(Default)]
pub(crate) struct Registry {
    queues: Vec<Arc<PayloadQueue>>,
    pub(crate) buckets: BTreeMap<String, TokenBucket>,
}

pub(crate) type SharedRegistry = Arc<Mutex<Registry>>;

impl Registry {
    fn is_registered(&self, queue: &Arc<PayloadQueue>) -> bool {
        self.queues.iter().any(|member| Arc::ptr_eq(member, queue))
    }

    /// Remove `queue` from whichever bucket holds it and drop buckets left
    /// empty. Scanning every bucket keeps this correct even when the
    /// queue's configured token no longer matches its old bucket.
    fn detach_from_buckets(&mut self, queue: &Arc<PayloadQueue>) {
        for bucket in self.buckets.values_mut() {
            bucket.detach(queue);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
    }

    /// Index `queue` under its currently configured token, if any.
    fn attach_by_token(&mut self, queue: &Arc<PayloadQueue>) {
        if let Some(token) = queue.config().token() {
            self.buckets
                .entry(token.to_owned())
                .or_default()
                .attach(queue.clone());
        }
    }
}

/// Process-wide controller owning the payload queues and their delivery.
///
/// Construction spawns the worker thread; [`shutdown`](Self::shutdown)
/// (or dropping the last handle) stops it after the pass in progress.
pub struct Dispatcher {
    registry: SharedRegistry,
    events: Arc<EventBus>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Dispatcher with its own worker thread driving `transport`.
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let registry: SharedRegistry = Arc::new(Mutex::new(Registry::default()));
        let events = Arc::new(EventBus::new());
        let parts = worker::spawn_worker(registry.clone(), events.clone(), transport, config);
        Arc::new(Self {
            registry,
            events,
            shutdown_tx: Mutex::new(Some(parts.shutdown_tx)),
            worker: Mutex::new(Some(parts.handle)),
        })
    }

    /// Process-wide default instance backed by [`HttpTransport`]; started
    /// on first access and never torn down.
    pub fn global() -> &'static Arc<Dispatcher> {
        static GLOBAL: Lazy<Arc<Dispatcher>> =
            Lazy::new(|| Dispatcher::new(DispatcherConfig::default(), Arc::new(HttpTransport::new())));
        &GLOBAL
    }

    /// Bus carrying the engine's telemetry events.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Add `queue` to the serviced set, indexed under its configured
    /// access token.
    pub fn register(&self, queue: &Arc<PayloadQueue>) -> Result<(), RegistryError> {
        let mut registry = self.registry.lock();
        if registry.is_registered(queue) {
            return Err(RegistryError::AlreadyRegistered);
        }
        registry.queues.push(queue.clone());
        registry.attach_by_token(queue);
        Ok(())
    }

    /// Remove `queue` from the serviced set. Pending payloads stay in the
    /// queue; they simply stop being drained.
    pub fn unregister(&self, queue: &Arc<PayloadQueue>) -> Result<(), RegistryError> {
        if queue.is_pinned() {
            return Err(RegistryError::PinnedQueue);
        }
        let mut registry = self.registry.lock();
        let before = registry.queues.len();
        registry.queues.retain(|member| !Arc::ptr_eq(member, queue));
        if registry.queues.len() == before {
            return Err(RegistryError::NotRegistered);
        }
        registry.detach_from_buckets(queue);
        Ok(())
    }

    /// Re-bucket `queue` after its configuration was replaced. The
    /// reporting layer calls this once per
    /// [`replace_config`](PayloadQueue::replace_config); pending payloads
    /// move with the queue. Re-announcing an unchanged token is harmless.
    pub fn config_changed(&self, queue: &Arc<PayloadQueue>) -> Result<(), RegistryError> {
        let mut registry = self.registry.lock();
        if !registry.is_registered(queue) {
            return Err(RegistryError::NotRegistered);
        }
        registry.detach_from_buckets(queue);
        registry.attach_by_token(queue);
        Ok(())
    }

    /// Number of queues reporting under `access_token`, or under any token
    /// when `None`. Queues with no configured token are not counted.
    pub fn queues_count(&self, access_token: Option<&str>) -> usize {
        let registry = self.registry.lock();
        match access_token.filter(|token| !token.is_empty()) {
            Some(token) => registry.buckets.get(token).map_or(0, TokenBucket::len),
            None => registry.buckets.values().map(TokenBucket::len).sum(),
        }
    }

    /// Stop the worker after the pass in progress. Idempotent; later calls
    /// are no-ops.
    pub fn shutdown(&self) {
        let sender = self.shutdown_tx.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::warn!("dispatcher: worker thread panicked");
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket_state(&self, token: &str) -> Option<(u32, Option<std::time::Instant>)> {
        let registry = self.registry.lock();
        registry
            .buckets
            .get(token)
            .map(|bucket| (bucket.backoff_level(), bucket.next_permitted_send()))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
