//! Background worker draining registered queues.
//!
//! One thread owns the whole service loop: every poll interval it takes the
//! registry lock, walks the token buckets in key order, and pushes at most
//! one payload per eligible queue through the transport. The registry lock
//! is held across the transport call so bucket membership cannot shift
//! under an in-flight send.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{error, warn};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::ReporterConfig,
    events::{EventBus, InternalEvent},
    payload::Payload,
    queue::PayloadQueue,
    transport::{ApiResponse, Transport},
};

use super::{DispatcherConfig, Registry, SharedRegistry};

/// Handle to the worker thread and its shutdown channel.
pub(crate) struct WorkerParts {
    pub(crate) shutdown_tx: Sender<()>,
    pub(crate) handle: JoinHandle<()>,
}

/// Spawn the service loop and return its communication primitives.
pub(crate) fn spawn_worker(
    registry: SharedRegistry,
    events: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
) -> WorkerParts {
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let handle = thread::spawn(move || {
        Worker {
            registry,
            events,
            transport,
            config,
            rng: StdRng::from_entropy(),
        }
        .run(shutdown_rx)
    });
    WorkerParts {
        shutdown_tx,
        handle,
    }
}

/// Result of one service pass over a bucket.
enum TickOutcome {
    Continue,
    /// A rate limit ended the whole pass; remaining buckets wait a tick.
    Halt,
}

/// What happened to the queue head after a response was applied.
enum HeadOutcome {
    Committed,
    Kept,
    Discarded,
    RateLimited,
}

struct Worker {
    registry: SharedRegistry,
    events: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    rng: StdRng,
}

impl Worker {
    fn run(mut self, shutdown_rx: Receiver<()>) {
        loop {
            match shutdown_rx.recv_timeout(self.config.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => self.tick_guarded(),
            }
        }
    }

    /// One pass, hardened so a panic anywhere inside cannot kill the loop.
    fn tick_guarded(&mut self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.tick(Instant::now())));
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!("dispatch worker: service pass panicked: {message}");
            let fault = InternalEvent::WorkerFault { message };
            // The fault event itself may reach the observer that panicked.
            let _ = catch_unwind(AssertUnwindSafe(|| self.events.emit(&fault)));
        }
    }

    fn tick(&mut self, now: Instant) {
        let registry = self.registry.clone();
        let mut registry = registry.lock();
        let tokens: Vec<String> = registry.buckets.keys().cloned().collect();
        for token in tokens {
            match self.service_bucket(&mut registry, &token, now) {
                TickOutcome::Continue => {}
                TickOutcome::Halt => return,
            }
        }
    }

    fn service_bucket(
        &mut self,
        registry: &mut Registry,
        token: &str,
        now: Instant,
    ) -> TickOutcome {
        match registry.buckets.get(token) {
            Some(bucket) if bucket.permits_send(now) => {}
            _ => return TickOutcome::Continue,
        }
        let queues: Vec<Arc<PayloadQueue>> = registry
            .buckets
            .get(token)
            .map(|bucket| bucket.queues().to_vec())
            .unwrap_or_default();

        for queue in queues {
            if !queue.is_ready(now) {
                continue;
            }
            let Some(payload) = queue.peek() else {
                continue;
            };
            let config = queue.config();
            let Some(response) = self.post_with_retry(&payload, &config) else {
                continue;
            };
            match self.apply_response(registry, token, &queue, &response) {
                HeadOutcome::RateLimited => {
                    return if self.config.rate_limit_halts_tick {
                        TickOutcome::Halt
                    } else {
                        TickOutcome::Continue
                    };
                }
                HeadOutcome::Committed | HeadOutcome::Kept | HeadOutcome::Discarded => {}
            }
        }
        TickOutcome::Continue
    }

    /// Drive the transport until it yields a response or the retry budget
    /// runs out. Only network-class errors spend the budget; anything else
    /// abandons the attempt immediately. The head stays queued either way.
    fn post_with_retry(
        &mut self,
        payload: &Payload,
        config: &ReporterConfig,
    ) -> Option<ApiResponse> {
        let mut retries_left = self.config.transport_retries;
        loop {
            match self.transport.post_as_json(config, payload) {
                Ok(response) => {
                    self.events.emit(&InternalEvent::Communication {
                        response: response.clone(),
                    });
                    return Some(response);
                }
                Err(error) => {
                    retries_left = if error.is_retryable() {
                        retries_left.saturating_sub(1)
                    } else {
                        0
                    };
                    warn!("dispatch worker: send failed ({retries_left} retries left): {error}");
                    self.events.emit(&InternalEvent::CommunicationError {
                        error,
                        retries_left,
                    });
                    if retries_left == 0 {
                        return None;
                    }
                }
            }
        }
    }

    fn apply_response(
        &mut self,
        registry: &mut Registry,
        token: &str,
        queue: &Arc<PayloadQueue>,
        response: &ApiResponse,
    ) -> HeadOutcome {
        if response.is_ok() {
            queue.dequeue();
            if let Some(bucket) = registry.buckets.get_mut(token) {
                bucket.record_success();
            }
            return HeadOutcome::Committed;
        }

        self.events.emit(&InternalEvent::ApiError {
            code: response.code,
        });

        if response.is_rate_limited() {
            if let Some(bucket) = registry.buckets.get_mut(token) {
                bucket.record_rate_limit(Instant::now(), &self.config.backoff, &mut self.rng);
            }
            return HeadOutcome::RateLimited;
        }

        let failures = queue.record_head_failure();
        if self.config.max_payload_failures > 0 && failures >= self.config.max_payload_failures {
            if let Some(payload) = queue.discard_head() {
                warn!(
                    "dispatch worker: abandoning payload after {failures} API errors (last code {})",
                    response.code
                );
                self.events.emit(&InternalEvent::PayloadDropped {
                    payload,
                    code: response.code,
                });
            }
            return HeadOutcome::Discarded;
        }
        HeadOutcome::Kept
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}
