//! Per-reporter FIFO of pending payloads.
//!
//! A [`PayloadQueue`] is the synchronization boundary between the producing
//! reporter and the dispatch worker: producers append under the queue's own
//! mutex, the worker peeks and commits under the same mutex. The head is
//! removed only after the transport call that consumed it completes, so at
//! most one payload per queue is ever in flight.

use std::{collections::VecDeque, fmt, sync::Arc, time::Instant};

use log::warn;
use parking_lot::Mutex;

use crate::{
    config::{ConfigCell, ReporterConfig},
    drop_warner::DropWarner,
    events::{EventBus, InternalEvent},
    payload::Payload,
};

#[derive(Default)]
struct Inner {
    fifo: VecDeque<Payload>,
    /// Earliest instant the head may be dequeued; `None` means immediately.
    next_dequeue: Option<Instant>,
    /// Consecutive API errors drawn by the current head.
    head_failures: u32,
}

/// Thread-safe FIFO of payloads for one reporter, self-throttled to the
/// reporter's configured send rate.
pub struct PayloadQueue {
    config: ConfigCell,
    events: Arc<EventBus>,
    pinned: bool,
    warner: DropWarner,
    inner: Mutex<Inner>,
}

impl PayloadQueue {
    /// Queue for `config`, emitting overflow events on `events`.
    pub fn new(config: ReporterConfig, events: Arc<EventBus>) -> Arc<Self> {
        Self::with_pinned(config, events, false)
    }

    /// Queue that refuses unregistration; used for the process-wide default
    /// reporter whose queue must outlive any caller.
    pub fn pinned(config: ReporterConfig, events: Arc<EventBus>) -> Arc<Self> {
        Self::with_pinned(config, events, true)
    }

    fn with_pinned(config: ReporterConfig, events: Arc<EventBus>, pinned: bool) -> Arc<Self> {
        Arc::new(Self {
            config: ConfigCell::new(config),
            events,
            pinned,
            warner: DropWarner::default(),
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Snapshot of the owning reporter's current configuration.
    pub fn config(&self) -> Arc<ReporterConfig> {
        self.config.current()
    }

    /// Install a new configuration, returning the one it replaced. The
    /// caller is responsible for telling the dispatcher afterwards so the
    /// queue lands in the right token bucket.
    pub fn replace_config(&self, config: ReporterConfig) -> Arc<ReporterConfig> {
        self.config.replace(config)
    }

    /// Append a payload. Never blocks beyond the queue mutex. When the
    /// queue is at its configured depth the oldest payload is evicted and
    /// surfaced as a [`QueueOverflow`](InternalEvent::QueueOverflow) event.
    pub fn enqueue(&self, payload: Payload) {
        let depth = self.config.current().queue_depth;
        let evicted = {
            let mut inner = self.inner.lock();
            let evicted = if inner.fifo.len() >= depth {
                inner.fifo.pop_front()
            } else {
                None
            };
            inner.fifo.push_back(payload);
            evicted
        };
        if let Some(evicted) = evicted {
            self.warner
                .note_drop(|count| warn!("payload queue full; dropped {count} payloads"));
            self.events.emit(&InternalEvent::QueueOverflow { evicted });
        }
    }

    /// Head of the queue without removing it.
    pub fn peek(&self) -> Option<Payload> {
        self.inner.lock().fifo.front().cloned()
    }

    /// Remove and return the head. A non-empty dequeue commits a send:
    /// the next dequeue becomes eligible only after the configured
    /// per-queue interval elapses.
    pub fn dequeue(&self) -> Option<Payload> {
        let throttle = self.config.current().throttle_interval();
        let mut inner = self.inner.lock();
        let payload = inner.fifo.pop_front();
        if payload.is_some() {
            inner.next_dequeue = Some(Instant::now() + throttle);
            inner.head_failures = 0;
        }
        payload
    }

    /// Remove the head without touching the throttle; used when a payload
    /// is abandoned rather than delivered.
    pub fn discard_head(&self) -> Option<Payload> {
        let mut inner = self.inner.lock();
        let payload = inner.fifo.pop_front();
        if payload.is_some() {
            inner.head_failures = 0;
        }
        payload
    }

    /// Whether the head is eligible for sending at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.inner.lock().next_dequeue.is_none_or(|at| at <= now)
    }

    /// Earliest instant the head may be dequeued; `None` means immediately.
    pub fn next_dequeue_time(&self) -> Option<Instant> {
        self.inner.lock().next_dequeue
    }

    /// Count one more API error against the current head; returns the new
    /// consecutive total.
    pub(crate) fn record_head_failure(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.head_failures = inner.head_failures.saturating_add(1);
        inner.head_failures
    }

    pub fn len(&self) -> usize {
        self.inner.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().fifo.is_empty()
    }
}

impl fmt::Debug for PayloadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PayloadQueue")
            .field("pending", &inner.fifo.len())
            .field("pinned", &self.pinned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use std::time::Duration;

    fn payload(tag: u64) -> Payload {
        Payload::new(json!({ "tag": tag }))
    }

    #[fixture]
    fn queue() -> Arc<PayloadQueue> {
        PayloadQueue::new(ReporterConfig::new("token"), Arc::new(EventBus::new()))
    }

    #[rstest]
    fn drains_in_fifo_order(queue: Arc<PayloadQueue>) {
        let first = payload(1);
        let second = payload(2);
        let third = payload(3);
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        queue.enqueue(third.clone());
        assert_eq!(queue.dequeue(), Some(first));
        assert_eq!(queue.dequeue(), Some(second));
        assert_eq!(queue.dequeue(), Some(third));
        assert_eq!(queue.dequeue(), None);
    }

    #[rstest]
    fn peek_leaves_the_head_in_place(queue: Arc<PayloadQueue>) {
        let head = payload(1);
        queue.enqueue(head.clone());
        assert_eq!(queue.peek(), Some(head));
        assert_eq!(queue.len(), 1);
    }

    #[rstest]
    fn dequeue_arms_the_throttle() {
        let config = ReporterConfig::new("token").with_max_reports_per_minute(60);
        let queue = PayloadQueue::new(config, Arc::new(EventBus::new()));
        queue.enqueue(payload(1));

        assert!(queue.is_ready(Instant::now()));
        queue.dequeue();

        let next = queue.next_dequeue_time().expect("throttle must be armed");
        assert!(next > Instant::now() + Duration::from_millis(900));
        assert!(!queue.is_ready(Instant::now()));
    }

    #[rstest]
    fn empty_dequeue_does_not_arm_the_throttle(queue: Arc<PayloadQueue>) {
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.next_dequeue_time(), None);
    }

    #[rstest]
    fn overflow_evicts_the_oldest_and_reports_it() {
        let events = Arc::new(EventBus::new());
        let seen: Arc<PlMutex<Vec<InternalEvent>>> = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(Arc::new(move |event: &InternalEvent| {
            sink.lock().push(event.clone());
        }));

        let config = ReporterConfig::new("token").with_queue_depth(2);
        let queue = PayloadQueue::new(config, events);
        let oldest = payload(1);
        let survivor = payload(2);
        queue.enqueue(oldest.clone());
        queue.enqueue(survivor.clone());
        queue.enqueue(payload(3));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek(), Some(survivor));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            InternalEvent::QueueOverflow { evicted } => assert_eq!(evicted, &oldest),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[rstest]
    fn discard_skips_the_throttle(queue: Arc<PayloadQueue>) {
        let doomed = payload(2);
        queue.enqueue(payload(1));
        queue.enqueue(doomed.clone());
        queue.dequeue();
        let armed = queue.next_dequeue_time();

        assert_eq!(queue.discard_head(), Some(doomed));
        assert_eq!(queue.next_dequeue_time(), armed);
    }

    #[rstest]
    fn head_failures_reset_on_removal(queue: Arc<PayloadQueue>) {
        queue.enqueue(payload(1));
        assert_eq!(queue.record_head_failure(), 1);
        assert_eq!(queue.record_head_failure(), 2);
        queue.dequeue();

        queue.enqueue(payload(2));
        assert_eq!(queue.record_head_failure(), 1);
    }

    #[rstest]
    fn reconfiguration_shortens_the_throttle(queue: Arc<PayloadQueue>) {
        queue.replace_config(ReporterConfig::new("token").with_max_reports_per_minute(120));
        assert_eq!(queue.config().throttle_interval(), Duration::from_millis(500));
    }
}
