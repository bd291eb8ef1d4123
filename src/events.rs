//! Internal telemetry events and their fan-out bus.
//!
//! Producers never see delivery failures directly; everything the engine
//! observes about a send is broadcast as an [`InternalEvent`]. Delivery is
//! synchronous on the emitting thread (usually the dispatch worker), so
//! observers must return promptly and must not block.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

use crate::{
    payload::Payload,
    transport::{ApiResponse, TransportError},
};

/// Everything the dispatch engine reports about its own operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum InternalEvent {
    /// The transport produced a response, whatever code it carries.
    Communication { response: ApiResponse },
    /// The transport failed before producing a response.
    CommunicationError {
        error: TransportError,
        retries_left: u32,
    },
    /// The service answered with a non-zero error code.
    ApiError { code: u64 },
    /// A full queue evicted its oldest payload to admit a new one.
    QueueOverflow { evicted: Payload },
    /// A payload was abandoned after repeated API errors.
    PayloadDropped { payload: Payload, code: u64 },
    /// The dispatch worker survived an unexpected panic.
    WorkerFault { message: String },
}

/// Receiver of [`InternalEvent`]s.
///
/// Any `Fn(&InternalEvent) + Send + Sync` closure is an observer.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &InternalEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&InternalEvent) + Send + Sync,
{
    fn on_event(&self, event: &InternalEvent) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Fan-out sink broadcasting each event to every registered observer.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    observers: RwLock<BTreeMap<u64, Arc<dyn EventObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`; it receives every event emitted after this call
    /// returns.
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().insert(id, observer);
        SubscriptionId(id)
    }

    /// Remove a previously registered observer. Returns `false` when the id
    /// is unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.write().remove(&id.0).is_some()
    }

    /// Deliver `event` to every current observer, synchronously on the
    /// calling thread.
    ///
    /// The observer set is snapshotted first so an observer may subscribe or
    /// unsubscribe from within its callback.
    pub fn emit(&self, event: &InternalEvent) {
        let observers: Vec<Arc<dyn EventObserver>> =
            self.observers.read().values().cloned().collect();
        for observer in observers {
            observer.on_event(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rstest::rstest;

    fn collector() -> (Arc<Mutex<Vec<InternalEvent>>>, Arc<dyn EventObserver>) {
        let seen: Arc<Mutex<Vec<InternalEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn EventObserver> =
            Arc::new(move |event: &InternalEvent| sink.lock().push(event.clone()));
        (seen, observer)
    }

    #[rstest]
    fn subscribed_observer_receives_events() {
        let bus = EventBus::new();
        let (seen, observer) = collector();
        bus.subscribe(observer);

        bus.emit(&InternalEvent::ApiError { code: 500 });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], InternalEvent::ApiError { code: 500 }));
    }

    #[rstest]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (seen, observer) = collector();
        let id = bus.subscribe(observer);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.emit(&InternalEvent::ApiError { code: 500 });
        assert!(seen.lock().is_empty());
        assert_eq!(bus.observer_count(), 0);
    }

    #[rstest]
    fn every_observer_sees_every_event() {
        let bus = EventBus::new();
        let (seen_a, observer_a) = collector();
        let (seen_b, observer_b) = collector();
        bus.subscribe(observer_a);
        bus.subscribe(observer_b);

        bus.emit(&InternalEvent::WorkerFault {
            message: "boom".to_owned(),
        });
        bus.emit(&InternalEvent::ApiError { code: 422 });

        assert_eq!(seen_a.lock().len(), 2);
        assert_eq!(seen_b.lock().len(), 2);
    }
}
