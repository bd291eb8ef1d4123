//! Per-access-token scheduling record.

use std::{sync::Arc, time::Instant};

use rand::Rng;

use crate::queue::PayloadQueue;

use super::backoff::BackoffPolicy;

/// Aggregates every queue currently reporting under one access token and
/// carries the token's adaptive rate-limit state.
#[derive(Default)]
pub(crate) struct TokenBucket {
    queues: Vec<Arc<PayloadQueue>>,
    /// Earliest instant any member queue may send; `None` means now.
    next_permitted_send: Option<Instant>,
    /// Count of consecutive rate-limit responses under this token.
    backoff_level: u32,
}

impl TokenBucket {
    pub(crate) fn attach(&mut self, queue: Arc<PayloadQueue>) {
        if !self.contains(&queue) {
            self.queues.push(queue);
        }
    }

    pub(crate) fn detach(&mut self, queue: &Arc<PayloadQueue>) -> bool {
        let before = self.queues.len();
        self.queues.retain(|member| !Arc::ptr_eq(member, queue));
        self.queues.len() != before
    }

    pub(crate) fn contains(&self, queue: &Arc<PayloadQueue>) -> bool {
        self.queues.iter().any(|member| Arc::ptr_eq(member, queue))
    }

    pub(crate) fn queues(&self) -> &[Arc<PayloadQueue>] {
        &self.queues
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Whether the token may send at `now`.
    pub(crate) fn permits_send(&self, now: Instant) -> bool {
        self.next_permitted_send.is_none_or(|at| at <= now)
    }

    /// Record a too-many-requests response: one more backoff level, sends
    /// paused until the schedule elapses. Returns the new permit time.
    pub(crate) fn record_rate_limit(
        &mut self,
        now: Instant,
        policy: &BackoffPolicy,
        rng: &mut impl Rng,
    ) -> Instant {
        self.backoff_level = self.backoff_level.saturating_add(1);
        let permitted_at = now + policy.delay_for(self.backoff_level, rng);
        self.next_permitted_send = Some(permitted_at);
        permitted_at
    }

    /// An accepted send under the token clears its backoff entirely.
    pub(crate) fn record_success(&mut self) {
        self.next_permitted_send = None;
        self.backoff_level = 0;
    }

    pub(crate) fn backoff_level(&self) -> u32 {
        self.backoff_level
    }

    pub(crate) fn next_permitted_send(&self) -> Option<Instant> {
        self.next_permitted_send
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ReporterConfig, events::EventBus};
    use rand::{SeedableRng, rngs::StdRng};
    use rstest::rstest;

    fn queue() -> Arc<PayloadQueue> {
        PayloadQueue::new(ReporterConfig::new("token"), Arc::new(EventBus::new()))
    }

    #[rstest]
    fn attach_is_idempotent_per_queue() {
        let mut bucket = TokenBucket::default();
        let q = queue();
        bucket.attach(q.clone());
        bucket.attach(q.clone());
        assert_eq!(bucket.len(), 1);
        assert!(bucket.detach(&q));
        assert!(!bucket.detach(&q));
        assert!(bucket.is_empty());
    }

    #[rstest]
    fn rate_limit_pauses_and_success_clears() {
        let mut bucket = TokenBucket::default();
        let mut rng = StdRng::seed_from_u64(3);
        let now = Instant::now();

        assert!(bucket.permits_send(now));
        let permitted_at = bucket.record_rate_limit(now, &BackoffPolicy::default(), &mut rng);
        assert!(permitted_at > now);
        assert_eq!(bucket.backoff_level(), 1);
        assert!(!bucket.permits_send(now));
        assert!(bucket.permits_send(permitted_at));

        bucket.record_success();
        assert_eq!(bucket.backoff_level(), 0);
        assert!(bucket.permits_send(now));
    }
}
