use std::{
    num::NonZeroU32,
    time::{Duration, Instant},
};

use log::trace;

use crate::LOG_TARGET;

/// Returns non-decreasing values of type [std::time::Instant]. Injected so
/// tests can run on a manually advanced clock.
pub trait TimeProvider {
    fn now(&self) -> Instant;
}

/// Default implementation reading the system monotonic clock.
#[derive(Clone, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<F> TimeProvider for F
where
    F: Fn() -> Instant,
{
    fn now(&self) -> Instant {
        self()
    }
}

/// Token bucket over a unit count per second. Tokens replenish continuously;
/// the bucket holds at most one second's worth.
#[derive(Clone)]
pub struct TokenBucket<T = SystemTimeProvider> {
    last_update: Instant,
    rate_per_second: NonZeroU32,
    requested: u64,
    time_provider: T,
}

impl<T> std::fmt::Debug for TokenBucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("last_update", &self.last_update)
            .field("rate_per_second", &self.rate_per_second)
            .field("requested", &self.requested)
            .finish()
    }
}

impl TokenBucket {
    pub fn new(rate_per_second: NonZeroU32) -> Self {
        Self::new_with_time_provider(rate_per_second, SystemTimeProvider)
    }
}

impl<T> TokenBucket<T>
where
    T: TimeProvider,
{
    pub fn new_with_time_provider(rate_per_second: NonZeroU32, time_provider: T) -> Self {
        let now = time_provider.now();
        Self {
            last_update: now,
            rate_per_second,
            requested: 0,
            time_provider,
        }
    }

    fn capacity(&self) -> u64 {
        u64::from(self.rate_per_second.get())
    }

    fn update_tokens(&mut self) {
        let now = self.time_provider.now();
        if now <= self.last_update {
            return;
        }
        let elapsed = now.duration_since(self.last_update);
        self.last_update = now;
        let replenished = elapsed
            .as_millis()
            .saturating_mul(u128::from(self.rate_per_second.get()))
            .saturating_div(1_000)
            .try_into()
            .unwrap_or(u64::MAX);
        self.requested = self.requested.saturating_sub(replenished);
    }

    /// Account `requested` units. Returns `None` when the request fits the
    /// budget, or the deadline at which the debt would be repaid.
    pub fn rate_limit(&mut self, requested: u64) -> Option<Instant> {
        self.update_tokens();
        self.requested = self.requested.saturating_add(requested);
        if self.requested <= self.capacity() {
            return None;
        }
        let over = self.requested - self.capacity();
        let delay_millis = over
            .saturating_mul(1_000)
            .saturating_div(u64::from(self.rate_per_second.get()));
        let deadline = self.last_update + Duration::from_millis(delay_millis);
        trace!(
            target: LOG_TARGET,
            "TokenBucket over budget by {} units, deadline {:?}.",
            over,
            deadline
        );
        Some(deadline)
    }
}

/// Whether a packet fits the session's budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Within,
    /// Over budget; the bucket would only catch up at the contained instant.
    Exceeded(Instant),
}

/// Per-session packet budget. Unlike a bandwidth limiter this never delays
/// traffic: packets over budget are a protocol violation, reported to the
/// caller for escalation.
pub struct PacketBudget<T = SystemTimeProvider> {
    bucket: TokenBucket<T>,
}

impl PacketBudget {
    pub fn new(packets_per_second: NonZeroU32) -> Self {
        Self {
            bucket: TokenBucket::new(packets_per_second),
        }
    }
}

impl<T> PacketBudget<T>
where
    T: TimeProvider,
{
    pub fn new_with_time_provider(packets_per_second: NonZeroU32, time_provider: T) -> Self {
        Self {
            bucket: TokenBucket::new_with_time_provider(packets_per_second, time_provider),
        }
    }

    pub fn on_packet(&mut self) -> Verdict {
        match self.bucket.rate_limit(1) {
            None => Verdict::Within,
            Some(deadline) => Verdict::Exceeded(deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use parking_lot::RwLock;

    use super::*;

    fn manual_clock() -> (Arc<RwLock<Instant>>, impl Fn() -> Instant + Clone) {
        let now = Instant::now();
        let time_to_return = Arc::new(RwLock::new(now));
        let provider = time_to_return.clone();
        (time_to_return, move || *provider.read())
    }

    #[test]
    fn within_rate_no_deadline() {
        let (clock, provider) = manual_clock();
        let start = provider();
        let mut bucket =
            TokenBucket::new_with_time_provider(10.try_into().expect("10 > 0 qed"), provider);

        assert!(bucket.rate_limit(9).is_none());
        *clock.write() = start + Duration::from_secs(1);
        assert!(bucket.rate_limit(10).is_none());
    }

    #[test]
    fn over_rate_yields_deadline() {
        let (_, provider) = manual_clock();
        let start = provider();
        let mut bucket =
            TokenBucket::new_with_time_provider(10.try_into().expect("10 > 0 qed"), provider);

        assert!(bucket.rate_limit(10).is_none());
        assert_eq!(
            bucket.rate_limit(10),
            Some(start + Duration::from_secs(1)),
            "a full extra second of debt"
        );
    }

    #[test]
    fn tokens_do_not_accumulate_past_capacity() {
        let (clock, provider) = manual_clock();
        let start = provider();
        let mut bucket =
            TokenBucket::new_with_time_provider(10.try_into().expect("10 > 0 qed"), provider);

        *clock.write() = start + Duration::from_secs(100);
        assert!(bucket.rate_limit(10).is_none());
        // long idle never banks more than one second's worth
        assert!(bucket.rate_limit(1).is_some());
    }

    #[test]
    fn debt_replenishes_over_time() {
        let (clock, provider) = manual_clock();
        let start = provider();
        let mut bucket =
            TokenBucket::new_with_time_provider(10.try_into().expect("10 > 0 qed"), provider);

        assert!(bucket.rate_limit(20).is_some());
        *clock.write() = start + Duration::from_secs(2);
        assert!(bucket.rate_limit(5).is_none());
    }

    #[test]
    fn packet_budget_flags_flood() {
        let (clock, provider) = manual_clock();
        let start = provider();
        let mut budget = PacketBudget::new_with_time_provider(
            2.try_into().expect("2 > 0 qed"),
            provider,
        );

        assert_eq!(budget.on_packet(), Verdict::Within);
        assert_eq!(budget.on_packet(), Verdict::Within);
        assert!(matches!(budget.on_packet(), Verdict::Exceeded(_)));

        *clock.write() = start + Duration::from_secs(2);
        assert_eq!(budget.on_packet(), Verdict::Within);
    }
}
