//! The chain pool: bounded reuse of live session chains with jittered
//! expiration and health-driven self-cleaning.
//!
//! Capacity is enforced with a semaphore; idle entries wait in a free list.
//! Each entry carries an expiration deadline drawn independently within a
//! configured window so chains created in a burst (startup fill, post-outage
//! refill) do not all expire together. A generation counter implements
//! self-cleaning: when a fault selected by the [`InvalidationPolicy`] is
//! observed while claiming or releasing, the generation bumps, every idle
//! entry is routed to teardown, and claimed entries of older generations are
//! retired when their workers release them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::allocator::ChainAllocator;
use crate::chain::SessionChain;
use crate::config::{InvalidationPolicy, PoolConfig};
use crate::endpoint::RemoteEndpoint;
use crate::errors::{EndpointError, PoolError, PoolResult};
use crate::factory::ChainFactory;
use crate::metrics::PoolMetrics;
use crate::types::EntryId;

/// Assigns each entry a validity window of `[base, base + spread]`, drawn
/// independently per entry.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationPolicy {
    base: Duration,
    spread: Duration,
}

impl ExpirationPolicy {
    /// Creates a policy with the given base lifetime and jitter spread.
    pub const fn new(base: Duration, spread: Duration) -> Self {
        Self { base, spread }
    }

    /// Computes the expiration deadline for an entry created at `created_at`.
    pub fn deadline_from(&self, created_at: Instant) -> Instant {
        if self.spread.is_zero() {
            return created_at + self.base;
        }
        let spread_ms = u64::try_from(self.spread.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::rng().random_range(0..=spread_ms);
        created_at + self.base + Duration::from_millis(jitter_ms)
    }
}

/// One session chain wrapped with pool bookkeeping: slot identity, creation
/// time, jittered expiration deadline, generation stamp, and fault flag.
pub struct PooledChain<E: RemoteEndpoint> {
    id: EntryId,
    chain: SessionChain<E>,
    created_at: Instant,
    deadline: Instant,
    generation: u64,
    fault: Option<EndpointError>,
}

impl<E: RemoteEndpoint> PooledChain<E> {
    pub(crate) fn new(
        chain: SessionChain<E>,
        created_at: Instant,
        deadline: Instant,
        generation: u64,
    ) -> Self {
        Self {
            id: EntryId::new(),
            chain,
            created_at,
            deadline,
            generation,
            fault: None,
        }
    }

    /// The entry's unique slot identity.
    pub const fn id(&self) -> EntryId {
        self.id
    }

    /// The wrapped session chain.
    pub const fn chain(&self) -> &SessionChain<E> {
        &self.chain
    }

    /// When this entry's chain was created.
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// This entry's assigned expiration deadline.
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The pool generation this entry belongs to.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this entry's deadline has elapsed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Marks this entry so the pool discards it instead of recycling.
    pub fn flag_fault(&mut self, fault: EndpointError) {
        self.fault = Some(fault);
    }

    /// The fault flagged during this entry's last use, if any.
    pub const fn fault(&self) -> Option<&EndpointError> {
        self.fault.as_ref()
    }

    pub(crate) fn into_chain(self) -> SessionChain<E> {
        self.chain
    }
}

/// Exclusive, time-bounded ownership of one pooled entry.
///
/// Holds the capacity permit for the duration of the claim. Dropping a
/// claimed chain without releasing it through the pool logs an error and
/// routes the entry to teardown; a dropped claim cannot be trusted for reuse.
pub struct ClaimedChain<E: RemoteEndpoint> {
    entry: Option<PooledChain<E>>,
    allocator: Arc<ChainAllocator<E>>,
    _permit: OwnedSemaphorePermit,
}

impl<E: RemoteEndpoint> std::fmt::Debug for ClaimedChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimedChain").finish_non_exhaustive()
    }
}

impl<E: RemoteEndpoint> ClaimedChain<E> {
    /// The claimed entry's slot identity.
    ///
    /// # Panics
    /// Never panics while the claim is live; the entry is only absent after
    /// release, at which point the claim itself is gone.
    pub fn id(&self) -> EntryId {
        self.entry
            .as_ref()
            .map(PooledChain::id)
            .expect("claimed chain accessed after release")
    }

    /// The claimed session chain.
    ///
    /// # Panics
    /// Never panics while the claim is live; the entry is only absent after
    /// release, at which point the claim itself is gone.
    pub fn chain(&self) -> &SessionChain<E> {
        self.entry
            .as_ref()
            .map(PooledChain::chain)
            .expect("claimed chain accessed after release")
    }

    /// When the claimed entry's chain was created.
    pub fn created_at(&self) -> Option<Instant> {
        self.entry.as_ref().map(PooledChain::created_at)
    }

    /// Flags a fault observed while using this chain, so the pool discards
    /// the entry on release instead of recycling it.
    pub fn flag_fault(&mut self, fault: EndpointError) {
        if let Some(entry) = self.entry.as_mut() {
            entry.flag_fault(fault);
        }
    }
}

impl<E: RemoteEndpoint> Drop for ClaimedChain<E> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::error!(
                entry = %entry.id(),
                "claimed chain dropped without release; scheduling teardown"
            );
            self.allocator.deallocate(entry);
        }
    }
}

/// A fixed-capacity pool of live session chains.
pub struct ChainPool<E: RemoteEndpoint> {
    allocator: Arc<ChainAllocator<E>>,
    capacity: usize,
    claim_timeout: Duration,
    invalidation: InvalidationPolicy,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledChain<E>>>,
    generation: AtomicU64,
    closed: AtomicBool,
    metrics: Arc<PoolMetrics>,
}

impl<E: RemoteEndpoint> ChainPool<E> {
    /// Creates a pool over the given factory.
    ///
    /// Spawns the allocator's teardown workers, so this must be called within
    /// a tokio runtime.
    pub fn new(factory: Arc<ChainFactory<E>>, config: &PoolConfig) -> Self {
        let expiration = ExpirationPolicy::new(config.expiration_base, config.expiration_spread);
        let allocator = Arc::new(ChainAllocator::new(
            factory,
            expiration,
            config.teardown_workers,
        ));
        let capacity = config.capacity.as_usize();
        Self {
            allocator,
            capacity,
            claim_timeout: config.claim_timeout,
            invalidation: config.invalidation,
            permits: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            metrics: Arc::new(PoolMetrics::default()),
        }
    }

    /// The configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle entries currently in the free list.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("idle list mutex poisoned").len()
    }

    /// The pool's allocator, exposing the in-flight teardown depth.
    pub const fn allocator(&self) -> &Arc<ChainAllocator<E>> {
        &self.allocator
    }

    /// The pool's timing and counter registry.
    pub const fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    /// Claims one entry, blocking up to the configured timeout for capacity.
    ///
    /// Expired and stale-generation entries found in the free list are
    /// retired and replaced rather than handed out. If no idle entry is
    /// usable, a fresh chain is allocated inline; a recoverable allocation
    /// fault may invalidate the whole pool per the configured policy, and a
    /// fatal fault propagates unchanged without any retry.
    pub async fn claim(&self) -> PoolResult<ClaimedChain<E>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        let start = Instant::now();
        let acquired =
            tokio::time::timeout(self.claim_timeout, Arc::clone(&self.permits).acquire_owned())
                .await
                .map_err(|_| {
                    self.metrics.claims_exhausted.increment();
                    PoolError::Exhausted(self.claim_timeout)
                })?;
        let permit = acquired.map_err(|_| PoolError::Closed)?;

        let result = self.claim_with_permit(permit).await;
        self.metrics.claim.record(start.elapsed());
        result
    }

    async fn claim_with_permit(&self, permit: OwnedSemaphorePermit) -> PoolResult<ClaimedChain<E>> {
        let current_generation = self.generation.load(Ordering::SeqCst);

        while let Some(entry) = self.pop_idle() {
            if entry.generation() < current_generation {
                self.allocator.deallocate(entry);
                continue;
            }
            if entry.is_expired() {
                self.metrics.expired_retired.increment();
                tracing::debug!(entry = %entry.id(), "retiring expired chain");
                self.allocator.deallocate(entry);
                continue;
            }
            return Ok(self.wrap(entry, permit));
        }

        match self.allocator.allocate(current_generation).await {
            Ok(entry) => Ok(self.wrap(entry, permit)),
            Err(fault) => {
                if self.invalidation.invalidates(fault.endpoint()) {
                    self.invalidate();
                }
                Err(PoolError::Allocation(fault))
            }
        }
    }

    /// Returns a claimed entry to the pool.
    ///
    /// Never blocks on remote teardown: faulted, stale, and expired entries
    /// are handed to the allocator's background workers, healthy ones rejoin
    /// the free list. A flagged fault may invalidate the whole pool per the
    /// configured policy.
    pub fn release(&self, mut claimed: ClaimedChain<E>) {
        let start = Instant::now();
        let Some(entry) = claimed.entry.take() else {
            return;
        };

        let invalidate = entry
            .fault()
            .is_some_and(|fault| self.invalidation.invalidates(fault));

        if let Some(fault) = entry.fault() {
            tracing::warn!(entry = %entry.id(), %fault, "discarding faulted chain");
            self.allocator.deallocate(entry);
            if invalidate {
                self.invalidate();
            }
        } else if entry.generation() < self.generation.load(Ordering::SeqCst)
            || entry.is_expired()
            || self.closed.load(Ordering::SeqCst)
        {
            self.allocator.deallocate(entry);
        } else {
            self.push_idle(entry);
        }

        self.metrics.release.record(start.elapsed());
        // the permit held by `claimed` frees as it drops here
    }

    /// Retires every pooled entry and bumps the generation.
    ///
    /// Idle entries go straight to teardown; claimed entries are retired when
    /// their workers release them.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.invalidations.increment();
        let drained: Vec<PooledChain<E>> = {
            let mut idle = self.idle.lock().expect("idle list mutex poisoned");
            idle.drain(..).collect()
        };
        tracing::warn!(
            generation,
            drained = drained.len(),
            "invalidating pool; all live chains will be replaced"
        );
        for entry in drained {
            self.allocator.deallocate(entry);
        }
    }

    /// Fills the pool's free list up to capacity.
    ///
    /// Stops at the first allocation failure. Returns how many entries were
    /// added.
    pub async fn prefill(&self) -> PoolResult<usize> {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut added = 0;
        loop {
            let claimed = self.capacity - self.permits.available_permits();
            if self.idle_count() + claimed >= self.capacity {
                return Ok(added);
            }
            let entry = self.allocator.allocate(generation).await?;
            self.push_idle(entry);
            added += 1;
        }
    }

    /// Shuts the pool down: rejects new claims, retires all idle entries,
    /// and waits for in-flight teardowns to finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        let drained: Vec<PooledChain<E>> = {
            let mut idle = self.idle.lock().expect("idle list mutex poisoned");
            idle.drain(..).collect()
        };
        for entry in drained {
            self.allocator.deallocate(entry);
        }
        self.allocator.drain().await;
    }

    fn wrap(&self, entry: PooledChain<E>, permit: OwnedSemaphorePermit) -> ClaimedChain<E> {
        ClaimedChain {
            entry: Some(entry),
            allocator: Arc::clone(&self.allocator),
            _permit: permit,
        }
    }

    fn pop_idle(&self) -> Option<PooledChain<E>> {
        self.idle
            .lock()
            .expect("idle list mutex poisoned")
            .pop_front()
    }

    fn push_idle(&self, entry: PooledChain<E>) {
        self.idle
            .lock()
            .expect("idle list mutex poisoned")
            .push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn deadline_without_spread_is_exact() {
        let policy = ExpirationPolicy::new(Duration::from_secs(300), Duration::ZERO);
        let created = Instant::now();
        assert_eq!(policy.deadline_from(created), created + Duration::from_secs(300));
    }

    #[test]
    fn deadlines_vary_across_entries() {
        // With a wide spread, a burst of deadlines should not all collapse
        // onto a single instant.
        let policy = ExpirationPolicy::new(Duration::from_secs(300), Duration::from_secs(300));
        let created = Instant::now();
        let deadlines: Vec<Instant> = (0..64).map(|_| policy.deadline_from(created)).collect();
        let first = deadlines[0];
        assert!(deadlines.iter().any(|deadline| *deadline != first));
    }

    proptest! {
        #[test]
        fn deadline_always_within_window(base_ms in 1u64..10_000, spread_ms in 1u64..10_000) {
            let policy = ExpirationPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(spread_ms),
            );
            let created = Instant::now();
            let deadline = policy.deadline_from(created);
            prop_assert!(deadline >= created + Duration::from_millis(base_ms));
            prop_assert!(deadline <= created + Duration::from_millis(base_ms + spread_ms));
        }
    }
}
