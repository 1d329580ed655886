//! The chain allocator: synchronous allocation, asynchronous teardown.
//!
//! Allocation runs the factory's five-stage handshake on the calling worker;
//! teardown is pushed onto a bounded queue drained by a fixed set of
//! background workers, so pool churn never waits on handle-destruction
//! latency (each close can be a remote round trip). An atomic counter tracks
//! the teardown backlog for observability.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::chain::SessionChain;
use crate::endpoint::RemoteEndpoint;
use crate::errors::AllocationError;
use crate::factory::ChainFactory;
use crate::metrics::AllocatorMetrics;
use crate::pool::{ExpirationPolicy, PooledChain};
use crate::types::EntryId;

/// Depth of the teardown queue before enqueueing falls back to a detached
/// hand-off task. Sized generously relative to typical pool capacities.
const TEARDOWN_QUEUE_DEPTH: usize = 64;

struct TeardownJob<E: RemoteEndpoint> {
    id: EntryId,
    chain: SessionChain<E>,
}

/// Adapts a [`ChainFactory`] to the pool's allocate/deallocate contract.
pub struct ChainAllocator<E: RemoteEndpoint> {
    factory: Arc<ChainFactory<E>>,
    expiration: ExpirationPolicy,
    queue: mpsc::Sender<TeardownJob<E>>,
    in_flight: Arc<AtomicUsize>,
    metrics: Arc<AllocatorMetrics>,
}

impl<E: RemoteEndpoint> ChainAllocator<E> {
    /// Creates an allocator and spawns its teardown workers.
    ///
    /// Must be called within a tokio runtime. At least one worker is always
    /// spawned.
    pub fn new(
        factory: Arc<ChainFactory<E>>,
        expiration: ExpirationPolicy,
        teardown_workers: usize,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(TEARDOWN_QUEUE_DEPTH);
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(AllocatorMetrics::default());

        for worker in 0..teardown_workers.max(1) {
            tokio::spawn(teardown_worker(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&factory),
                Arc::clone(&in_flight),
                Arc::clone(&metrics),
            ));
        }

        Self {
            factory,
            expiration,
            queue,
            in_flight,
            metrics,
        }
    }

    /// The wrapped factory.
    pub const fn factory(&self) -> &Arc<ChainFactory<E>> {
        &self.factory
    }

    /// The allocator's timing and counter registry.
    pub const fn metrics(&self) -> &Arc<AllocatorMetrics> {
        &self.metrics
    }

    /// Builds a fresh chain synchronously and wraps it as a pooled entry
    /// stamped with a jittered expiration deadline and the given generation.
    ///
    /// Recoverable faults surface as allocation failures the pool may retry;
    /// fatal faults propagate unchanged and must not be retried.
    pub async fn allocate(&self, generation: u64) -> Result<PooledChain<E>, AllocationError> {
        let start = Instant::now();
        let result = self.factory.create().await;
        self.metrics.allocation.record(start.elapsed());

        match result {
            Ok(chain) => {
                let created_at = Instant::now();
                let deadline = self.expiration.deadline_from(created_at);
                let entry = PooledChain::new(chain, created_at, deadline, generation);
                tracing::debug!(entry = %entry.id(), "allocated session chain");
                Ok(entry)
            }
            Err(fault) => {
                self.metrics.allocation_failures.increment();
                Err(fault)
            }
        }
    }

    /// Schedules an entry's teardown on the background workers and returns
    /// immediately; the caller never waits on remote closes.
    pub fn deallocate(&self, entry: PooledChain<E>) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let id = entry.id();
        let job = TeardownJob {
            id,
            chain: entry.into_chain(),
        };

        match self.queue.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                // Queue momentarily full: hand the job to a detached task so
                // the releasing caller still returns immediately.
                let queue = self.queue.clone();
                let in_flight = Arc::clone(&self.in_flight);
                tokio::spawn(async move {
                    if queue.send(job).await.is_err() {
                        tracing::warn!(entry = %id, "teardown queue closed; dropping chain without remote close");
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(entry = %id, "teardown queue closed; dropping chain without remote close");
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Current number of teardowns scheduled but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until every scheduled teardown has completed.
    pub async fn drain(&self) {
        while self.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

async fn teardown_worker<E: RemoteEndpoint>(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<TeardownJob<E>>>>,
    factory: Arc<ChainFactory<E>>,
    in_flight: Arc<AtomicUsize>,
    metrics: Arc<AllocatorMetrics>,
) {
    loop {
        // Take the next job while holding the receiver; the remote closes run
        // after the lock is dropped so workers tear down concurrently.
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(TeardownJob { id, chain }) = job else {
            break;
        };

        let start = Instant::now();
        factory.destroy(chain).await;
        metrics.deallocation.record(start.elapsed());
        in_flight.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(worker, entry = %id, "tore down session chain");
    }
}
