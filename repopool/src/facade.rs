//! The pooling facade: claim-scoped handle access for request handlers.
//!
//! Request-handling code that would otherwise construct and destroy its own
//! handle chain per request instead takes a [`WorkerContext`] for the unit of
//! work. The first handle access claims a pooled chain and caches it in the
//! context; every later access within the unit of work is served from that
//! one claim. The matching [`WorkerContext::release`] call validates the
//! entry identity the caller observed, returns the entry to the pool, and
//! clears the cache. Individual handles are never destroyed here; teardown
//! belongs entirely to the allocator's background path.

use std::sync::Arc;

use crate::config::PoolConfig;
use crate::endpoint::RemoteEndpoint;
use crate::errors::{EndpointError, PoolError, PoolResult};
use crate::factory::ChainFactory;
use crate::pool::{ChainPool, ClaimedChain};
use crate::types::{Credentials, EntryId};

/// Hands out per-worker contexts over one shared chain pool.
pub struct PoolingFacade<E: RemoteEndpoint> {
    pool: Arc<ChainPool<E>>,
}

impl<E: RemoteEndpoint> PoolingFacade<E> {
    /// Wraps an existing pool.
    pub const fn new(pool: Arc<ChainPool<E>>) -> Self {
        Self { pool }
    }

    /// Builds the full stack (factory, allocator, pool) from an endpoint,
    /// credentials, and pool configuration.
    ///
    /// Spawns the teardown workers, so this must be called within a tokio
    /// runtime.
    pub fn from_config(endpoint: Arc<E>, credentials: Credentials, config: &PoolConfig) -> Self {
        let factory = Arc::new(ChainFactory::new(endpoint, credentials));
        let pool = Arc::new(ChainPool::new(factory, config));
        Self { pool }
    }

    /// The shared pool behind this facade.
    pub const fn pool(&self) -> &Arc<ChainPool<E>> {
        &self.pool
    }

    /// Creates a context for one unit of work.
    ///
    /// Contexts are cheap; create one per inbound request and do not share
    /// them across workers.
    pub fn context(&self) -> WorkerContext<E> {
        WorkerContext {
            pool: Arc::clone(&self.pool),
            claim: None,
        }
    }

    /// A diagnostics string summarizing configured capacity and the wrapped
    /// factory, in the form `[N x [endpoint description]]`.
    pub fn describe(&self) -> String {
        format!(
            "[{} x [{}]]",
            self.pool.capacity(),
            self.pool.allocator().factory().description()
        )
    }
}

/// A per-worker single-slot claim cache, owned by exactly one unit of work.
///
/// At most one entry is claimed per context at any time. Dropping a context
/// with a live claim logs an error and routes the entry to teardown instead
/// of recycling it.
pub struct WorkerContext<E: RemoteEndpoint> {
    pool: Arc<ChainPool<E>>,
    claim: Option<ClaimedChain<E>>,
}

impl<E: RemoteEndpoint> WorkerContext<E> {
    async fn ensure_claim(&mut self) -> PoolResult<&mut ClaimedChain<E>> {
        let claim = match self.claim.take() {
            Some(claim) => claim,
            None => {
                tracing::debug!("claiming pooled chain");
                self.pool.claim().await?
            }
        };
        Ok(self.claim.insert(claim))
    }

    /// The identity of this context's claim, claiming first if necessary.
    pub async fn claim_id(&mut self) -> PoolResult<EntryId> {
        Ok(self.ensure_claim().await?.id())
    }

    /// The transport handle of the claimed chain.
    pub async fn transport(&mut self) -> PoolResult<&E::Transport> {
        Ok(self.ensure_claim().await?.chain().transport())
    }

    /// The directory service handle of the claimed chain.
    pub async fn directory(&mut self) -> PoolResult<&E::Directory> {
        Ok(self.ensure_claim().await?.chain().directory())
    }

    /// The repository handle of the claimed chain.
    pub async fn repository(&mut self) -> PoolResult<&E::Repository> {
        Ok(self.ensure_claim().await?.chain().repository())
    }

    /// The session handle of the claimed chain.
    pub async fn session(&mut self) -> PoolResult<&E::Session> {
        Ok(self.ensure_claim().await?.chain().session())
    }

    /// The admin handle of the claimed chain.
    pub async fn admin(&mut self) -> PoolResult<&E::Admin> {
        Ok(self.ensure_claim().await?.chain().admin())
    }

    /// Whether this context currently holds a claim.
    pub const fn has_claim(&self) -> bool {
        self.claim.is_some()
    }

    /// The identity of the current claim without claiming.
    pub fn entry_id(&self) -> Option<EntryId> {
        self.claim.as_ref().map(ClaimedChain::id)
    }

    /// Flags a fault observed while using the claimed chain; the pool will
    /// discard the entry on release instead of recycling it.
    pub fn flag_fault(&mut self, fault: EndpointError) {
        match self.claim.as_mut() {
            Some(claim) => claim.flag_fault(fault),
            None => {
                tracing::warn!(%fault, "fault flagged with no claimed chain");
            }
        }
    }

    /// Releases the cached claim back to the pool.
    ///
    /// The caller passes back the entry identity it observed; a mismatch (or
    /// a release with no claim) is a programming fault that leaves the claim
    /// and the pool untouched.
    pub fn release(&mut self, returned: EntryId) -> PoolResult<()> {
        match self.claim.take() {
            Some(claim) if claim.id() == returned => {
                tracing::debug!(entry = %returned, "releasing pooled chain");
                self.pool.release(claim);
                Ok(())
            }
            Some(claim) => {
                let current = claim.id();
                self.claim = Some(claim);
                Err(PoolError::Consistency {
                    returned,
                    claimed: Some(current),
                })
            }
            None => Err(PoolError::Consistency {
                returned,
                claimed: None,
            }),
        }
    }
}
