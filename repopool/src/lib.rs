//! `RepoPool` - Session-chain pooling for legacy content repositories
//!
//! Connecting to the repository is a five-stage ritual: open a transport,
//! resolve the naming directory, resolve the repository, log in a session,
//! and acquire the filesystem admin handle. Every stage is a remote call and
//! any of them can fail. This crate builds the chain atomically, pools built
//! chains with jittered expiration so they never all expire at once, retires
//! the whole pool when a transport-level fault suggests the far side
//! restarted, and hands workers a claim-caching context so a burst of calls
//! against the same worker reuses one claim.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod chain;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod facade;
pub mod factory;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod testing;
pub mod types;

pub use config::{InvalidationPolicy, PoolConfig};
pub use endpoint::RemoteEndpoint;
pub use errors::{AllocationError, EndpointError, FaultKind, PoolError, PoolResult};
pub use facade::{PoolingFacade, WorkerContext};
pub use pool::{ChainPool, ClaimedChain};
pub use types::{Credentials, EntryId, PoolCapacity};
