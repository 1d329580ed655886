//! Configuration surface for the chain pool.
//!
//! These types are supplied externally (file or environment loading is out of
//! scope); defaults give a 5-10 minute expiration window and a 10 second
//! claim timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EndpointError, FaultKind};
use crate::types::PoolCapacity;

/// Which faults trigger pool-wide invalidation instead of per-entry discard.
///
/// A transport-level fault (the remote directory service unreachable, a
/// timeout on the wire) usually indicates a systemic outage affecting every
/// pooled chain; discarding only the offending entry would hand callers one
/// doomed chain after another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationPolicy {
    /// Only transport-level faults (timeout, transient unavailability)
    /// invalidate the whole pool.
    TransportOnly,
    /// Every recoverable fault invalidates the whole pool.
    AllRecoverable,
    /// No fault invalidates the whole pool; faulted entries are discarded
    /// individually.
    PerEntryOnly,
}

impl InvalidationPolicy {
    /// Whether a fault observed while claiming or releasing should trigger
    /// pool-wide invalidation.
    pub fn invalidates(self, fault: &EndpointError) -> bool {
        match self {
            Self::TransportOnly => fault.is_transport_level(),
            Self::AllRecoverable => fault.kind() == FaultKind::Recoverable,
            Self::PerEntryOnly => false,
        }
    }
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::TransportOnly
    }
}

/// Configuration for a [`ChainPool`](crate::pool::ChainPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of live session chains.
    pub capacity: PoolCapacity,
    /// How long a claim waits for an idle chain or allocator headroom.
    pub claim_timeout: Duration,
    /// Minimum lifetime of a pooled chain.
    pub expiration_base: Duration,
    /// Width of the per-entry random jitter added to `expiration_base`.
    ///
    /// Each entry's deadline is drawn independently within
    /// `[expiration_base, expiration_base + expiration_spread]` so chains
    /// created in a burst do not all expire together.
    pub expiration_spread: Duration,
    /// Number of background workers draining the teardown queue.
    pub teardown_workers: usize,
    /// Pool-wide invalidation trigger policy.
    pub invalidation: InvalidationPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: PoolCapacity::try_new(8).expect("8 is a valid capacity"),
            claim_timeout: Duration::from_secs(10),
            expiration_base: Duration::from_secs(5 * 60),
            expiration_spread: Duration::from_secs(5 * 60),
            teardown_workers: 4,
            invalidation: InvalidationPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_give_conservative_lifetimes() {
        let config = PoolConfig::default();
        assert_eq!(u32::from(config.capacity), 8);
        assert_eq!(config.claim_timeout, Duration::from_secs(10));
        // 5 minute base plus up to 5 minutes of jitter = the 5-10 minute window
        assert_eq!(config.expiration_base, Duration::from_secs(300));
        assert_eq!(config.expiration_spread, Duration::from_secs(300));
        assert_eq!(config.invalidation, InvalidationPolicy::TransportOnly);
    }

    #[test]
    fn transport_only_policy_ignores_fatal_faults() {
        let policy = InvalidationPolicy::TransportOnly;
        assert!(policy.invalidates(&EndpointError::Timeout(Duration::from_secs(1))));
        assert!(policy.invalidates(&EndpointError::Unavailable("outage".into())));
        assert!(!policy.invalidates(&EndpointError::Protocol("bad frame".into())));
        assert!(!policy.invalidates(&EndpointError::Internal("bug".into())));
    }

    #[test]
    fn per_entry_policy_never_invalidates() {
        let policy = InvalidationPolicy::PerEntryOnly;
        assert!(!policy.invalidates(&EndpointError::Timeout(Duration::from_secs(1))));
        assert!(!policy.invalidates(&EndpointError::Internal("bug".into())));
    }
}
