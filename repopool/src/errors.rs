//! Error types for `repopool`.
//!
//! Every failure observed while acquiring, using, or destroying a session
//! chain is classified into one of two kinds:
//!
//! - **Recoverable**: transient conditions at the remote endpoint (timeouts,
//!   temporary unavailability). The affected entry is discarded and replaced;
//!   the fault never escalates beyond the current unit of work.
//! - **Fatal**: programming errors, protocol violations, and unrecoverable
//!   runtime conditions. Propagated immediately, never retried.
//!
//! The classification is applied uniformly at every fault boundary through
//! [`EndpointError::kind`], decoupled from whichever concrete failure the
//! remote-endpoint binding raised.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::EntryId;

/// The two-way classification every observed fault resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Transient condition; discard the affected entry and carry on.
    Recoverable,
    /// Unrecoverable condition; propagate, never retry.
    Fatal,
}

/// Faults surfaced by the remote repository endpoint.
///
/// These are the endpoint-specific failure signals this system must map into
/// the Recoverable/Fatal classification. The variants mirror the failure
/// modes of a session-oriented remote protocol: the transport can time out or
/// be transiently unreachable, the repository can reject a login, and the
/// binding itself can misbehave.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The endpoint operation did not complete in time.
    #[error("endpoint operation timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint is temporarily unreachable or refusing work.
    #[error("endpoint temporarily unavailable: {0}")]
    Unavailable(String),

    /// The repository rejected the supplied credentials.
    #[error("login rejected by repository: {0}")]
    LoginRejected(String),

    /// The endpoint binding violated its own protocol contract.
    #[error("protocol fault: {0}")]
    Protocol(String),

    /// An unrecoverable internal fault inside the endpoint binding.
    #[error("internal endpoint fault: {0}")]
    Internal(String),
}

impl EndpointError {
    /// Classifies this fault as Recoverable or Fatal.
    ///
    /// Timeouts and transient unavailability are the only conditions a fresh
    /// chain can be expected to get past; everything else indicates a
    /// configuration or programming problem that retrying cannot fix.
    pub const fn kind(&self) -> FaultKind {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) => FaultKind::Recoverable,
            Self::LoginRejected(_) | Self::Protocol(_) | Self::Internal(_) => FaultKind::Fatal,
        }
    }

    /// Whether this fault originates at the transport level.
    ///
    /// Transport-level faults usually indicate a systemic outage affecting
    /// every pooled chain, not a single bad entry, and so may trigger
    /// pool-wide invalidation depending on the configured policy.
    pub const fn is_transport_level(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Failure to build a complete session chain.
///
/// Raised by the chain factory after it has unwound whatever partial chain
/// existed at the point of failure.
#[derive(Debug, Clone, Error)]
pub enum AllocationError {
    /// A transient endpoint condition interrupted the handshake.
    ///
    /// The pool may allocate a fresh replacement. Carries the wall-clock time
    /// the fault occurred for diagnostics.
    #[error("recoverable allocation failure at {occurred_at}: {source}")]
    Recoverable {
        /// The endpoint fault that interrupted the handshake.
        #[source]
        source: EndpointError,
        /// When the fault was observed.
        occurred_at: DateTime<Utc>,
    },

    /// An unrecoverable fault interrupted the handshake.
    ///
    /// Must propagate to the caller unchanged and must not be retried.
    #[error("fatal allocation failure: {0}")]
    Fatal(#[source] EndpointError),
}

impl AllocationError {
    /// Wraps an endpoint fault, classifying it via [`EndpointError::kind`].
    pub fn from_endpoint(source: EndpointError) -> Self {
        match source.kind() {
            FaultKind::Recoverable => Self::Recoverable {
                source,
                occurred_at: Utc::now(),
            },
            FaultKind::Fatal => Self::Fatal(source),
        }
    }

    /// The classification of the underlying fault.
    pub const fn kind(&self) -> FaultKind {
        match self {
            Self::Recoverable { .. } => FaultKind::Recoverable,
            Self::Fatal(_) => FaultKind::Fatal,
        }
    }

    /// The endpoint fault that caused this allocation failure.
    pub const fn endpoint(&self) -> &EndpointError {
        match self {
            Self::Recoverable { source, .. } | Self::Fatal(source) => source,
        }
    }
}

/// Failures surfaced by the chain pool and its facade.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No idle chain became available within the claim timeout.
    ///
    /// This is backpressure, not a systemic failure: the caller should retry
    /// with backoff or shed load.
    #[error("no pooled chain became available within {0:?}")]
    Exhausted(Duration),

    /// Allocating a fresh chain during a claim failed.
    ///
    /// Preserves the kind of the underlying [`AllocationError`].
    #[error("allocation failed while claiming: {0}")]
    Allocation(#[from] AllocationError),

    /// A release did not match the worker's current claim.
    ///
    /// Always a programming fault in the calling code; the pool state is
    /// left untouched.
    #[error("released entry {returned} does not match the current claim {claimed:?}")]
    Consistency {
        /// The entry identity the caller tried to release.
        returned: EntryId,
        /// The identity of the currently cached claim, if any.
        claimed: Option<EntryId>,
    },

    /// The pool has been shut down.
    #[error("pool is shut down")]
    Closed,
}

impl PoolError {
    /// The classification of this pool failure.
    pub const fn kind(&self) -> FaultKind {
        match self {
            Self::Exhausted(_) => FaultKind::Recoverable,
            Self::Allocation(inner) => inner.kind(),
            Self::Consistency { .. } | Self::Closed => FaultKind::Fatal,
        }
    }
}

/// Type alias for pool operation results.
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_faults_are_recoverable() {
        assert_eq!(
            EndpointError::Timeout(Duration::from_secs(5)).kind(),
            FaultKind::Recoverable
        );
        assert_eq!(
            EndpointError::Unavailable("directory unreachable".into()).kind(),
            FaultKind::Recoverable
        );
    }

    #[test]
    fn non_transport_faults_are_fatal() {
        assert_eq!(
            EndpointError::LoginRejected("bad password".into()).kind(),
            FaultKind::Fatal
        );
        assert_eq!(
            EndpointError::Protocol("unexpected frame".into()).kind(),
            FaultKind::Fatal
        );
        assert_eq!(
            EndpointError::Internal("segfault in binding".into()).kind(),
            FaultKind::Fatal
        );
    }

    #[test]
    fn allocation_error_preserves_kind() {
        let recoverable =
            AllocationError::from_endpoint(EndpointError::Timeout(Duration::from_secs(1)));
        assert_eq!(recoverable.kind(), FaultKind::Recoverable);
        assert!(matches!(
            recoverable,
            AllocationError::Recoverable { .. }
        ));

        let fatal = AllocationError::from_endpoint(EndpointError::Protocol("oops".into()));
        assert_eq!(fatal.kind(), FaultKind::Fatal);
        assert!(matches!(fatal, AllocationError::Fatal(_)));
    }

    #[test]
    fn pool_error_kind_follows_taxonomy() {
        assert_eq!(
            PoolError::Exhausted(Duration::from_secs(10)).kind(),
            FaultKind::Recoverable
        );
        assert_eq!(
            PoolError::Consistency {
                returned: crate::types::EntryId::new(),
                claimed: None,
            }
            .kind(),
            FaultKind::Fatal
        );
        let wrapped = PoolError::Allocation(AllocationError::from_endpoint(
            EndpointError::Internal("boom".into()),
        ));
        assert_eq!(wrapped.kind(), FaultKind::Fatal);
    }
}
