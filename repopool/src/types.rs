//! Core types for the `repopool` session-chain pooling library.
//!
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The number of session chains a pool may keep alive at once.
///
/// `PoolCapacity` values are guaranteed to be between 1 and 4096. A pool of
/// zero chains cannot serve any request, and capacities beyond a few thousand
/// indicate a configuration mistake rather than a real deployment.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 4096),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct PoolCapacity(u32);

impl PoolCapacity {
    /// Returns the capacity as a `usize` for use with collection sizing.
    pub fn as_usize(self) -> usize {
        u32::from(self) as usize
    }
}

/// A globally unique identity for one pooled entry, using UUIDv7 format.
///
/// `EntryId` values are guaranteed to be UUIDv7, which provides:
/// - Time-based ordering capability
/// - Globally unique identification across pool generations
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new `EntryId` with the current timestamp.
    pub fn new() -> Self {
        // This will always succeed as Uuid::now_v7() always returns a valid v7 UUID
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Login credentials for the remote repository's session handshake.
///
/// The `Debug` implementation redacts the password so credentials can appear
/// in structured logs without leaking secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates a new credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the login username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the login password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_capacity_rejects_zero() {
        assert!(PoolCapacity::try_new(0).is_err());
        assert!(PoolCapacity::try_new(1).is_ok());
        assert!(PoolCapacity::try_new(4096).is_ok());
        assert!(PoolCapacity::try_new(4097).is_err());
    }

    #[test]
    fn entry_ids_are_unique_and_ordered() {
        let first = EntryId::new();
        let second = EntryId::new();
        assert_ne!(first, second);
        // UUIDv7 sorts by creation time
        assert!(first < second);
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let credentials = Credentials::new("bridge-svc", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("bridge-svc"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
