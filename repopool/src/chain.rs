//! The session chain: five nested handles with ordered ownership.
//!
//! A chain is either *complete* (all five handles live, represented by
//! [`SessionChain`]) or *partial* (creation failed partway, represented by
//! [`PartialChain`]). A partial chain unwinds only the handles it actually
//! acquired, in reverse order, before being discarded. The chain that creates
//! a handle is exclusively responsible for destroying it; handles are never
//! shared between chains.

use crate::endpoint::RemoteEndpoint;

/// One of the five acquisition stages of a session chain, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Opening the transport.
    Transport,
    /// Resolving the directory service.
    Directory,
    /// Resolving the repository handle.
    Repository,
    /// Authenticating the session.
    Session,
    /// Acquiring the administrative sub-interface.
    Admin,
}

impl Stage {
    /// All five stages in acquisition order.
    pub const ALL: [Self; 5] = [
        Self::Transport,
        Self::Directory,
        Self::Repository,
        Self::Session,
        Self::Admin,
    ];

    /// Zero-based position in the acquisition order.
    pub const fn index(self) -> usize {
        match self {
            Self::Transport => 0,
            Self::Directory => 1,
            Self::Repository => 2,
            Self::Session => 3,
            Self::Admin => 4,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Directory => "directory",
            Self::Repository => "repository",
            Self::Session => "session",
            Self::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// A complete session chain: all five handles live, in dependency order.
pub struct SessionChain<E: RemoteEndpoint> {
    transport: E::Transport,
    directory: E::Directory,
    repository: E::Repository,
    session: E::Session,
    admin: E::Admin,
}

impl<E: RemoteEndpoint> std::fmt::Debug for SessionChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChain").finish_non_exhaustive()
    }
}

impl<E: RemoteEndpoint> SessionChain<E> {
    pub(crate) const fn new(
        transport: E::Transport,
        directory: E::Directory,
        repository: E::Repository,
        session: E::Session,
        admin: E::Admin,
    ) -> Self {
        Self {
            transport,
            directory,
            repository,
            session,
            admin,
        }
    }

    /// The transport handle.
    pub const fn transport(&self) -> &E::Transport {
        &self.transport
    }

    /// The directory service handle.
    pub const fn directory(&self) -> &E::Directory {
        &self.directory
    }

    /// The repository handle.
    pub const fn repository(&self) -> &E::Repository {
        &self.repository
    }

    /// The authenticated session handle.
    pub const fn session(&self) -> &E::Session {
        &self.session
    }

    /// The administrative sub-interface handle.
    pub const fn admin(&self) -> &E::Admin {
        &self.admin
    }

    /// Decomposes the chain for teardown, reverse of acquisition order.
    #[allow(clippy::type_complexity)]
    pub(crate) fn into_parts(
        self,
    ) -> (
        E::Transport,
        E::Directory,
        E::Repository,
        E::Session,
        E::Admin,
    ) {
        (
            self.transport,
            self.directory,
            self.repository,
            self.session,
            self.admin,
        )
    }
}

/// A chain under construction: records exactly how far acquisition got so a
/// failure at stage *k* can unwind stages `1..k-1` and nothing else.
pub(crate) struct PartialChain<E: RemoteEndpoint> {
    pub(crate) transport: Option<E::Transport>,
    pub(crate) directory: Option<E::Directory>,
    pub(crate) repository: Option<E::Repository>,
    pub(crate) session: Option<E::Session>,
}

impl<E: RemoteEndpoint> PartialChain<E> {
    pub(crate) const fn empty() -> Self {
        Self {
            transport: None,
            directory: None,
            repository: None,
            session: None,
        }
    }

    /// Closes the acquired prefix in reverse order, absorbing close faults.
    ///
    /// Every acquired handle gets a close attempt even when an earlier close
    /// faults.
    pub(crate) async fn unwind(self, endpoint: &E) {
        if let Some(session) = self.session {
            if let Err(error) = endpoint.close_session(session).await {
                tracing::warn!(stage = %Stage::Session, %error, "failed to unwind partial chain handle");
            }
        }
        if let Some(repository) = self.repository {
            if let Err(error) = endpoint.close_repository(repository).await {
                tracing::warn!(stage = %Stage::Repository, %error, "failed to unwind partial chain handle");
            }
        }
        if let Some(directory) = self.directory {
            if let Err(error) = endpoint.close_directory(directory).await {
                tracing::warn!(stage = %Stage::Directory, %error, "failed to unwind partial chain handle");
            }
        }
        if let Some(transport) = self.transport {
            if let Err(error) = endpoint.close_transport(transport).await {
                tracing::warn!(stage = %Stage::Transport, %error, "failed to unwind partial chain handle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        for (expected, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), expected);
        }
    }

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(Stage::Transport.to_string(), "transport");
        assert_eq!(Stage::Admin.to_string(), "admin");
    }
}
