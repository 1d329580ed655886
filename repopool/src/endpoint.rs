//! Contract with the remote repository endpoint.
//!
//! The remote repository speaks a session-oriented protocol requiring ordered
//! handle acquisition: a transport must be open before the directory service
//! can be resolved, the directory yields the repository handle, the
//! repository authenticates a session, and the session grants the
//! administrative sub-interface. The wire encoding behind these operations is
//! opaque to this crate; implementations surface failures as
//! [`EndpointError`] values which the pool classifies uniformly.

use async_trait::async_trait;

use crate::errors::EndpointError;
use crate::types::Credentials;

/// A binding to the remote repository endpoint.
///
/// Each associated type is one of the five nested handles making up a usable
/// session. Every acquisition depends on the previous handle by reference;
/// every close consumes the handle, so a closed handle can never be reused.
///
/// Implementations must be shareable across workers (`Send + Sync`); handle
/// values cross task boundaries when chains are torn down in the background,
/// so they must be `Send`.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// The transport connection to the endpoint.
    type Transport: Send + Sync + 'static;
    /// The resolved directory (naming) service.
    type Directory: Send + Sync + 'static;
    /// The repository handle resolved through the directory.
    type Repository: Send + Sync + 'static;
    /// An authenticated session on the repository.
    type Session: Send + Sync + 'static;
    /// The administrative sub-interface of a session.
    type Admin: Send + Sync + 'static;

    /// Opens the transport to the endpoint.
    async fn open_transport(&self) -> Result<Self::Transport, EndpointError>;

    /// Resolves the directory service over an open transport.
    async fn resolve_directory(
        &self,
        transport: &Self::Transport,
    ) -> Result<Self::Directory, EndpointError>;

    /// Resolves the repository handle through the directory service.
    async fn resolve_repository(
        &self,
        directory: &Self::Directory,
    ) -> Result<Self::Repository, EndpointError>;

    /// Authenticates a session against the repository.
    async fn open_session(
        &self,
        repository: &Self::Repository,
        credentials: &Credentials,
    ) -> Result<Self::Session, EndpointError>;

    /// Acquires the administrative sub-interface of a session.
    async fn acquire_admin(&self, session: &Self::Session) -> Result<Self::Admin, EndpointError>;

    /// Releases an administrative sub-interface.
    async fn close_admin(&self, admin: Self::Admin) -> Result<(), EndpointError>;

    /// Destroys an authenticated session.
    async fn close_session(&self, session: Self::Session) -> Result<(), EndpointError>;

    /// Releases a repository handle.
    async fn close_repository(&self, repository: Self::Repository) -> Result<(), EndpointError>;

    /// Releases a directory service reference.
    async fn close_directory(&self, directory: Self::Directory) -> Result<(), EndpointError>;

    /// Closes the transport.
    async fn close_transport(&self, transport: Self::Transport) -> Result<(), EndpointError>;

    /// A human-readable description of this endpoint for diagnostics.
    fn description(&self) -> String;
}
