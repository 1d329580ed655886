//! In-memory endpoint adapter for the `repopool` session-chain pool
//!
//! This crate provides an in-memory implementation of the `RemoteEndpoint`
//! trait from the repopool crate, useful for testing and development
//! scenarios where a real repository is not available. It enforces the same
//! ordered-acquisition discipline as the real protocol: every handle must be
//! derived from a live parent, sessions require valid credentials, and a
//! handle closed once can never be used again.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use repopool::{Credentials, EndpointError, RemoteEndpoint};

/// An open transport connection to the in-memory repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTransport {
    serial: u64,
}

/// A resolved directory service reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDirectory {
    serial: u64,
}

/// A repository handle resolved through the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRepository {
    serial: u64,
}

/// An authenticated session on the in-memory repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySession {
    serial: u64,
    username: String,
}

impl MemorySession {
    /// The username this session was authenticated as.
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// The administrative sub-interface of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAdmin {
    serial: u64,
}

#[derive(Debug, Default)]
struct LiveHandles {
    transports: HashSet<u64>,
    directories: HashSet<u64>,
    repositories: HashSet<u64>,
    sessions: HashSet<u64>,
    admins: HashSet<u64>,
}

/// Thread-safe in-memory repository endpoint for testing.
///
/// Tracks every live handle and raises a protocol fault when a caller uses a
/// handle that was never issued or was already closed. An optional simulated
/// outage makes transport opens fail with a recoverable fault, and an
/// optional per-operation latency slows every remote call.
#[derive(Debug)]
pub struct InMemoryEndpoint {
    credentials: Credentials,
    latency: Option<Duration>,
    offline: AtomicBool,
    live: RwLock<LiveHandles>,
    content: RwLock<HashMap<String, String>>,
    next_serial: AtomicU64,
}

impl InMemoryEndpoint {
    /// Creates an endpoint that accepts the given credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            latency: None,
            offline: AtomicBool::new(false),
            live: RwLock::new(LiveHandles::default()),
            content: RwLock::new(HashMap::new()),
            next_serial: AtomicU64::new(0),
        }
    }

    /// Creates an endpoint where every remote call sleeps for `latency`.
    pub fn with_latency(credentials: Credentials, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new(credentials)
        }
    }

    /// Simulates an outage: while offline, transport opens fail with a
    /// recoverable fault. Already-issued handles keep working.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Stores a content item readable through any live session.
    pub fn put_content(&self, key: impl Into<String>, value: impl Into<String>) {
        self.content
            .write()
            .expect("RwLock poisoned")
            .insert(key.into(), value.into());
    }

    /// Reads a content item through an authenticated session.
    ///
    /// Fails with a protocol fault if the session is not live; returns `None`
    /// for a key that was never stored.
    pub fn read_content(
        &self,
        session: &MemorySession,
        key: &str,
    ) -> Result<Option<String>, EndpointError> {
        let live = self.live.read().expect("RwLock poisoned");
        if !live.sessions.contains(&session.serial) {
            return Err(EndpointError::Protocol(format!(
                "read through closed session {}",
                session.serial
            )));
        }
        Ok(self.content.read().expect("RwLock poisoned").get(key).cloned())
    }

    /// Number of handles currently live across all five kinds.
    pub fn live_handles(&self) -> usize {
        let live = self.live.read().expect("RwLock poisoned");
        live.transports.len()
            + live.directories.len()
            + live.repositories.len()
            + live.sessions.len()
            + live.admins.len()
    }

    /// Number of currently authenticated sessions.
    pub fn live_sessions(&self) -> usize {
        self.live.read().expect("RwLock poisoned").sessions.len()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn issue(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::SeqCst)
    }

    fn require_live(set: &HashSet<u64>, serial: u64, kind: &str) -> Result<(), EndpointError> {
        if set.contains(&serial) {
            Ok(())
        } else {
            Err(EndpointError::Protocol(format!(
                "{kind} handle {serial} is not live"
            )))
        }
    }

    fn retire(set: &mut HashSet<u64>, serial: u64, kind: &str) -> Result<(), EndpointError> {
        if set.remove(&serial) {
            Ok(())
        } else {
            Err(EndpointError::Protocol(format!(
                "double close of {kind} handle {serial}"
            )))
        }
    }
}

#[async_trait]
impl RemoteEndpoint for InMemoryEndpoint {
    type Transport = MemoryTransport;
    type Directory = MemoryDirectory;
    type Repository = MemoryRepository;
    type Session = MemorySession;
    type Admin = MemoryAdmin;

    async fn open_transport(&self) -> Result<Self::Transport, EndpointError> {
        self.pause().await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(EndpointError::Unavailable(
                "simulated outage: repository offline".to_string(),
            ));
        }
        let serial = self.issue();
        self.live
            .write()
            .expect("RwLock poisoned")
            .transports
            .insert(serial);
        Ok(MemoryTransport { serial })
    }

    async fn resolve_directory(
        &self,
        transport: &Self::Transport,
    ) -> Result<Self::Directory, EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::require_live(&live.transports, transport.serial, "transport")?;
        let serial = self.issue();
        live.directories.insert(serial);
        Ok(MemoryDirectory { serial })
    }

    async fn resolve_repository(
        &self,
        directory: &Self::Directory,
    ) -> Result<Self::Repository, EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::require_live(&live.directories, directory.serial, "directory")?;
        let serial = self.issue();
        live.repositories.insert(serial);
        Ok(MemoryRepository { serial })
    }

    async fn open_session(
        &self,
        repository: &Self::Repository,
        credentials: &Credentials,
    ) -> Result<Self::Session, EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::require_live(&live.repositories, repository.serial, "repository")?;
        if credentials != &self.credentials {
            return Err(EndpointError::LoginRejected(format!(
                "unknown user {}",
                credentials.username()
            )));
        }
        let serial = self.issue();
        live.sessions.insert(serial);
        tracing::debug!(session = serial, user = credentials.username(), "session opened");
        Ok(MemorySession {
            serial,
            username: credentials.username().to_string(),
        })
    }

    async fn acquire_admin(&self, session: &Self::Session) -> Result<Self::Admin, EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::require_live(&live.sessions, session.serial, "session")?;
        let serial = self.issue();
        live.admins.insert(serial);
        Ok(MemoryAdmin { serial })
    }

    async fn close_admin(&self, admin: Self::Admin) -> Result<(), EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::retire(&mut live.admins, admin.serial, "admin")
    }

    async fn close_session(&self, session: Self::Session) -> Result<(), EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        tracing::debug!(session = session.serial, "session closed");
        Self::retire(&mut live.sessions, session.serial, "session")
    }

    async fn close_repository(&self, repository: Self::Repository) -> Result<(), EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::retire(&mut live.repositories, repository.serial, "repository")
    }

    async fn close_directory(&self, directory: Self::Directory) -> Result<(), EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::retire(&mut live.directories, directory.serial, "directory")
    }

    async fn close_transport(&self, transport: Self::Transport) -> Result<(), EndpointError> {
        self.pause().await;
        let mut live = self.live.write().expect("RwLock poisoned");
        Self::retire(&mut live.transports, transport.serial, "transport")
    }

    fn description(&self) -> String {
        "in-memory repository".to_string()
    }
}
