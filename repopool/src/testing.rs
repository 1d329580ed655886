//! Test-support endpoint with scriptable fault injection.
//!
//! [`ScriptedEndpoint`] implements [`RemoteEndpoint`] entirely in memory and
//! lets tests inject a fault at any acquisition or close stage, add artificial
//! latency, and inspect per-stage open/close counts and the order in which
//! handles were closed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::chain::Stage;
use crate::endpoint::RemoteEndpoint;
use crate::errors::EndpointError;
use crate::types::Credentials;

/// A scripted transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedTransport {
    /// Unique serial of this handle.
    pub serial: u64,
}

/// A scripted directory handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedDirectory {
    /// Unique serial of this handle.
    pub serial: u64,
}

/// A scripted repository handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedRepository {
    /// Unique serial of this handle.
    pub serial: u64,
}

/// A scripted session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedSession {
    /// Unique serial of this handle.
    pub serial: u64,
}

/// A scripted admin handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedAdmin {
    /// Unique serial of this handle.
    pub serial: u64,
}

/// In-memory endpoint whose failures are scripted by the test.
#[derive(Debug, Default)]
pub struct ScriptedEndpoint {
    latency: Option<Duration>,
    fail_open_once: Mutex<Vec<(Stage, EndpointError)>>,
    fail_open_always: Mutex<Option<(Stage, EndpointError)>>,
    fail_close_once: Mutex<Vec<(Stage, EndpointError)>>,
    opened: [AtomicUsize; 5],
    closed: [AtomicUsize; 5],
    close_order: Mutex<Vec<Stage>>,
    next_serial: AtomicU64,
}

impl ScriptedEndpoint {
    /// Creates an endpoint that succeeds at everything instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an endpoint that sleeps for `latency` in every operation.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Scripts a one-shot failure for the next acquisition at `stage`.
    pub fn fail_once_at(&self, stage: Stage, fault: EndpointError) {
        self.fail_open_once
            .lock()
            .expect("lock poisoned")
            .push((stage, fault));
    }

    /// Scripts a persistent failure for every acquisition at `stage`.
    pub fn fail_always_at(&self, stage: Stage, fault: EndpointError) {
        *self.fail_open_always.lock().expect("lock poisoned") = Some((stage, fault));
    }

    /// Scripts a one-shot failure for the next close at `stage`.
    pub fn fail_once_on_close(&self, stage: Stage, fault: EndpointError) {
        self.fail_close_once
            .lock()
            .expect("lock poisoned")
            .push((stage, fault));
    }

    /// Clears all scripted failures.
    pub fn clear_failures(&self) {
        self.fail_open_once.lock().expect("lock poisoned").clear();
        *self.fail_open_always.lock().expect("lock poisoned") = None;
        self.fail_close_once.lock().expect("lock poisoned").clear();
    }

    /// Successful acquisitions at `stage`.
    pub fn opened(&self, stage: Stage) -> usize {
        self.opened[stage.index()].load(Ordering::SeqCst)
    }

    /// Successful closes at `stage`.
    pub fn closed(&self, stage: Stage) -> usize {
        self.closed[stage.index()].load(Ordering::SeqCst)
    }

    /// Total successful acquisitions across all stages.
    pub fn total_opened(&self) -> usize {
        Stage::ALL.iter().map(|stage| self.opened(*stage)).sum()
    }

    /// Total successful closes across all stages.
    pub fn total_closed(&self) -> usize {
        Stage::ALL.iter().map(|stage| self.closed(*stage)).sum()
    }

    /// Handles currently live (opened and not yet closed).
    pub fn live_handles(&self) -> usize {
        self.total_opened().saturating_sub(self.total_closed())
    }

    /// The order in which closes were attempted.
    pub fn close_order(&self) -> Vec<Stage> {
        self.close_order.lock().expect("lock poisoned").clone()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn open(&self, stage: Stage) -> Result<u64, EndpointError> {
        self.pause().await;
        if let Some((scripted_stage, fault)) =
            self.fail_open_always.lock().expect("lock poisoned").as_ref()
        {
            if *scripted_stage == stage {
                return Err(fault.clone());
            }
        }
        {
            let mut scripted = self.fail_open_once.lock().expect("lock poisoned");
            if let Some(position) = scripted.iter().position(|(s, _)| *s == stage) {
                let (_, fault) = scripted.remove(position);
                return Err(fault);
            }
        }
        self.opened[stage.index()].fetch_add(1, Ordering::SeqCst);
        Ok(self.next_serial.fetch_add(1, Ordering::SeqCst))
    }

    async fn close(&self, stage: Stage) -> Result<(), EndpointError> {
        self.pause().await;
        self.close_order.lock().expect("lock poisoned").push(stage);
        {
            let mut scripted = self.fail_close_once.lock().expect("lock poisoned");
            if let Some(position) = scripted.iter().position(|(s, _)| *s == stage) {
                let (_, fault) = scripted.remove(position);
                return Err(fault);
            }
        }
        self.closed[stage.index()].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteEndpoint for ScriptedEndpoint {
    type Transport = ScriptedTransport;
    type Directory = ScriptedDirectory;
    type Repository = ScriptedRepository;
    type Session = ScriptedSession;
    type Admin = ScriptedAdmin;

    async fn open_transport(&self) -> Result<Self::Transport, EndpointError> {
        let serial = self.open(Stage::Transport).await?;
        Ok(ScriptedTransport { serial })
    }

    async fn resolve_directory(
        &self,
        _transport: &Self::Transport,
    ) -> Result<Self::Directory, EndpointError> {
        let serial = self.open(Stage::Directory).await?;
        Ok(ScriptedDirectory { serial })
    }

    async fn resolve_repository(
        &self,
        _directory: &Self::Directory,
    ) -> Result<Self::Repository, EndpointError> {
        let serial = self.open(Stage::Repository).await?;
        Ok(ScriptedRepository { serial })
    }

    async fn open_session(
        &self,
        _repository: &Self::Repository,
        _credentials: &Credentials,
    ) -> Result<Self::Session, EndpointError> {
        let serial = self.open(Stage::Session).await?;
        Ok(ScriptedSession { serial })
    }

    async fn acquire_admin(&self, _session: &Self::Session) -> Result<Self::Admin, EndpointError> {
        let serial = self.open(Stage::Admin).await?;
        Ok(ScriptedAdmin { serial })
    }

    async fn close_admin(&self, _admin: Self::Admin) -> Result<(), EndpointError> {
        self.close(Stage::Admin).await
    }

    async fn close_session(&self, _session: Self::Session) -> Result<(), EndpointError> {
        self.close(Stage::Session).await
    }

    async fn close_repository(&self, _repository: Self::Repository) -> Result<(), EndpointError> {
        self.close(Stage::Repository).await
    }

    async fn close_directory(&self, _directory: Self::Directory) -> Result<(), EndpointError> {
        self.close(Stage::Directory).await
    }

    async fn close_transport(&self, _transport: Self::Transport) -> Result<(), EndpointError> {
        self.close(Stage::Transport).await
    }

    fn description(&self) -> String {
        "scripted endpoint".to_string()
    }
}
