//! The chain factory: ordered five-stage creation and best-effort destruction.
//!
//! `create` performs the acquisitions strictly in order and, on a failure at
//! stage *k*, unwinds stages `1..k-1` in reverse before surfacing the fault.
//! Faults are classified at this boundary: transport-level signals become
//! recoverable allocation failures; anything else is fatal, logged, and
//! propagated. `destroy` never surfaces an error to its caller; it logs and
//! absorbs secondary faults so every handle gets its close attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::chain::{PartialChain, SessionChain, Stage};
use crate::endpoint::RemoteEndpoint;
use crate::errors::{AllocationError, EndpointError, FaultKind};
use crate::metrics::FactoryMetrics;
use crate::types::Credentials;

/// Creates and destroys session chains against one remote endpoint, holding
/// the connection credentials and per-stage timing registry.
pub struct ChainFactory<E: RemoteEndpoint> {
    endpoint: Arc<E>,
    credentials: Credentials,
    metrics: Arc<FactoryMetrics>,
}

impl<E: RemoteEndpoint> ChainFactory<E> {
    /// Creates a factory for the given endpoint and credentials.
    pub fn new(endpoint: Arc<E>, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            metrics: Arc::new(FactoryMetrics::default()),
        }
    }

    /// The wrapped endpoint.
    pub const fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    /// The factory's timing and counter registry.
    pub const fn metrics(&self) -> &Arc<FactoryMetrics> {
        &self.metrics
    }

    /// A diagnostic description of the wrapped endpoint.
    pub fn description(&self) -> String {
        self.endpoint.description()
    }

    /// Builds a complete session chain, acquiring the five handles in order.
    ///
    /// On failure the already-acquired prefix is unwound in reverse order
    /// before the classified fault is returned. Fatal faults are logged at
    /// error level here; the caller must not swallow them.
    pub async fn create(&self) -> Result<SessionChain<E>, AllocationError> {
        let endpoint = self.endpoint.as_ref();
        let mut partial = PartialChain::<E>::empty();

        let transport = match self
            .timed_create(Stage::Transport, endpoint.open_transport())
            .await
        {
            Ok(transport) => transport,
            Err(fault) => return self.fail(partial, Stage::Transport, fault).await,
        };

        let directory = match self
            .timed_create(Stage::Directory, endpoint.resolve_directory(&transport))
            .await
        {
            Ok(directory) => directory,
            Err(fault) => {
                partial.transport = Some(transport);
                return self.fail(partial, Stage::Directory, fault).await;
            }
        };

        let repository = match self
            .timed_create(Stage::Repository, endpoint.resolve_repository(&directory))
            .await
        {
            Ok(repository) => repository,
            Err(fault) => {
                partial.transport = Some(transport);
                partial.directory = Some(directory);
                return self.fail(partial, Stage::Repository, fault).await;
            }
        };

        let session = match self
            .timed_create(
                Stage::Session,
                endpoint.open_session(&repository, &self.credentials),
            )
            .await
        {
            Ok(session) => session,
            Err(fault) => {
                partial.transport = Some(transport);
                partial.directory = Some(directory);
                partial.repository = Some(repository);
                return self.fail(partial, Stage::Session, fault).await;
            }
        };

        let admin = match self
            .timed_create(Stage::Admin, endpoint.acquire_admin(&session))
            .await
        {
            Ok(admin) => admin,
            Err(fault) => {
                partial.transport = Some(transport);
                partial.directory = Some(directory);
                partial.repository = Some(repository);
                partial.session = Some(session);
                return self.fail(partial, Stage::Admin, fault).await;
            }
        };

        self.metrics.creations.increment();
        Ok(SessionChain::new(
            transport, directory, repository, session, admin,
        ))
    }

    /// Destroys a complete chain, closing every handle in reverse order.
    ///
    /// Best-effort: close faults are logged and absorbed, and a faulted close
    /// never prevents the remaining handles from getting their attempt.
    pub async fn destroy(&self, chain: SessionChain<E>) {
        let endpoint = self.endpoint.as_ref();
        let (transport, directory, repository, session, admin) = chain.into_parts();

        self.timed_close(Stage::Admin, endpoint.close_admin(admin))
            .await;
        self.timed_close(Stage::Session, endpoint.close_session(session))
            .await;
        self.timed_close(Stage::Repository, endpoint.close_repository(repository))
            .await;
        self.timed_close(Stage::Directory, endpoint.close_directory(directory))
            .await;
        self.timed_close(Stage::Transport, endpoint.close_transport(transport))
            .await;

        self.metrics.destructions.increment();
    }

    async fn timed_create<T, F>(&self, stage: Stage, operation: F) -> Result<T, EndpointError>
    where
        F: Future<Output = Result<T, EndpointError>>,
    {
        let start = Instant::now();
        let result = operation.await;
        self.metrics.stages.record_create(stage, start.elapsed());
        result
    }

    async fn timed_close<F>(&self, stage: Stage, operation: F)
    where
        F: Future<Output = Result<(), EndpointError>>,
    {
        let start = Instant::now();
        if let Err(error) = operation.await {
            match error.kind() {
                FaultKind::Fatal => {
                    tracing::error!(stage = %stage, %error, "fatal fault while closing handle");
                }
                FaultKind::Recoverable => {
                    tracing::warn!(stage = %stage, %error, "failed to close handle");
                }
            }
        }
        self.metrics.stages.record_close(stage, start.elapsed());
    }

    async fn fail<T>(
        &self,
        partial: PartialChain<E>,
        stage: Stage,
        fault: EndpointError,
    ) -> Result<T, AllocationError> {
        partial.unwind(self.endpoint.as_ref()).await;
        self.metrics.creation_failures.increment();

        let fault = AllocationError::from_endpoint(fault);
        match &fault {
            AllocationError::Fatal(source) => {
                tracing::error!(stage = %stage, error = %source, "fatal fault during chain creation");
            }
            AllocationError::Recoverable { source, .. } => {
                tracing::debug!(stage = %stage, error = %source, "recoverable fault during chain creation");
            }
        }
        Err(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEndpoint;
    use std::time::Duration;

    fn factory(endpoint: &Arc<ScriptedEndpoint>) -> ChainFactory<ScriptedEndpoint> {
        ChainFactory::new(
            Arc::clone(endpoint),
            Credentials::new("svc", "secret"),
        )
    }

    #[tokio::test]
    async fn create_acquires_all_five_stages_in_order() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let factory = factory(&endpoint);

        let chain = factory.create().await.expect("creation should succeed");
        for stage in Stage::ALL {
            assert_eq!(endpoint.opened(stage), 1, "stage {stage} not acquired");
        }
        assert_eq!(factory.metrics().creations.get(), 1);

        factory.destroy(chain).await;
        for stage in Stage::ALL {
            assert_eq!(endpoint.closed(stage), 1, "stage {stage} not closed");
        }
    }

    #[tokio::test]
    async fn destroy_closes_in_reverse_order() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let factory = factory(&endpoint);

        let chain = factory.create().await.expect("creation should succeed");
        factory.destroy(chain).await;

        assert_eq!(
            endpoint.close_order(),
            vec![
                Stage::Admin,
                Stage::Session,
                Stage::Repository,
                Stage::Directory,
                Stage::Transport
            ]
        );
    }

    #[tokio::test]
    async fn failure_at_each_stage_unwinds_exactly_the_acquired_prefix() {
        for (failing_index, failing_stage) in Stage::ALL.into_iter().enumerate() {
            let endpoint = Arc::new(ScriptedEndpoint::new());
            endpoint.fail_once_at(
                failing_stage,
                EndpointError::Timeout(Duration::from_millis(10)),
            );
            let factory = factory(&endpoint);

            let result = factory.create().await;
            assert!(result.is_err(), "stage {failing_stage} should have failed");

            for (index, stage) in Stage::ALL.into_iter().enumerate() {
                let expected_closes = usize::from(index < failing_index);
                assert_eq!(
                    endpoint.closed(stage),
                    expected_closes,
                    "unexpected close count for {stage} when failing at {failing_stage}"
                );
            }
            // The unwind happens in reverse acquisition order
            let expected_order: Vec<Stage> =
                Stage::ALL[..failing_index].iter().rev().copied().collect();
            assert_eq!(endpoint.close_order(), expected_order);
        }
    }

    #[tokio::test]
    async fn recoverable_faults_are_classified_and_timestamped() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        endpoint.fail_once_at(
            Stage::Directory,
            EndpointError::Unavailable("naming service down".into()),
        );
        let factory = factory(&endpoint);

        let fault = factory.create().await.expect_err("creation should fail");
        assert!(matches!(fault, AllocationError::Recoverable { .. }));
        assert_eq!(factory.metrics().creation_failures.get(), 1);
    }

    #[tokio::test]
    async fn fatal_faults_propagate_as_fatal() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        endpoint.fail_once_at(
            Stage::Session,
            EndpointError::LoginRejected("expired account".into()),
        );
        let factory = factory(&endpoint);

        let fault = factory.create().await.expect_err("creation should fail");
        assert!(matches!(fault, AllocationError::Fatal(_)));
    }

    #[tokio::test]
    async fn destroy_absorbs_close_faults_and_keeps_going() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let factory = factory(&endpoint);
        let chain = factory.create().await.expect("creation should succeed");

        endpoint.fail_once_on_close(
            Stage::Session,
            EndpointError::Unavailable("session server gone".into()),
        );
        factory.destroy(chain).await;

        // The faulted session close is absorbed; every later handle still
        // gets its close attempt.
        assert_eq!(endpoint.closed(Stage::Admin), 1);
        assert_eq!(endpoint.closed(Stage::Session), 0);
        assert_eq!(endpoint.closed(Stage::Repository), 1);
        assert_eq!(endpoint.closed(Stage::Directory), 1);
        assert_eq!(endpoint.closed(Stage::Transport), 1);
    }
}
