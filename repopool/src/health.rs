//! Health checks for the pool subsystem.
//!
//! The round-trip probe is the only externally consumed signal from the pool
//! besides the facade itself: it claims a chain, touches every handle,
//! releases, and times the whole trip against a configured maximum.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::endpoint::RemoteEndpoint;
use crate::errors::PoolResult;
use crate::facade::PoolingFacade;

/// Health status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is healthy and functioning normally.
    Healthy,
    /// Component is degraded but still operational.
    Degraded,
    /// Component is unhealthy and not functioning properly.
    Unhealthy,
}

/// Details about a health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// The health status.
    pub status: HealthStatus,
    /// Human-readable description of the health check.
    pub message: String,
    /// When the health check was performed.
    pub checked_at: Instant,
    /// How long the health check took to complete.
    pub duration: Duration,
    /// Additional metadata about the health check.
    pub metadata: HashMap<String, String>,
}

impl HealthCheckResult {
    /// Create a new healthy result.
    pub fn healthy(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            checked_at: Instant::now(),
            duration,
            metadata: HashMap::new(),
        }
    }

    /// Create a new degraded result.
    pub fn degraded(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: message.into(),
            checked_at: Instant::now(),
            duration,
            metadata: HashMap::new(),
        }
    }

    /// Create a new unhealthy result.
    pub fn unhealthy(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            checked_at: Instant::now(),
            duration,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the health check result.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if the result is healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Check if the result is unhealthy.
    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

/// Trait for performing health checks on system components.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// The name of this health check.
    fn name(&self) -> &str;

    /// Perform the health check.
    async fn check(&self) -> HealthCheckResult;

    /// Get the timeout for this health check.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Round-trip probe through the pooling facade.
///
/// Touches every handle in a freshly claimed chain and releases it. Reports
/// unhealthy if the round trip faults (this is not fatal to the process) or
/// if its latency exceeds the configured maximum.
pub struct ChainRoundTripHealthCheck<E: RemoteEndpoint> {
    facade: Arc<PoolingFacade<E>>,
    max_latency: Duration,
}

impl<E: RemoteEndpoint> ChainRoundTripHealthCheck<E> {
    /// Creates a probe with the given latency ceiling.
    pub const fn new(facade: Arc<PoolingFacade<E>>, max_latency: Duration) -> Self {
        Self {
            facade,
            max_latency,
        }
    }

    async fn round_trip(&self) -> PoolResult<()> {
        let mut context = self.facade.context();
        let entry = context.claim_id().await?;
        context.transport().await?;
        context.directory().await?;
        context.repository().await?;
        context.session().await?;
        context.admin().await?;
        context.release(entry)
    }
}

#[async_trait]
impl<E: RemoteEndpoint> HealthCheck for ChainRoundTripHealthCheck<E> {
    fn name(&self) -> &str {
        "repository round trip"
    }

    async fn check(&self) -> HealthCheckResult {
        let start = Instant::now();
        match self.round_trip().await {
            Ok(()) => {
                let duration = start.elapsed();
                if duration > self.max_latency {
                    HealthCheckResult::unhealthy(
                        format!(
                            "round trip took too long {}ms, max allowed is {}ms",
                            duration.as_millis(),
                            self.max_latency.as_millis()
                        ),
                        duration,
                    )
                } else {
                    HealthCheckResult::healthy("repository round trip succeeded", duration)
                        .with_metadata("latency_ms", duration.as_millis().to_string())
                }
            }
            Err(error) => {
                let duration = start.elapsed();
                HealthCheckResult::unhealthy(format!("round trip failed: {error}"), duration)
            }
        }
    }

    fn timeout(&self) -> Duration {
        // Claiming already bounds the longest wait; leave headroom beyond it.
        self.max_latency.max(Duration::from_secs(1)) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_result_constructors() {
        let duration = Duration::from_millis(100);

        let healthy = HealthCheckResult::healthy("all good", duration);
        assert!(healthy.is_healthy());
        assert!(!healthy.is_unhealthy());
        assert_eq!(healthy.message, "all good");

        let degraded = HealthCheckResult::degraded("slow", duration);
        assert_eq!(degraded.status, HealthStatus::Degraded);

        let unhealthy = HealthCheckResult::unhealthy("down", duration);
        assert!(unhealthy.is_unhealthy());
    }

    #[test]
    fn health_check_result_metadata() {
        let result = HealthCheckResult::healthy("ok", Duration::from_millis(5))
            .with_metadata("latency_ms", "5");
        assert_eq!(result.metadata.get("latency_ms"), Some(&"5".to_string()));
    }
}
