//! Bounded, time-limited connector invocation
//!
//! Connector calls are blocking and talk to remote systems that may hang.
//! They run on the blocking pool behind a semaphore of
//! `ranger.timed.executor.max.threads` permits, and the caller waits at most
//! the given timeout, permit acquisition included.
//!
//! An operation that misses its deadline is not interrupted: it keeps running
//! in the background, holding its permit until it returns.

use gatekeeper_core::Properties;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::connector::Connector;
use crate::error::{ConnectorError, Result};
use crate::loader;

/// Property bounding concurrent connector operations
pub const MAX_THREADS_PROPERTY: &str = "ranger.timed.executor.max.threads";

/// Default number of concurrent connector operations
pub const DEFAULT_MAX_THREADS: usize = 10;

/// Invoker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerConfig {
    /// Maximum number of operations running at once
    pub max_threads: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
        }
    }
}

impl InvokerConfig {
    /// Read `ranger.timed.executor.max.threads`; missing, zero or invalid
    /// values use the default
    pub fn from_properties(props: &Properties) -> Self {
        let max_threads = props
            .get_u64(MAX_THREADS_PROPERTY)
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_THREADS);

        Self { max_threads }
    }
}

/// Runs connector operations on a bounded pool with a deadline
#[derive(Clone)]
pub struct BoundedInvoker {
    config: InvokerConfig,
    permits: Arc<Semaphore>,
}

impl BoundedInvoker {
    pub fn new(config: InvokerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_threads));
        Self { config, permits }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Permits not held by running operations
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `call` against `connector`, waiting at most `timeout`.
    ///
    /// The connector's loader is the current loader while `call` runs.
    pub async fn invoke<T, F>(
        &self,
        connector: Arc<dyn Connector>,
        operation: &str,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Connector) -> anyhow::Result<T> + Send + 'static,
    {
        let submitted = Instant::now();
        let permits = self.permits.clone();
        let name = operation.to_string();

        let run = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| ConnectorError::Failed(e.into()))?;

            let task_name = name.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let _loader = loader::enter(connector.context().loader().clone());

                let started = Instant::now();
                let outcome = call(connector.as_ref());
                debug!(
                    operation = %task_name,
                    service = connector.service_name(),
                    wait_ms = started.duration_since(submitted).as_millis() as u64,
                    execution_ms = started.elapsed().as_millis() as u64,
                    "Connector operation finished"
                );
                outcome
            });

            match handle.await {
                Ok(outcome) => outcome.map_err(|e| {
                    error!(operation = %name, "Connector operation failed: {:#}", e);
                    ConnectorError::from(e)
                }),
                Err(e) if e.is_panic() => {
                    error!(operation = %name, "Connector panicked");
                    Err(ConnectorError::Panicked(name))
                }
                Err(e) => Err(ConnectorError::Failed(e.into())),
            }
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "Connector operation timed out; it keeps running in the background"
                );
                Err(ConnectorError::Timeout {
                    operation: operation.to_string(),
                    timeout,
                })
            }
        }
    }
}

impl Default for BoundedInvoker {
    fn default() -> Self {
        Self::new(InvokerConfig::default())
    }
}
