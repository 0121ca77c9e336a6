//! Policy refresh
//!
//! A refresher owns the admin client and periodically pushes new policy
//! snapshots into a [`PolicySink`] (the engine host). The default
//! implementation polls the admin client on a tokio task and keeps a JSON
//! copy of the last snapshot so a restarted process can serve policies while
//! the authority is unreachable.

use async_trait::async_trait;
use gatekeeper_core::{RateLimitedLogger, ServicePolicies};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admin::AdminClient;
use crate::error::{PluginError, Result};

/// Receiver of policy snapshots
pub trait PolicySink: Send + Sync {
    fn set_policies(&self, policies: ServicePolicies);
}

/// Settings a refresher is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefresherParams {
    pub service_type: String,
    pub app_id: String,
    pub service_name: Option<String>,
    pub poll_interval: Duration,
    pub cache_dir: Option<PathBuf>,
}

impl RefresherParams {
    /// Cache file for the last downloaded snapshot, if caching is configured
    pub fn cache_file(&self) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let service_name = self.service_name.as_deref()?;
        let file_name = format!("{}_{}.json", self.app_id, service_name).replace(['/', '\\'], "_");

        Some(dir.join(file_name))
    }
}

/// Lifecycle handle of a policy refresher
#[async_trait]
pub trait PolicyRefresher: Send + Sync {
    /// Begin delivering snapshots. May deliver the first one before returning.
    async fn start(&self) -> Result<()>;

    /// Stop delivering snapshots. Idempotent.
    async fn stop(&self);

    /// Client used for administrative calls
    fn admin_client(&self) -> Option<Arc<dyn AdminClient>>;
}

/// Creates refreshers during plugin `init`
pub trait RefresherFactory: Send + Sync {
    fn create(
        &self,
        params: RefresherParams,
        admin: Arc<dyn AdminClient>,
        sink: Weak<dyn PolicySink>,
    ) -> Box<dyn PolicyRefresher>;
}

/// Factory for [`PollingRefresher`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingRefresherFactory;

impl RefresherFactory for PollingRefresherFactory {
    fn create(
        &self,
        params: RefresherParams,
        admin: Arc<dyn AdminClient>,
        sink: Weak<dyn PolicySink>,
    ) -> Box<dyn PolicyRefresher> {
        Box::new(PollingRefresher::new(params, admin, sink))
    }
}

/// State shared between the refresher handle and its polling task
struct RefresherState {
    params: RefresherParams,
    admin: Arc<dyn AdminClient>,
    sink: Weak<dyn PolicySink>,
    last_version: Mutex<Option<i64>>,
}

impl RefresherState {
    async fn load_policy(&self) {
        let last_known = *self.last_version.lock();

        match self.admin.service_policies_if_updated(last_known).await {
            Ok(Some(policies)) => {
                info!(
                    service = ?self.params.service_name,
                    from_version = ?last_known,
                    to_version = ?policies.policy_version,
                    "Policies updated"
                );
                self.save_to_cache(&policies).await;
                self.deliver(policies);
            }
            Ok(None) => {
                debug!(service = ?self.params.service_name, version = ?last_known, "Policies unchanged");
            }
            Err(e) => {
                RateLimitedLogger::global().log_if_due(&format!(
                    "PolicyRefresher(serviceName={}): failed to refresh policies. Will continue to use last known version of policies ({:?}): {}",
                    self.params.service_name.as_deref().unwrap_or("<unset>"),
                    last_known,
                    e
                ));

                if last_known.is_none() {
                    if let Some(policies) = self.load_from_cache().await {
                        self.deliver(policies);
                    }
                }
            }
        }
    }

    fn deliver(&self, policies: ServicePolicies) {
        match self.sink.upgrade() {
            Some(sink) => {
                *self.last_version.lock() = policies.policy_version;
                sink.set_policies(policies);
            }
            None => debug!("Policy sink dropped, discarding snapshot"),
        }
    }

    async fn load_from_cache(&self) -> Option<ServicePolicies> {
        let path = self.params.cache_file()?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), "No cached policies: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<ServicePolicies>(&content) {
            Ok(policies) => {
                info!(
                    path = %path.display(),
                    version = ?policies.policy_version,
                    "Loaded policies from cache"
                );
                Some(policies)
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to parse cached policies: {}", e);
                None
            }
        }
    }

    async fn save_to_cache(&self, policies: &ServicePolicies) {
        let Some(path) = self.params.cache_file() else {
            return;
        };

        let content = match serde_json::to_string_pretty(policies) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to serialize policies for cache: {}", e);
                return;
            }
        };

        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(dir = %dir.display(), "Failed to create policy cache dir: {}", e);
                return;
            }
        }

        if let Err(e) = tokio::fs::write(&path, content).await {
            warn!(path = %path.display(), "Failed to write policy cache: {}", e);
        }
    }
}

/// Refresher polling the admin client at a fixed interval
pub struct PollingRefresher {
    state: Arc<RefresherState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingRefresher {
    pub fn new(
        params: RefresherParams,
        admin: Arc<dyn AdminClient>,
        sink: Weak<dyn PolicySink>,
    ) -> Self {
        Self {
            state: Arc::new(RefresherState {
                params,
                admin,
                sink,
                last_version: Mutex::new(None),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Version of the last delivered snapshot
    pub fn last_known_version(&self) -> Option<i64> {
        *self.state.last_version.lock()
    }
}

#[async_trait]
impl PolicyRefresher for PollingRefresher {
    async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PluginError::Refresher(format!(
                "refresher for {} was stopped and cannot be restarted",
                self.state.params.service_type
            )));
        }
        if self.task.lock().is_some() {
            return Ok(());
        }

        self.state.load_policy().await;

        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let interval = state.params.poll_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => state.load_policy().await,
                }
            }
            debug!(service = ?state.params.service_name, "Policy refresher stopped");
        });

        info!(
            service_type = %self.state.params.service_type,
            service = ?self.state.params.service_name,
            interval_ms = interval.as_millis() as u64,
            "Policy refresher started"
        );

        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Policy refresher task ended abnormally: {}", e);
            }
        }
    }

    fn admin_client(&self) -> Option<Arc<dyn AdminClient>> {
        Some(self.state.admin.clone())
    }
}
