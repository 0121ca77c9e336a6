//! Plugin engine host
//!
//! Owns the evaluation engine currently serving access checks and swaps it
//! whenever the refresher delivers a new policy snapshot.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init()──▶ Initializing ──refresher started──▶ Active
//!       ▲                        ▲                                │
//!       │                        └────────init()──── Stopped ◀────┘ cleanup()
//! ```
//!
//! # Publication
//!
//! The engine reference is an [`ArcSwapOption`]: access checks load it once
//! and never wait for a swap. A reader that loaded the previous engine keeps
//! its own `Arc` and finishes on it. Publication and `cleanup()` clearing the
//! reference are serialized through the lifecycle state lock, so a late
//! snapshot never resurrects a stopped host.

use arc_swap::{ArcSwap, ArcSwapOption};
use gatekeeper_core::{Properties, RateLimitedLogger, ServiceDef, ServicePolicies};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::admin::{AdminClient, AdminClientRegistry};
use crate::audit::{AccessChecker, AuditSynthesizer};
use crate::engine::{
    AccessRequest, AccessResult, AccessResultProcessor, EngineBuilder, EngineOptions,
    PolicyEngine, ResourceAccessInfo,
};
use crate::error::{AdminError, PluginError, Result};
use crate::refresher::{
    PolicyRefresher, PolicySink, PollingRefresherFactory, RefresherFactory, RefresherParams,
};
use crate::types::{AdminAction, AlterRequest, GrantRevokeRequest};

/// Default policy poll interval (30 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Active,
    Stopped,
}

impl LifecycleState {
    fn accepts_policies(&self) -> bool {
        matches!(self, LifecycleState::Initializing | LifecycleState::Active)
    }
}

/// Published engine plus the snapshot version it was built from
struct ActiveEngine {
    engine: Box<dyn PolicyEngine>,
    policy_version: Option<i64>,
}

struct RefresherHandle {
    refresher: Box<dyn PolicyRefresher>,
}

/// In-process authorization plugin runtime
pub struct PluginEngineHost {
    service_type: String,
    app_id: String,
    properties: Properties,
    engine_builder: Arc<dyn EngineBuilder>,
    admin_clients: AdminClientRegistry,
    refresher_factory: Arc<dyn RefresherFactory>,

    service_name: RwLock<Option<String>>,
    options: ArcSwap<EngineOptions>,
    result_processor: RwLock<Option<Arc<dyn AccessResultProcessor>>>,

    engine: ArcSwapOption<ActiveEngine>,
    refresher: ArcSwapOption<RefresherHandle>,

    state: RwLock<LifecycleState>,
    // Serializes init() and cleanup()
    lifecycle: tokio::sync::Mutex<()>,
}

impl PluginEngineHost {
    /// Create an uninitialized plugin for `service_type`, identified to the
    /// policy authority as `app_id`.
    pub fn new(
        service_type: impl Into<String>,
        app_id: impl Into<String>,
        properties: Properties,
        engine_builder: Arc<dyn EngineBuilder>,
        admin_clients: AdminClientRegistry,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            app_id: app_id.into(),
            properties,
            engine_builder,
            admin_clients,
            refresher_factory: Arc::new(PollingRefresherFactory),
            service_name: RwLock::new(None),
            options: ArcSwap::from_pointee(EngineOptions::default()),
            result_processor: RwLock::new(None),
            engine: ArcSwapOption::from(None),
            refresher: ArcSwapOption::from(None),
            state: RwLock::new(LifecycleState::Uninitialized),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Use a different refresher implementation
    pub fn with_refresher_factory(mut self, factory: Arc<dyn RefresherFactory>) -> Self {
        self.refresher_factory = factory;
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Service name read at `init`; `None` before init and after cleanup
    pub fn service_name(&self) -> Option<String> {
        self.service_name.read().clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Options handed to engines built from now on
    pub fn engine_options(&self) -> Arc<EngineOptions> {
        self.options.load_full()
    }

    /// Configuration key prefix, `ranger.plugin.<service_type>`
    pub fn property_prefix(&self) -> String {
        format!("ranger.plugin.{}", self.service_type)
    }

    /// Service definition of the current engine
    pub fn service_def(&self) -> Option<ServiceDef> {
        self.engine
            .load()
            .as_ref()
            .map(|active| active.engine.service_def().clone())
    }

    /// Id of the current service definition, or -1
    pub fn service_def_id(&self) -> i64 {
        self.service_def().and_then(|def| def.id).unwrap_or(-1)
    }

    /// Version of the policy snapshot the current engine was built from
    pub fn policy_version(&self) -> Option<i64> {
        self.engine.load().as_ref().and_then(|active| active.policy_version)
    }

    /// Whether an engine has been published
    pub fn has_engine(&self) -> bool {
        self.engine.load().is_some()
    }

    pub fn set_result_processor(&self, processor: Option<Arc<dyn AccessResultProcessor>>) {
        *self.result_processor.write() = processor;
    }

    pub fn result_processor(&self) -> Option<Arc<dyn AccessResultProcessor>> {
        self.result_processor.read().clone()
    }

    /// Start from a clean state, read configuration, and start the refresher.
    ///
    /// No engine is available until the refresher delivers the first snapshot.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        self.cleanup_locked().await;
        *self.state.write() = LifecycleState::Initializing;

        let prefix = self.property_prefix();
        let props = &self.properties;

        let poll_interval = props.get_duration_ms(
            &format!("{}.policy.pollIntervalMs", prefix),
            DEFAULT_POLL_INTERVAL,
        );
        let cache_dir = props
            .get_non_empty(&format!("{}.policy.cache.dir", prefix))
            .map(PathBuf::from);
        let service_name = props
            .get_non_empty(&format!("{}.service.name", prefix))
            .map(str::to_string);

        *self.service_name.write() = service_name.clone();

        let options = EngineOptions::from_properties(props, &prefix);
        debug!(service_type = %self.service_type, ?options, "Policy engine options");
        self.options.store(Arc::new(options));

        let admin = self.admin_clients.create_admin_client(
            props,
            service_name.as_deref(),
            &self.app_id,
            &prefix,
        );

        let weak_self: Weak<Self> = Arc::downgrade(self);
        let sink: Weak<dyn PolicySink> = weak_self;
        let params = RefresherParams {
            service_type: self.service_type.clone(),
            app_id: self.app_id.clone(),
            service_name: service_name.clone(),
            poll_interval,
            cache_dir,
        };

        let handle = Arc::new(RefresherHandle {
            refresher: self.refresher_factory.create(params, admin, sink),
        });
        self.refresher.store(Some(handle.clone()));

        if let Err(e) = handle.refresher.start().await {
            error!(service_type = %self.service_type, "Failed to start policy refresher: {}", e);
            self.cleanup_locked().await;
            return Err(e);
        }

        *self.state.write() = LifecycleState::Active;
        info!(
            service_type = %self.service_type,
            app_id = %self.app_id,
            service = ?service_name,
            "Plugin initialized"
        );

        Ok(())
    }

    /// Stop the refresher and release the engine. Idempotent.
    pub async fn cleanup(&self) {
        let _guard = self.lifecycle.lock().await;
        self.cleanup_locked().await;
    }

    async fn cleanup_locked(&self) {
        // Clear references first so new callers stop picking them up
        let (refresher, engine) = {
            let mut state = self.state.write();
            let refresher = self.refresher.swap(None);
            let engine = self.engine.swap(None);
            *self.service_name.write() = None;
            if *state != LifecycleState::Uninitialized {
                *state = LifecycleState::Stopped;
            }
            (refresher, engine)
        };

        if let Some(handle) = refresher {
            handle.refresher.stop().await;
        }

        if let Some(active) = engine {
            active.engine.cleanup();
            debug!(service_type = %self.service_type, "Policy engine released");
        }
    }

    /// Build an engine from `policies` and publish it
    pub fn set_policies(&self, policies: ServicePolicies) {
        let options = self.options.load_full();
        let version = policies.policy_version;

        let built = catch_unwind(AssertUnwindSafe(|| {
            self.engine_builder.build(&self.app_id, &policies, &options)
        }));

        let engine = match built {
            Ok(Ok(engine)) => engine,
            Ok(Err(e)) => {
                error!(
                    service_type = %self.service_type,
                    version = ?version,
                    "set_policies: policy engine initialization failed, leaving current policy engine as-is: {:#}",
                    e
                );
                return;
            }
            Err(_) => {
                error!(
                    service_type = %self.service_type,
                    version = ?version,
                    "set_policies: policy engine initialization panicked, leaving current policy engine as-is"
                );
                return;
            }
        };

        let fresh = Arc::new(ActiveEngine {
            engine,
            policy_version: version,
        });

        let previous = {
            let state = self.state.read();
            if !state.accepts_policies() {
                let current = *state;
                drop(state);
                warn!(service_type = %self.service_type, state = ?current, "Discarding policies delivered to a stopped plugin");
                fresh.engine.cleanup();
                return;
            }
            self.engine.swap(Some(fresh))
        };

        info!(service_type = %self.service_type, version = ?version, "Policy engine published");

        if let Some(previous) = previous {
            if !previous.engine.pre_cleanup() {
                error!(
                    service_type = %self.service_type,
                    "pre_cleanup() failed on the previous policy engine instance"
                );
            }
        }
    }

    /// Check a request using the configured result processor.
    ///
    /// `None` means no decision is available yet, which is neither allow nor deny.
    pub fn is_access_allowed(&self, request: AccessRequest) -> Option<AccessResult> {
        let processor = self.result_processor();
        self.is_access_allowed_with(request, processor.as_deref())
    }

    /// Check a request with an explicit result processor
    pub fn is_access_allowed_with(
        &self,
        mut request: AccessRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Option<AccessResult> {
        let active = self.engine.load_full()?;

        active.engine.pre_process(&mut request);
        Some(active.engine.is_access_allowed(request, processor))
    }

    /// Check a batch of requests using the configured result processor
    pub fn is_access_allowed_all(&self, requests: Vec<AccessRequest>) -> Option<Vec<AccessResult>> {
        let processor = self.result_processor();
        self.is_access_allowed_all_with(requests, processor.as_deref())
    }

    /// Check a batch of requests with an explicit result processor
    pub fn is_access_allowed_all_with(
        &self,
        mut requests: Vec<AccessRequest>,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Option<Vec<AccessResult>> {
        let active = self.engine.load_full()?;

        active.engine.pre_process_all(&mut requests);
        Some(active.engine.is_access_allowed_all(requests, processor))
    }

    pub fn resource_access_info(&self, mut request: AccessRequest) -> Option<ResourceAccessInfo> {
        let active = self.engine.load_full()?;

        active.engine.pre_process(&mut request);
        Some(active.engine.resource_access_info(&request))
    }

    pub fn create_access_result(&self, request: AccessRequest) -> Option<AccessResult> {
        let active = self.engine.load_full()?;
        Some(active.engine.create_access_result(request))
    }

    pub async fn grant_access(
        &self,
        request: &GrantRevokeRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Result<()> {
        debug!(grantor = %request.grantor, resources = ?request.resources, "grant_access");

        let outcome = self
            .admin_call(|admin| async move { admin.grant_access(request).await })
            .await;

        AuditSynthesizer::new(self).audit_grant_revoke(request, AdminAction::Grant, outcome.is_ok(), processor);
        outcome
    }

    pub async fn revoke_access(
        &self,
        request: &GrantRevokeRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Result<()> {
        debug!(grantor = %request.grantor, resources = ?request.resources, "revoke_access");

        let outcome = self
            .admin_call(|admin| async move { admin.revoke_access(request).await })
            .await;

        AuditSynthesizer::new(self).audit_grant_revoke(request, AdminAction::Revoke, outcome.is_ok(), processor);
        outcome
    }

    pub async fn remove_access(
        &self,
        request: &GrantRevokeRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Result<()> {
        debug!(grantor = %request.grantor, resources = ?request.resources, "remove_access");

        let outcome = self
            .admin_call(|admin| async move { admin.remove_access(request).await })
            .await;

        AuditSynthesizer::new(self).audit_grant_revoke(request, AdminAction::Remove, outcome.is_ok(), processor);
        outcome
    }

    pub async fn alter_access(
        &self,
        request: &AlterRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Result<()> {
        debug!(
            grantor = %request.grantor,
            old = ?request.old_resources,
            new = ?request.new_resources,
            "alter_access"
        );

        let outcome = self
            .admin_call(|admin| async move { admin.alter_access(request).await })
            .await;

        AuditSynthesizer::new(self).audit_alter(request, outcome.is_ok(), processor);
        outcome
    }

    /// Log an error at most once per 30 seconds per distinct message
    pub fn log_error_message(&self, message: &str) -> bool {
        RateLimitedLogger::global().log_if_due(message)
    }

    fn admin_client(&self) -> Option<Arc<dyn AdminClient>> {
        self.refresher
            .load()
            .as_ref()
            .and_then(|handle| handle.refresher.admin_client())
    }

    async fn admin_call<F, Fut>(&self, call: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn AdminClient>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), AdminError>>,
    {
        let admin = self
            .admin_client()
            .ok_or_else(|| PluginError::AdminClientUnavailable(self.service_type.clone()))?;

        call(admin).await.map_err(|e| {
            warn!(service_type = %self.service_type, "Admin call failed: {}", e);
            PluginError::from(e)
        })
    }
}

impl PolicySink for PluginEngineHost {
    fn set_policies(&self, policies: ServicePolicies) {
        PluginEngineHost::set_policies(self, policies);
    }
}

impl AccessChecker for PluginEngineHost {
    fn check_access(
        &self,
        request: AccessRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Option<AccessResult> {
        self.is_access_allowed_with(request, processor)
    }
}
