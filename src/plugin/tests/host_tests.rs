//! Plugin engine host tests
//!
//! Lifecycle, engine hot-swap and audited administrative actions, driven
//! through a rule-table engine and a scripted admin client.

use async_trait::async_trait;
use gatekeeper_core::{Properties, ServiceDef, ServicePolicies};
use gatekeeper_plugin::{
    types::NO_POLICY_ID, AccessRequest, AccessResource, AccessResult, AccessResultProcessor,
    AdminClient, AdminClientFactory, AdminClientRegistry, AdminError, AlterRequest,
    BufferedAuditSink, EngineBuilder, EngineOptions, GrantRevokeRequest, LifecycleState,
    PluginEngineHost, PluginError, PolicyEngine, ResourceAccessInfo,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// ============================================================================
// TEST FIXTURES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Rule {
    id: i64,
    resource: String,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    audit: bool,
}

#[derive(Default)]
struct EngineCounters {
    built: AtomicUsize,
    pre_cleanups: AtomicUsize,
    cleanups: AtomicUsize,
    // Failure switches
    panic_on_admin_check: Mutex<Option<String>>,
    refuse_pre_cleanup: AtomicBool,
    panic_on_build: AtomicBool,
}

/// Allows listed users on exact `key=value` resources. `_admin` checks are
/// always allowed so only the audit flag varies.
struct RuleEngine {
    service_def: ServiceDef,
    service_name: String,
    rules: Vec<Rule>,
    counters: Arc<EngineCounters>,
}

impl PolicyEngine for RuleEngine {
    fn service_def(&self) -> &ServiceDef {
        &self.service_def
    }

    fn pre_process(&self, request: &mut AccessRequest) {
        request.context.insert("enriched".into(), json!(true));
    }

    fn is_access_allowed(
        &self,
        request: AccessRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> AccessResult {
        let resource = request.resource.as_string();
        if request.access_type == "_admin"
            && self.counters.panic_on_admin_check.lock().as_deref() == Some(resource.as_str())
        {
            panic!("engine failure evaluating {}", resource);
        }
        let rule = self.rules.iter().find(|r| r.resource == resource).cloned();
        let result = match rule {
            Some(rule) => {
                let allowed = request.access_type == "_admin" || rule.users.contains(&request.user);
                AccessResult::new(&self.service_name, request)
                    .decided(allowed, rule.id)
                    .audited(rule.audit)
            }
            None => AccessResult::new(&self.service_name, request).decided(false, NO_POLICY_ID),
        };

        if let Some(processor) = processor {
            processor.process_result(&result);
        }
        result
    }

    fn resource_access_info(&self, request: &AccessRequest) -> ResourceAccessInfo {
        let resource = request.resource.as_string();
        let mut info = ResourceAccessInfo::default();
        for rule in self.rules.iter().filter(|r| r.resource == resource) {
            info.allowed_users.extend(rule.users.iter().cloned());
        }
        info
    }

    fn create_access_result(&self, request: AccessRequest) -> AccessResult {
        AccessResult::new(&self.service_name, request)
    }

    fn pre_cleanup(&self) -> bool {
        self.counters.pre_cleanups.fetch_add(1, Ordering::SeqCst);
        !self.counters.refuse_pre_cleanup.load(Ordering::SeqCst)
    }

    fn cleanup(&self) {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RuleEngineBuilder {
    counters: Arc<EngineCounters>,
}

impl EngineBuilder for RuleEngineBuilder {
    fn build(
        &self,
        _app_id: &str,
        policies: &ServicePolicies,
        _options: &EngineOptions,
    ) -> anyhow::Result<Box<dyn PolicyEngine>> {
        if self.counters.panic_on_build.load(Ordering::SeqCst) {
            panic!("builder failure at version {:?}", policies.policy_version);
        }
        let rules = policies
            .policies
            .iter()
            .map(|p| serde_json::from_value::<Rule>(p.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        self.counters.built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RuleEngine {
            service_def: policies
                .service_def
                .clone()
                .unwrap_or_else(|| ServiceDef::new("hive", "HiveConnector")),
            service_name: policies.service_name.clone(),
            rules,
            counters: self.counters.clone(),
        }))
    }
}

/// Serves one snapshot and fails mutations on demand
struct ScriptedAdmin {
    snapshot: Option<ServicePolicies>,
    served: AtomicBool,
    fail_mutations: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedAdmin {
    fn new(snapshot: Option<ServicePolicies>) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            served: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn mutation(&self, name: &'static str) -> Result<(), AdminError> {
        self.calls.lock().push(name);
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(AdminError::Remote {
                status: 400,
                message: "policy not found".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AdminClient for ScriptedAdmin {
    async fn grant_access(&self, _: &GrantRevokeRequest) -> Result<(), AdminError> {
        self.mutation("grant")
    }

    async fn revoke_access(&self, _: &GrantRevokeRequest) -> Result<(), AdminError> {
        self.mutation("revoke")
    }

    async fn alter_access(&self, _: &AlterRequest) -> Result<(), AdminError> {
        self.mutation("alter")
    }

    async fn remove_access(&self, _: &GrantRevokeRequest) -> Result<(), AdminError> {
        self.mutation("remove")
    }

    async fn service_policies_if_updated(
        &self,
        _: Option<i64>,
    ) -> Result<Option<ServicePolicies>, AdminError> {
        if self.served.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.snapshot.clone())
    }
}

struct SharedAdminFactory(Arc<ScriptedAdmin>);

impl AdminClientFactory for SharedAdminFactory {
    fn create(&self, _: Option<&str>, _: &str, _: &str) -> Arc<dyn AdminClient> {
        self.0.clone()
    }
}

fn snapshot(version: i64) -> ServicePolicies {
    ServicePolicies::new("dev_hive")
        .with_version(version)
        .with_service_def(ServiceDef::new("hive", "HiveConnector").with_id(3))
        .with_policy(json!({"id": 10, "resource": "database=db1", "users": ["alice"], "audit": true}))
        .with_policy(json!({"id": 20, "resource": "database=db2", "users": ["bob"], "audit": false}))
}

fn properties() -> Properties {
    Properties::new()
        .with("ranger.plugin.hive.service.name", "dev_hive")
        // Only the initial load in init() happens during a test
        .with("ranger.plugin.hive.policy.pollIntervalMs", "3600000")
}

struct Fixture {
    host: Arc<PluginEngineHost>,
    admin: Arc<ScriptedAdmin>,
    counters: Arc<EngineCounters>,
}

fn fixture(initial: Option<ServicePolicies>) -> Fixture {
    let admin = ScriptedAdmin::new(initial);
    let builder = RuleEngineBuilder::default();
    let counters = builder.counters.clone();
    let registry = AdminClientRegistry::new(Arc::new(SharedAdminFactory(admin.clone())));

    let host = Arc::new(PluginEngineHost::new(
        "hive",
        "hiveServer2",
        properties(),
        Arc::new(builder),
        registry,
    ));

    Fixture { host, admin, counters }
}

fn select(value: &str, user: &str) -> AccessRequest {
    AccessRequest::new(AccessResource::single("database", value), user, "select")
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

#[tokio::test]
async fn test_no_decision_before_init() {
    let f = fixture(Some(snapshot(1)));

    assert_eq!(f.host.state(), LifecycleState::Uninitialized);
    assert!(f.host.is_access_allowed(select("db1", "alice")).is_none());
    assert!(f.host.is_access_allowed_all(vec![select("db1", "alice")]).is_none());
    assert!(f.host.resource_access_info(select("db1", "alice")).is_none());
    assert!(f.host.create_access_result(select("db1", "alice")).is_none());
    assert_eq!(f.host.service_def_id(), -1);
}

#[tokio::test]
async fn test_init_publishes_first_snapshot() {
    gatekeeper_core::telemetry::init_tracing();
    let f = fixture(Some(snapshot(1)));

    f.host.init().await.unwrap();

    assert_eq!(f.host.state(), LifecycleState::Active);
    assert_eq!(f.host.service_name().as_deref(), Some("dev_hive"));
    assert_eq!(f.host.policy_version(), Some(1));
    assert_eq!(f.host.service_def_id(), 3);

    let allowed = f.host.is_access_allowed(select("db1", "alice")).unwrap();
    assert!(allowed.is_allowed);
    assert_eq!(allowed.policy_id, 10);
    assert_eq!(allowed.request.context.get("enriched"), Some(&json!(true)));

    let denied = f.host.is_access_allowed(select("db1", "bob")).unwrap();
    assert!(!denied.is_allowed);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_init_without_policies_has_no_engine() {
    let f = fixture(None);

    f.host.init().await.unwrap();

    assert_eq!(f.host.state(), LifecycleState::Active);
    assert!(!f.host.has_engine());
    assert!(f.host.is_access_allowed(select("db1", "alice")).is_none());

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_engine_options_read_at_init() {
    let admin = ScriptedAdmin::new(None);
    let props = properties().with("ranger.plugin.hive.policyengine.option.disable.custom.conditions", "true");
    let host = Arc::new(PluginEngineHost::new(
        "hive",
        "hiveServer2",
        props,
        Arc::new(RuleEngineBuilder::default()),
        AdminClientRegistry::new(Arc::new(SharedAdminFactory(admin))),
    ));

    host.init().await.unwrap();
    assert!(host.engine_options().disable_custom_conditions);
    assert_eq!(host.property_prefix(), "ranger.plugin.hive");

    host.cleanup().await;
}

#[tokio::test]
async fn test_cleanup_releases_engine_and_discards_late_snapshots() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    f.host.cleanup().await;

    assert_eq!(f.host.state(), LifecycleState::Stopped);
    assert!(f.host.service_name().is_none());
    assert!(f.host.is_access_allowed(select("db1", "alice")).is_none());
    assert_eq!(f.counters.cleanups.load(Ordering::SeqCst), 1);

    // A snapshot arriving after cleanup is built, then dropped
    f.host.set_policies(snapshot(2));
    assert!(!f.host.has_engine());
    assert_eq!(f.counters.cleanups.load(Ordering::SeqCst), 2);

    // Idempotent
    f.host.cleanup().await;
    assert_eq!(f.host.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_reinit_after_cleanup() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();
    f.host.cleanup().await;

    f.host.init().await.unwrap();
    assert_eq!(f.host.state(), LifecycleState::Active);

    // The scripted admin serves its snapshot only once
    assert!(!f.host.has_engine());
    f.host.set_policies(snapshot(5));
    assert_eq!(f.host.policy_version(), Some(5));

    f.host.cleanup().await;
}

// ============================================================================
// HOT-SWAP TESTS
// ============================================================================

#[tokio::test]
async fn test_swap_retires_previous_engine() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    f.host.set_policies(snapshot(2));
    f.host.set_policies(snapshot(3));

    assert_eq!(f.host.policy_version(), Some(3));
    assert_eq!(f.counters.built.load(Ordering::SeqCst), 3);
    assert_eq!(f.counters.pre_cleanups.load(Ordering::SeqCst), 2);
    assert_eq!(f.counters.cleanups.load(Ordering::SeqCst), 0);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_failed_build_keeps_current_engine() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    let broken = ServicePolicies::new("dev_hive")
        .with_version(2)
        .with_policy(json!({"resource": "database=db1"}));
    f.host.set_policies(broken);

    assert_eq!(f.host.policy_version(), Some(1));
    assert!(f.host.is_access_allowed(select("db1", "alice")).unwrap().is_allowed);
    assert_eq!(f.counters.pre_cleanups.load(Ordering::SeqCst), 0);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_panicking_build_keeps_current_engine() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    f.counters.panic_on_build.store(true, Ordering::SeqCst);
    f.host.set_policies(snapshot(2));

    assert_eq!(f.host.policy_version(), Some(1));
    assert!(f.host.is_access_allowed(select("db1", "alice")).unwrap().is_allowed);
    assert_eq!(f.counters.pre_cleanups.load(Ordering::SeqCst), 0);

    f.counters.panic_on_build.store(false, Ordering::SeqCst);
    f.host.set_policies(snapshot(3));
    assert_eq!(f.host.policy_version(), Some(3));

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_failed_pre_cleanup_keeps_new_engine_published() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    f.counters.refuse_pre_cleanup.store(true, Ordering::SeqCst);
    f.host.set_policies(snapshot(2));

    assert_eq!(f.counters.pre_cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(f.host.policy_version(), Some(2));
    assert!(f.host.is_access_allowed(select("db1", "alice")).unwrap().is_allowed);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_checks_during_swaps() {
    gatekeeper_core::telemetry::init_tracing();
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..8)
        .map(|_| {
            let host = f.host.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut checks = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let result = host
                        .is_access_allowed(select("db1", "alice"))
                        .expect("engine stays published during swaps");
                    assert!(result.is_allowed);
                    checks += 1;
                }
                checks
            })
        })
        .collect();

    for version in 2..=50 {
        f.host.set_policies(snapshot(version));
    }
    stop.store(true, Ordering::Relaxed);

    let total: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();
    assert!(total > 0);
    assert_eq!(f.host.policy_version(), Some(50));
    assert_eq!(f.counters.pre_cleanups.load(Ordering::SeqCst), 49);

    f.host.cleanup().await;
}

// ============================================================================
// RESULT PROCESSOR TESTS
// ============================================================================

#[tokio::test]
async fn test_configured_result_processor_receives_results() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();
    let sink = Arc::new(BufferedAuditSink::new());
    f.host.set_result_processor(Some(sink.clone()));

    f.host.is_access_allowed(select("db1", "alice"));
    f.host.is_access_allowed(select("db2", "bob"));
    f.host
        .is_access_allowed_all(vec![select("db1", "carol"), select("db1", "alice")])
        .unwrap();

    // db2 is not audit-enabled
    assert_eq!(sink.len(), 3);
    assert_eq!(sink.stats().denied_events, 1);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_resource_access_info() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    let info = f.host.resource_access_info(select("db2", "anyone")).unwrap();
    assert!(info.allowed_users.contains("bob"));

    f.host.cleanup().await;
}

// ============================================================================
// ADMINISTRATIVE ACTION TESTS
// ============================================================================

#[tokio::test]
async fn test_grant_audits_only_audit_enabled_resources() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();
    let sink = BufferedAuditSink::new();

    let request = GrantRevokeRequest::new("admin")
        .with_resource("database", ["db1", "db2"])
        .with_user("carol")
        .with_access_type("select");

    f.host.grant_access(&request, Some(&sink)).await.unwrap();

    assert_eq!(*f.admin.calls.lock(), vec!["grant"]);
    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resource, "database=db1");
    assert_eq!(entries[0].access_type, "grant");
    assert_eq!(entries[0].action.as_deref(), Some("grant"));
    assert_eq!(entries[0].user, "admin");
    assert!(entries[0].allowed);
    assert_eq!(entries[0].policy_id, 10);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_failed_remove_is_audited_and_reraised() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();
    f.admin.fail_mutations.store(true, Ordering::SeqCst);
    let sink = BufferedAuditSink::new();

    let request = GrantRevokeRequest::new("admin").with_resource("database", ["db1"]);
    let err = f.host.remove_access(&request, Some(&sink)).await.unwrap_err();

    assert!(matches!(err, PluginError::Admin(AdminError::Remote { status: 400, .. })));
    assert!(!err.is_retryable());

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].allowed);
    assert_eq!(entries[0].policy_id, NO_POLICY_ID);
    assert_eq!(entries[0].access_type, "remove");

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_engine_panic_during_audit_keeps_admin_error() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();
    f.admin.fail_mutations.store(true, Ordering::SeqCst);
    *f.counters.panic_on_admin_check.lock() = Some("database=db2".into());
    let sink = BufferedAuditSink::new();

    // db2 is evaluated first and panics, db1 must still be audited
    let request = GrantRevokeRequest::new("admin").with_resource("database", ["db2", "db1"]);
    let err = f.host.grant_access(&request, Some(&sink)).await.unwrap_err();

    assert!(matches!(err, PluginError::Admin(AdminError::Remote { status: 400, .. })));

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resource, "database=db1");
    assert!(!entries[0].allowed);
    assert_eq!(entries[0].policy_id, NO_POLICY_ID);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_revoke_without_processor_still_calls_admin() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();

    let request = GrantRevokeRequest::new("admin").with_resource("database", ["db1"]);
    f.host.revoke_access(&request, None).await.unwrap();

    assert_eq!(*f.admin.calls.lock(), vec!["revoke"]);

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_alter_audits_old_then_new_values() {
    let f = fixture(Some(snapshot(1)));
    f.host.init().await.unwrap();
    let sink = BufferedAuditSink::new();

    let request = AlterRequest::new("admin")
        .with_old_resource("database", ["db1"])
        .with_new_resource("database", ["db1", "db2"]);

    f.host.alter_access(&request, Some(&sink)).await.unwrap();

    // db1 appears in both lists; db2 is not audit-enabled
    let entries = sink.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.resource == "database=db1" && e.access_type == "alter"));

    f.host.cleanup().await;
}

#[tokio::test]
async fn test_admin_call_before_init_fails_fast() {
    let f = fixture(Some(snapshot(1)));
    let sink = BufferedAuditSink::new();

    let request = GrantRevokeRequest::new("admin").with_resource("database", ["db1"]);
    let err = f.host.grant_access(&request, Some(&sink)).await.unwrap_err();

    assert!(matches!(err, PluginError::AdminClientUnavailable(ref t) if t == "hive"));
    assert!(f.admin.calls.lock().is_empty());
    // No engine, so no decision to learn the audit flag from
    assert!(sink.is_empty());
}
