//! Connector resolution tests
//!
//! Cache behavior under concurrent misses, plugin directory scoping, and
//! retry after failed loads.

use gatekeeper_connectors::{
    loader, Connector, ConnectorContext, ConnectorError, ConnectorRegistry, ConnectorResolver,
    ResolverStats, ResourceLookupContext,
};
use gatekeeper_core::{Service, ServiceDef};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct EchoConnector {
    context: ConnectorContext,
}

impl Connector for EchoConnector {
    fn context(&self) -> &ConnectorContext {
        &self.context
    }

    fn lookup_resource(&self, context: &ResourceLookupContext) -> anyhow::Result<Vec<String>> {
        Ok(vec![format!("{}{}", context.user_input, self.service_name())])
    }

    fn validate_config(&self) -> anyhow::Result<HashMap<String, Value>> {
        Ok(HashMap::new())
    }
}

fn echo_factory(context: ConnectorContext) -> anyhow::Result<Arc<dyn Connector>> {
    // Instantiation runs with the class's loader installed
    let current = loader::current_loader().map(|l| l.name().to_string());
    anyhow::ensure!(
        current.as_deref() == Some(context.loader().name()),
        "loader not installed during instantiation"
    );
    Ok(Arc::new(EchoConnector { context }))
}

fn registry() -> Arc<ConnectorRegistry> {
    let registry = ConnectorRegistry::new();
    registry.register_ambient("TagConnector", Arc::new(echo_factory));
    registry.register_packaged("hive-connector-2.1", "HiveConnector", Arc::new(echo_factory));
    registry.register_packaged("hdfs-connector-2.1", "HdfsConnector", Arc::new(echo_factory));
    Arc::new(registry)
}

fn plugin_root(types: &[(&str, &str)]) -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    for (service_type, artifact) in types {
        let dir = root.path().join(service_type);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.jar", artifact)), b"").unwrap();
    }
    root
}

// ============================================================================
// RESOLUTION TESTS
// ============================================================================

#[test]
fn test_resolves_packaged_class_from_plugin_dir() {
    let root = plugin_root(&[("hive", "hive-connector-2.1")]);
    let resolver = ConnectorResolver::new(registry(), root.path());
    let def = ServiceDef::new("hive", "HiveConnector");

    let class = resolver.resolve(&def).unwrap();
    assert_eq!(class.service_type(), "hive");
    assert_eq!(class.class_name(), "HiveConnector");
    assert_eq!(class.loader().files().len(), 1);

    let connector = class
        .instantiate(&def, &Service::new("dev_hive", "hive"))
        .unwrap();
    assert_eq!(connector.service_name(), "dev_hive");
    assert_eq!(connector.service_type(), "hive");
    assert_eq!(
        connector.lookup_resource(&ResourceLookupContext::new("database", "db_")).unwrap(),
        vec!["db_dev_hive".to_string()]
    );
}

#[test]
fn test_artifact_of_another_service_type_is_not_visible() {
    // The hdfs artifact sits in the hive directory only
    let root = plugin_root(&[("hive", "hdfs-connector-2.1")]);
    let resolver = ConnectorResolver::new(registry(), root.path());

    let err = resolver
        .resolve(&ServiceDef::new("hdfs", "HdfsConnector"))
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::Resolution { ref service_type, ref class_name }
            if service_type == "hdfs" && class_name == "HdfsConnector"
    ));
}

#[test]
fn test_ambient_class_needs_no_plugin_dir() {
    let root = tempfile::tempdir().unwrap();
    let resolver = ConnectorResolver::new(registry(), root.path());

    let class = resolver.resolve(&ServiceDef::new("tag", "TagConnector")).unwrap();
    assert!(class.loader().files().is_empty());
}

#[test]
fn test_failed_resolution_is_not_cached() {
    let root = tempfile::tempdir().unwrap();
    let resolver = ConnectorResolver::new(registry(), root.path());
    let def = ServiceDef::new("hive", "HiveConnector");

    assert!(resolver.resolve(&def).is_err());
    assert!(resolver.cached("hive").is_none());

    // Deploy the artifact, then retry
    let dir = root.path().join("hive");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("hive-connector-2.1.jar"), b"").unwrap();

    let class = resolver.resolve(&def).unwrap();
    assert!(Arc::ptr_eq(&class, &resolver.cached("hive").unwrap()));
    assert_eq!(
        resolver.stats(),
        ResolverStats {
            hits: 0,
            misses: 2,
            loads: 1,
            failures: 1,
        }
    );
}

// ============================================================================
// CONCURRENCY TESTS
// ============================================================================

#[test]
fn test_concurrent_misses_load_once() {
    let root = plugin_root(&[("hive", "hive-connector-2.1")]);
    let resolver = Arc::new(ConnectorResolver::new(registry(), root.path()));
    let barrier = Arc::new(Barrier::new(50));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let resolver = resolver.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                resolver.resolve(&ServiceDef::new("hive", "HiveConnector")).unwrap()
            })
        })
        .collect();

    let classes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(classes.iter().all(|c| Arc::ptr_eq(c, &classes[0])));
    let stats = resolver.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.hits + stats.misses, 50);
    assert_eq!(resolver.len(), 1);
}

#[test]
fn test_service_types_are_cached_independently() {
    let root = plugin_root(&[("hive", "hive-connector-2.1"), ("hdfs", "hdfs-connector-2.1")]);
    let resolver = ConnectorResolver::new(registry(), root.path());

    let hive = resolver.resolve(&ServiceDef::new("hive", "HiveConnector")).unwrap();
    let hdfs = resolver.resolve(&ServiceDef::new("hdfs", "HdfsConnector")).unwrap();

    assert!(!Arc::ptr_eq(&hive, &hdfs));
    assert!(!Arc::ptr_eq(hive.loader(), hdfs.loader()));
    assert_eq!(resolver.len(), 2);
}
