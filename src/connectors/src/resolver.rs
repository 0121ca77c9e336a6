//! Connector class resolution with a process-wide cache
//!
//! Each service type's connector class is loaded once, from a loader scoped
//! to `<plugin_root>/<service_type>/`, and reused for the life of the
//! resolver. Cache hits are lock-free; misses are double-checked under a
//! single mutex so concurrent misses for a type load it exactly once.
//! Failed loads are not cached and are retried on the next call.

use dashmap::DashMap;
use gatekeeper_core::{Properties, Service, ServiceDef};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connector::{Connector, ConnectorContext, ConnectorFactory};
use crate::error::{ConnectorError, Result};
use crate::loader::{self, ConnectorLoader, ConnectorRegistry};

/// Property naming the plugin root directory
pub const PLUGINS_DIR_PROPERTY: &str = "ranger.plugins.dir";

/// Default plugin root directory
pub const DEFAULT_PLUGINS_DIR: &str = "ranger-plugins";

/// A loaded connector class
pub struct ConnectorClass {
    service_type: String,
    class_name: String,
    factory: Arc<dyn ConnectorFactory>,
    loader: Arc<ConnectorLoader>,
}

impl ConnectorClass {
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn loader(&self) -> &Arc<ConnectorLoader> {
        &self.loader
    }

    /// Create a connector bound to `service`
    pub fn instantiate(&self, service_def: &ServiceDef, service: &Service) -> Result<Arc<dyn Connector>> {
        let context = ConnectorContext::new(service_def.clone(), service.clone(), self.loader.clone());

        let _loader = loader::enter(self.loader.clone());
        self.factory.create(context).map_err(|e| {
            warn!(
                service = %service,
                class = %self.class_name,
                "Failed to instantiate connector: {:#}",
                e
            );
            ConnectorError::from(e)
        })
    }
}

impl fmt::Debug for ConnectorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorClass")
            .field("service_type", &self.service_type)
            .field("class_name", &self.class_name)
            .field("loader", &self.loader)
            .finish()
    }
}

/// Resolver statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub failures: u64,
}

impl ResolverStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    failures: AtomicU64,
}

/// Resolves and caches connector classes per service type
pub struct ConnectorResolver {
    plugin_root: PathBuf,
    registry: Arc<ConnectorRegistry>,
    cache: DashMap<String, Arc<ConnectorClass>>,
    load_lock: Mutex<()>,
    stats: StatCounters,
}

impl ConnectorResolver {
    pub fn new(registry: Arc<ConnectorRegistry>, plugin_root: impl Into<PathBuf>) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            registry,
            cache: DashMap::new(),
            load_lock: Mutex::new(()),
            stats: StatCounters::default(),
        }
    }

    /// Resolver rooted at `ranger.plugins.dir` (default `ranger-plugins`)
    pub fn from_properties(registry: Arc<ConnectorRegistry>, props: &Properties) -> Self {
        let root = props
            .get_non_empty(PLUGINS_DIR_PROPERTY)
            .unwrap_or(DEFAULT_PLUGINS_DIR);
        Self::new(registry, root)
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    /// Connector class for `service_def`, loading it on first use
    pub fn resolve(&self, service_def: &ServiceDef) -> Result<Arc<ConnectorClass>> {
        let service_type = service_def.name.as_str();

        if let Some(class) = self.cache.get(service_type) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(service_type, class = %class.class_name, "Connector class found in cache");
            return Ok(class.value().clone());
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let _guard = self.load_lock.lock();

        if let Some(class) = self.cache.get(service_type) {
            return Ok(class.value().clone());
        }

        let class = Arc::new(self.load(service_def)?);
        self.cache.insert(service_type.to_string(), class.clone());

        info!(service_type, class = %class.class_name, "Connector class added to cache");
        Ok(class)
    }

    /// Cached class for `service_type`, without loading
    pub fn cached(&self, service_type: &str) -> Option<Arc<ConnectorClass>> {
        self.cache.get(service_type).map(|c| c.value().clone())
    }

    /// Number of cached classes
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            loads: self.stats.loads.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    fn load(&self, service_def: &ServiceDef) -> Result<ConnectorClass> {
        let service_type = &service_def.name;
        let class_name = &service_def.impl_class;
        debug!(service_type = %service_type, class = %class_name, "Connector class not found in cache");

        let dir = self.plugin_root.join(service_type);
        let loader = Arc::new(ConnectorLoader::for_plugin_dir(
            service_type.clone(),
            &dir,
            self.registry.clone(),
        ));

        match loader.load_class(class_name) {
            Some(factory) => {
                self.stats.loads.fetch_add(1, Ordering::Relaxed);
                Ok(ConnectorClass {
                    service_type: service_type.clone(),
                    class_name: class_name.clone(),
                    factory,
                    loader,
                })
            }
            None => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    service_type = %service_type,
                    class = %class_name,
                    dir = %dir.display(),
                    "Failed to find connector class. Resource lookup will not be available"
                );
                Err(ConnectorError::Resolution {
                    service_type: service_type.clone(),
                    class_name: class_name.clone(),
                })
            }
        }
    }
}
