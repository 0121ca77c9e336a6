//! Connector class loading
//!
//! Connector implementations are registered by class name in a
//! [`ConnectorRegistry`], either as ambient (linked into the process and
//! visible to every loader) or as packaged in a named artifact. A
//! [`ConnectorLoader`] is scoped to the artifacts found in one service type's
//! plugin directory: it sees ambient classes first, then classes whose
//! artifact file is present in that directory.
//!
//! While a connector operation runs, its loader is installed as the thread's
//! current loader (see [`enter`]) so the connector can load further classes
//! from its own artifacts.

use dashmap::DashMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connector::ConnectorFactory;

struct PackagedClass {
    artifact: String,
    factory: Arc<dyn ConnectorFactory>,
}

/// Connector classes known to the process
#[derive(Default)]
pub struct ConnectorRegistry {
    ambient: DashMap<String, Arc<dyn ConnectorFactory>>,
    packaged: DashMap<String, PackagedClass>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class visible to every loader
    pub fn register_ambient(&self, class_name: impl Into<String>, factory: Arc<dyn ConnectorFactory>) {
        let class_name = class_name.into();
        debug!(class = %class_name, "Registered ambient connector class");
        self.ambient.insert(class_name, factory);
    }

    /// Register a class shipped in `artifact`. Only loaders whose plugin
    /// directory contains a file with that stem can load it.
    pub fn register_packaged(
        &self,
        artifact: impl Into<String>,
        class_name: impl Into<String>,
        factory: Arc<dyn ConnectorFactory>,
    ) {
        let artifact = artifact.into();
        let class_name = class_name.into();
        debug!(class = %class_name, artifact = %artifact, "Registered packaged connector class");
        self.packaged.insert(class_name, PackagedClass { artifact, factory });
    }

    pub fn len(&self) -> usize {
        self.ambient.len() + self.packaged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Loader scoped to the artifacts of one plugin directory
pub struct ConnectorLoader {
    name: String,
    files: Vec<PathBuf>,
    artifacts: BTreeSet<String>,
    registry: Arc<ConnectorRegistry>,
}

impl ConnectorLoader {
    /// Loader that only sees ambient classes
    pub fn ambient(registry: Arc<ConnectorRegistry>) -> Self {
        Self::with_files("ambient", Vec::new(), registry)
    }

    /// Loader over the given artifact files
    pub fn with_files(name: impl Into<String>, files: Vec<PathBuf>, registry: Arc<ConnectorRegistry>) -> Self {
        let artifacts = files
            .iter()
            .filter_map(|f| f.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .collect();

        Self {
            name: name.into(),
            files,
            artifacts,
            registry,
        }
    }

    /// Loader over every file in `dir`. A missing directory yields a loader
    /// with no artifacts.
    pub fn for_plugin_dir(name: impl Into<String>, dir: &Path, registry: Arc<ConnectorRegistry>) -> Self {
        Self::with_files(name, plugin_files(dir), registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifact files this loader was built from
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Find the factory registered for `class_name`
    pub fn load_class(&self, class_name: &str) -> Option<Arc<dyn ConnectorFactory>> {
        if let Some(factory) = self.registry.ambient.get(class_name) {
            return Some(factory.value().clone());
        }

        let packaged = self.registry.packaged.get(class_name)?;
        if self.artifacts.contains(&packaged.artifact) {
            Some(packaged.factory.clone())
        } else {
            debug!(
                loader = %self.name,
                class = class_name,
                artifact = %packaged.artifact,
                "Connector class artifact not in plugin directory"
            );
            None
        }
    }
}

impl fmt::Debug for ConnectorLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorLoader")
            .field("name", &self.name)
            .field("artifacts", &self.artifacts)
            .finish()
    }
}

fn plugin_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "Could not read plugin directory: {}", e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(dir = %dir.display(), "Failed to read plugin directory entry: {}", e);
                None
            }
        })
        .collect();
    files.sort();

    debug!(dir = %dir.display(), count = files.len(), "Plugin files");
    files
}

thread_local! {
    static CURRENT_LOADER: RefCell<Option<Arc<ConnectorLoader>>> = const { RefCell::new(None) };
}

/// Loader installed on the calling thread, if any
pub fn current_loader() -> Option<Arc<ConnectorLoader>> {
    CURRENT_LOADER.with(|current| current.borrow().clone())
}

/// Install `loader` as the current loader until the guard is dropped
pub fn enter(loader: Arc<ConnectorLoader>) -> LoaderGuard {
    let previous = CURRENT_LOADER.with(|current| current.borrow_mut().replace(loader));
    LoaderGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the previous current loader on drop, including during unwinding
#[must_use = "the loader is uninstalled when the guard is dropped"]
pub struct LoaderGuard {
    previous: Option<Arc<ConnectorLoader>>,
    // Must be dropped on the thread it was created on
    _not_send: PhantomData<*const ()>,
}

impl Drop for LoaderGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_LOADER.with(|current| *current.borrow_mut() = previous);
    }
}
