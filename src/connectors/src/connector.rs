//! Connector capability
//!
//! A connector talks to one configured service instance (a Hive server, an
//! HDFS namenode...) on behalf of the admin UI: it lists resource names for
//! auto-completion and checks that a service configuration can connect.
//! Calls are blocking and may hang; callers go through the
//! [`BoundedInvoker`](crate::invoker::BoundedInvoker).

use gatekeeper_core::{Service, ServiceDef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::loader::ConnectorLoader;

/// Service-specific state every connector is created with
#[derive(Clone)]
pub struct ConnectorContext {
    service_def: ServiceDef,
    service: Service,
    loader: Arc<ConnectorLoader>,
}

impl ConnectorContext {
    pub fn new(service_def: ServiceDef, service: Service, loader: Arc<ConnectorLoader>) -> Self {
        Self {
            service_def,
            service,
            loader,
        }
    }

    pub fn service_def(&self) -> &ServiceDef {
        &self.service_def
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Loader the connector class came from
    pub fn loader(&self) -> &Arc<ConnectorLoader> {
        &self.loader
    }
}

impl fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("service_def", &self.service_def.name)
            .field("service", &self.service.name)
            .field("loader", &self.loader.name())
            .finish()
    }
}

/// Input of a resource name lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLookupContext {
    /// Prefix typed by the user
    #[serde(default)]
    pub user_input: String,

    /// Resource key being completed (e.g. "table")
    #[serde(default)]
    pub resource_name: String,

    /// Already selected values of the parent resources
    #[serde(default)]
    pub resources: HashMap<String, Vec<String>>,
}

impl ResourceLookupContext {
    pub fn new(resource_name: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            resource_name: resource_name.into(),
            resources: HashMap::new(),
        }
    }

    pub fn with_resource<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }
}

impl fmt::Display for ResourceLookupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource={} userInput={} resources={:?}",
            self.resource_name, self.user_input, self.resources
        )
    }
}

/// Service-specific connector
pub trait Connector: Send + Sync {
    fn context(&self) -> &ConnectorContext;

    /// Resource names matching the lookup context
    fn lookup_resource(&self, context: &ResourceLookupContext) -> anyhow::Result<Vec<String>>;

    /// Try to connect with the configured settings. The returned map is the
    /// response data (`connectivityStatus`, `message`, ...).
    ///
    /// Failures carrying response data should be reported as
    /// [`BackendError`](crate::error::BackendError).
    fn validate_config(&self) -> anyhow::Result<HashMap<String, Value>>;

    fn service_name(&self) -> &str {
        &self.context().service().name
    }

    fn service_type(&self) -> &str {
        &self.context().service().service_type
    }

    fn service_def(&self) -> &ServiceDef {
        self.context().service_def()
    }

    fn configs(&self) -> &HashMap<String, String> {
        &self.context().service().configs
    }
}

/// Creates connector instances; registered under a class name
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, context: ConnectorContext) -> anyhow::Result<Arc<dyn Connector>>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(ConnectorContext) -> anyhow::Result<Arc<dyn Connector>> + Send + Sync,
{
    fn create(&self, context: ConnectorContext) -> anyhow::Result<Arc<dyn Connector>> {
        self(context)
    }
}
