//! Service definitions and service instances

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Name of the embedded tag service definition
pub const EMBEDDED_TAG_SERVICE_DEF: &str = "tag";

/// Definition of a service type (e.g. "hdfs", "hive")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDef {
    /// Numeric definition id, assigned by the policy authority
    #[serde(default)]
    pub id: Option<i64>,

    /// Service type name
    pub name: String,

    /// Connector implementation name for this service type
    #[serde(default)]
    pub impl_class: String,

    /// Display label
    #[serde(default)]
    pub label: Option<String>,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Definition-level options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ServiceDef {
    /// Create a new service definition
    pub fn new(name: impl Into<String>, impl_class: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            impl_class: impl_class.into(),
            label: None,
            description: None,
            options: HashMap::new(),
        }
    }

    /// Set the definition id
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Whether this is the embedded tag service definition
    pub fn is_tag_service(&self) -> bool {
        self.name == EMBEDDED_TAG_SERVICE_DEF
    }
}

/// A configured service instance of some service type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Numeric service id
    #[serde(default)]
    pub id: Option<i64>,

    /// Service name (unique per policy authority)
    pub name: String,

    /// Service type, matching a [`ServiceDef::name`]
    #[serde(rename = "type")]
    pub service_type: String,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Whether the service is enabled
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,

    /// Instance configuration (connection settings, timeouts, ...)
    #[serde(default)]
    pub configs: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl Service {
    /// Create a new service instance
    pub fn new(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            service_type: service_type.into(),
            description: None,
            is_enabled: true,
            configs: HashMap::new(),
        }
    }

    /// Add a configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.service_type)
    }
}
