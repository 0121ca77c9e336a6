//! Service manager: connector-backed resource lookup and config validation

use async_trait::async_trait;
use gatekeeper_core::{Properties, Service, ServiceDef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::connector::{Connector, ResourceLookupContext};
use crate::error::{ConnectorError, Result};
use crate::invoker::{BoundedInvoker, InvokerConfig};
use crate::resolver::ConnectorResolver;
use crate::timeout::{OperationKind, TimeoutPolicy};

/// Source of service instances and service definitions
#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn service_by_name(&self, name: &str) -> anyhow::Result<Option<Service>>;

    async fn service_def_by_name(&self, name: &str) -> anyhow::Result<Option<ServiceDef>>;
}

/// Outcome of a connection test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMessage {
    pub field_name: Option<String>,
    pub message: String,
    pub object_id: Option<i64>,
}

/// Response of `validate_config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub status: ValidationStatus,
    pub description: String,
    pub messages: Vec<ValidationMessage>,
}

impl ValidationResponse {
    /// Build a response from connector response data.
    ///
    /// `message` is used for both the message and the description unless
    /// the data carries its own. The status is success only when
    /// `connectivityStatus` is `true`.
    pub fn from_response_data(data: &HashMap<String, Value>, message: &str) -> Self {
        let text = |key: &str| data.get(key).and_then(value_text);

        let object_id = text("objectId").and_then(|v| v.parse().ok());
        let connected = text("connectivityStatus")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            status: if connected {
                ValidationStatus::Success
            } else {
                ValidationStatus::Error
            },
            description: text("description").unwrap_or_else(|| message.to_string()),
            messages: vec![ValidationMessage {
                field_name: text("fieldName"),
                message: text("message").unwrap_or_else(|| message.to_string()),
                object_id,
            }],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ValidationStatus::Success
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Resolves connectors for configured services and runs their operations
pub struct ServiceManager {
    store: Arc<dyn ServiceStore>,
    resolver: Arc<ConnectorResolver>,
    invoker: BoundedInvoker,
    timeouts: TimeoutPolicy,
}

impl ServiceManager {
    /// Manager configured from process properties (executor size, timeouts)
    pub fn new(store: Arc<dyn ServiceStore>, resolver: Arc<ConnectorResolver>, properties: Properties) -> Self {
        Self {
            store,
            resolver,
            invoker: BoundedInvoker::new(InvokerConfig::from_properties(&properties)),
            timeouts: TimeoutPolicy::new(properties),
        }
    }

    pub fn resolver(&self) -> &Arc<ConnectorResolver> {
        &self.resolver
    }

    pub fn invoker(&self) -> &BoundedInvoker {
        &self.invoker
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Connector for the service named `service_name`
    pub async fn connector_by_name(&self, service_name: &str) -> Result<Arc<dyn Connector>> {
        debug!(service = service_name, "connector_by_name");

        let service = self
            .store
            .service_by_name(service_name)
            .await
            .map_err(ConnectorError::Failed)?
            .ok_or_else(|| {
                warn!(service = service_name, "Could not find the service");
                ConnectorError::ServiceNotFound(service_name.to_string())
            })?;

        self.connector_by_service(&service).await
    }

    /// Connector bound to `service`
    pub async fn connector_by_service(&self, service: &Service) -> Result<Arc<dyn Connector>> {
        let service_type = service.service_type.as_str();
        if service_type.is_empty() {
            warn!(service = %service, "Could not find the service-type");
            return Err(ConnectorError::ServiceTypeNotFound(String::new()));
        }

        let service_def = self
            .store
            .service_def_by_name(service_type)
            .await
            .map_err(ConnectorError::Failed)?
            .ok_or_else(|| {
                warn!(service = %service, service_type, "Could not find the service-type");
                ConnectorError::ServiceTypeNotFound(service_type.to_string())
            })?;

        let class = self.resolver.resolve(&service_def)?;
        class.instantiate(&service_def, service)
    }

    /// Resource names for auto-completion.
    ///
    /// The embedded tag service is queried inline; every other service type
    /// goes through the bounded invoker with the `resource.lookup` timeout.
    pub async fn lookup_resource(&self, service_name: &str, context: ResourceLookupContext) -> Result<Vec<String>> {
        let connector = self.connector_by_name(service_name).await?;
        debug!(service = service_name, context = %context, "lookup_resource");

        let resources = if connector.service_def().is_tag_service() {
            connector.lookup_resource(&context)?
        } else {
            let timeout = self.timeouts.resolve(OperationKind::ResourceLookup, connector.as_ref());
            let operation = format!("lookup resource[{}] for service[{}]", context, service_name);

            self.invoker
                .invoke(connector, &operation, timeout, move |c| c.lookup_resource(&context))
                .await?
        };

        debug!(service = service_name, count = resources.len(), "lookup_resource done");
        Ok(resources)
    }

    /// Test connectivity with `service`'s configuration.
    ///
    /// Resolution failures are returned as errors. Failures of the
    /// validation call itself, timeouts included, become a failed response.
    pub async fn validate_config(&self, service: &Service) -> Result<ValidationResponse> {
        let connector = self.connector_by_service(service).await?;
        let timeout = self.timeouts.resolve(OperationKind::ValidateConfig, connector.as_ref());
        let operation = format!("validate config for service[{}]", service.name);

        let response = match self
            .invoker
            .invoke(connector, &operation, timeout, |c| c.validate_config())
            .await
        {
            Ok(data) => ValidationResponse::from_response_data(&data, ""),
            Err(e) => {
                error!(service = %service, "validate_config failed: {}", e);
                let message = format!("Unable to connect repository with given config for {}", service.name);
                let data = e.response_data().cloned().unwrap_or_default();
                ValidationResponse::from_response_data(&data, &message)
            }
        };

        debug!(service = %service, status = ?response.status, "validate_config done");
        Ok(response)
    }
}
