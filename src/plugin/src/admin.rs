//! Admin client seam and client selection
//!
//! The admin client carries grant/revoke/alter/remove calls and policy
//! downloads to the policy authority. Which implementation is used is decided
//! once per `init` from `<prefix>.policy.source.impl`.

use async_trait::async_trait;
use gatekeeper_core::{Properties, ServicePolicies};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::AdminError;
use crate::types::{AlterRequest, GrantRevokeRequest};

/// Client for the remote policy authority
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn grant_access(&self, request: &GrantRevokeRequest) -> Result<(), AdminError>;

    async fn revoke_access(&self, request: &GrantRevokeRequest) -> Result<(), AdminError>;

    async fn alter_access(&self, request: &AlterRequest) -> Result<(), AdminError>;

    async fn remove_access(&self, request: &GrantRevokeRequest) -> Result<(), AdminError>;

    /// Policies newer than `last_known_version`, or `None` when unchanged
    async fn service_policies_if_updated(
        &self,
        last_known_version: Option<i64>,
    ) -> Result<Option<ServicePolicies>, AdminError>;
}

/// Creates admin clients bound to a service
pub trait AdminClientFactory: Send + Sync {
    fn create(
        &self,
        service_name: Option<&str>,
        app_id: &str,
        property_prefix: &str,
    ) -> Arc<dyn AdminClient>;
}

/// Named admin client implementations plus the default one
#[derive(Clone)]
pub struct AdminClientRegistry {
    default: Arc<dyn AdminClientFactory>,
    named: HashMap<String, Arc<dyn AdminClientFactory>>,
}

impl AdminClientRegistry {
    /// Registry falling back to `default`
    pub fn new(default: Arc<dyn AdminClientFactory>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Register an implementation selectable through `policy.source.impl`
    pub fn register(mut self, name: impl Into<String>, factory: Arc<dyn AdminClientFactory>) -> Self {
        self.named.insert(name.into(), factory);
        self
    }

    /// Create the client configured for `property_prefix`.
    ///
    /// An empty setting selects the default implementation; an unknown name
    /// is logged and also falls back to the default.
    pub fn create_admin_client(
        &self,
        props: &Properties,
        service_name: Option<&str>,
        app_id: &str,
        property_prefix: &str,
    ) -> Arc<dyn AdminClient> {
        let property_name = format!("{}.policy.source.impl", property_prefix);

        let factory = match props.get_non_empty(&property_name) {
            None => {
                debug!(property = %property_name, "No policy source configured, using default admin client");
                &self.default
            }
            Some(name) => match self.named.get(name) {
                Some(factory) => {
                    debug!(property = %property_name, policy_source = name, "Using configured admin client");
                    factory
                }
                None => {
                    error!(
                        property = %property_name,
                        policy_source = name,
                        "Failed to instantiate policy source, using default admin client"
                    );
                    &self.default
                }
            },
        };

        factory.create(service_name, app_id, property_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct NamedClient(&'static str);

    #[async_trait]
    impl AdminClient for NamedClient {
        async fn grant_access(&self, _: &GrantRevokeRequest) -> Result<(), AdminError> {
            Err(AdminError::Transport(self.0.to_string()))
        }
        async fn revoke_access(&self, _: &GrantRevokeRequest) -> Result<(), AdminError> {
            Ok(())
        }
        async fn alter_access(&self, _: &AlterRequest) -> Result<(), AdminError> {
            Ok(())
        }
        async fn remove_access(&self, _: &GrantRevokeRequest) -> Result<(), AdminError> {
            Ok(())
        }
        async fn service_policies_if_updated(
            &self,
            _: Option<i64>,
        ) -> Result<Option<ServicePolicies>, AdminError> {
            Ok(None)
        }
    }

    struct NamedFactory {
        name: &'static str,
        calls: Mutex<Vec<(Option<String>, String, String)>>,
    }

    impl NamedFactory {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl AdminClientFactory for NamedFactory {
        fn create(&self, service_name: Option<&str>, app_id: &str, prefix: &str) -> Arc<dyn AdminClient> {
            self.calls.lock().push((
                service_name.map(str::to_string),
                app_id.to_string(),
                prefix.to_string(),
            ));
            Arc::new(NamedClient(self.name))
        }
    }

    async fn client_name(client: Arc<dyn AdminClient>) -> String {
        match client.grant_access(&GrantRevokeRequest::new("x")).await {
            Err(AdminError::Transport(name)) => name,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_when_unset() {
        let default = NamedFactory::new("rest");
        let registry = AdminClientRegistry::new(default.clone())
            .register("embedded", NamedFactory::new("embedded"));

        let client = registry.create_admin_client(&Properties::new(), Some("dev_hive"), "app", "ranger.plugin.hive");
        assert_eq!(client_name(client).await, "rest");
        assert_eq!(
            default.calls.lock()[0],
            (Some("dev_hive".to_string()), "app".to_string(), "ranger.plugin.hive".to_string())
        );
    }

    #[tokio::test]
    async fn test_named_implementation() {
        let registry = AdminClientRegistry::new(NamedFactory::new("rest"))
            .register("embedded", NamedFactory::new("embedded"));
        let props = Properties::new().with("ranger.plugin.hive.policy.source.impl", "embedded");

        let client = registry.create_admin_client(&props, None, "app", "ranger.plugin.hive");
        assert_eq!(client_name(client).await, "embedded");
    }

    #[tokio::test]
    async fn test_unknown_implementation_falls_back() {
        let registry = AdminClientRegistry::new(NamedFactory::new("rest"));
        let props = Properties::new().with("ranger.plugin.hive.policy.source.impl", "com.example.Missing");

        let client = registry.create_admin_client(&props, None, "app", "ranger.plugin.hive");
        assert_eq!(client_name(client).await, "rest");
    }
}
