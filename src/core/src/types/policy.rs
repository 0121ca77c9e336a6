//! Policy snapshots delivered by the policy authority

use serde::{Deserialize, Serialize};

use super::service::ServiceDef;

/// Immutable set of policies for one service, plus its service definition.
///
/// Policy documents are opaque to the runtime: they are handed as-is to the
/// evaluation engine that gets built from the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePolicies {
    /// Service the policies belong to
    pub service_name: String,

    /// Numeric service id
    #[serde(default)]
    pub service_id: Option<i64>,

    /// Monotonic policy version assigned by the authority
    #[serde(default)]
    pub policy_version: Option<i64>,

    /// Last update time (milliseconds since epoch)
    #[serde(default)]
    pub policy_update_time: Option<i64>,

    /// Policy documents
    #[serde(default)]
    pub policies: Vec<serde_json::Value>,

    /// Service definition the policies were written against
    #[serde(default)]
    pub service_def: Option<ServiceDef>,

    /// Tag-based policies applying to this service, if any
    #[serde(default)]
    pub tag_policies: Option<Box<ServicePolicies>>,
}

impl ServicePolicies {
    /// Create an empty snapshot for a service
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the policy version
    pub fn with_version(mut self, version: i64) -> Self {
        self.policy_version = Some(version);
        self
    }

    /// Set the service definition
    pub fn with_service_def(mut self, service_def: ServiceDef) -> Self {
        self.service_def = Some(service_def);
        self
    }

    /// Append a policy document
    pub fn with_policy(mut self, policy: serde_json::Value) -> Self {
        self.policies.push(policy);
        self
    }
}
