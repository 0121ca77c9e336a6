//! Access request and access result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::types::{PolicyId, NO_POLICY_ID};

/// Resource being accessed, as resource key to value (e.g. database=db1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessResource {
    elements: BTreeMap<String, String>,
}

impl AccessResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource made of a single key/value pair
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new().with(key, value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.elements.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.elements.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Canonical string form, `key=value` pairs joined by `;`
    pub fn as_string(&self) -> String {
        self.elements
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Access request evaluated by the policy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    /// Resource being accessed
    pub resource: AccessResource,

    /// Requesting user
    pub user: String,

    /// Groups of the requesting user
    #[serde(default)]
    pub user_groups: BTreeSet<String>,

    /// Access type being checked (e.g. "select", "_admin")
    pub access_type: String,

    /// Service-specific action name
    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub client_ip_address: Option<String>,

    #[serde(default)]
    pub client_type: Option<String>,

    #[serde(default)]
    pub request_data: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// When the access happened
    pub access_time: DateTime<Utc>,

    /// Context added by the caller or by context enrichers
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl AccessRequest {
    /// Create a request for `user` performing `access_type` on `resource`
    pub fn new(
        resource: AccessResource,
        user: impl Into<String>,
        access_type: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            user: user.into(),
            user_groups: BTreeSet::new(),
            access_type: access_type.into(),
            action: None,
            client_ip_address: None,
            client_type: None,
            request_data: None,
            session_id: None,
            access_time: Utc::now(),
            context: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.user_groups.insert(group.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Outcome of an access check. Also the payload of an audit record.
///
/// The result owns the request it answers: audit processors read the
/// user, resource and access type from [`AccessResult::request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResult {
    /// Unique event identifier
    pub event_id: String,

    /// Service the decision was made for
    pub service_name: String,

    /// Request that produced this result
    pub request: AccessRequest,

    /// Whether access is allowed
    pub is_allowed: bool,

    /// Whether a policy marked this access audit-worthy
    pub is_audited: bool,

    /// Whether any policy determined the outcome
    pub is_access_determined: bool,

    /// Matched policy, or [`NO_POLICY_ID`]
    pub policy_id: PolicyId,

    /// Free-form reason
    #[serde(default)]
    pub reason: Option<String>,

    /// Number of policies evaluated
    #[serde(default)]
    pub evaluated_policies: u32,
}

impl AccessResult {
    /// Undetermined, not-allowed, not-audited result for `request`
    pub fn new(service_name: impl Into<String>, request: AccessRequest) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            request,
            is_allowed: false,
            is_audited: false,
            is_access_determined: false,
            policy_id: NO_POLICY_ID,
            reason: None,
            evaluated_policies: 0,
        }
    }

    /// Record a policy decision
    pub fn decided(mut self, is_allowed: bool, policy_id: PolicyId) -> Self {
        self.is_allowed = is_allowed;
        self.is_access_determined = true;
        self.policy_id = policy_id;
        self
    }

    pub fn audited(mut self, is_audited: bool) -> Self {
        self.is_audited = is_audited;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Users and groups allowed or denied access to a resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccessInfo {
    pub allowed_users: BTreeSet<String>,
    pub allowed_groups: BTreeSet<String>,
    pub denied_users: BTreeSet<String>,
    pub denied_groups: BTreeSet<String>,
}
