//! Administrative request types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Resource key (e.g. "database") to an ordered list of resource values
pub type ResourceMap = BTreeMap<String, Vec<String>>;

/// Numeric policy identifier
pub type PolicyId = i64;

/// Policy id recorded for outcomes that did not come from a policy match
pub const NO_POLICY_ID: PolicyId = -1;

/// Access type used for synthetic checks of administrative actions
pub const ADMIN_ACCESS: &str = "_admin";

/// Administrative mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminAction {
    Grant,
    Revoke,
    Remove,
    Alter,
}

impl AdminAction {
    /// Action name as recorded in audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Grant => "grant",
            AdminAction::Revoke => "revoke",
            AdminAction::Remove => "remove",
            AdminAction::Alter => "alter",
        }
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant, revoke or remove request forwarded to the policy authority
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRevokeRequest {
    /// User performing the change
    pub grantor: String,

    /// Resources affected by the change
    #[serde(default)]
    pub resources: ResourceMap,

    /// Users receiving (or losing) the permissions
    #[serde(default)]
    pub users: BTreeSet<String>,

    /// Groups receiving (or losing) the permissions
    #[serde(default)]
    pub groups: BTreeSet<String>,

    /// Access types granted or revoked
    #[serde(default)]
    pub access_types: BTreeSet<String>,

    #[serde(default)]
    pub delegate_admin: bool,

    #[serde(default = "default_true")]
    pub enable_audit: bool,

    #[serde(default)]
    pub replace_existing_permissions: bool,

    #[serde(default = "default_true")]
    pub is_recursive: bool,

    #[serde(default)]
    pub client_ip_address: Option<String>,

    #[serde(default)]
    pub client_type: Option<String>,

    #[serde(default)]
    pub request_data: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl GrantRevokeRequest {
    /// Create a request on behalf of `grantor`
    pub fn new(grantor: impl Into<String>) -> Self {
        Self {
            grantor: grantor.into(),
            enable_audit: true,
            is_recursive: true,
            ..Default::default()
        }
    }

    /// Add values for a resource key, keeping their order
    pub fn with_resource<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.users.insert(user.into());
        self
    }

    pub fn with_access_type(mut self, access_type: impl Into<String>) -> Self {
        self.access_types.insert(access_type.into());
        self
    }

    pub fn with_client(
        mut self,
        ip_address: impl Into<String>,
        client_type: impl Into<String>,
    ) -> Self {
        self.client_ip_address = Some(ip_address.into());
        self.client_type = Some(client_type.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request_data(mut self, request_data: impl Into<String>) -> Self {
        self.request_data = Some(request_data.into());
        self
    }
}

/// Request moving permissions from one resource set to another
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterRequest {
    pub grantor: String,

    #[serde(default)]
    pub old_resources: ResourceMap,

    #[serde(default)]
    pub new_resources: ResourceMap,

    #[serde(default)]
    pub client_ip_address: Option<String>,

    #[serde(default)]
    pub client_type: Option<String>,

    #[serde(default)]
    pub request_data: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,
}

impl AlterRequest {
    pub fn new(grantor: impl Into<String>) -> Self {
        Self {
            grantor: grantor.into(),
            ..Default::default()
        }
    }

    pub fn with_old_resource<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.old_resources
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_new_resource<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.new_resources
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_client(
        mut self,
        ip_address: impl Into<String>,
        client_type: impl Into<String>,
    ) -> Self {
        self.client_ip_address = Some(ip_address.into());
        self.client_type = Some(client_type.into());
        self
    }

    /// Resources audited for this request: old values followed by new values
    /// for every key. A value present in both lists appears twice.
    pub fn combined_resources(&self) -> ResourceMap {
        let mut combined = self.old_resources.clone();
        for (key, values) in &self.new_resources {
            combined
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        combined
    }
}
