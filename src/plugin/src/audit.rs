//! Audit synthesis for administrative actions
//!
//! Grant, revoke, remove and alter calls are not access checks themselves,
//! so the policy engine never sees them. To audit them under the same
//! policies, every affected (resource key, resource value) pair is turned
//! into a synthetic `_admin` access check. The check is only used to learn
//! whether the resource is audit-enabled; the recorded outcome is the outcome
//! of the administrative call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

use crate::engine::{AccessRequest, AccessResource, AccessResult, AccessResultProcessor};
use crate::types::{
    AdminAction, AlterRequest, GrantRevokeRequest, ResourceMap, ADMIN_ACCESS, NO_POLICY_ID,
};

/// Something that can evaluate an access request against current policies
pub trait AccessChecker {
    /// `None` when no decision is available (no engine published yet)
    fn check_access(
        &self,
        request: AccessRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Option<AccessResult>;
}

/// Caller metadata copied into every synthetic request
struct RequestOrigin<'r> {
    grantor: &'r str,
    client_ip_address: Option<&'r String>,
    client_type: Option<&'r String>,
    request_data: Option<&'r String>,
    session_id: Option<&'r String>,
}

impl<'r> From<&'r GrantRevokeRequest> for RequestOrigin<'r> {
    fn from(request: &'r GrantRevokeRequest) -> Self {
        Self {
            grantor: &request.grantor,
            client_ip_address: request.client_ip_address.as_ref(),
            client_type: request.client_type.as_ref(),
            request_data: request.request_data.as_ref(),
            session_id: request.session_id.as_ref(),
        }
    }
}

impl<'r> From<&'r AlterRequest> for RequestOrigin<'r> {
    fn from(request: &'r AlterRequest) -> Self {
        Self {
            grantor: &request.grantor,
            client_ip_address: request.client_ip_address.as_ref(),
            client_type: request.client_type.as_ref(),
            request_data: request.request_data.as_ref(),
            session_id: request.session_id.as_ref(),
        }
    }
}

/// Produces audit records for administrative actions
pub struct AuditSynthesizer<'a, C: AccessChecker + ?Sized> {
    checker: &'a C,
}

impl<'a, C: AccessChecker + ?Sized> AuditSynthesizer<'a, C> {
    pub fn new(checker: &'a C) -> Self {
        Self { checker }
    }

    /// Audit a grant, revoke or remove call. Returns the number of records
    /// submitted to `processor`.
    pub fn audit_grant_revoke(
        &self,
        request: &GrantRevokeRequest,
        action: AdminAction,
        is_success: bool,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> usize {
        let Some(processor) = processor else {
            return 0;
        };

        self.audit_resources(
            &request.resources,
            action,
            &RequestOrigin::from(request),
            is_success,
            processor,
        )
    }

    /// Audit an alter call over the old values followed by the new values of
    /// every resource key.
    pub fn audit_alter(
        &self,
        request: &AlterRequest,
        is_success: bool,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> usize {
        let Some(processor) = processor else {
            return 0;
        };

        self.audit_resources(
            &request.combined_resources(),
            AdminAction::Alter,
            &RequestOrigin::from(request),
            is_success,
            processor,
        )
    }

    fn audit_resources(
        &self,
        resources: &ResourceMap,
        action: AdminAction,
        origin: &RequestOrigin<'_>,
        is_success: bool,
        processor: &dyn AccessResultProcessor,
    ) -> usize {
        let mut submitted = 0;

        for (key, values) in resources {
            for value in values {
                let request = Self::synthetic_request(key, value, action, origin);

                // Evaluated without a processor: only the audit flag matters here
                let checked = catch_unwind(AssertUnwindSafe(|| self.checker.check_access(request, None)));
                let mut result = match checked {
                    Ok(Some(result)) => result,
                    Ok(None) => continue,
                    Err(_) => {
                        error!(
                            resource = %format!("{}={}", key, value),
                            %action,
                            "Engine panicked while evaluating administrative audit check"
                        );
                        continue;
                    }
                };

                if !result.is_audited {
                    debug!(resource = %format!("{}={}", key, value), %action, "Resource not audit-enabled");
                    continue;
                }

                result.request.access_type = action.as_str().to_string();
                result.is_allowed = is_success;
                if !is_success {
                    result.policy_id = NO_POLICY_ID;
                }

                let emitted = catch_unwind(AssertUnwindSafe(|| processor.process_result(&result)));
                match emitted {
                    Ok(()) => submitted += 1,
                    Err(_) => error!(
                        resource = %format!("{}={}", key, value),
                        %action,
                        "Result processor panicked while auditing administrative action"
                    ),
                }
            }
        }

        submitted
    }

    fn synthetic_request(
        key: &str,
        value: &str,
        action: AdminAction,
        origin: &RequestOrigin<'_>,
    ) -> AccessRequest {
        let mut request = AccessRequest::new(
            AccessResource::single(key, value),
            origin.grantor,
            ADMIN_ACCESS,
        )
        .with_action(action.as_str());

        request.client_ip_address = origin.client_ip_address.cloned();
        request.client_type = origin.client_type.cloned();
        request.request_data = origin.request_data.cloned();
        request.session_id = origin.session_id.cloned();
        request
    }
}
