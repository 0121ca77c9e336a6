//! Evaluation engine seam
//!
//! The policy matching algorithm lives outside this crate. The runtime only
//! knows how to build an engine from a policy snapshot, dispatch requests to
//! it, and retire it once a newer engine has been published.

pub mod decision;
pub mod audit;

pub use decision::{AccessRequest, AccessResource, AccessResult, ResourceAccessInfo};
pub use audit::{AuditEntry, AuditStats, BufferedAuditSink};

use gatekeeper_core::{Properties, ServiceDef, ServicePolicies};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Receives access results that may need auditing
pub trait AccessResultProcessor: Send + Sync {
    /// Handle a single result
    fn process_result(&self, result: &AccessResult);

    /// Handle a batch of results
    fn process_results(&self, results: &[AccessResult]) {
        for result in results {
            self.process_result(result);
        }
    }
}

/// Policy evaluation engine built from one policy snapshot.
///
/// Implementations must tolerate calls that are still in flight after
/// [`PolicyEngine::pre_cleanup`] or [`PolicyEngine::cleanup`] ran: readers
/// that loaded the engine just before a swap finish on the old instance.
pub trait PolicyEngine: Send + Sync {
    /// Service definition the engine was built for
    fn service_def(&self) -> &ServiceDef;

    /// Enrich a request before evaluation (context enrichers)
    fn pre_process(&self, request: &mut AccessRequest);

    /// Enrich a batch of requests
    fn pre_process_all(&self, requests: &mut [AccessRequest]) {
        for request in requests.iter_mut() {
            self.pre_process(request);
        }
    }

    /// Evaluate a request; the engine hands audit-worthy results to `processor`
    fn is_access_allowed(
        &self,
        request: AccessRequest,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> AccessResult;

    /// Evaluate a batch of requests
    fn is_access_allowed_all(
        &self,
        requests: Vec<AccessRequest>,
        processor: Option<&dyn AccessResultProcessor>,
    ) -> Vec<AccessResult> {
        let results: Vec<AccessResult> = requests
            .into_iter()
            .map(|request| self.is_access_allowed(request, None))
            .collect();

        if let Some(processor) = processor {
            processor.process_results(&results);
        }

        results
    }

    /// Users and groups with access to the requested resource
    fn resource_access_info(&self, request: &AccessRequest) -> ResourceAccessInfo;

    /// Empty result for `request`, without evaluating policies
    fn create_access_result(&self, request: AccessRequest) -> AccessResult;

    /// Called once a newer engine has been published. Must not block.
    /// Returns `false` when resources could not be released.
    fn pre_cleanup(&self) -> bool {
        true
    }

    /// Release everything held by the engine
    fn cleanup(&self) {}
}

/// Builds evaluation engines from policy snapshots
pub trait EngineBuilder: Send + Sync {
    fn build(
        &self,
        app_id: &str,
        policies: &ServicePolicies,
        options: &EngineOptions,
    ) -> anyhow::Result<Box<dyn PolicyEngine>>;
}

/// Policy evaluator strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorType {
    /// Let the engine pick per policy
    #[default]
    Auto,
    /// Optimized evaluator
    Optimized,
    /// Evaluator caching intermediate match results
    Cached,
}

impl EvaluatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorType::Auto => "auto",
            EvaluatorType::Optimized => "optimized",
            EvaluatorType::Cached => "cached",
        }
    }
}

impl fmt::Display for EvaluatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EvaluatorType::Auto),
            "optimized" => Ok(EvaluatorType::Optimized),
            "cached" => Ok(EvaluatorType::Cached),
            other => Err(format!("unknown evaluator type '{}'", other)),
        }
    }
}

/// Behavioral flags handed to every engine built after `init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    pub evaluator_type: EvaluatorType,
    pub cache_audit_results: bool,
    pub disable_context_enrichers: bool,
    pub disable_custom_conditions: bool,
    pub disable_tag_policy_evaluation: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            evaluator_type: EvaluatorType::Auto,
            cache_audit_results: true,
            disable_context_enrichers: false,
            disable_custom_conditions: false,
            disable_tag_policy_evaluation: false,
        }
    }
}

impl EngineOptions {
    /// Read options under `<property_prefix>.policyengine.option.*`
    pub fn from_properties(props: &Properties, property_prefix: &str) -> Self {
        let key = |name: &str| format!("{}.policyengine.option.{}", property_prefix, name);
        let defaults = Self::default();

        let evaluator_type = match props.get_non_empty(&key("evaluator.type")) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}; using '{}'", e, EvaluatorType::Auto);
                EvaluatorType::Auto
            }),
            None => defaults.evaluator_type,
        };

        Self {
            evaluator_type,
            cache_audit_results: props
                .get_bool(&key("cache.audit.results"), defaults.cache_audit_results),
            disable_context_enrichers: props
                .get_bool(&key("disable.context.enrichers"), defaults.disable_context_enrichers),
            disable_custom_conditions: props
                .get_bool(&key("disable.custom.conditions"), defaults.disable_custom_conditions),
            disable_tag_policy_evaluation: props.get_bool(
                &key("disable.tagpolicy.evaluation"),
                defaults.disable_tag_policy_evaluation,
            ),
        }
    }
}
