//! Effective timeouts for connector operations
//!
//! The property `<kind>.timeout.value.in.ms` is looked up, first match wins, in:
//!
//! 1. the service instance configs
//! 2. `ranger.service.<service_name>.<property>`
//! 3. `ranger.servicetype.<service_type>.<property>`
//! 4. `ranger.<property>`
//!
//! and otherwise falls back to the operation's default. A value that does not
//! parse as a non-negative integer is treated as absent.

use gatekeeper_core::Properties;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::connector::Connector;

/// Connector operations with a configurable timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ResourceLookup,
    ValidateConfig,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ResourceLookup => "resource.lookup",
            OperationKind::ValidateConfig => "validate.config",
        }
    }

    /// 1 s for lookups, 10 s for config validation
    pub fn default_timeout(&self) -> Duration {
        match self {
            OperationKind::ResourceLookup => Duration::from_millis(1_000),
            OperationKind::ValidateConfig => Duration::from_millis(10_000),
        }
    }

    /// Timeout property name, e.g. `resource.lookup.timeout.value.in.ms`
    pub fn property_name(&self) -> String {
        format!("{}.timeout.value.in.ms", self.as_str())
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves timeouts from service configs and process properties
#[derive(Debug, Clone, Default)]
pub struct TimeoutPolicy {
    properties: Properties,
}

impl TimeoutPolicy {
    pub fn new(properties: Properties) -> Self {
        Self { properties }
    }

    /// Timeout for running `kind` on `connector`, with the kind's default
    pub fn resolve(&self, kind: OperationKind, connector: &dyn Connector) -> Duration {
        self.resolve_for(
            kind,
            connector.service_name(),
            connector.service_type(),
            connector.configs(),
            kind.default_timeout(),
        )
    }

    /// Timeout for `kind` on the named service, falling back to `default`
    pub fn resolve_for(
        &self,
        kind: OperationKind,
        service_name: &str,
        service_type: &str,
        service_configs: &HashMap<String, String>,
        default: Duration,
    ) -> Duration {
        let property = kind.property_name();

        if let Some(ms) = service_configs.get(&property).and_then(|v| parse_millis(v)) {
            debug!(service = service_name, property = %property, ms, "Found timeout override in service config");
            return Duration::from_millis(ms);
        }

        let keys = [
            format!("ranger.service.{}.{}", service_name, property),
            format!("ranger.servicetype.{}.{}", service_type, property),
            format!("ranger.{}", property),
        ];

        for key in &keys {
            if let Some(ms) = self.properties.get(key).and_then(parse_millis) {
                debug!(service = service_name, key = %key, ms, "Using timeout from properties");
                return Duration::from_millis(ms);
            }
        }

        debug!(
            service = service_name,
            property = %property,
            default_ms = default.as_millis() as u64,
            "No timeout override found, using default"
        );
        default
    }
}

fn parse_millis(value: &str) -> Option<u64> {
    match value.parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            debug!(value, "Could not parse timeout value, ignoring");
            None
        }
    }
}
