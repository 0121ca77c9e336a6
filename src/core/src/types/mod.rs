//! Shared model types

pub mod service;
pub mod policy;

// Re-export commonly used types
pub use service::{Service, ServiceDef, EMBEDDED_TAG_SERVICE_DEF};
pub use policy::ServicePolicies;
