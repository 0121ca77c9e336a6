//! # Gatekeeper Connectors
//!
//! Service-side access to connector implementations: resolving the connector
//! class for a service type, instantiating it for a configured service, and
//! running its blocking operations with bounded concurrency and a deadline.

pub mod connector;
pub mod loader;
pub mod resolver;
pub mod invoker;
pub mod timeout;
pub mod service_manager;
pub mod error;

// Re-export commonly used types
pub use connector::{Connector, ConnectorContext, ConnectorFactory, ResourceLookupContext};
pub use loader::{ConnectorLoader, ConnectorRegistry};
pub use resolver::{ConnectorClass, ConnectorResolver, ResolverStats};
pub use invoker::{BoundedInvoker, InvokerConfig};
pub use timeout::{OperationKind, TimeoutPolicy};
pub use service_manager::{ServiceManager, ServiceStore, ValidationResponse, ValidationStatus};
pub use error::{BackendError, ConnectorError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
