//! # Gatekeeper Plugin Runtime
//!
//! In-process runtime of an authorization plugin embedded in a data service.
//!
//! ## Features
//!
//! - **Lock-free engine hot-swap**: access checks never wait for a policy refresh
//! - **Async policy refresh** on a Tokio task, with an on-disk snapshot cache
//! - **Audited administration**: grant/revoke/alter/remove are audited through
//!   synthetic access checks against the current policies
//! - **Pluggable seams** for the evaluation engine, admin client and refresher
//!
//! ## Example
//!
//! ```rust,ignore
//! use gatekeeper_plugin::{AccessRequest, AccessResource, PluginEngineHost};
//! use std::sync::Arc;
//!
//! let host = Arc::new(PluginEngineHost::new("hive", "hiveServer2", props, builder, admin_clients));
//! host.init().await?;
//!
//! let request = AccessRequest::new(AccessResource::single("database", "sales"), "alice", "select");
//! match host.is_access_allowed(request) {
//!     Some(result) if result.is_allowed => println!("Access granted!"),
//!     Some(_) => println!("Access denied"),
//!     None => println!("No policies loaded yet"),
//! }
//!
//! host.cleanup().await;
//! ```

pub mod types;
pub mod engine;
pub mod audit;
pub mod admin;
pub mod refresher;
pub mod host;
pub mod error;

// Re-export commonly used types
pub use types::{AdminAction, AlterRequest, GrantRevokeRequest, PolicyId, ResourceMap};
pub use engine::{
    AccessRequest, AccessResource, AccessResult, AccessResultProcessor, BufferedAuditSink,
    EngineBuilder, EngineOptions, EvaluatorType, PolicyEngine, ResourceAccessInfo,
};
pub use audit::{AccessChecker, AuditSynthesizer};
pub use admin::{AdminClient, AdminClientFactory, AdminClientRegistry};
pub use refresher::{PolicyRefresher, PolicySink, PollingRefresher, RefresherFactory, RefresherParams};
pub use host::{LifecycleState, PluginEngineHost};
pub use error::{AdminError, PluginError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
