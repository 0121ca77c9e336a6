//! In-memory audit sink
//!
//! Keeps the most recent audited access results as flat entries:
//! - decision metadata (user, resource, access type, result, policy)
//! - client metadata (IP address, client type, session)
//! - searchable by user

use parking_lot::RwLock;
use std::collections::VecDeque;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decision::AccessResult;
use super::AccessResultProcessor;
use crate::types::PolicyId;

/// Default number of retained entries
const DEFAULT_CAPACITY: usize = 10_000;

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Event id of the access result
    pub event_id: String,

    /// Service the access was checked against
    pub service_name: String,

    /// User who made the request
    pub user: String,

    /// Resource in `key=value;...` form
    pub resource: String,

    /// Access type recorded for the event
    pub access_type: String,

    /// Action name, if any
    pub action: Option<String>,

    /// Decision result (allow/deny)
    pub allowed: bool,

    /// Policy that made the decision
    pub policy_id: PolicyId,

    pub client_ip_address: Option<String>,
    pub client_type: Option<String>,
    pub session_id: Option<String>,

    /// Access time (milliseconds since epoch)
    pub timestamp: i64,
}

impl From<&AccessResult> for AuditEntry {
    fn from(result: &AccessResult) -> Self {
        let request = &result.request;
        Self {
            event_id: result.event_id.clone(),
            service_name: result.service_name.clone(),
            user: request.user.clone(),
            resource: request.resource.as_string(),
            access_type: request.access_type.clone(),
            action: request.action.clone(),
            allowed: result.is_allowed,
            policy_id: result.policy_id,
            client_ip_address: request.client_ip_address.clone(),
            client_type: request.client_type.clone(),
            session_id: request.session_id.clone(),
            timestamp: request.access_time.timestamp_millis(),
        }
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditStats {
    pub total_events: usize,
    pub allowed_events: usize,
    pub denied_events: usize,
}

/// Result processor that buffers audited results in memory.
///
/// Results whose `is_audited` flag is false are ignored.
pub struct BufferedAuditSink {
    buffer: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl BufferedAuditSink {
    /// Create a sink retaining the last 10,000 entries
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a sink retaining the last `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer.read().iter().cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    /// Most recent entries for `user`, newest first
    pub fn query_by_user(&self, user: &str, limit: usize) -> Vec<AuditEntry> {
        self.buffer
            .read()
            .iter()
            .rev()
            .filter(|e| e.user == user)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Counts over the retained entries
    pub fn stats(&self) -> AuditStats {
        let buffer = self.buffer.read();
        let allowed = buffer.iter().filter(|e| e.allowed).count();

        AuditStats {
            total_events: buffer.len(),
            allowed_events: allowed,
            denied_events: buffer.len() - allowed,
        }
    }
}

impl Default for BufferedAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessResultProcessor for BufferedAuditSink {
    fn process_result(&self, result: &AccessResult) {
        if !result.is_audited {
            return;
        }

        let entry = AuditEntry::from(result);
        debug!(
            event_id = %entry.event_id,
            user = %entry.user,
            resource = %entry.resource,
            access_type = %entry.access_type,
            allowed = entry.allowed,
            "Audit event recorded"
        );

        let mut buffer = self.buffer.write();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }
}
