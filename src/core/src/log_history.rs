//! Rate-limited error logging
//!
//! Repeated identical failure messages (a policy authority that is down, a
//! connector that keeps timing out) are emitted at most once per window. The
//! next emission after the window reports how many copies were withheld.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::error;

/// Default suppression window (30 seconds)
pub const DEFAULT_LOG_WINDOW: Duration = Duration::from_secs(30);

static GLOBAL: Lazy<RateLimitedLogger> = Lazy::new(RateLimitedLogger::new);

/// Per-message emission history
#[derive(Debug, Clone, Copy)]
struct LogHistory {
    last_emitted_at: Instant,
    suppressed: u64,
}

/// Deduplicates identical messages within a time window.
///
/// History entries are keyed by the exact message text and never evicted.
pub struct RateLimitedLogger {
    window: Duration,
    history: Mutex<HashMap<String, LogHistory>>,
}

impl RateLimitedLogger {
    /// Create a logger with the default 30 second window
    pub fn new() -> Self {
        Self::with_window(DEFAULT_LOG_WINDOW)
    }

    /// Create a logger with a custom window
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide instance
    pub fn global() -> &'static RateLimitedLogger {
        &GLOBAL
    }

    /// Log `message` at error level unless an identical message was emitted
    /// within the window. Returns whether it was emitted.
    pub fn log_if_due(&self, message: &str) -> bool {
        match self.record(message, Instant::now()) {
            Some(line) => {
                error!("{}", line);
                true
            }
            None => false,
        }
    }

    /// Number of distinct messages seen so far
    pub fn tracked_messages(&self) -> usize {
        self.history.lock().len()
    }

    /// Update the history for `message` at `now`, returning the line to emit
    fn record(&self, message: &str, now: Instant) -> Option<String> {
        let mut history = self.history.lock();

        match history.get_mut(message) {
            Some(entry) if now.saturating_duration_since(entry.last_emitted_at) <= self.window => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_emitted_at = now;
                entry.suppressed = 0;

                Some(if suppressed > 0 {
                    format!("{}. Messages suppressed before: {}", message, suppressed)
                } else {
                    message.to_string()
                })
            }
            None => {
                history.insert(
                    message.to_string(),
                    LogHistory {
                        last_emitted_at: now,
                        suppressed: 0,
                    },
                );
                Some(message.to_string())
            }
        }
    }
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new()
    }
}
