//! Fire-and-forget record of what a client looked up or changed.

use std::fmt;

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    Search,
    Add,
    Update,
    Delete,
    DeleteAll,
}

impl ActivityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityEvent::Search => "search",
            ActivityEvent::Add => "add",
            ActivityEvent::Update => "update",
            ActivityEvent::Delete => "delete",
            ActivityEvent::DeleteAll => "delete_all",
        }
    }
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for client activity. Implementations must not block the caller and
/// must swallow their own failures.
pub trait ActivityLog: Send + Sync {
    fn record(&self, event: ActivityEvent, detail: &str);
}

/// Emits each activity as a structured `tracing` event under the `activity` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

impl ActivityLog for TracingActivityLog {
    fn record(&self, event: ActivityEvent, detail: &str) {
        info!(target: "activity", event = %event, detail, "client activity");
    }
}
