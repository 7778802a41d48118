//! Out-of-band "child process gone" notifications.
//!
//! The normal exit of a child is observed by the handle that spawned it. When a
//! process is torn down by something else (an OOM killer, a supervisor, a host
//! that watches its own children) that observer may never fire. Such sources
//! report here, keyed by the handle's generated service name, and the matching
//! handle routes the report into its exit latch.

use std::sync::OnceLock;
use tokio::sync::broadcast;

/// Capacity of the notification buffer; slow listeners skip stale reports
const GONE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildGone {
    /// Service name generated by the handle when it started the process
    pub service_name: String,
    pub pid: Option<u32>,
    pub code: Option<i32>,
    /// Free-form description of why the process is gone ("oom", "killed", ...)
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ProcessGoneNotifier {
    sender: broadcast::Sender<ChildGone>,
}

impl ProcessGoneNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(GONE_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Process-wide notifier used by handles that were not given their own
    pub fn global() -> Self {
        static GLOBAL: OnceLock<ProcessGoneNotifier> = OnceLock::new();
        GLOBAL.get_or_init(ProcessGoneNotifier::new).clone()
    }

    /// Report a gone child. Returns the number of handles that were listening.
    pub fn notify(&self, gone: ChildGone) -> usize {
        tracing::debug!(
            "child process gone: {} (pid {:?}, code {:?}, reason {})",
            gone.service_name,
            gone.pid,
            gone.code,
            gone.reason
        );
        self.sender.send(gone).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChildGone> {
        self.sender.subscribe()
    }
}

impl Default for ProcessGoneNotifier {
    fn default() -> Self {
        Self::new()
    }
}
