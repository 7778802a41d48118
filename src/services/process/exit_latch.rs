//! Set-once exit latch shared by every exit source of a process handle.
//!
//! Several producers (the child's own exit, the out-of-band "gone"
//! notification, a failed spawn) race to record how the process ended. The
//! first one wins; later ones are ignored. Waiters observe the recorded value.

use std::sync::Arc;
use tokio::sync::watch;

use super::ExitInfo;

#[derive(Clone, Debug)]
pub struct ExitLatch {
    slot: Arc<watch::Sender<Option<ExitInfo>>>,
}

impl ExitLatch {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Record the exit. Returns `true` only for the first caller.
    pub fn set(&self, info: ExitInfo) -> bool {
        let mut info = Some(info);
        self.slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = info.take();
            true
        })
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn get(&self) -> Option<ExitInfo> {
        self.slot.borrow().clone()
    }

    /// Resolve once the latch is set.
    pub async fn wait(&self) -> Option<ExitInfo> {
        let mut receiver = self.slot.subscribe();
        let result = receiver.wait_for(Option::is_some).await;
        result.ok().and_then(|info| info.clone())
    }
}

impl Default for ExitLatch {
    fn default() -> Self {
        Self::new()
    }
}
