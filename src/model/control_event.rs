//! Group Events - Observable notifications about terminal group state changes
//!
//! Every structural change made by the group service is announced here, strictly
//! after the mutation completed:
//! - Events are typed (`GroupEvent`) but carry a namespaced name for matching:
//!   "groups:changed", "instances:active_changed", ...
//! - Consumers either subscribe (one channel per subscriber) or inspect the
//!   bounded history queue.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use super::{GroupId, InstanceId};

/// A single notification emitted by the group service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupEvent {
    /// Groups were added, removed or reordered
    GroupsChanged,
    /// Instances were added, removed or moved between/within groups
    InstancesChanged,
    /// The active group changed (`None` once the last group is gone)
    ActiveGroupChanged { group: Option<GroupId> },
    /// The active instance changed (`None` once the last instance is gone)
    ActiveInstanceChanged { instance: Option<InstanceId> },
    /// An instance was disposed and its process released
    InstanceDisposed { instance: InstanceId },
}

impl GroupEvent {
    /// Namespaced event name
    pub fn name(&self) -> &'static str {
        match self {
            GroupEvent::GroupsChanged => "groups:changed",
            GroupEvent::InstancesChanged => "instances:changed",
            GroupEvent::ActiveGroupChanged { .. } => "groups:active_changed",
            GroupEvent::ActiveInstanceChanged { .. } => "instances:active_changed",
            GroupEvent::InstanceDisposed { .. } => "instances:disposed",
        }
    }

    /// Check if event name matches a pattern
    /// Patterns can use "*" as wildcard: "groups:*", "*:active_changed"
    pub fn matches(&self, pattern: &str) -> bool {
        let name = self.name();
        if pattern == "*" {
            return true;
        }

        if !pattern.contains('*') {
            return name == pattern;
        }

        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            let (prefix, suffix) = (parts[0], parts[1]);
            name.starts_with(prefix) && name.ends_with(suffix)
        } else {
            name == pattern
        }
    }
}

/// Broadcasts group events to subscribers and keeps a bounded history
#[derive(Clone)]
pub struct EventBroadcaster {
    events: Arc<Mutex<VecDeque<GroupEvent>>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<GroupEvent>>>>,
    max_history: usize,
}

/// A poisoned lock only means a listener panicked mid-push; the queue itself is
/// still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBroadcaster {
    pub fn new(max_history: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_history))),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            max_history,
        }
    }

    /// Register a new subscriber. Events emitted before this call are not replayed.
    pub fn subscribe(&self) -> mpsc::Receiver<GroupEvent> {
        let (sender, receiver) = mpsc::channel();
        lock(&self.subscribers).push(sender);
        receiver
    }

    /// Emit an event
    pub fn emit(&self, event: GroupEvent) {
        tracing::trace!("group event: {:?}", event);

        // Subscribers whose receiver was dropped are pruned here
        lock(&self.subscribers).retain(|sender| sender.send(event.clone()).is_ok());

        if self.max_history == 0 {
            return;
        }
        let mut events = lock(&self.events);
        if events.len() >= self.max_history {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Check if any event matches pattern
    pub fn has_match(&self, name_pattern: &str) -> bool {
        lock(&self.events).iter().any(|e| e.matches(name_pattern))
    }

    /// Take first event matching pattern (removes it and all events before it)
    pub fn take_match(&self, name_pattern: &str) -> Option<GroupEvent> {
        let mut events = lock(&self.events);
        let idx = events.iter().position(|e| e.matches(name_pattern))?;
        let event = events.get(idx).cloned();
        events.drain(..=idx);
        event
    }

    /// Drain all events
    pub fn drain(&self) -> Vec<GroupEvent> {
        lock(&self.events).drain(..).collect()
    }

    /// Peek at all events
    pub fn peek(&self) -> Vec<GroupEvent> {
        lock(&self.events).iter().cloned().collect()
    }

    /// Clear all events
    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// Number of events in the history
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscribers (as of the last emit)
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("history", &self.len())
            .field("max_history", &self.max_history)
            .finish()
    }
}
