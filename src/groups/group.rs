use serde::{Deserialize, Serialize};

use super::instance::TerminalInstance;
use crate::model::{GroupId, InstanceId};

/// Where to drop an instance relative to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Before,
    After,
}

/// An ordered run of terminal instances shown together.
///
/// A group is created around its first instance and is never empty while it
/// belongs to a collection; the collection drops a group as soon as its last
/// instance leaves.
#[derive(Debug)]
pub struct TerminalGroup {
    id: GroupId,
    instances: Vec<TerminalInstance>,
    /// Index of the active instance in `instances`
    active: usize,
    visible: bool,
}

impl TerminalGroup {
    pub fn new(id: GroupId, first: TerminalInstance) -> Self {
        Self {
            id,
            instances: vec![first],
            active: 0,
            visible: false,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn instances(&self) -> &[TerminalInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn position_of(&self, id: InstanceId) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id() == id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn instance(&self, id: InstanceId) -> Option<&TerminalInstance> {
        self.instances.iter().find(|instance| instance.id() == id)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_instance(&self) -> Option<&TerminalInstance> {
        self.instances.get(self.active)
    }

    pub fn active_instance_id(&self) -> Option<InstanceId> {
        self.active_instance().map(TerminalInstance::id)
    }

    /// Returns whether the active instance changed
    pub fn set_active_index(&mut self, index: usize) -> bool {
        if index >= self.instances.len() || index == self.active {
            return false;
        }
        self.active = index;
        true
    }

    pub fn set_active_instance(&mut self, id: InstanceId) -> bool {
        match self.position_of(id) {
            Some(index) => self.set_active_index(index),
            None => false,
        }
    }

    /// Append at the end; the active instance is unchanged
    pub fn push(&mut self, instance: TerminalInstance) {
        self.instances.push(instance);
    }

    /// Insert at `index` (clamped to the end) keeping the same instance active
    pub fn insert(&mut self, index: usize, instance: TerminalInstance) -> usize {
        let index = index.min(self.instances.len());
        self.instances.insert(index, instance);
        if index <= self.active && self.instances.len() > 1 {
            self.active += 1;
        }
        index
    }

    /// Insert immediately before or after `target`
    pub fn insert_beside(
        &mut self,
        target: InstanceId,
        side: Side,
        instance: TerminalInstance,
    ) -> Option<usize> {
        let target_index = self.position_of(target)?;
        let index = match side {
            Side::Before => target_index,
            Side::After => target_index + 1,
        };
        Some(self.insert(index, instance))
    }

    /// Take an instance out of the group.
    ///
    /// When the active instance leaves, the instance that slides into its slot
    /// becomes active (the previous one if it was last).
    pub fn remove(&mut self, id: InstanceId) -> Option<TerminalInstance> {
        let index = self.position_of(id)?;
        let instance = self.instances.remove(index);
        if index < self.active {
            self.active -= 1;
        } else if index == self.active {
            self.active = index.min(self.instances.len().saturating_sub(1));
        }
        Some(instance)
    }

    /// Reposition `source` next to `target`; both must be in this group
    pub fn move_instance(&mut self, source: InstanceId, target: InstanceId, side: Side) -> bool {
        if source == target || !self.contains(target) {
            return false;
        }
        let active_id = self.active_instance_id();
        let Some(instance) = self.remove(source) else {
            return false;
        };
        // `target` is still here, so this cannot fail
        let inserted = self.insert_beside(target, side, instance);
        if let Some(active_id) = active_id {
            self.set_active_instance(active_id);
        }
        inserted.is_some()
    }

    /// Set focus on the active instance only, or on none
    pub(crate) fn apply_focus(&mut self, has_focus: bool) {
        let active = self.active;
        for (index, instance) in self.instances.iter_mut().enumerate() {
            instance.set_focused(has_focus && index == active);
        }
    }
}
