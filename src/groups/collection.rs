use super::group::TerminalGroup;
use super::index::GroupIndex;
use crate::model::GroupId;

/// Ordered groups plus the active group pointer.
///
/// `active` is `None` exactly when there are no groups. Only the active group is
/// visible.
#[derive(Debug, Default)]
pub struct GroupCollection {
    groups: Vec<TerminalGroup>,
    active: Option<usize>,
}

impl GroupCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[TerminalGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TerminalGroup> {
        self.groups.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TerminalGroup> {
        self.groups.get_mut(index)
    }

    pub fn position_of(&self, id: GroupId) -> Option<usize> {
        self.groups.iter().position(|group| group.id() == id)
    }

    pub fn index(&self) -> GroupIndex<'_> {
        GroupIndex::new(&self.groups)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_group(&self) -> Option<&TerminalGroup> {
        self.active.and_then(|index| self.groups.get(index))
    }

    /// Append a group; the first group ever added becomes active
    pub fn push(&mut self, group: TerminalGroup) -> usize {
        self.groups.push(group);
        let index = self.groups.len() - 1;
        if self.active.is_none() {
            self.active = Some(index);
        }
        self.apply_visibility();
        index
    }

    /// Splice out a group. Returns it together with whether it was active.
    ///
    /// If the active group is removed, the group now at the same position (or the
    /// new last one) becomes active.
    pub fn remove(&mut self, index: usize) -> Option<(TerminalGroup, bool)> {
        if index >= self.groups.len() {
            return None;
        }
        let group = self.groups.remove(index);
        let was_active = self.active == Some(index);

        self.active = match self.active {
            _ if self.groups.is_empty() => None,
            Some(active) if active == index => Some(index.min(self.groups.len() - 1)),
            Some(active) if active > index => Some(active - 1),
            other => other,
        };
        self.apply_visibility();
        Some((group, was_active))
    }

    /// Returns whether the active group changed
    pub fn set_active(&mut self, index: usize) -> bool {
        if index >= self.groups.len() || self.active == Some(index) {
            return false;
        }
        self.active = Some(index);
        self.apply_visibility();
        true
    }

    /// Remove the group at `from` and insert it at `to`; the active pointer
    /// follows the group it pointed at
    pub fn move_group(&mut self, from: usize, to: usize) -> bool {
        let len = self.groups.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let active_id = self.active_group().map(TerminalGroup::id);

        let group = self.groups.remove(from);
        self.groups.insert(to, group);

        self.active = active_id.and_then(|id| self.position_of(id));
        true
    }

    /// Exactly the active group is visible
    fn apply_visibility(&mut self) {
        let active = self.active;
        for (index, group) in self.groups.iter_mut().enumerate() {
            group.set_visible(Some(index) == active);
        }
    }

    /// Exactly the active instance of the active group has focus
    pub(crate) fn apply_focus(&mut self) {
        let active = self.active;
        for (index, group) in self.groups.iter_mut().enumerate() {
            group.apply_focus(Some(index) == active);
        }
    }

    /// Check the structural invariants, describing the first violation
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.active {
            None if !self.groups.is_empty() => {
                return Err("groups exist but none is active".to_string())
            }
            Some(index) if index >= self.groups.len() => {
                return Err(format!(
                    "active group index {} out of range ({} groups)",
                    index,
                    self.groups.len()
                ))
            }
            _ => {}
        }

        let mut seen = std::collections::HashSet::new();
        for (index, group) in self.groups.iter().enumerate() {
            if group.is_empty() {
                return Err(format!("group {} at {} is empty", group.id(), index));
            }
            if group.active_index() >= group.len() {
                return Err(format!("group {} has no valid active instance", group.id()));
            }
            if group.is_visible() != (Some(index) == self.active) {
                return Err(format!("group {} has wrong visibility", group.id()));
            }
            for instance in group.instances() {
                if !seen.insert(instance.id()) {
                    return Err(format!("{} appears more than once", instance.id()));
                }
            }
        }
        Ok(())
    }
}
