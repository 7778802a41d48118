//! Flat instance positions across all groups.
//!
//! The flat order is the concatenation of every group's instances, in group
//! order. Nothing is cached: each query walks the groups, which stay few.

use super::group::TerminalGroup;
use crate::model::InstanceId;

/// Structured position of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLocation {
    pub group_index: usize,
    pub instance_index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupIndex<'a> {
    groups: &'a [TerminalGroup],
}

impl<'a> GroupIndex<'a> {
    pub fn new(groups: &'a [TerminalGroup]) -> Self {
        Self { groups }
    }

    /// Total number of instances
    pub fn len(&self) -> usize {
        self.groups.iter().map(TerminalGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(TerminalGroup::is_empty)
    }

    /// Resolve a flat position; `None` past the last instance
    pub fn resolve(&self, flat_index: usize) -> Option<InstanceLocation> {
        let mut remaining = flat_index;
        for (group_index, group) in self.groups.iter().enumerate() {
            if remaining < group.len() {
                return Some(InstanceLocation {
                    group_index,
                    instance_index: remaining,
                });
            }
            remaining -= group.len();
        }
        None
    }

    /// Flat position of a structured one; `None` if it does not exist
    pub fn flat_index(&self, location: InstanceLocation) -> Option<usize> {
        let group = self.groups.get(location.group_index)?;
        if location.instance_index >= group.len() {
            return None;
        }
        let before: usize = self.groups[..location.group_index]
            .iter()
            .map(TerminalGroup::len)
            .sum();
        Some(before + location.instance_index)
    }

    pub fn locate(&self, id: InstanceId) -> Option<InstanceLocation> {
        self.groups
            .iter()
            .enumerate()
            .find_map(|(group_index, group)| {
                group.position_of(id).map(|instance_index| InstanceLocation {
                    group_index,
                    instance_index,
                })
            })
    }

    pub fn flat_index_of(&self, id: InstanceId) -> Option<usize> {
        self.locate(id).and_then(|location| self.flat_index(location))
    }
}
