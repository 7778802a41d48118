use serde::{Deserialize, Serialize};

use super::collection::GroupCollection;
use crate::model::{GroupId, InstanceId};
use crate::services::process::ProcessState;

/// Read-only view of the whole layout, for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    pub groups: Vec<GroupSnapshot>,
    pub active_group_index: Option<usize>,
    pub active_instance: Option<InstanceId>,
    /// Instances of the visible group, in display order
    pub visible_instances: Vec<InstanceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub instances: Vec<InstanceSnapshot>,
    pub active_instance_index: usize,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub title: String,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub focused: bool,
}

impl LayoutSnapshot {
    pub(crate) fn capture(collection: &GroupCollection) -> Self {
        let groups: Vec<GroupSnapshot> = collection
            .groups()
            .iter()
            .map(|group| GroupSnapshot {
                id: group.id(),
                instances: group
                    .instances()
                    .iter()
                    .map(|instance| InstanceSnapshot {
                        id: instance.id(),
                        title: instance.title().to_string(),
                        pid: instance.pid(),
                        state: instance.state(),
                        focused: instance.is_focused(),
                    })
                    .collect(),
                active_instance_index: group.active_index(),
                visible: group.is_visible(),
            })
            .collect();

        let visible_instances = groups
            .iter()
            .filter(|group| group.visible)
            .flat_map(|group| group.instances.iter().map(|instance| instance.id))
            .collect();

        Self {
            active_group_index: collection.active_index(),
            active_instance: collection
                .active_group()
                .and_then(|group| group.active_instance_id()),
            visible_instances,
            groups,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.groups.iter().map(|group| group.instances.len()).sum()
    }

    /// Instance ids per group, in order
    pub fn layout(&self) -> Vec<Vec<InstanceId>> {
        self.groups
            .iter()
            .map(|group| group.instances.iter().map(|instance| instance.id).collect())
            .collect()
    }
}
