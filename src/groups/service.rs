use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use tokio::sync::mpsc;

use super::collection::GroupCollection;
use super::group::{Side, TerminalGroup};
use super::index::{GroupIndex, InstanceLocation};
use super::instance::TerminalInstance;
use super::snapshot::LayoutSnapshot;
use super::GroupError;
use crate::config::{LaunchConfig, TerminalConfig};
use crate::model::control_event::{EventBroadcaster, GroupEvent};
use crate::model::{GroupId, InstanceId};
use crate::services::process::{
    ProcessConfig, ProcessEvent, ProcessEventSink, ProcessGoneNotifier, ProcessHandle,
};

/// A process event tagged with the instance whose process produced it
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceProcessEvent {
    pub instance: InstanceId,
    pub event: ProcessEvent,
}

/// What a new group or split starts from
#[derive(Debug)]
pub enum InstanceSeed {
    /// An instance taken out of this service earlier
    Existing(TerminalInstance),
    /// Launch a process resolved against the terminal defaults
    Launch(LaunchConfig),
    /// Launch a fully specified process
    Process { title: String, config: ProcessConfig },
    /// An instance whose process is not started
    Unstarted { title: String },
}

/// Active pointers captured before an operation, compared afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveState {
    group: Option<GroupId>,
    instance: Option<InstanceId>,
}

/// Structural changes made by one operation
#[derive(Debug, Default)]
struct Changes {
    groups: bool,
    instances: bool,
    disposed: Vec<InstanceId>,
}

/// Owns all terminal groups and coordinates every change to them.
///
/// All mutation goes through `&mut self`. Processes run on tokio tasks and only
/// report back through the instance-tagged event channel, which the owner drains
/// with [`next_process_event`](Self::next_process_event) and feeds into
/// [`handle_process_event`](Self::handle_process_event).
///
/// Notifications are emitted after each operation has completed, structural ones
/// first (`InstanceDisposed`, `GroupsChanged`, `InstancesChanged`), then
/// `ActiveGroupChanged` and `ActiveInstanceChanged` when the active group or
/// instance differs from what it was before the operation.
pub struct TerminalGroupService {
    collection: GroupCollection,
    next_instance_id: usize,
    next_group_id: usize,
    events: EventBroadcaster,
    process_sender: mpsc::UnboundedSender<InstanceProcessEvent>,
    process_receiver: mpsc::UnboundedReceiver<InstanceProcessEvent>,
    gone: ProcessGoneNotifier,
    terminal_config: TerminalConfig,
}

impl TerminalGroupService {
    pub fn new(terminal_config: TerminalConfig) -> Self {
        let (process_sender, process_receiver) = mpsc::unbounded_channel();
        Self {
            collection: GroupCollection::new(),
            next_instance_id: 1,
            next_group_id: 1,
            events: EventBroadcaster::default(),
            process_sender,
            process_receiver,
            gone: ProcessGoneNotifier::global(),
            terminal_config,
        }
    }

    /// Listen for out-of-band process exits on `notifier` instead of the global one
    pub fn with_gone_notifier(mut self, notifier: ProcessGoneNotifier) -> Self {
        self.gone = notifier;
        self
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub fn subscribe(&self) -> std_mpsc::Receiver<GroupEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    fn capture(&self) -> ActiveState {
        ActiveState {
            group: self.collection.active_group().map(TerminalGroup::id),
            instance: self.active_instance_id(),
        }
    }

    /// Bring focus in line with the active pointers and announce what changed
    fn finish(&mut self, before: ActiveState, changes: Changes) {
        self.collection.apply_focus();
        debug_assert_eq!(self.collection.check_invariants(), Ok(()));

        for instance in changes.disposed {
            self.events.emit(GroupEvent::InstanceDisposed { instance });
        }
        if changes.groups {
            self.events.emit(GroupEvent::GroupsChanged);
        }
        if changes.instances {
            self.events.emit(GroupEvent::InstancesChanged);
        }

        let after = self.capture();
        if after.group != before.group {
            tracing::debug!("active group: {:?} -> {:?}", before.group, after.group);
            self.events
                .emit(GroupEvent::ActiveGroupChanged { group: after.group });
        }
        if after.instance != before.instance {
            self.events.emit(GroupEvent::ActiveInstanceChanged {
                instance: after.instance,
            });
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn groups(&self) -> &[TerminalGroup] {
        self.collection.groups()
    }

    pub fn group_count(&self) -> usize {
        self.collection.len()
    }

    pub fn instance_count(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn index(&self) -> GroupIndex<'_> {
        self.collection.index()
    }

    pub fn active_group_index(&self) -> Option<usize> {
        self.collection.active_index()
    }

    pub fn active_group(&self) -> Option<&TerminalGroup> {
        self.collection.active_group()
    }

    pub fn active_instance(&self) -> Option<&TerminalInstance> {
        self.collection
            .active_group()
            .and_then(TerminalGroup::active_instance)
    }

    pub fn active_instance_id(&self) -> Option<InstanceId> {
        self.active_instance().map(TerminalInstance::id)
    }

    pub fn group_for_instance(&self, id: InstanceId) -> Option<&TerminalGroup> {
        self.groups().iter().find(|group| group.contains(id))
    }

    pub fn instance(&self, id: InstanceId) -> Option<&TerminalInstance> {
        self.groups().iter().find_map(|group| group.instance(id))
    }

    /// All instances in flat order
    pub fn instances(&self) -> impl Iterator<Item = &TerminalInstance> {
        self.groups().iter().flat_map(|group| group.instances())
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances().map(TerminalInstance::id).collect()
    }

    /// Flat position of an instance. Asking for an id that does not exist is a
    /// caller bug and reported as an error.
    pub fn flat_index_of(&self, id: InstanceId) -> Result<usize, GroupError> {
        self.index().flat_index_of(id).ok_or_else(|| {
            tracing::error!("flat index requested for unknown instance {}", id);
            GroupError::InstanceNotFound(id)
        })
    }

    pub fn instance_at_flat_index(&self, flat_index: usize) -> Option<&TerminalInstance> {
        let location = self.index().resolve(flat_index)?;
        self.collection
            .get(location.group_index)?
            .instances()
            .get(location.instance_index)
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot::capture(&self.collection)
    }

    fn locate(&self, id: InstanceId) -> Option<InstanceLocation> {
        let location = self.index().locate(id);
        if location.is_none() {
            tracing::debug!("{} no longer exists", id);
        }
        location
    }

    // ------------------------------------------------------------------
    // Instance creation
    // ------------------------------------------------------------------

    /// Create an instance (starting its process when the seed asks for one)
    /// without adding it to any group
    pub fn create_instance(&mut self, seed: InstanceSeed) -> TerminalInstance {
        let (title, config) = match seed {
            InstanceSeed::Existing(instance) => return instance,
            InstanceSeed::Launch(launch) => {
                let title = launch.display_title(&self.terminal_config);
                let config = launch.to_process_config(&self.terminal_config, &title);
                (title, Some(config))
            }
            InstanceSeed::Process { title, config } => (title, Some(config)),
            InstanceSeed::Unstarted { title } => (title, None),
        };

        let id = InstanceId(self.next_instance_id);
        self.next_instance_id += 1;

        let sender = self.process_sender.clone();
        let sink: ProcessEventSink = Arc::new(move |event| {
            let _ = sender.send(InstanceProcessEvent {
                instance: id,
                event,
            });
        });
        let mut process = ProcessHandle::new(sink).with_gone_notifier(self.gone.clone());

        if let Some(config) = config {
            if !process.start(config) {
                tracing::warn!("{} ({}) did not start", id, title);
            }
        }

        tracing::info!("created {} ({})", id, title);
        TerminalInstance::new(id, title, process)
    }

    /// Append a new group holding the seeded instance. The first group becomes
    /// active.
    pub fn create_group(&mut self, seed: InstanceSeed) -> GroupId {
        let before = self.capture();
        let instance = self.create_instance(seed);

        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        tracing::debug!("created {} for {}", id, instance.id());
        self.collection.push(TerminalGroup::new(id, instance));

        self.finish(
            before,
            Changes {
                groups: true,
                instances: true,
                ..Changes::default()
            },
        );
        id
    }

    /// Create an instance right after `parent` in the parent's group and make it
    /// active
    pub fn split_instance(&mut self, parent: InstanceId, seed: InstanceSeed) -> Option<InstanceId> {
        let location = self.locate(parent)?;
        let before = self.capture();
        let instance = self.create_instance(seed);
        let id = instance.id();

        let group = self.collection.get_mut(location.group_index)?;
        let index = group.insert(location.instance_index + 1, instance);
        group.set_active_index(index);
        self.collection.set_active(location.group_index);

        self.finish(
            before,
            Changes {
                instances: true,
                ..Changes::default()
            },
        );
        Some(id)
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    pub fn set_active_group_by_index(&mut self, index: usize) {
        if index >= self.collection.len() {
            tracing::debug!("no group at index {}", index);
            return;
        }
        let before = self.capture();
        if self.collection.set_active(index) {
            self.finish(before, Changes::default());
        }
    }

    pub fn set_active_group_to_next(&mut self) {
        let len = self.collection.len();
        if let Some(active) = self.collection.active_index() {
            self.set_active_group_by_index((active + 1) % len);
        }
    }

    pub fn set_active_group_to_previous(&mut self) {
        let len = self.collection.len();
        if let Some(active) = self.collection.active_index() {
            self.set_active_group_by_index((active + len - 1) % len);
        }
    }

    /// Activate the instance at a flat position, together with its group
    pub fn set_active_instance_by_index(&mut self, flat_index: usize) {
        let Some(location) = self.index().resolve(flat_index) else {
            tracing::debug!("no instance at flat index {}", flat_index);
            return;
        };
        self.activate(location);
    }

    pub fn set_active_instance(&mut self, id: InstanceId) {
        if let Some(location) = self.locate(id) {
            self.activate(location);
        }
    }

    fn activate(&mut self, location: InstanceLocation) {
        let already_active = self.collection.active_index() == Some(location.group_index)
            && self
                .collection
                .get(location.group_index)
                .is_some_and(|group| group.active_index() == location.instance_index);
        if already_active {
            return;
        }

        let before = self.capture();
        self.collection.set_active(location.group_index);
        if let Some(group) = self.collection.get_mut(location.group_index) {
            group.set_active_index(location.instance_index);
        }
        self.finish(before, Changes::default());
    }

    /// Focus the next instance in flat order, wrapping around
    pub fn focus_next_instance(&mut self) {
        self.focus_relative(1);
    }

    pub fn focus_previous_instance(&mut self) {
        self.focus_relative(-1);
    }

    fn focus_relative(&mut self, step: isize) {
        let total = self.instance_count();
        let Some(current) = self
            .active_instance_id()
            .and_then(|id| self.index().flat_index_of(id))
        else {
            return;
        };
        let next = (current as isize + step).rem_euclid(total as isize) as usize;
        self.set_active_instance_by_index(next);
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Take an instance out of its group, dropping the group when it empties
    fn detach(&mut self, id: InstanceId, changes: &mut Changes) -> Option<TerminalInstance> {
        let location = self.locate(id)?;
        let group = self.collection.get_mut(location.group_index)?;
        let instance = group.remove(id)?;
        changes.instances = true;

        if group.is_empty() {
            if let Some((group, was_active)) = self.collection.remove(location.group_index) {
                tracing::debug!(
                    "removed empty {} (was active: {})",
                    group.id(),
                    was_active
                );
            }
            changes.groups = true;
        }
        Some(instance)
    }

    /// Take an instance out of the layout without disposing it
    pub fn detach_instance(&mut self, id: InstanceId) -> Option<TerminalInstance> {
        let before = self.capture();
        let mut changes = Changes::default();
        let instance = self.detach(id, &mut changes)?;
        self.finish(before, changes);
        Some(instance)
    }

    /// Move the group containing `source` to the position of the group
    /// containing `target`
    pub fn move_group(&mut self, source: InstanceId, target: InstanceId) {
        let (Some(from), Some(to)) = (self.locate(source), self.locate(target)) else {
            return;
        };
        self.move_group_to(from.group_index, to.group_index);
    }

    /// Move the group containing `instance` to the end
    pub fn move_group_to_end(&mut self, instance: InstanceId) {
        let Some(from) = self.locate(instance) else {
            return;
        };
        let last = self.collection.len() - 1;
        self.move_group_to(from.group_index, last);
    }

    fn move_group_to(&mut self, from: usize, to: usize) {
        let before = self.capture();
        if self.collection.move_group(from, to) {
            self.finish(
                before,
                Changes {
                    groups: true,
                    instances: true,
                    ..Changes::default()
                },
            );
        }
    }

    /// Place `source` immediately before or after `target`, moving it into the
    /// target's group first if needed. An active `source` stays active.
    pub fn move_instance(&mut self, source: InstanceId, target: InstanceId, side: Side) {
        if source == target {
            return;
        }
        let (Some(from), Some(to)) = (self.locate(source), self.locate(target)) else {
            return;
        };
        let before = self.capture();
        let was_active = before.instance == Some(source);
        let mut changes = Changes {
            instances: true,
            ..Changes::default()
        };

        if from.group_index == to.group_index {
            if let Some(group) = self.collection.get_mut(to.group_index) {
                group.move_instance(source, target, side);
            }
        } else {
            let Some(instance) = self.detach(source, &mut changes) else {
                return;
            };
            // Positions shift when the source group was removed
            let Some(to) = self.index().locate(target) else {
                return;
            };
            if let Some(group) = self.collection.get_mut(to.group_index) {
                group.insert_beside(target, side, instance);
            }
        }

        if was_active {
            if let Some(location) = self.index().locate(source) {
                self.collection.set_active(location.group_index);
                if let Some(group) = self.collection.get_mut(location.group_index) {
                    group.set_active_index(location.instance_index);
                }
            }
        }
        self.finish(before, changes);
    }

    /// Give an instance its own group at the end. No-op when it is already alone.
    pub fn unsplit_instance(&mut self, id: InstanceId) {
        let Some(location) = self.locate(id) else {
            return;
        };
        if self
            .collection
            .get(location.group_index)
            .map_or(true, |group| group.len() < 2)
        {
            return;
        }

        let before = self.capture();
        let mut changes = Changes::default();
        let Some(instance) = self.detach(id, &mut changes) else {
            return;
        };
        let index = self.push_group(instance);
        changes.groups = true;
        if before.instance == Some(id) {
            self.collection.set_active(index);
        }
        self.finish(before, changes);
    }

    fn push_group(&mut self, instance: TerminalInstance) -> usize {
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.collection.push(TerminalGroup::new(id, instance))
    }

    /// Merge instances into one group, the first one listed becoming active.
    ///
    /// The group of the first instance (in the given order) that is alone in its
    /// group receives the others, appended in order; without one a new group is
    /// created. Unknown and repeated ids are skipped.
    pub fn join_instances(&mut self, ids: &[InstanceId]) {
        let mut unique: Vec<InstanceId> = Vec::with_capacity(ids.len());
        for &id in ids {
            if !unique.contains(&id) && self.locate(id).is_some() {
                unique.push(id);
            }
        }
        let Some(&first) = unique.first() else {
            let before = self.capture();
            self.finish(
                before,
                Changes {
                    instances: true,
                    ..Changes::default()
                },
            );
            return;
        };

        let locations: Vec<InstanceLocation> = unique
            .iter()
            .filter_map(|&id| self.index().locate(id))
            .collect();
        let group_index = locations[0].group_index;
        let already_joined = locations.iter().all(|l| l.group_index == group_index)
            && self
                .collection
                .get(group_index)
                .is_some_and(|group| group.len() == unique.len());
        let before = self.capture();
        if already_joined {
            tracing::debug!("instances already form one group");
            self.collection.set_active(group_index);
            if let Some(group) = self.collection.get_mut(group_index) {
                group.set_active_instance(first);
            }
            self.finish(
                before,
                Changes {
                    instances: true,
                    ..Changes::default()
                },
            );
            return;
        }

        let mut changes = Changes {
            instances: true,
            ..Changes::default()
        };

        let candidate = unique.iter().copied().find(|&id| {
            self.group_for_instance(id)
                .is_some_and(|group| group.len() == 1)
        });

        let destination = match candidate {
            Some(candidate) => match self.group_for_instance(candidate) {
                Some(group) => group.id(),
                None => return,
            },
            None => {
                let Some(instance) = self.detach(first, &mut changes) else {
                    return;
                };
                let index = self.push_group(instance);
                changes.groups = true;
                match self.collection.get(index) {
                    Some(group) => group.id(),
                    None => return,
                }
            }
        };

        for &id in &unique {
            if self
                .group_for_instance(id)
                .is_some_and(|group| group.id() == destination)
            {
                continue;
            }
            let Some(instance) = self.detach(id, &mut changes) else {
                continue;
            };
            if let Some(group) = self
                .collection
                .position_of(destination)
                .and_then(|index| self.collection.get_mut(index))
            {
                group.push(instance);
            }
        }

        if let Some(index) = self.collection.position_of(destination) {
            self.collection.set_active(index);
            if let Some(group) = self.collection.get_mut(index) {
                group.set_active_instance(first);
            }
        }
        self.finish(before, changes);
    }

    // ------------------------------------------------------------------
    // Disposal and process events
    // ------------------------------------------------------------------

    /// Remove an instance and kill its process. Returns whether it existed.
    pub fn close_instance(&mut self, id: InstanceId) -> bool {
        let before = self.capture();
        let mut changes = Changes::default();
        let Some(mut instance) = self.detach(id, &mut changes) else {
            return false;
        };
        instance.dispose();
        changes.disposed.push(id);
        tracing::info!("closed {} ({})", id, instance.title());
        self.finish(before, changes);
        true
    }

    /// Wait for the next event from any owned process
    pub async fn next_process_event(&mut self) -> Option<InstanceProcessEvent> {
        self.process_receiver.recv().await
    }

    pub fn try_next_process_event(&mut self) -> Option<InstanceProcessEvent> {
        self.process_receiver.try_recv().ok()
    }

    /// Apply a process event to the layout. An exit closes the instance.
    /// Returns whether the layout changed.
    pub fn handle_process_event(&mut self, event: &InstanceProcessEvent) -> bool {
        match &event.event {
            ProcessEvent::Exit(info) => {
                if self.instance(event.instance).is_none() {
                    tracing::debug!("exit of already closed {}", event.instance);
                    return false;
                }
                tracing::info!(
                    "{} exited (code {:?}, {:?})",
                    event.instance,
                    info.code,
                    info.reason
                );
                self.close_instance(event.instance)
            }
            ProcessEvent::Spawn { pid } => {
                tracing::debug!("{} spawned as pid {}", event.instance, pid);
                false
            }
            ProcessEvent::Stdout(_) | ProcessEvent::Stderr(_) | ProcessEvent::Message(_) => false,
        }
    }

    /// Close every instance, giving each process up to `timeout` to exit
    pub async fn shutdown(&mut self, timeout: Duration) {
        let ids = self.instance_ids();
        if ids.is_empty() {
            return;
        }
        tracing::info!("shutting down {} terminals", ids.len());

        let before = self.capture();
        let mut changes = Changes::default();
        let mut closed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut instance) = self.detach(id, &mut changes) {
                instance.dispose();
                changes.disposed.push(id);
                closed.push(instance);
            }
        }
        self.finish(before, changes);

        for instance in &closed {
            instance.process().wait_for_exit(timeout).await;
        }
    }
}

impl Default for TerminalGroupService {
    fn default() -> Self {
        Self::new(TerminalConfig::default())
    }
}

impl std::fmt::Debug for TerminalGroupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalGroupService")
            .field("collection", &self.collection)
            .field("events", &self.events)
            .finish()
    }
}
