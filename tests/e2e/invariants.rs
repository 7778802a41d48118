//! Property tests: random operation sequences never break the layout invariants.

use crate::common::fixtures::unstarted;
use proptest::prelude::*;
use termgroups::groups::{Side, TerminalGroupService};
use termgroups::model::InstanceId;

#[derive(Debug, Clone)]
enum Op {
    CreateGroup,
    Split(usize),
    Close(usize),
    ActivateGroup(usize),
    ActivateInstance(usize),
    MoveGroup(usize, usize),
    MoveInstance(usize, usize, bool),
    Unsplit(usize),
    Join(Vec<usize>),
    FocusNext,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::CreateGroup),
        any::<usize>().prop_map(Op::Split),
        any::<usize>().prop_map(Op::Close),
        (0usize..8).prop_map(Op::ActivateGroup),
        (0usize..16).prop_map(Op::ActivateInstance),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::MoveGroup(a, b)),
        (any::<usize>(), any::<usize>(), any::<bool>())
            .prop_map(|(a, b, before)| Op::MoveInstance(a, b, before)),
        any::<usize>().prop_map(Op::Unsplit),
        prop::collection::vec(any::<usize>(), 0..4).prop_map(Op::Join),
        Just(Op::FocusNext),
    ]
}

/// Pick an existing instance by index, or a stale id when there are none
fn pick(service: &TerminalGroupService, n: usize) -> InstanceId {
    let ids = service.instance_ids();
    if ids.is_empty() {
        InstanceId(usize::MAX)
    } else {
        ids[n % ids.len()]
    }
}

fn apply(service: &mut TerminalGroupService, op: &Op) {
    match op {
        Op::CreateGroup => {
            service.create_group(unstarted("p"));
        }
        Op::Split(n) => {
            let parent = pick(service, *n);
            service.split_instance(parent, unstarted("p"));
        }
        Op::Close(n) => {
            let id = pick(service, *n);
            service.close_instance(id);
        }
        Op::ActivateGroup(i) => service.set_active_group_by_index(*i),
        Op::ActivateInstance(i) => service.set_active_instance_by_index(*i),
        Op::MoveGroup(a, b) => {
            let (a, b) = (pick(service, *a), pick(service, *b));
            service.move_group(a, b);
        }
        Op::MoveInstance(a, b, before) => {
            let (a, b) = (pick(service, *a), pick(service, *b));
            let side = if *before { Side::Before } else { Side::After };
            service.move_instance(a, b, side);
        }
        Op::Unsplit(n) => {
            let id = pick(service, *n);
            service.unsplit_instance(id);
        }
        Op::Join(picks) => {
            let ids: Vec<InstanceId> = picks.iter().map(|n| pick(service, *n)).collect();
            service.join_instances(&ids);
        }
        Op::FocusNext => service.focus_next_instance(),
    }
}

fn check(service: &TerminalGroupService) -> Result<(), TestCaseError> {
    let snapshot = service.snapshot();

    // Active group present iff there are groups, and always in range
    match snapshot.active_group_index {
        None => prop_assert!(snapshot.groups.is_empty()),
        Some(index) => prop_assert!(index < snapshot.groups.len()),
    }

    // No empty groups, exactly one visible group, focus only on the active instance
    prop_assert!(snapshot.groups.iter().all(|g| !g.instances.is_empty()));
    let visible = snapshot.groups.iter().filter(|g| g.visible).count();
    prop_assert_eq!(visible, usize::from(!snapshot.groups.is_empty()));
    let focused: Vec<InstanceId> = snapshot
        .groups
        .iter()
        .flat_map(|g| g.instances.iter().filter(|i| i.focused).map(|i| i.id))
        .collect();
    prop_assert_eq!(focused, snapshot.active_instance.into_iter().collect::<Vec<_>>());

    // Active instance belongs to the active group
    if let (Some(index), Some(instance)) = (snapshot.active_group_index, snapshot.active_instance) {
        prop_assert!(snapshot.groups[index].instances.iter().any(|i| i.id == instance));
    }

    // Flat order round-trips through the index
    let index = service.index();
    for (flat, id) in service.instance_ids().into_iter().enumerate() {
        prop_assert_eq!(service.flat_index_of(id), Ok(flat));
        let location = index.resolve(flat).unwrap();
        prop_assert_eq!(index.flat_index(location), Some(flat));
    }
    prop_assert_eq!(index.resolve(snapshot.instance_count()), None);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_layout_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut service = TerminalGroupService::default();
        for op in &ops {
            apply(&mut service, op);
            check(&service)?;
        }
    }

    #[test]
    fn prop_instance_count_tracks_creates_and_closes(creates in 1usize..8, closes in 0usize..8) {
        let mut service = TerminalGroupService::default();
        for _ in 0..creates {
            service.create_group(unstarted("p"));
        }
        let mut closed = 0;
        for n in 0..closes {
            let id = pick(&service, n);
            if service.close_instance(id) {
                closed += 1;
            }
        }
        prop_assert_eq!(service.instance_count(), creates - closed);
        prop_assert_eq!(service.active_group_index().is_none(), service.group_count() == 0);
    }
}
