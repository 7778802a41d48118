use crate::common::fixtures::{layout, service_with_layout, unstarted};
use termgroups::groups::{GroupError, Side};
use termgroups::model::control_event::GroupEvent;
use termgroups::model::InstanceId;

/// Moving the first instance of the middle group in front of group 0's only
/// instance leaves the middle group with one instance
#[test]
fn test_move_instance_into_front_group() {
    let (mut service, ids) = service_with_layout(&[1, 2, 1]);
    service.set_active_group_by_index(1);

    let moved = ids[1][0];
    service.move_instance(moved, ids[0][0], Side::Before);

    let groups = layout(&service);
    assert_eq!(groups[0], vec![moved, ids[0][0]]);
    assert_eq!(groups[1].len(), 1);
    assert_eq!(groups[1], vec![ids[1][1]]);
    assert_eq!(groups.len(), 3);
}

#[test]
fn test_join_three_with_lonely_middle() {
    let (mut service, ids) = service_with_layout(&[2, 1]);
    let (a, c) = (ids[0][0], ids[0][1]);
    let b = ids[1][0];

    service.join_instances(&[a, b, c]);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.groups.len(), 1);
    let mut members = snapshot.layout()[0].clone();
    members.sort();
    let mut expected = vec![a, b, c];
    expected.sort();
    assert_eq!(members, expected);
    assert_eq!(snapshot.active_instance, Some(a));
    assert_eq!(snapshot.visible_instances.len(), 3);
}

#[test]
fn test_unsplit_alone_changes_nothing() {
    let (mut service, ids) = service_with_layout(&[1, 3]);
    let before = service.snapshot();

    service.unsplit_instance(ids[0][0]);

    assert_eq!(service.snapshot(), before);
    assert!(service.events().is_empty());
}

#[test]
fn test_unsplit_moves_instance_to_new_last_group() {
    let (mut service, ids) = service_with_layout(&[3]);
    service.set_active_instance(ids[0][1]);
    service.events().clear();

    service.unsplit_instance(ids[0][1]);

    assert_eq!(
        layout(&service),
        vec![vec![ids[0][0], ids[0][2]], vec![ids[0][1]]]
    );
    // The active instance keeps focus in its new group
    assert_eq!(service.active_group_index(), Some(1));
    assert!(service.events().has_match("groups:changed"));
    assert!(service.events().has_match("groups:active_changed"));
}

#[test]
fn test_closing_active_last_group_selects_new_last() {
    let (mut service, ids) = service_with_layout(&[1, 1, 1, 1]);
    service.set_active_group_by_index(3);

    service.close_instance(ids[3][0]);
    assert_eq!(service.active_group_index(), Some(2));

    service.close_instance(ids[2][0]);
    assert_eq!(service.active_group_index(), Some(1));
    let snapshot = service.snapshot();
    assert_eq!(snapshot.visible_instances, vec![ids[1][0]]);
    assert!(snapshot.groups[1].instances[0].focused);
}

#[test]
fn test_notifications_fire_after_mutation() {
    let (mut service, ids) = service_with_layout(&[1, 1]);
    let receiver = service.subscribe();

    service.close_instance(ids[0][0]);

    let received: Vec<GroupEvent> = receiver.try_iter().collect();
    assert_eq!(
        received.first(),
        Some(&GroupEvent::InstanceDisposed {
            instance: ids[0][0]
        })
    );
    assert!(received.contains(&GroupEvent::GroupsChanged));
    assert!(received.contains(&GroupEvent::ActiveGroupChanged {
        group: Some(service.groups()[0].id())
    }));
    assert_eq!(service.group_count(), 1);
}

#[test]
fn test_dropped_subscriber_is_pruned() {
    let (mut service, _ids) = service_with_layout(&[1]);
    let receiver = service.subscribe();
    assert_eq!(service.events().subscriber_count(), 1);
    drop(receiver);

    service.create_group(unstarted("late"));
    assert_eq!(service.events().subscriber_count(), 0);
}

#[test]
fn test_stale_ids_are_benign() {
    let (mut service, ids) = service_with_layout(&[2]);
    let gone = ids[0][1];
    service.close_instance(gone);
    service.events().clear();

    service.move_instance(gone, ids[0][0], Side::After);
    service.move_group(gone, ids[0][0]);
    service.unsplit_instance(gone);
    assert!(service.split_instance(gone, unstarted("x")).is_none());
    assert!(!service.close_instance(gone));
    assert!(service.events().is_empty());

    // Joining still announces the instance list, but nothing moves
    service.join_instances(&[gone]);
    assert_eq!(service.events().drain(), vec![GroupEvent::InstancesChanged]);
    assert_eq!(layout(&service), vec![vec![ids[0][0]]]);
    assert_eq!(
        service.flat_index_of(gone),
        Err(GroupError::InstanceNotFound(gone))
    );
}

#[test]
fn test_snapshot_serializes_for_view_layer() {
    let (service, ids) = service_with_layout(&[2, 1]);
    let json = serde_json::to_value(service.snapshot()).unwrap();

    assert_eq!(json["active_group_index"], 0);
    assert_eq!(json["active_instance"], ids[0][0].0);
    assert_eq!(json["groups"][0]["instances"][1]["state"], "not_started");
    assert_eq!(json["groups"][1]["visible"], false);
    assert_eq!(
        json["visible_instances"],
        serde_json::json!([ids[0][0].0, ids[0][1].0])
    );
}

#[test]
fn test_ids_are_never_reused() {
    let (mut service, ids) = service_with_layout(&[1]);
    service.close_instance(ids[0][0]);
    service.create_group(unstarted("again"));

    let new_id = service.instance_ids()[0];
    assert_ne!(new_id, ids[0][0]);
    assert!(new_id > InstanceId(ids[0][0].0));
}
