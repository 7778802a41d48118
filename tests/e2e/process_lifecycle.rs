//! Real child processes driven through the group service (Unix only, uses `sh`).

use std::time::{Duration, Instant};

use crate::common::fixtures::{pump_until, sh};
use crate::common::tracing::init_tracing_from_env;
use termgroups::config::TerminalConfig;
use termgroups::groups::{InstanceSeed, TerminalGroupService};
use termgroups::model::control_event::GroupEvent;
use termgroups::services::process::{
    ChildGone, ExitReason, ProcessConfig, ProcessEvent, ProcessGoneNotifier, ProcessHandle,
    ProcessState,
};

const PATIENCE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_exited_process_closes_its_instance() {
    init_tracing_from_env();
    let mut service = TerminalGroupService::default();
    service.create_group(InstanceSeed::Launch(sh("greeter", "echo hello from group")));
    let id = service.instance_ids()[0];
    assert_eq!(service.instance(id).unwrap().state(), ProcessState::Running);

    let events = pump_until(&mut service, PATIENCE, |s| s.is_empty()).await;

    let stdout: String = events
        .iter()
        .filter_map(|e| match &e.event {
            ProcessEvent::Stdout(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stdout, "hello from group\n");
    assert!(matches!(
        events.first().map(|e| &e.event),
        Some(ProcessEvent::Spawn { .. })
    ));
    assert!(events.iter().all(|e| e.instance == id));
    assert!(service.events().has_match("instances:disposed"));
    assert_eq!(service.active_group_index(), None);
}

#[tokio::test]
async fn test_split_sibling_exit_keeps_group() {
    let mut service = TerminalGroupService::default();
    service.create_group(InstanceSeed::Launch(sh("long", "sleep 30")));
    let long = service.instance_ids()[0];
    let short = service
        .split_instance(long, InstanceSeed::Launch(sh("short", "exit 3")))
        .unwrap();
    assert_eq!(service.active_instance_id(), Some(short));

    let events = pump_until(&mut service, PATIENCE, |s| s.instance(short).is_none()).await;
    let exit = events
        .iter()
        .find_map(|e| match &e.event {
            ProcessEvent::Exit(info) if e.instance == short => Some(info.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(exit.code, Some(3));

    assert_eq!(service.group_count(), 1);
    assert_eq!(service.active_instance_id(), Some(long));

    service.shutdown(Duration::from_secs(2)).await;
    assert!(service.is_empty());
}

#[tokio::test]
async fn test_spawn_failure_disposes_instance() {
    let mut service = TerminalGroupService::default();
    let mut launch = sh("broken", "true");
    launch.program = Some("/definitely/not/a/program".into());
    service.create_group(InstanceSeed::Launch(launch));

    let events = pump_until(&mut service, PATIENCE, |s| s.is_empty()).await;
    assert!(events.iter().any(|e| matches!(
        &e.event,
        ProcessEvent::Exit(info) if matches!(info.reason, ExitReason::SpawnFailed(_))
    )));
}

#[tokio::test]
async fn test_gone_notification_closes_instance_once() {
    let notifier = ProcessGoneNotifier::new();
    let mut service =
        TerminalGroupService::new(TerminalConfig::default()).with_gone_notifier(notifier.clone());
    service.create_group(InstanceSeed::Launch(sh("victim", "sleep 30")));
    let id = service.instance_ids()[0];
    let service_name = service
        .instance(id)
        .unwrap()
        .process()
        .service_name()
        .unwrap()
        .to_string();

    notifier.notify(ChildGone {
        service_name,
        pid: None,
        code: None,
        reason: "killed by supervisor".into(),
    });

    let events = pump_until(&mut service, PATIENCE, |s| s.is_empty()).await;
    let exits: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.event, ProcessEvent::Exit(_)))
        .collect();
    assert_eq!(exits.len(), 1);
    assert!(matches!(
        &exits[0].event,
        ProcessEvent::Exit(info) if info.reason == ExitReason::Gone("killed by supervisor".into())
    ));

    // Closing the instance killed the real process; its exit is swallowed
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Some(event) = service.try_next_process_event() {
        assert!(!matches!(event.event, ProcessEvent::Exit(_)));
    }
    assert_eq!(
        service
            .events()
            .peek()
            .iter()
            .filter(|e| matches!(e, GroupEvent::InstanceDisposed { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_shutdown_bounds_wait_per_process() {
    let mut service = TerminalGroupService::default();
    service.create_group(InstanceSeed::Launch(sh("a", "sleep 30")));
    service.create_group(InstanceSeed::Launch(sh("b", "trap '' TERM; sleep 30")));

    let started = Instant::now();
    service.shutdown(Duration::from_millis(200)).await;

    assert!(service.is_empty());
    assert!(started.elapsed() < PATIENCE);
    assert_eq!(
        service
            .events()
            .peek()
            .iter()
            .filter(|e| e.matches("instances:disposed"))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_wait_for_exit_timeout_issues_single_kill() {
    let (mut handle, mut events) = ProcessHandle::channel();
    assert!(handle.start(ProcessConfig::new("stubborn", "sh").with_args(["-c", "sleep 30"])));

    let started = Instant::now();
    handle.wait_for_exit(Duration::from_millis(100)).await;
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(handle.kill_requests(), 1);

    let exit = tokio::time::timeout(PATIENCE, async {
        while let Some(event) = events.recv().await {
            if let ProcessEvent::Exit(info) = event {
                return Some(info);
            }
        }
        None
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(exit.reason, ExitReason::Killed);
    assert_eq!(exit.signal, "unknown");

    // Further waits are no-ops
    handle.wait_for_exit(Duration::from_millis(100)).await;
    assert_eq!(handle.kill_requests(), 1);
}
