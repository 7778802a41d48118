use std::time::Duration;

use termgroups::config::LaunchConfig;
use termgroups::groups::{InstanceProcessEvent, InstanceSeed, TerminalGroupService};
use termgroups::model::InstanceId;

pub fn unstarted(title: &str) -> InstanceSeed {
    InstanceSeed::Unstarted {
        title: title.to_string(),
    }
}

/// Shell snippet as a launch configuration
pub fn sh(title: &str, script: &str) -> LaunchConfig {
    LaunchConfig::command("sh", ["-c", script]).with_title(title)
}

/// Build a service whose groups have the given sizes, using instances without
/// processes. Every group's first instance is its active one and group 0 is
/// active. The event history is cleared before returning.
pub fn service_with_layout(sizes: &[usize]) -> (TerminalGroupService, Vec<Vec<InstanceId>>) {
    let mut service = TerminalGroupService::default();
    let mut layout = Vec::new();
    for &size in sizes {
        service.create_group(unstarted("t"));
        let first = service
            .groups()
            .last()
            .expect("group was just created")
            .instances()[0]
            .id();
        let mut ids = vec![first];
        for _ in 1..size {
            let parent = *ids.last().unwrap();
            ids.push(service.split_instance(parent, unstarted("t")).unwrap());
        }
        service.set_active_instance(first);
        layout.push(ids);
    }
    if !sizes.is_empty() {
        service.set_active_group_by_index(0);
    }
    service.events().clear();
    (service, layout)
}

/// Current layout as instance ids per group
pub fn layout(service: &TerminalGroupService) -> Vec<Vec<InstanceId>> {
    service.snapshot().layout()
}

/// Feed process events into the service until `done` returns true
pub async fn pump_until<F>(
    service: &mut TerminalGroupService,
    timeout: Duration,
    mut done: F,
) -> Vec<InstanceProcessEvent>
where
    F: FnMut(&TerminalGroupService) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while !done(service) {
        let event = tokio::time::timeout_at(deadline, service.next_process_event())
            .await
            .expect("timed out waiting for process events")
            .expect("process event channel closed");
        service.handle_process_event(&event);
        seen.push(event);
    }
    seen
}
