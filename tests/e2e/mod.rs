pub mod group_scenarios;
pub mod invariants;
#[cfg(unix)]
pub mod process_lifecycle;
