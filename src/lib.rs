// Terminal groups library - exposes the group service, process handling and
// configuration for the binary and for tests

pub mod config;
pub mod groups;
pub mod model;
pub mod services;
