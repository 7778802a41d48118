//! Terminal groups
//!
//! Terminals are organized as an ordered list of groups, each an ordered list of
//! instances shown side by side. [`TerminalGroupService`] is the entry point; the
//! other types are the pieces it is built from.
//!
//! ## Module Responsibilities
//!
//! - `instance.rs`: one terminal and the process it owns
//! - `group.rs`: ordering and active instance within a group
//! - `collection.rs`: ordering, active group and visibility across groups
//! - `index.rs`: flat instance positions across groups
//! - `service.rs`: operations and change notifications
//! - `snapshot.rs`: serializable view of the layout

pub mod collection;
pub mod group;
pub mod index;
pub mod instance;
mod service;
pub mod snapshot;

pub use collection::GroupCollection;
pub use group::{Side, TerminalGroup};
pub use index::{GroupIndex, InstanceLocation};
pub use instance::TerminalInstance;
pub use service::{InstanceProcessEvent, InstanceSeed, TerminalGroupService};
pub use snapshot::{GroupSnapshot, InstanceSnapshot, LayoutSnapshot};

use crate::model::InstanceId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("no terminal instance with id {0}")]
    InstanceNotFound(InstanceId),
}
