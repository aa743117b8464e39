//! Domain model shared by the grantsync reconciler, auditor and adapters.
//!
//! Everything here is plain data: identifiers, permission levels, typed
//! access-control entries, and the two per-run indexes (`TreeIndex`,
//! `GrantTable`) that the engine threads through its calls.

mod entry;
mod grants;
mod ids;
mod level;
mod tree;

pub use entry::{AccessEntry, ActualAccess, Classification, Effect, Rights, Subject};
pub use grants::{GrantTable, PrincipalRoster, DEFAULT_EXCLUDED_PRINCIPALS};
pub use ids::{NodeId, Principal};
pub use level::PermissionLevel;
pub use tree::{Node, NodeRecord, TreeIndex};
