//! Test harness for the grantsync engine.
//!
//! - [`MemoryGrantSource`]: in-memory datastore with the SQLite source's
//!   filtering rules
//! - [`SimulatedAclTree`]: inheritance-evaluating ACL tree acting as both
//!   gateway and probe, with fault injection and a call log
//! - [`invariants`]: post-run checks over a simulated tree
//! - [`ScenarioBuilder`]: trees declared by path

pub mod invariants;
pub mod memory_source;
pub mod scenario;
pub mod simulated;

pub use invariants::{Rule, Violation, check_reconciled, check_tree_wide};
pub use memory_source::MemoryGrantSource;
pub use scenario::{Scenario, ScenarioBuilder, photo_library};
pub use simulated::{FaultOp, GatewayCall, SimulatedAclTree, StoredEntry};
