//! Seam over the access-control tool.

use grantsync_error::Result;
use grantsync_types::{AccessEntry, Effect, Node, Principal, Rights};

/// Reads and mutates the access-control list of a node.
///
/// Positions returned by [`AclGateway::list_entries`] are only valid until
/// the next mutation on the same node: a delete shifts every later entry
/// down by one. Callers must list again before computing another position.
pub trait AclGateway {
    /// Whether the node's physical location exists.
    fn node_exists(&self, node: &Node) -> bool;

    /// Explicit entries first, then inherited entries by increasing level.
    fn list_entries(&self, node: &Node) -> Result<Vec<AccessEntry>>;

    /// Append an explicit (level 0) entry for a user.
    fn add_entry(
        &mut self,
        node: &Node,
        principal: &Principal,
        effect: Effect,
        rights: &Rights,
    ) -> Result<()>;

    /// Remove the explicit entry at `position`.
    fn delete_entry(&mut self, node: &Node, position: usize) -> Result<()>;
}
