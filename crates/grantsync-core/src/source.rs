//! Read-only seam over the permission datastore.

use grantsync_error::Result;
use grantsync_types::{NodeId, NodeRecord, Principal};
use serde::{Deserialize, Serialize};

/// A stored grant before its level code has been decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub principal: Principal,
    pub level_code: i64,
}

impl GrantRecord {
    pub fn new(principal: impl Into<Principal>, level_code: i64) -> Self {
        Self {
            principal: principal.into(),
            level_code,
        }
    }
}

/// Accessor over the grant datastore. Implementations never write.
pub trait GrantSource {
    /// Every node of the hierarchy, granted or not. Used to build the
    /// `TreeIndex` once per run.
    fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Nodes with at least one grant above `none`, excluding transient and
    /// system paths, in id order.
    fn list_granted_nodes(&self) -> Result<Vec<(NodeId, String)>>;

    /// Grants on `node` whose stored level is above `none`.
    fn get_grants(&self, node: NodeId) -> Result<Vec<GrantRecord>>;

    fn get_logical_path(&self, node: NodeId) -> Result<String>;

    /// Every known principal, minus the system/service exclusion set.
    fn list_all_principals(&self) -> Result<Vec<Principal>>;
}
