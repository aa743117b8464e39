//! Per-run view of the desired state, built once from a [`GrantSource`].

use std::path::Path;

use grantsync_error::Result;
use grantsync_types::{GrantTable, NodeId, PermissionLevel, Principal, PrincipalRoster, TreeIndex};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::source::GrantSource;

/// A grant dropped because its level code is not a known encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedGrant {
    pub node_id: NodeId,
    pub principal: Principal,
    pub code: i64,
    pub reason: String,
}

/// Tree shape, grant table and principal roster for one run.
#[derive(Debug, Clone, Default)]
pub struct GrantSnapshot {
    pub tree: TreeIndex,
    pub grants: GrantTable,
    pub roster: PrincipalRoster,
    /// Nodes with at least one grant, as listed by the source.
    pub granted_nodes: Vec<NodeId>,
    pub rejected: Vec<RejectedGrant>,
}

impl GrantSnapshot {
    /// Load everything a run needs. Source errors propagate; grants with
    /// unknown level codes are recorded in `rejected` and skipped.
    pub fn load<S: GrantSource + ?Sized, N: AsRef<str>>(
        source: &S,
        share_root: &Path,
        excluded_principals: &[N],
    ) -> Result<Self> {
        let tree = TreeIndex::from_records(source.list_nodes()?, share_root);

        let mut grants = GrantTable::new();
        let mut granted_nodes = Vec::new();
        let mut rejected = Vec::new();
        for (node_id, path) in source.list_granted_nodes()? {
            granted_nodes.push(node_id);
            for record in source.get_grants(node_id)? {
                match PermissionLevel::decode(node_id, &record.principal, record.level_code) {
                    Ok(level) => grants.insert(node_id, record.principal, level),
                    Err(err) => {
                        warn!(
                            node_id = %node_id,
                            path = %path,
                            principal = %record.principal,
                            code = record.level_code,
                            "rejecting grant with unrecognized level"
                        );
                        rejected.push(RejectedGrant {
                            node_id,
                            principal: record.principal,
                            code: record.level_code,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        let roster =
            PrincipalRoster::with_default_exclusions(source.list_all_principals()?, excluded_principals);

        info!(
            nodes = tree.len(),
            granted_nodes = granted_nodes.len(),
            grants = grants.len(),
            principals = roster.len(),
            rejected = rejected.len(),
            "grant snapshot loaded"
        );

        Ok(Self {
            tree,
            grants,
            roster,
            granted_nodes,
            rejected,
        })
    }

    /// Granted nodes ordered parent-before-child: by depth, then id. Nodes
    /// missing from the tree sort last, by id.
    #[must_use]
    pub fn ordered_granted_nodes(&self) -> Vec<NodeId> {
        let mut ordered = self.granted_nodes.clone();
        ordered.sort_by_key(|id| {
            let depth = self
                .tree
                .node(*id)
                .map_or(usize::MAX, |_| self.tree.depth(*id));
            (depth, *id)
        });
        ordered.dedup();
        ordered
    }
}
