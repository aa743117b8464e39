//! In-memory [`GrantSource`] with the same filtering as the SQLite one.

use std::collections::{BTreeMap, BTreeSet};

use grantsync_core::source::{GrantRecord, GrantSource};
use grantsync_core::sqlite_source::SourceFilter;
use grantsync_error::{Result, SyncError};
use grantsync_types::{NodeId, NodeRecord, Principal};

#[derive(Debug, Clone, Default)]
pub struct MemoryGrantSource {
    nodes: BTreeMap<NodeId, NodeRecord>,
    /// Raw level codes, unvalidated, like the datastore column.
    grants: BTreeMap<NodeId, BTreeMap<Principal, i64>>,
    principals: BTreeSet<Principal>,
    filter: SourceFilter,
    unavailable: bool,
}

impl MemoryGrantSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filter(mut self, filter: SourceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn add_node(&mut self, id: NodeId, parent: Option<NodeId>, path: impl Into<String>) {
        self.nodes.insert(
            id,
            NodeRecord {
                id,
                parent,
                path: path.into(),
            },
        );
    }

    pub fn add_principal(&mut self, name: impl Into<Principal>) {
        self.principals.insert(name.into());
    }

    /// Store a raw grant. The principal becomes known as well.
    pub fn set_grant(&mut self, node: NodeId, principal: impl Into<Principal>, code: i64) {
        let principal = principal.into();
        self.principals.insert(principal.clone());
        self.grants.entry(node).or_default().insert(principal, code);
    }

    /// Make every query fail, as an unreachable datastore would.
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(SyncError::DatastoreUnavailable {
                path: "memory".into(),
                detail: "source marked unavailable".to_owned(),
            });
        }
        Ok(())
    }
}

impl GrantSource for MemoryGrantSource {
    fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.check_available()?;
        Ok(self.nodes.values().cloned().collect())
    }

    fn list_granted_nodes(&self) -> Result<Vec<(NodeId, String)>> {
        self.check_available()?;
        Ok(self
            .grants
            .iter()
            .filter(|(_, grants)| grants.values().any(|code| *code > 0))
            .filter_map(|(id, _)| self.nodes.get(id))
            .filter(|record| !self.filter.is_transient_path(&record.path))
            .map(|record| (record.id, record.path.clone()))
            .collect())
    }

    fn get_grants(&self, node: NodeId) -> Result<Vec<GrantRecord>> {
        self.check_available()?;
        Ok(self
            .grants
            .get(&node)
            .into_iter()
            .flatten()
            .filter(|(_, code)| **code > 0)
            .map(|(principal, code)| GrantRecord::new(principal.clone(), *code))
            .collect())
    }

    fn get_logical_path(&self, node: NodeId) -> Result<String> {
        self.check_available()?;
        self.nodes
            .get(&node)
            .map(|record| record.path.clone())
            .ok_or(SyncError::UnknownNode { node_id: node.get() })
    }

    fn list_all_principals(&self) -> Result<Vec<Principal>> {
        self.check_available()?;
        Ok(self
            .principals
            .iter()
            .filter(|principal| !self.filter.is_excluded_principal(principal.as_str()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_match_sqlite_source() {
        let mut source = MemoryGrantSource::new();
        source.add_node(NodeId(1), None, "/");
        source.add_node(NodeId(2), Some(NodeId(1)), "/@eaDir");
        source.add_node(NodeId(3), Some(NodeId(1)), "/Scans");
        source.set_grant(NodeId(2), "bonzac", 1);
        source.set_grant(NodeId(3), "bonzac", 1);
        source.set_grant(NodeId(3), "admin", 15);
        source.set_grant(NodeId(1), "valentin", 0);

        let granted = source.list_granted_nodes().unwrap();
        assert_eq!(granted, vec![(NodeId(3), "/Scans".to_owned())]);
        assert!(source.get_grants(NodeId(1)).unwrap().is_empty());

        let principals = source.list_all_principals().unwrap();
        assert_eq!(
            principals,
            vec![Principal::from("bonzac"), Principal::from("valentin")]
        );
    }

    #[test]
    fn unavailable_source_fails_every_query() {
        let mut source = MemoryGrantSource::new();
        source.set_unavailable(true);
        let err = source.list_nodes().unwrap_err();
        assert!(err.is_fatal());
    }
}
