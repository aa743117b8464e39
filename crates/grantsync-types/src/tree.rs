use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Raw tree-shape row as returned by a grant source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub path: String,
}

/// A node of the permission hierarchy, resolved against the share root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Canonical datastore path, `/`-separated, `/` for the root.
    pub logical_path: String,
    pub parent: Option<NodeId>,
    pub physical_path: PathBuf,
}

impl Node {
    pub fn resolve(record: NodeRecord, share_root: &Path) -> Self {
        let relative = record.path.trim_matches('/');
        let physical_path = if relative.is_empty() {
            share_root.to_path_buf()
        } else {
            share_root.join(relative)
        };
        Self {
            id: record.id,
            logical_path: record.path,
            parent: record.parent,
            physical_path,
        }
    }
}

/// In-memory tree shape, built once per run.
///
/// Parent links are followed iteratively and every walk is bounded by the
/// node count, so a corrupt (cyclic) datastore cannot hang a run.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    nodes: BTreeMap<NodeId, Node>,
    root: Option<NodeId>,
}

impl TreeIndex {
    pub fn from_records(records: impl IntoIterator<Item = NodeRecord>, share_root: &Path) -> Self {
        let nodes: BTreeMap<NodeId, Node> = records
            .into_iter()
            .map(|record| (record.id, Node::resolve(record, share_root)))
            .collect();

        // The root is the parentless node with the shortest path.
        let root = nodes
            .values()
            .filter(|node| node.parent.is_none_or(|parent| !nodes.contains_key(&parent)))
            .min_by_key(|node| (path_depth(&node.logical_path), node.id))
            .map(|node| node.id);

        Self { nodes, root }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn root(&self) -> Option<&Node> {
        self.root.and_then(|id| self.nodes.get(&id))
    }

    #[must_use]
    pub fn is_root(&self, id: NodeId) -> bool {
        self.root == Some(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    #[must_use]
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .get(&id)
            .and_then(|node| node.parent)
            .filter(|parent| self.nodes.contains_key(parent))
    }

    /// Ancestors of `id`, nearest first, ending at the root.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut cursor = self.parent_of(id);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                break;
            }
            out.push(current);
            cursor = self.parent_of(current);
        }
        out
    }

    /// The ancestor `distance` steps above `id` (`distance == 0` is `id`).
    #[must_use]
    pub fn ancestor_at(&self, id: NodeId, distance: usize) -> Option<NodeId> {
        if distance == 0 {
            return self.nodes.contains_key(&id).then_some(id);
        }
        self.ancestors(id).get(distance - 1).copied()
    }

    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).len()
    }

    /// Whether `descendant` lies strictly below `ancestor`.
    #[must_use]
    pub fn is_strict_descendant(&self, descendant: NodeId, ancestor: NodeId) -> bool {
        descendant != ancestor && self.ancestors(descendant).contains(&ancestor)
    }
}

fn path_depth(path: &str) -> usize {
    path.split('/').filter(|segment| !segment.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, parent: Option<i64>, path: &str) -> NodeRecord {
        NodeRecord {
            id: NodeId(id),
            parent: parent.map(NodeId),
            path: path.to_owned(),
        }
    }

    fn sample() -> TreeIndex {
        TreeIndex::from_records(
            vec![
                record(1, None, "/"),
                record(2, Some(1), "/Scans"),
                record(3, Some(2), "/Scans/Family"),
                record(4, Some(3), "/Scans/Family/2019"),
                record(5, Some(1), "/Travel"),
            ],
            Path::new("/volume1/photo"),
        )
    }

    #[test]
    fn physical_paths_join_share_root() {
        let tree = sample();
        assert_eq!(
            tree.node(NodeId(1)).unwrap().physical_path,
            PathBuf::from("/volume1/photo")
        );
        assert_eq!(
            tree.node(NodeId(4)).unwrap().physical_path,
            PathBuf::from("/volume1/photo/Scans/Family/2019")
        );
    }

    #[test]
    fn root_and_ancestors() {
        let tree = sample();
        assert_eq!(tree.root().map(|node| node.id), Some(NodeId(1)));
        assert!(tree.is_root(NodeId(1)));
        assert_eq!(
            tree.ancestors(NodeId(4)),
            vec![NodeId(3), NodeId(2), NodeId(1)]
        );
        assert!(tree.ancestors(NodeId(1)).is_empty());
        assert_eq!(tree.depth(NodeId(4)), 3);
        assert_eq!(tree.ancestor_at(NodeId(4), 2), Some(NodeId(2)));
        assert_eq!(tree.ancestor_at(NodeId(4), 0), Some(NodeId(4)));
        assert_eq!(tree.ancestor_at(NodeId(4), 9), None);
    }

    #[test]
    fn descendant_relation_is_strict() {
        let tree = sample();
        assert!(tree.is_strict_descendant(NodeId(4), NodeId(2)));
        assert!(!tree.is_strict_descendant(NodeId(2), NodeId(2)));
        assert!(!tree.is_strict_descendant(NodeId(5), NodeId(2)));
    }

    #[test]
    fn cyclic_parent_links_terminate() {
        let tree = TreeIndex::from_records(
            vec![
                record(1, None, "/"),
                record(2, Some(3), "/a"),
                record(3, Some(2), "/a/b"),
            ],
            Path::new("/share"),
        );
        assert_eq!(tree.ancestors(NodeId(2)), vec![NodeId(3)]);
        assert_eq!(tree.root().map(|node| node.id), Some(NodeId(1)));
    }

    #[test]
    fn dangling_parent_is_not_followed() {
        let tree = TreeIndex::from_records(
            vec![record(1, None, "/"), record(2, Some(99), "/lost")],
            Path::new("/share"),
        );
        assert_eq!(tree.parent_of(NodeId(2)), None);
        assert!(tree.ancestors(NodeId(2)).is_empty());
    }
}
