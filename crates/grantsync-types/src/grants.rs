use std::collections::{BTreeMap, BTreeSet};

use crate::{NodeId, PermissionLevel, Principal, TreeIndex};

/// System and service identities that are never reconciled.
pub const DEFAULT_EXCLUDED_PRINCIPALS: [&str; 8] = [
    "admin",
    "guest",
    "root",
    "system",
    "everyone",
    "http",
    "PhotoStation",
    "synofoto",
];

/// Desired state: grant levels per node and principal.
///
/// Only levels above `None` are stored; a missing entry reads as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantTable {
    by_node: BTreeMap<NodeId, BTreeMap<Principal, PermissionLevel>>,
}

impl GrantTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, principal: Principal, level: PermissionLevel) {
        if level.is_granted() {
            self.by_node.entry(node).or_default().insert(principal, level);
        }
    }

    #[must_use]
    pub fn level(&self, node: NodeId, principal: &Principal) -> PermissionLevel {
        self.by_node
            .get(&node)
            .and_then(|grants| grants.get(principal))
            .copied()
            .unwrap_or(PermissionLevel::None)
    }

    #[must_use]
    pub fn has_grant(&self, node: NodeId, principal: &Principal) -> bool {
        self.level(node, principal).is_granted()
    }

    /// Principals granted on `node`, in name order.
    pub fn granted_on(&self, node: NodeId) -> impl Iterator<Item = (&Principal, PermissionLevel)> {
        self.by_node
            .get(&node)
            .into_iter()
            .flat_map(|grants| grants.iter().map(|(principal, level)| (principal, *level)))
    }

    /// Nodes carrying at least one grant, in id order.
    #[must_use]
    pub fn granted_nodes(&self) -> Vec<NodeId> {
        self.by_node.keys().copied().collect()
    }

    /// Whether `principal` holds a grant on any node.
    #[must_use]
    pub fn holds_any_grant(&self, principal: &Principal) -> bool {
        self.by_node
            .values()
            .any(|grants| grants.contains_key(principal))
    }

    /// Whether `principal` holds a grant on some node strictly below `node`.
    #[must_use]
    pub fn holds_grant_below(&self, tree: &TreeIndex, node: NodeId, principal: &Principal) -> bool {
        self.by_node.iter().any(|(candidate, grants)| {
            grants.contains_key(principal) && tree.is_strict_descendant(*candidate, node)
        })
    }

    #[must_use]
    pub fn principals_with_grants(&self) -> BTreeSet<Principal> {
        self.by_node
            .values()
            .flat_map(|grants| grants.keys().cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_node.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

/// Known principals together with the exclusion set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalRoster {
    known: BTreeSet<Principal>,
    excluded: BTreeSet<Principal>,
}

impl PrincipalRoster {
    pub fn new(
        known: impl IntoIterator<Item = Principal>,
        excluded: impl IntoIterator<Item = Principal>,
    ) -> Self {
        let excluded: BTreeSet<Principal> = excluded.into_iter().collect();
        let known = known
            .into_iter()
            .filter(|principal| !excluded.contains(principal))
            .collect();
        Self { known, excluded }
    }

    /// Roster using [`DEFAULT_EXCLUDED_PRINCIPALS`] plus `extra_excluded`.
    pub fn with_default_exclusions<S: AsRef<str>>(
        known: impl IntoIterator<Item = Principal>,
        extra_excluded: &[S],
    ) -> Self {
        let excluded = DEFAULT_EXCLUDED_PRINCIPALS
            .iter()
            .map(|name| Principal::from(*name))
            .chain(extra_excluded.iter().map(|name| Principal::from(name.as_ref())));
        Self::new(known, excluded)
    }

    #[must_use]
    pub fn is_excluded(&self, principal: &Principal) -> bool {
        self.excluded.contains(principal)
    }

    /// Known, non-excluded principals in name order.
    pub fn known(&self) -> impl Iterator<Item = &Principal> {
        self.known.iter()
    }

    #[must_use]
    pub fn contains(&self, principal: &Principal) -> bool {
        self.known.contains(principal)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
