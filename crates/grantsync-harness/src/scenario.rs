//! Path-driven scenario construction for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use grantsync_core::GrantSnapshot;
use grantsync_types::NodeId;

use crate::memory_source::MemoryGrantSource;
use crate::simulated::SimulatedAclTree;

/// Share root used by every scenario; never touched on disk.
pub const SCENARIO_SHARE_ROOT: &str = "/volume1/photo";

/// Builds a folder tree by logical path. Ids are assigned in insertion order
/// starting at 1; a folder's parent is the longest already-declared prefix.
#[derive(Debug, Default)]
pub struct ScenarioBuilder {
    source: MemoryGrantSource,
    ids: BTreeMap<String, NodeId>,
    next_id: i64,
}

impl ScenarioBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Declare a folder. `/` is the root.
    #[must_use]
    pub fn folder(mut self, path: &str) -> Self {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let parent = parent_path(path).and_then(|parent| self.ids.get(parent).copied());
        self.source.add_node(id, parent, path);
        self.ids.insert(path.to_owned(), id);
        self
    }

    /// Declare several folders in order.
    #[must_use]
    pub fn folders(self, paths: &[&str]) -> Self {
        paths.iter().fold(self, |builder, path| builder.folder(path))
    }

    /// Store a raw grant on a declared folder; unknown paths are ignored.
    #[must_use]
    pub fn grant(mut self, path: &str, principal: &str, code: i64) -> Self {
        if let Some(id) = self.ids.get(path).copied() {
            self.source.set_grant(id, principal, code);
        }
        self
    }

    #[must_use]
    pub fn principal(mut self, name: &str) -> Self {
        self.source.add_principal(name);
        self
    }

    #[must_use]
    pub fn build(self) -> Scenario {
        Scenario {
            source: self.source,
            ids: self.ids,
            share_root: PathBuf::from(SCENARIO_SHARE_ROOT),
        }
    }
}

fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&trimmed[..index]),
        None => None,
    }
}

#[derive(Debug)]
pub struct Scenario {
    pub source: MemoryGrantSource,
    ids: BTreeMap<String, NodeId>,
    share_root: PathBuf,
}

impl Scenario {
    /// Id of a declared folder.
    ///
    /// # Panics
    ///
    /// Panics when `path` was never declared; scenarios are test fixtures.
    #[must_use]
    pub fn id(&self, path: &str) -> NodeId {
        match self.ids.get(path) {
            Some(id) => *id,
            None => panic!("folder {path} not declared in scenario"),
        }
    }

    #[must_use]
    pub fn share_root(&self) -> &Path {
        &self.share_root
    }

    /// Snapshot with the built-in exclusion set only.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory source was marked unavailable.
    #[must_use]
    pub fn snapshot(&self) -> GrantSnapshot {
        match GrantSnapshot::load(&self.source, &self.share_root, &[] as &[&str]) {
            Ok(snapshot) => snapshot,
            Err(err) => panic!("scenario snapshot failed: {err}"),
        }
    }

    /// Fresh simulated tree for `snapshot`, with no entries at all.
    #[must_use]
    pub fn simulated(&self, snapshot: &GrantSnapshot) -> SimulatedAclTree {
        SimulatedAclTree::new(snapshot.tree.clone())
    }
}

/// The photo library used throughout the scenario tests:
///
/// ```text
/// /
/// ├── Scans
/// │   └── Family        bonzac=view
/// ├── Trips
/// │   ├── 2019          valentin=view
/// │   ├── 2020          valentin=download
/// │   └── 2021          valentin=manage
/// └── Immich            immich=upload, famille=view
/// ```
///
/// `famille` and `guest` are known principals; `guest` is excluded.
#[must_use]
pub fn photo_library() -> Scenario {
    ScenarioBuilder::new()
        .folders(&[
            "/",
            "/Scans",
            "/Scans/Family",
            "/Trips",
            "/Trips/2019",
            "/Trips/2020",
            "/Trips/2021",
            "/Immich",
        ])
        .grant("/Scans/Family", "bonzac", 1)
        .grant("/Trips/2019", "valentin", 1)
        .grant("/Trips/2020", "valentin", 3)
        .grant("/Trips/2021", "valentin", 15)
        .grant("/Immich", "immich", 7)
        .grant("/Immich", "famille", 1)
        .principal("guest")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_follow_declared_prefixes() {
        let scenario = photo_library();
        let snapshot = scenario.snapshot();
        let family = scenario.id("/Scans/Family");
        assert_eq!(snapshot.tree.parent_of(family), Some(scenario.id("/Scans")));
        assert_eq!(snapshot.tree.parent_of(scenario.id("/Scans")), Some(scenario.id("/")));
        assert_eq!(snapshot.tree.root().map(|root| root.id), Some(scenario.id("/")));
        assert_eq!(
            snapshot.tree.node(family).map(|node| node.physical_path.clone()),
            Some(PathBuf::from("/volume1/photo/Scans/Family"))
        );
    }

    #[test]
    fn parent_path_edges() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/Scans"), Some("/"));
        assert_eq!(parent_path("/Scans/Family/"), Some("/Scans"));
    }
}
