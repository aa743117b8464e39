//! The SQLite datastore and the in-memory source yield the same snapshot and
//! drive the reconciler to the same end state.

use std::path::Path;

use grantsync_core::sqlite_source::{SourceFilter, SqliteGrantSource};
use grantsync_core::{BatchDriver, GrantSnapshot, ReconcilePolicy};
use grantsync_harness::{MemoryGrantSource, SimulatedAclTree};
use grantsync_types::{NodeId, Principal};
use rusqlite::{Connection, params};

const SHARE_ROOT: &str = "/volume1/photo";

const NODES: [(i64, Option<i64>, &str); 6] = [
    (1, None, "/"),
    (2, Some(1), "/Scans"),
    (3, Some(2), "/Scans/Family"),
    (4, Some(2), "/Scans/@eaDir"),
    (5, Some(1), "/Trips"),
    (6, Some(5), "/Trips/2019"),
];

const GRANTS: [(i64, &str, i64); 6] = [
    (3, "bonzac", 1),
    (4, "bonzac", 1),
    (5, "famille", 2),
    (6, "valentin", 15),
    (6, "admin", 1),
    (2, "immich", 0),
];

fn sqlite_source(dir: &Path) -> SqliteGrantSource {
    let path = dir.join("grants.db");
    let conn = Connection::open(&path).expect("create datastore");
    conn.execute_batch(
        "
CREATE TABLE node (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES node(id),
                   path TEXT NOT NULL UNIQUE);
CREATE TABLE principal (name TEXT PRIMARY KEY);
CREATE TABLE node_grant (node_id INTEGER NOT NULL REFERENCES node(id),
                         principal TEXT NOT NULL, level INTEGER NOT NULL,
                         PRIMARY KEY (node_id, principal));
",
    )
    .expect("create schema");
    for (id, parent, logical) in NODES {
        conn.execute(
            "INSERT INTO node (id, parent_id, path) VALUES (?1, ?2, ?3)",
            params![id, parent, logical],
        )
        .expect("insert node");
    }
    for name in ["bonzac", "famille", "valentin", "admin", "immich", "guest"] {
        conn.execute("INSERT INTO principal (name) VALUES (?1)", params![name])
            .expect("insert principal");
    }
    for (node, principal, level) in GRANTS {
        conn.execute(
            "INSERT INTO node_grant (node_id, principal, level) VALUES (?1, ?2, ?3)",
            params![node, principal, level],
        )
        .expect("insert grant");
    }
    drop(conn);
    SqliteGrantSource::open(&path, SourceFilter::default()).expect("open datastore")
}

fn memory_source() -> MemoryGrantSource {
    let mut source = MemoryGrantSource::new();
    for (id, parent, logical) in NODES {
        source.add_node(NodeId(id), parent.map(NodeId), logical);
    }
    for name in ["bonzac", "famille", "valentin", "admin", "immich", "guest"] {
        source.add_principal(name);
    }
    for (node, principal, level) in GRANTS {
        source.set_grant(NodeId(node), principal, level);
    }
    source
}

fn load<S: grantsync_core::GrantSource>(source: &S) -> GrantSnapshot {
    GrantSnapshot::load(source, Path::new(SHARE_ROOT), &["guest"]).expect("snapshot")
}

#[test]
fn test_snapshots_agree() {
    let dir = tempfile::tempdir().unwrap();
    let from_sqlite = load(&sqlite_source(dir.path()));
    let from_memory = load(&memory_source());

    assert_eq!(
        from_sqlite.ordered_granted_nodes(),
        from_memory.ordered_granted_nodes()
    );
    assert_eq!(from_sqlite.ordered_granted_nodes(), vec![NodeId(5), NodeId(3), NodeId(6)]);
    assert_eq!(from_sqlite.rejected, from_memory.rejected);
    assert_eq!(from_sqlite.rejected.len(), 1, "level code 2 is not a known level");

    let known = |snapshot: &GrantSnapshot| -> Vec<Principal> {
        snapshot.roster.known().cloned().collect()
    };
    assert_eq!(known(&from_sqlite), known(&from_memory));
    assert!(from_sqlite.roster.is_excluded(&Principal::from("guest")));
}

#[test]
fn test_reconcile_end_states_agree() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = [load(&sqlite_source(dir.path())), load(&memory_source())];

    let end_states: Vec<_> = snapshots
        .iter()
        .map(|snapshot| {
            let mut sim = SimulatedAclTree::new(snapshot.tree.clone());
            let report = BatchDriver::new(&mut sim, snapshot, ReconcilePolicy::default()).run_all();
            assert!(report.is_clean(), "{report:?}");
            assert_eq!(report.rejected_grants.len(), 1);
            sim.entry_set()
        })
        .collect();

    assert_eq!(end_states[0], end_states[1]);
    assert!(!end_states[0].contains_key(&NodeId(4)), "transient folders are never touched");
}
