use std::path::{Path, PathBuf};

use grantsync_core::sqlite_source::{SourceFilter, SqliteGrantSource};
use grantsync_core::{GrantSnapshot, GrantSource};
use grantsync_error::SyncError;
use grantsync_types::{NodeId, PermissionLevel, Principal};
use rusqlite::Connection;
use tempfile::TempDir;

const SCHEMA: &str = "
CREATE TABLE node (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES node(id),
                   path TEXT NOT NULL UNIQUE);
CREATE TABLE principal (name TEXT PRIMARY KEY);
CREATE TABLE node_grant (node_id INTEGER NOT NULL REFERENCES node(id),
                         principal TEXT NOT NULL, level INTEGER NOT NULL,
                         PRIMARY KEY (node_id, principal));
";

fn create_datastore(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("grants.db");
    let conn = Connection::open(&path).expect("create datastore");
    conn.execute_batch(SCHEMA).expect("create schema");
    conn.execute_batch(
        "
INSERT INTO node VALUES (1, NULL, '/');
INSERT INTO node VALUES (2, 1, '/Scans');
INSERT INTO node VALUES (3, 2, '/Scans/Family');
INSERT INTO node VALUES (4, 2, '/Scans/@eaDir');
INSERT INTO node VALUES (5, 1, '/Trips');
INSERT INTO principal VALUES ('bonzac'), ('valentin'), ('famille'), ('admin'), ('immich');
INSERT INTO node_grant VALUES (3, 'bonzac', 1);
INSERT INTO node_grant VALUES (3, 'valentin', 15);
INSERT INTO node_grant VALUES (3, 'guest', 1);
INSERT INTO node_grant VALUES (4, 'bonzac', 1);
INSERT INTO node_grant VALUES (5, 'valentin', 3);
INSERT INTO node_grant VALUES (5, 'famille', 2);
INSERT INTO node_grant VALUES (2, 'immich', 0);
",
    )
    .expect("seed datastore");
    path
}

fn open(path: &Path) -> SqliteGrantSource {
    SqliteGrantSource::open(path, SourceFilter::default()).expect("open datastore")
}

#[test]
fn granted_nodes_skip_transient_paths_and_zero_levels() {
    let dir = tempfile::tempdir().unwrap();
    let source = open(&create_datastore(&dir));

    let granted = source.list_granted_nodes().unwrap();
    let ids: Vec<i64> = granted.iter().map(|(id, _)| id.get()).collect();
    assert_eq!(ids, vec![3, 5], "granted={granted:?}");
    assert_eq!(granted[0].1, "/Scans/Family");
}

#[test]
fn principals_exclude_system_identities() {
    let dir = tempfile::tempdir().unwrap();
    let source = open(&create_datastore(&dir));

    let principals = source.list_all_principals().unwrap();
    let names: Vec<&str> = principals.iter().map(Principal::as_str).collect();
    assert_eq!(names, vec!["bonzac", "famille", "immich", "valentin"]);
}

#[test]
fn logical_path_lookup_and_unknown_node() {
    let dir = tempfile::tempdir().unwrap();
    let source = open(&create_datastore(&dir));

    assert_eq!(source.get_logical_path(NodeId(5)).unwrap(), "/Trips");
    let err = source.get_logical_path(NodeId(99)).unwrap_err();
    assert!(matches!(err, SyncError::UnknownNode { node_id: 99 }), "{err}");
}

#[test]
fn snapshot_rejects_unknown_level_codes() {
    let dir = tempfile::tempdir().unwrap();
    let source = open(&create_datastore(&dir));

    let snapshot = GrantSnapshot::load(&source, Path::new("/volume1/photo"), &["backup"]).unwrap();

    assert_eq!(snapshot.rejected.len(), 1, "rejected={:?}", snapshot.rejected);
    let rejected = &snapshot.rejected[0];
    assert_eq!(rejected.node_id, NodeId(5));
    assert_eq!(rejected.principal, Principal::from("famille"));
    assert_eq!(rejected.code, 2);

    let valentin = Principal::from("valentin");
    assert_eq!(snapshot.grants.level(NodeId(3), &valentin), PermissionLevel::Manage);
    assert_eq!(snapshot.grants.level(NodeId(5), &valentin), PermissionLevel::Download);
    assert!(!snapshot.grants.has_grant(NodeId(5), &Principal::from("famille")));

    assert_eq!(snapshot.tree.len(), 5);
    assert_eq!(snapshot.tree.root().map(|root| root.id), Some(NodeId(1)));
    assert_eq!(
        snapshot.tree.node(NodeId(3)).map(|node| node.physical_path.clone()),
        Some(PathBuf::from("/volume1/photo/Scans/Family"))
    );
    assert_eq!(snapshot.ordered_granted_nodes(), vec![NodeId(5), NodeId(3)]);
}

#[test]
fn missing_schema_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.db");
    Connection::open(&path)
        .and_then(|conn| conn.execute_batch("CREATE TABLE node (id INTEGER PRIMARY KEY);"))
        .unwrap();

    let err = SqliteGrantSource::open(&path, SourceFilter::default()).unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("principal"), "{err}");
}

#[test]
fn custom_filter_overrides_path_components() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_datastore(&dir);
    let filter = SourceFilter {
        excluded_path_components: vec!["Trips".to_owned()],
        ..SourceFilter::default()
    };
    let source = SqliteGrantSource::open(&path, filter).unwrap();

    let ids: Vec<i64> = source
        .list_granted_nodes()
        .unwrap()
        .into_iter()
        .map(|(id, _)| id.get())
        .collect();
    assert_eq!(ids, vec![3, 4]);
}
