//! End-to-end runs of the `grantsync` binary against on-disk datastores.
//!
//! Every datastore here avoids granted nodes that would need the ACL tool or
//! probing, so the runs stay hermetic.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use tempfile::TempDir;

const SCHEMA: &str = "
CREATE TABLE node (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES node(id),
                   path TEXT NOT NULL UNIQUE);
CREATE TABLE principal (name TEXT PRIMARY KEY);
CREATE TABLE node_grant (node_id INTEGER NOT NULL REFERENCES node(id),
                         principal TEXT NOT NULL, level INTEGER NOT NULL,
                         PRIMARY KEY (node_id, principal));
INSERT INTO node VALUES (1, NULL, '/');
INSERT INTO node VALUES (2, 1, '/Scans');
";

fn datastore(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("grants.db");
    let conn = Connection::open(&path).expect("create datastore");
    conn.execute_batch(SCHEMA).expect("seed datastore");
    path
}

fn grantsync(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_grantsync"))
        .current_dir(dir)
        .env_remove("GRANTSYNC_CONFIG")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn grantsync")
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn test_unreachable_datastore_exits_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nowhere.db");

    let output = grantsync(
        dir.path(),
        &["--database", &missing.to_string_lossy(), "reconcile-all"],
    );

    assert_eq!(output.status.code(), Some(2), "stderr={}", text(&output.stderr));
    assert!(text(&output.stderr).contains("datastore unavailable"));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_named_missing_config_exits_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let output = grantsync(dir.path(), &["--config", "absent.toml", "reconcile-all"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(text(&output.stderr).contains("configuration error"));
}

#[test]
fn test_nothing_granted_is_clean_and_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let db = datastore(&dir);
    let report = dir.path().join("run.json");

    let output = grantsync(
        dir.path(),
        &[
            "--database",
            &db.to_string_lossy(),
            "--share-root",
            &dir.path().to_string_lossy(),
            "--report",
            &report.to_string_lossy(),
            "reconcile-all",
        ],
    );

    assert_eq!(output.status.code(), Some(0), "stderr={}", text(&output.stderr));
    assert!(text(&output.stdout).contains("status: clean"));
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(written["schema_version"], "grantsync.run-report.v1");
    assert_eq!(written["mode"], "reconcile_all");
}

#[test]
fn test_unknown_node_is_not_clean() {
    let dir = tempfile::tempdir().unwrap();
    let db = datastore(&dir);

    let output = grantsync(
        dir.path(),
        &["--database", &db.to_string_lossy(), "reconcile-one", "99"],
    );

    assert_eq!(output.status.code(), Some(1), "stderr={}", text(&output.stderr));
    let stdout = text(&output.stdout);
    assert!(stdout.contains("FAILED: unknown node id 99"), "{stdout}");
    assert!(stdout.contains("status: NOT CLEAN"));
}

#[test]
fn test_audit_json_view() {
    let dir = tempfile::tempdir().unwrap();
    let db = datastore(&dir);

    let output = grantsync(
        dir.path(),
        &[
            "--database",
            &db.to_string_lossy(),
            "--share-root",
            &dir.path().to_string_lossy(),
            "audit",
            "--view",
            "by-node",
            "--json",
        ],
    );

    assert_eq!(output.status.code(), Some(0), "stderr={}", text(&output.stderr));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["view"], "by-node");
    assert_eq!(value["clean"], true);
    assert_eq!(value["body"]["nodes"], serde_json::json!([]));
}
