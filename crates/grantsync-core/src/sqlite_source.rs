//! [`GrantSource`] over a SQLite grant datastore.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE node (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES node(id),
//!                    path TEXT NOT NULL UNIQUE);
//! CREATE TABLE principal (name TEXT PRIMARY KEY);
//! CREATE TABLE node_grant (node_id INTEGER NOT NULL REFERENCES node(id),
//!                          principal TEXT NOT NULL, level INTEGER NOT NULL,
//!                          PRIMARY KEY (node_id, principal));
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use grantsync_error::{Result, SyncError};
use grantsync_types::{DEFAULT_EXCLUDED_PRINCIPALS, NodeId, NodeRecord, Principal};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::info;

use crate::source::{GrantRecord, GrantSource};

/// Tables the datastore must provide.
pub const REQUIRED_TABLES: [&str; 3] = ["node", "principal", "node_grant"];

/// Path components marking transient or system folders.
pub const DEFAULT_EXCLUDED_PATH_COMPONENTS: [&str; 4] = ["@eaDir", "#recycle", "#snapshot", "@tmp"];

/// Which principals and paths a source hides from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    pub excluded_principals: BTreeSet<String>,
    pub excluded_path_components: Vec<String>,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            excluded_principals: DEFAULT_EXCLUDED_PRINCIPALS
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
            excluded_path_components: DEFAULT_EXCLUDED_PATH_COMPONENTS
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
        }
    }
}

impl SourceFilter {
    #[must_use]
    pub fn is_transient_path(&self, path: &str) -> bool {
        path.split('/').any(|segment| {
            self.excluded_path_components
                .iter()
                .any(|excluded| excluded == segment)
        })
    }

    #[must_use]
    pub fn is_excluded_principal(&self, name: &str) -> bool {
        self.excluded_principals.contains(name)
    }
}

/// Read-only SQLite grant source.
#[derive(Debug)]
pub struct SqliteGrantSource {
    conn: Connection,
    path: PathBuf,
    filter: SourceFilter,
}

impl SqliteGrantSource {
    /// Open the datastore read-only and verify the schema.
    ///
    /// Any failure here is the fatal `DatastoreUnavailable` error.
    pub fn open(path: &Path, filter: SourceFilter) -> Result<Self> {
        let unavailable = |detail: String| SyncError::DatastoreUnavailable {
            path: path.to_path_buf(),
            detail,
        };

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| unavailable(err.to_string()))?;

        for table in REQUIRED_TABLES {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| unavailable(err.to_string()))?;
            if found.is_none() {
                return Err(unavailable(format!("missing table `{table}`")));
            }
        }

        info!(path = %path.display(), "grant datastore opened");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            filter,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GrantSource for SqliteGrantSource {
    fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, parent_id, path FROM node ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(NodeRecord {
                id: NodeId(row.get(0)?),
                parent: row.get::<_, Option<i64>>(1)?.map(NodeId),
                path: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_granted_nodes(&self) -> Result<Vec<(NodeId, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT n.id, n.path FROM node n \
             JOIN node_grant g ON g.node_id = n.id \
             WHERE g.level > 0 ORDER BY n.id",
        )?;
        let rows = stmt.query_map([], |row| Ok((NodeId(row.get(0)?), row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, path) = row?;
            if !self.filter.is_transient_path(&path) {
                out.push((id, path));
            }
        }
        Ok(out)
    }

    fn get_grants(&self, node: NodeId) -> Result<Vec<GrantRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT principal, level FROM node_grant \
             WHERE node_id = ?1 AND level > 0 ORDER BY principal",
        )?;
        let rows = stmt.query_map([node.get()], |row| {
            Ok(GrantRecord {
                principal: Principal::new(row.get::<_, String>(0)?),
                level_code: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_logical_path(&self, node: NodeId) -> Result<String> {
        self.conn
            .query_row("SELECT path FROM node WHERE id = ?1", [node.get()], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(SyncError::UnknownNode { node_id: node.get() })
    }

    fn list_all_principals(&self) -> Result<Vec<Principal>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM principal UNION SELECT principal FROM node_grant ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for name in rows {
            let name = name?;
            if !self.filter.is_excluded_principal(&name) {
                out.push(Principal::new(name));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_paths_match_whole_components() {
        let filter = SourceFilter::default();
        assert!(filter.is_transient_path("/Scans/@eaDir/thumbs"));
        assert!(filter.is_transient_path("/#recycle"));
        assert!(!filter.is_transient_path("/Scans/eaDir"));
        assert!(!filter.is_transient_path("/"));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = SqliteGrantSource::open(
            Path::new("/definitely/not/here/grants.db"),
            SourceFilter::default(),
        )
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, SyncError::DatastoreUnavailable { .. }));
    }
}
