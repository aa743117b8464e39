use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for grantsync operations.
///
/// Only [`SyncError::DatastoreUnavailable`] and [`SyncError::Config`] are
/// fatal for a run; everything else is caught by the reconciler or the batch
/// driver and recorded in the run report.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Datastore Errors ===
    /// The grant datastore could not be opened or lacks the expected schema.
    #[error("grant datastore unavailable at '{path}': {detail}")]
    DatastoreUnavailable { path: PathBuf, detail: String },

    /// A query against the grant datastore failed.
    #[error("grant datastore query failed: {0}")]
    Datastore(#[from] rusqlite::Error),

    /// The node id is not present in the datastore or the tree index.
    #[error("unknown node id {node_id}")]
    UnknownNode { node_id: i64 },

    /// A stored grant uses a permission-level code outside the known set.
    #[error("unrecognized permission level {code} for '{principal}' on node {node_id}")]
    UnrecognizedLevel {
        node_id: i64,
        principal: String,
        code: i64,
    },

    // === Access-control Tool Errors ===
    /// The access-control tool exited unsuccessfully or could not be spawned.
    #[error("acl tool failed on '{path}': {detail}")]
    AclTool { path: PathBuf, detail: String },

    /// A line of access-control tool output could not be understood.
    #[error("unparseable acl entry '{line}': {detail}")]
    AclParse { line: String, detail: String },

    /// An access probe could not be executed.
    #[error("access probe failed for '{principal}' on '{path}': {detail}")]
    Probe {
        principal: String,
        path: PathBuf,
        detail: String,
    },

    // === Environment Errors ===
    /// Configuration file missing, unreadable or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal logic error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether this error must abort the whole run instead of being recorded.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DatastoreUnavailable { .. } | Self::Config(_))
    }

    pub fn acl_tool(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::AclTool {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

/// Result alias using [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;
