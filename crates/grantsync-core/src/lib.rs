//! Reconciliation and audit engine for database-stored access grants.
//!
//! This crate provides:
//! - **Collaborator seams**: [`GrantSource`], [`AclGateway`] and
//!   [`AccessProbe`], plus production adapters over SQLite, an ACL command
//!   line tool and `sudo`-style probing
//! - **Reconciliation**: [`Reconciler`] converges one node's explicit entries
//!   and retrofits traversal rights on its ancestors
//! - **Batch runs**: [`BatchDriver`] reconciles every granted node in
//!   parent-before-child order without aborting on per-node failures
//! - **Audit**: [`AuditEngine`] probes actual access and classifies every
//!   (node, principal) pair
//! - **Reports**: serde-serializable run and audit reports with text renderers

pub mod acl_tool;
pub mod audit;
pub mod batch;
pub mod config;
pub mod gateway;
pub mod probe;
pub mod reconcile;
pub mod render;
pub mod report;
pub mod snapshot;
pub mod source;
pub mod sqlite_source;

pub use acl_tool::ToolAclGateway;
pub use audit::{AccessDecision, AuditEngine, AuditReport, AuditView, classify};
pub use batch::BatchDriver;
pub use config::Config;
pub use gateway::AclGateway;
pub use probe::{AccessProbe, CommandAccessProbe};
pub use reconcile::{NodeStats, ReconcilePolicy, Reconciler};
pub use report::{NodeOutcome, RunMode, RunReport};
pub use snapshot::GrantSnapshot;
pub use source::{GrantRecord, GrantSource};
pub use sqlite_source::{SourceFilter, SqliteGrantSource};
