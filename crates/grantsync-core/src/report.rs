use std::time::{SystemTime, UNIX_EPOCH};

use grantsync_types::{Effect, NodeId, Principal, Rights};
use serde::{Deserialize, Serialize};

use crate::snapshot::RejectedGrant;

/// JSON schema version for the reconciliation report format.
pub const RUN_REPORT_SCHEMA_V1: &str = "grantsync.run-report.v1";

/// Which operation produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    ReconcileOne,
    ReconcileAll,
}

/// Accumulator threaded through a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    pub mode: RunMode,
    /// Milliseconds since Unix epoch, captured at run start.
    pub started_unix_ms: u64,
    pub finished_unix_ms: Option<u64>,
    pub nodes: Vec<NodeReport>,
    pub mutation_failures: Vec<MutationFailure>,
    pub rejected_grants: Vec<RejectedGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub path: String,
    pub outcome: NodeOutcome,
    pub removed: usize,
    pub added: usize,
    /// Traversal allows written on this node's ancestors (or on the node
    /// itself for principals granted further down).
    pub retrofitted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum NodeOutcome {
    Reconciled,
    /// Physical location missing; nothing was touched.
    Skipped { reason: String },
    /// The node could not be processed (entry list unreadable, unknown id).
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MutationAction {
    Add { effect: Effect, rights: Rights },
    Delete { position: usize },
    /// Listing an ancestor during the traversal walk.
    Inspect,
}

/// A single entry that could not be reconciled this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationFailure {
    pub node_id: NodeId,
    pub path: String,
    pub principal: Option<Principal>,
    pub action: MutationAction,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub nodes_total: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub mutation_failures: usize,
    pub rejected_grants: usize,
    pub entries_removed: usize,
    pub entries_added: usize,
}

impl RunReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            schema_version: RUN_REPORT_SCHEMA_V1.to_owned(),
            mode,
            started_unix_ms: unix_ms_now(),
            finished_unix_ms: None,
            nodes: Vec::new(),
            mutation_failures: Vec::new(),
            rejected_grants: Vec::new(),
        }
    }

    pub fn record_node(&mut self, node: NodeReport) {
        self.nodes.push(node);
    }

    pub fn record_mutation_failure(&mut self, failure: MutationFailure) {
        self.mutation_failures.push(failure);
    }

    pub fn finish(&mut self) {
        self.finished_unix_ms = Some(unix_ms_now());
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            nodes_total: self.nodes.len(),
            mutation_failures: self.mutation_failures.len(),
            rejected_grants: self.rejected_grants.len(),
            ..RunSummary::default()
        };
        for node in &self.nodes {
            match node.outcome {
                NodeOutcome::Reconciled => summary.reconciled += 1,
                NodeOutcome::Skipped { .. } => summary.skipped += 1,
                NodeOutcome::Failed { .. } => summary.failed += 1,
            }
            summary.entries_removed += node.removed;
            summary.entries_added += node.added;
        }
        summary
    }

    /// Every node reconciled and no entry mutation failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mutation_failures.is_empty()
            && self
                .nodes
                .iter()
                .all(|node| node.outcome == NodeOutcome::Reconciled)
    }

    /// Mutation failures recorded against one node.
    pub fn failures_for(&self, node_id: NodeId) -> impl Iterator<Item = &MutationFailure> {
        self.mutation_failures
            .iter()
            .filter(move |failure| failure.node_id == node_id)
    }
}

pub(crate) fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
