//! Sequential driver over every granted node.

use grantsync_types::NodeId;
use tracing::{error, info, warn};

use crate::gateway::AclGateway;
use crate::reconcile::{NodeStats, ReconcilePolicy, Reconciler};
use crate::report::{NodeOutcome, NodeReport, RunMode, RunReport};
use crate::snapshot::GrantSnapshot;

/// Runs the reconciler node by node. A failing node never stops the batch.
pub struct BatchDriver<'a, G: AclGateway + ?Sized> {
    gateway: &'a mut G,
    snapshot: &'a GrantSnapshot,
    policy: ReconcilePolicy,
}

impl<'a, G: AclGateway + ?Sized> BatchDriver<'a, G> {
    pub fn new(gateway: &'a mut G, snapshot: &'a GrantSnapshot, policy: ReconcilePolicy) -> Self {
        Self {
            gateway,
            snapshot,
            policy,
        }
    }

    /// Reconcile every granted node, parents before children.
    pub fn run_all(&mut self) -> RunReport {
        let mut report = RunReport::new(RunMode::ReconcileAll);
        report.rejected_grants.clone_from(&self.snapshot.rejected);

        let order = self.snapshot.ordered_granted_nodes();
        info!(nodes = order.len(), "reconciling all granted nodes");
        for node_id in order {
            self.process(node_id, &mut report);
        }

        report.finish();
        let summary = report.summary();
        info!(
            reconciled = summary.reconciled,
            skipped = summary.skipped,
            failed = summary.failed,
            mutation_failures = summary.mutation_failures,
            "batch finished"
        );
        report
    }

    /// Reconcile a single node through the same pipeline.
    pub fn reconcile_one(&mut self, node_id: NodeId) -> RunReport {
        let mut report = RunReport::new(RunMode::ReconcileOne);
        report.rejected_grants = self
            .snapshot
            .rejected
            .iter()
            .filter(|rejected| rejected.node_id == node_id)
            .cloned()
            .collect();
        self.process(node_id, &mut report);
        report.finish();
        report
    }

    fn process(&mut self, node_id: NodeId, report: &mut RunReport) {
        let snapshot = self.snapshot;
        let path = snapshot
            .tree
            .node(node_id)
            .map(|node| node.logical_path.clone())
            .unwrap_or_default();

        let missing = snapshot
            .tree
            .node(node_id)
            .filter(|node| !self.gateway.node_exists(node));
        if let Some(node) = missing {
            warn!(
                node_id = %node_id,
                path = %path,
                physical = %node.physical_path.display(),
                "physical location missing, skipping node"
            );
            report.record_node(NodeReport {
                node_id,
                path,
                outcome: NodeOutcome::Skipped {
                    reason: format!("missing physical location {}", node.physical_path.display()),
                },
                removed: 0,
                added: 0,
                retrofitted: 0,
            });
            return;
        }

        let result =
            Reconciler::new(&mut *self.gateway, snapshot, self.policy).reconcile(node_id, report);
        let (outcome, stats) = match result {
            Ok(stats) => (NodeOutcome::Reconciled, stats),
            Err(err) => {
                error!(node_id = %node_id, path = %path, error = %err, "node reconciliation failed");
                (
                    NodeOutcome::Failed {
                        error: err.to_string(),
                    },
                    NodeStats::default(),
                )
            }
        };
        report.record_node(NodeReport {
            node_id,
            path,
            outcome,
            removed: stats.removed,
            added: stats.added,
            retrofitted: stats.retrofitted,
        });
    }
}
