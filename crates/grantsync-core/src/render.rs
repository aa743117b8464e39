//! Text and JSON renderings of run and audit reports.

use std::fmt;

use serde_json::{Value, json};

use crate::audit::{AuditReport, AuditView};
use crate::report::{MutationAction, NodeOutcome, RunReport};
use crate::snapshot::RejectedGrant;

/// Operator-facing text for a reconciliation run.
pub struct RunReportText<'a>(pub &'a RunReport);

impl fmt::Display for RunReportText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let summary = report.summary();
        writeln!(
            f,
            "run mode={:?} nodes={} reconciled={} skipped={} failed={} removed={} added={} mutation_failures={} rejected_grants={}",
            report.mode,
            summary.nodes_total,
            summary.reconciled,
            summary.skipped,
            summary.failed,
            summary.entries_removed,
            summary.entries_added,
            summary.mutation_failures,
            summary.rejected_grants,
        )?;

        for node in &report.nodes {
            match &node.outcome {
                NodeOutcome::Reconciled => writeln!(
                    f,
                    "- [{}] {} reconciled removed={} added={} retrofitted={}",
                    node.node_id, node.path, node.removed, node.added, node.retrofitted
                )?,
                NodeOutcome::Skipped { reason } => {
                    writeln!(f, "- [{}] {} skipped: {reason}", node.node_id, node.path)?;
                }
                NodeOutcome::Failed { error } => {
                    writeln!(f, "- [{}] {} FAILED: {error}", node.node_id, node.path)?;
                }
            }
        }

        if !report.mutation_failures.is_empty() {
            writeln!(f, "mutation failures:")?;
            for failure in &report.mutation_failures {
                let principal = failure
                    .principal
                    .as_ref()
                    .map_or_else(|| "-".to_owned(), ToString::to_string);
                let action = match &failure.action {
                    MutationAction::Add { effect, rights } => format!("add {effect} {rights}"),
                    MutationAction::Delete { position } => format!("delete [{position}]"),
                    MutationAction::Inspect => "inspect".to_owned(),
                };
                writeln!(
                    f,
                    "- {} principal={principal} {action} attempts={}: {}",
                    failure.path, failure.attempts, failure.error
                )?;
            }
        }

        write_rejected(f, &report.rejected_grants)?;
        writeln!(f, "status: {}", if report.is_clean() { "clean" } else { "NOT CLEAN" })
    }
}

/// Operator-facing text for one view of an audit.
pub struct AuditReportText<'a> {
    pub report: &'a AuditReport,
    pub view: AuditView,
}

impl fmt::Display for AuditReportText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        let totals = &report.totals;
        writeln!(
            f,
            "audit nodes={} aligned_nodes={} missing_nodes={} decisions={} aligned={} missing_permission={} over_privileged={} probe_errors={} alignment_rate={:.1}%",
            totals.nodes_audited,
            totals.nodes_aligned,
            totals.nodes_missing,
            totals.decisions,
            totals.aligned,
            totals.missing_permission,
            totals.over_privileged,
            totals.probe_errors,
            report.alignment_rate * 100.0,
        )?;

        match self.view {
            AuditView::Summary => {}
            AuditView::Full => {
                for decision in &report.decisions {
                    writeln!(
                        f,
                        "- {} {} desired={} actual={} {}",
                        decision.path,
                        decision.principal,
                        decision.granted_level,
                        decision.actual,
                        decision.classification
                    )?;
                    for finding in &decision.diagnostics {
                        writeln!(f, "    {finding}")?;
                    }
                    for path in &decision.unlisted {
                        writeln!(f, "    entries unreadable on {path}")?;
                    }
                }
            }
            AuditView::ByNode => {
                for group in report.by_node() {
                    writeln!(f, "{} ({} mismatches)", group.path, group.mismatches.len())?;
                    for decision in &group.mismatches {
                        writeln!(
                            f,
                            "  - {} {} actual={}",
                            decision.principal, decision.classification, decision.actual
                        )?;
                        for finding in &decision.diagnostics {
                            writeln!(f, "      {finding}")?;
                        }
                        for path in &decision.unlisted {
                            writeln!(f, "      entries unreadable on {path}")?;
                        }
                    }
                }
            }
            AuditView::ByPrincipal => {
                for group in report.by_principal() {
                    writeln!(f, "{} ({} nodes)", group.principal, group.nodes.len())?;
                    for node in &group.nodes {
                        writeln!(
                            f,
                            "  - {} {} actual={}",
                            node.path, node.classification, node.actual
                        )?;
                    }
                }
            }
        }

        if !report.missing_nodes.is_empty() {
            writeln!(f, "missing nodes:")?;
            for missing in &report.missing_nodes {
                writeln!(f, "- [{}] {}", missing.node_id, missing.path)?;
            }
        }
        if !report.probe_errors.is_empty() {
            writeln!(f, "probe errors:")?;
            for probe_error in &report.probe_errors {
                writeln!(
                    f,
                    "- {} {}: {}",
                    probe_error.path, probe_error.principal, probe_error.error
                )?;
            }
        }
        write_rejected(f, &report.rejected_grants)?;
        writeln!(f, "status: {}", if report.is_clean() { "clean" } else { "NOT CLEAN" })
    }
}

fn write_rejected(f: &mut fmt::Formatter<'_>, rejected: &[RejectedGrant]) -> fmt::Result {
    if rejected.is_empty() {
        return Ok(());
    }
    writeln!(f, "rejected grants:")?;
    for grant in rejected {
        writeln!(
            f,
            "- node {} principal={} level_code={}",
            grant.node_id, grant.principal, grant.code
        )?;
    }
    Ok(())
}

/// JSON document for one audit view. `full` is the whole report.
pub fn audit_view_json(report: &AuditReport, view: AuditView) -> serde_json::Result<Value> {
    let body = match view {
        AuditView::Full => return serde_json::to_value(report),
        AuditView::Summary => json!({
            "totals": report.totals,
            "alignment_rate": report.alignment_rate,
            "missing_nodes": report.missing_nodes,
            "probe_errors": report.probe_errors,
            "rejected_grants": report.rejected_grants,
        }),
        AuditView::ByNode => json!({ "nodes": report.by_node() }),
        AuditView::ByPrincipal => json!({ "principals": report.by_principal() }),
    };
    Ok(json!({
        "schema_version": report.schema_version,
        "view": view,
        "clean": report.is_clean(),
        "body": body,
    }))
}

#[cfg(test)]
mod tests {
    use grantsync_types::{ActualAccess, Classification, NodeId, PermissionLevel, Principal};

    use super::*;
    use crate::audit::{AUDIT_REPORT_SCHEMA_V1, AccessDecision, AuditTotals};
    use crate::report::{NodeReport, RunMode};

    fn audit_report() -> AuditReport {
        let decision = |path: &str, name: &str, classification: Classification| AccessDecision {
            node_id: NodeId(if path == "/" { 1 } else { 2 }),
            path: path.to_owned(),
            principal: Principal::from(name),
            desired: classification == Classification::MissingPermission,
            granted_level: PermissionLevel::View,
            actual: ActualAccess::Denied,
            classification,
            diagnostics: Vec::new(),
            unlisted: Vec::new(),
        };
        AuditReport {
            schema_version: AUDIT_REPORT_SCHEMA_V1.to_owned(),
            started_unix_ms: 0,
            finished_unix_ms: 0,
            totals: AuditTotals {
                nodes_audited: 2,
                nodes_aligned: 1,
                decisions: 2,
                aligned: 1,
                missing_permission: 1,
                ..AuditTotals::default()
            },
            alignment_rate: 0.5,
            decisions: vec![
                decision("/", "famille", Classification::Aligned),
                decision("/Scans", "famille", Classification::MissingPermission),
            ],
            missing_nodes: Vec::new(),
            probe_errors: Vec::new(),
            rejected_grants: Vec::new(),
        }
    }

    #[test]
    fn audit_text_views_show_mismatches() {
        let report = audit_report();
        let by_node = AuditReportText {
            report: &report,
            view: AuditView::ByNode,
        }
        .to_string();
        assert!(by_node.contains("/Scans (1 mismatches)"), "{by_node}");
        assert!(by_node.contains("famille MISSING_PERMISSION"), "{by_node}");
        assert!(by_node.contains("alignment_rate=50.0%"), "{by_node}");
        assert!(by_node.ends_with("status: NOT CLEAN\n"), "{by_node}");

        let summary = AuditReportText {
            report: &report,
            view: AuditView::Summary,
        }
        .to_string();
        assert!(!summary.contains("famille"), "{summary}");
    }

    #[test]
    fn audit_json_wraps_view_body() {
        let report = audit_report();
        let value = audit_view_json(&report, AuditView::ByPrincipal).unwrap();
        assert_eq!(value["view"], "by-principal");
        assert_eq!(value["clean"], false);
        assert_eq!(value["body"]["principals"][0]["principal"], "famille");

        let full = audit_view_json(&report, AuditView::Full).unwrap();
        assert_eq!(full["decisions"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn run_text_lists_nodes_and_status() {
        let mut report = RunReport::new(RunMode::ReconcileAll);
        report.record_node(NodeReport {
            node_id: NodeId(4),
            path: "/Scans/Family".to_owned(),
            outcome: NodeOutcome::Reconciled,
            removed: 1,
            added: 2,
            retrofitted: 1,
        });
        let text = RunReportText(&report).to_string();
        assert!(text.contains("- [4] /Scans/Family reconciled removed=1 added=2 retrofitted=1"));
        assert!(text.ends_with("status: clean\n"));
    }
}
