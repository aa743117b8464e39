//! Desired-versus-actual access audit.
//!
//! The audit never mutates anything: desired access comes from the grant
//! snapshot, actual access from an [`AccessProbe`], and deny diagnostics from
//! read-only gateway listings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use grantsync_error::{Result, SyncError};
use grantsync_types::{
    ActualAccess, Classification, Effect, Node, NodeId, PermissionLevel, Principal, Rights,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gateway::AclGateway;
use crate::probe::AccessProbe;
use crate::report::unix_ms_now;
use crate::snapshot::{GrantSnapshot, RejectedGrant};

/// JSON schema version for the audit report format.
pub const AUDIT_REPORT_SCHEMA_V1: &str = "grantsync.audit-report.v1";

/// Classify one (node, principal) pair.
///
/// `holds_any_grant` only matters at the root, where a principal granted
/// anywhere in the tree is expected to be able to enumerate.
#[must_use]
pub const fn classify(
    desired: bool,
    actual: ActualAccess,
    is_root: bool,
    holds_any_grant: bool,
) -> Classification {
    match (desired, actual) {
        (true, ActualAccess::Full)
        | (false, ActualAccess::Denied | ActualAccess::TraversalOnly) => Classification::Aligned,
        (false, ActualAccess::Full) if is_root && holds_any_grant => Classification::Aligned,
        (true, _) => Classification::MissingPermission,
        (false, ActualAccess::Full) => Classification::OverPrivileged,
    }
}

/// A deny entry that may explain missing access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyFinding {
    /// Node on which the entry was listed.
    pub path: String,
    /// Inheritance level of the entry on that node.
    pub level: u32,
    pub rights: Rights,
}

impl fmt::Display for DenyFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deny {} on {} (level:{})", self.rights, self.path, self.level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub node_id: NodeId,
    pub path: String,
    pub principal: Principal,
    pub desired: bool,
    pub granted_level: PermissionLevel,
    pub actual: ActualAccess,
    pub classification: Classification,
    /// Populated for `MISSING_PERMISSION` only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<DenyFinding>,
    /// Paths whose entries could not be listed while collecting
    /// `diagnostics`, which are then incomplete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlisted: Vec<String>,
}

impl AccessDecision {
    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        !self.classification.is_aligned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingNode {
    pub node_id: NodeId,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeError {
    pub node_id: NodeId,
    pub path: String,
    pub principal: Principal,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditTotals {
    pub nodes_audited: usize,
    pub nodes_aligned: usize,
    pub nodes_missing: usize,
    pub decisions: usize,
    pub aligned: usize,
    pub missing_permission: usize,
    pub over_privileged: usize,
    pub probe_errors: usize,
}

/// Mismatches grouped under one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMismatches {
    pub node_id: NodeId,
    pub path: String,
    pub mismatches: Vec<AccessDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedNode {
    pub path: String,
    pub classification: Classification,
    pub actual: ActualAccess,
}

/// Mismatches grouped under one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalMismatches {
    pub principal: Principal,
    pub nodes: Vec<AffectedNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub schema_version: String,
    pub started_unix_ms: u64,
    pub finished_unix_ms: u64,
    pub totals: AuditTotals,
    /// Aligned nodes over audited plus missing nodes; 1.0 when nothing was
    /// audited.
    pub alignment_rate: f64,
    pub decisions: Vec<AccessDecision>,
    pub missing_nodes: Vec<MissingNode>,
    pub probe_errors: Vec<ProbeError>,
    pub rejected_grants: Vec<RejectedGrant>,
}

impl AuditReport {
    /// No missing node, no probe error and no mismatch.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_nodes.is_empty()
            && self.probe_errors.is_empty()
            && self.decisions.iter().all(|decision| !decision.is_mismatch())
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &AccessDecision> {
        self.decisions.iter().filter(|decision| decision.is_mismatch())
    }

    /// Mismatching nodes in audit order.
    #[must_use]
    pub fn by_node(&self) -> Vec<NodeMismatches> {
        let mut out: Vec<NodeMismatches> = Vec::new();
        for decision in self.mismatches() {
            match out.last_mut() {
                Some(group) if group.node_id == decision.node_id => {
                    group.mismatches.push(decision.clone());
                }
                _ => out.push(NodeMismatches {
                    node_id: decision.node_id,
                    path: decision.path.clone(),
                    mismatches: vec![decision.clone()],
                }),
            }
        }
        out
    }

    /// Mismatching principals sorted by name.
    #[must_use]
    pub fn by_principal(&self) -> Vec<PrincipalMismatches> {
        let mut grouped: BTreeMap<&Principal, Vec<AffectedNode>> = BTreeMap::new();
        for decision in self.mismatches() {
            grouped
                .entry(&decision.principal)
                .or_default()
                .push(AffectedNode {
                    path: decision.path.clone(),
                    classification: decision.classification,
                    actual: decision.actual,
                });
        }
        grouped
            .into_iter()
            .map(|(principal, nodes)| PrincipalMismatches {
                principal: principal.clone(),
                nodes,
            })
            .collect()
    }
}

/// Which slice of an audit report to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditView {
    #[default]
    Summary,
    Full,
    ByNode,
    ByPrincipal,
}

impl AuditView {
    pub const ALL: [Self; 4] = [Self::Summary, Self::Full, Self::ByNode, Self::ByPrincipal];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Full => "full",
            Self::ByNode => "by-node",
            Self::ByPrincipal => "by-principal",
        }
    }
}

impl fmt::Display for AuditView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditView {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|view| view.as_str() == s)
            .ok_or_else(|| {
                format!("unknown audit view `{s}` (expected summary, full, by-node or by-principal)")
            })
    }
}

/// Probes every audited (node, principal) pair and classifies it.
pub struct AuditEngine<'a, G: AclGateway + ?Sized, P: AccessProbe + ?Sized> {
    gateway: &'a G,
    probe: &'a P,
    snapshot: &'a GrantSnapshot,
}

impl<'a, G: AclGateway + ?Sized, P: AccessProbe + ?Sized> AuditEngine<'a, G, P> {
    pub fn new(gateway: &'a G, probe: &'a P, snapshot: &'a GrantSnapshot) -> Self {
        Self {
            gateway,
            probe,
            snapshot,
        }
    }

    /// Granted nodes plus the root, parents first.
    #[must_use]
    pub fn audited_nodes(&self) -> Vec<NodeId> {
        let mut nodes = self.snapshot.ordered_granted_nodes();
        if let Some(root) = self.snapshot.tree.root() {
            if !nodes.contains(&root.id) {
                nodes.insert(0, root.id);
            }
        }
        nodes
    }

    /// Probe and classify one pair.
    pub fn classify_one(&self, node_id: NodeId, principal: &Principal) -> Result<AccessDecision> {
        let node = self.snapshot.tree.node(node_id).ok_or(SyncError::UnknownNode {
            node_id: node_id.get(),
        })?;
        self.decide(node, principal)
    }

    fn decide(&self, node: &Node, principal: &Principal) -> Result<AccessDecision> {
        let snapshot = self.snapshot;
        let granted_level = snapshot.grants.level(node.id, principal);
        let desired = granted_level.is_granted();
        let actual = self.probe.probe(principal, node)?;
        let classification = classify(
            desired,
            actual,
            snapshot.tree.is_root(node.id),
            snapshot.grants.holds_any_grant(principal),
        );
        let (diagnostics, unlisted) = if classification == Classification::MissingPermission {
            self.deny_findings(node, principal)
        } else {
            (Vec::new(), Vec::new())
        };

        debug!(
            node_id = %node.id,
            principal = %principal,
            desired,
            actual = %actual,
            classification = %classification,
            "access classified"
        );
        Ok(AccessDecision {
            node_id: node.id,
            path: node.logical_path.clone(),
            principal: principal.clone(),
            desired,
            granted_level,
            actual,
            classification,
            diagnostics,
            unlisted,
        })
    }

    /// Every deny for `principal` on the node (explicit or inherited), then
    /// every explicit deny on its ancestors.
    fn deny_findings(&self, node: &Node, principal: &Principal) -> (Vec<DenyFinding>, Vec<String>) {
        let mut findings = Vec::new();
        let mut unlisted = Vec::new();
        let mut inspect = |target: &Node, explicit_only: bool| match self.gateway.list_entries(target) {
            Ok(entries) => findings.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.effect == Effect::Deny && entry.applies_to(principal))
                    .filter(|entry| !explicit_only || entry.is_explicit())
                    .map(|entry| DenyFinding {
                        path: target.logical_path.clone(),
                        level: entry.level,
                        rights: entry.rights,
                    }),
            ),
            Err(err) => {
                warn!(
                    path = %target.logical_path,
                    principal = %principal,
                    error = %err,
                    "cannot list entries for diagnostics"
                );
                unlisted.push(target.logical_path.clone());
            }
        };

        inspect(node, false);
        for ancestor_id in self.snapshot.tree.ancestors(node.id) {
            if let Some(ancestor) = self.snapshot.tree.node(ancestor_id) {
                inspect(ancestor, true);
            }
        }
        (findings, unlisted)
    }

    /// Audit every granted node and the root for every known principal.
    pub fn run(&self) -> AuditReport {
        let started_unix_ms = unix_ms_now();
        let snapshot = self.snapshot;
        let principals: Vec<&Principal> = snapshot
            .roster
            .known()
            .filter(|principal| !snapshot.roster.is_excluded(principal))
            .collect();

        let mut decisions = Vec::new();
        let mut missing_nodes = Vec::new();
        let mut probe_errors = Vec::new();
        let mut totals = AuditTotals::default();

        for node_id in self.audited_nodes() {
            let node = match snapshot.tree.node(node_id) {
                Some(node) if self.gateway.node_exists(node) => node,
                found => {
                    let path = found.map(|node| node.logical_path.clone()).unwrap_or_default();
                    warn!(node_id = %node_id, path = %path, "node missing, not probed");
                    missing_nodes.push(MissingNode { node_id, path });
                    continue;
                }
            };

            totals.nodes_audited += 1;
            let mut node_clean = true;
            for principal in &principals {
                match self.decide(node, principal) {
                    Ok(decision) => {
                        match decision.classification {
                            Classification::Aligned => totals.aligned += 1,
                            Classification::MissingPermission => totals.missing_permission += 1,
                            Classification::OverPrivileged => totals.over_privileged += 1,
                        }
                        node_clean &= !decision.is_mismatch();
                        decisions.push(decision);
                    }
                    Err(err) => {
                        warn!(
                            node_id = %node_id,
                            principal = %principal,
                            error = %err,
                            "access probe failed"
                        );
                        node_clean = false;
                        probe_errors.push(ProbeError {
                            node_id,
                            path: node.logical_path.clone(),
                            principal: (*principal).clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
            if node_clean {
                totals.nodes_aligned += 1;
            }
        }

        totals.nodes_missing = missing_nodes.len();
        totals.decisions = decisions.len();
        totals.probe_errors = probe_errors.len();
        let alignment_rate = alignment_rate(
            totals.nodes_aligned,
            totals.nodes_audited + totals.nodes_missing,
        );

        info!(
            nodes = totals.nodes_audited,
            missing = totals.nodes_missing,
            missing_permission = totals.missing_permission,
            over_privileged = totals.over_privileged,
            alignment_rate,
            "audit finished"
        );

        AuditReport {
            schema_version: AUDIT_REPORT_SCHEMA_V1.to_owned(),
            started_unix_ms,
            finished_unix_ms: unix_ms_now(),
            totals,
            alignment_rate,
            decisions,
            missing_nodes,
            probe_errors,
            rejected_grants: snapshot.rejected.clone(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn alignment_rate(aligned: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        aligned as f64 / total as f64
    }
}
