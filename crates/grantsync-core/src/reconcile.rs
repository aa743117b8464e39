//! Per-node convergence of explicit entries, plus the ancestor traversal
//! retrofit.
//!
//! A pass over one node runs four steps:
//!
//! 1. **clean**: delete every explicit entry except those of excluded users
//! 2. **grant**: add a `ReadList` allow for each granted principal
//! 3. **deny**: add a `Full` deny for every other known principal, or the
//!    traversal allow when the principal is granted somewhere below
//! 4. **propagate**: for every principal allowed in steps 2 and 3, walk to
//!    the root, replacing denies on each ancestor with a traversal allow
//!    until the principal is already allowed there
//!
//! Entry positions are never reused across mutations: every delete is
//! preceded by a fresh listing.

use grantsync_error::{Result, SyncError};
use grantsync_types::{AccessEntry, Effect, Node, NodeId, Principal, Rights};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gateway::AclGateway;
use crate::report::{MutationAction, MutationFailure, RunReport};
use crate::snapshot::GrantSnapshot;

/// Retry budget for a single entry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self { retries: 1 }
    }
}

/// Counters for one reconciled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub removed: usize,
    pub added: usize,
    pub retrofitted: usize,
}

/// Rights of the traversal allow written on `node`: `Discover` on the root,
/// `Traverse` everywhere else.
#[must_use]
pub fn traversal_rights(snapshot: &GrantSnapshot, node: NodeId) -> Rights {
    if snapshot.tree.is_root(node) {
        Rights::Discover
    } else {
        Rights::Traverse
    }
}

pub struct Reconciler<'a, G: AclGateway + ?Sized> {
    gateway: &'a mut G,
    snapshot: &'a GrantSnapshot,
    policy: ReconcilePolicy,
}

impl<'a, G: AclGateway + ?Sized> Reconciler<'a, G> {
    pub fn new(gateway: &'a mut G, snapshot: &'a GrantSnapshot, policy: ReconcilePolicy) -> Self {
        Self {
            gateway,
            snapshot,
            policy,
        }
    }

    /// Converge `node_id` and retrofit its ancestors.
    ///
    /// Returns `Err` only when the node itself cannot be processed (unknown
    /// id, entry list unreadable). Individual mutation failures are recorded
    /// in `report` and the pass continues.
    pub fn reconcile(&mut self, node_id: NodeId, report: &mut RunReport) -> Result<NodeStats> {
        let snapshot = self.snapshot;
        let node = snapshot
            .tree
            .node(node_id)
            .ok_or(SyncError::UnknownNode {
                node_id: node_id.get(),
            })?;

        info!(node_id = %node_id, path = %node.logical_path, "reconciling node");
        let mut stats = NodeStats::default();

        // clean
        let roster = &snapshot.roster;
        stats.removed += self.delete_matching(
            node,
            |entry| {
                entry.is_explicit()
                    && !entry
                        .subject
                        .user()
                        .is_some_and(|principal| roster.is_excluded(principal))
            },
            report,
        )?;

        // grant
        let granted: Vec<&Principal> = snapshot
            .grants
            .granted_on(node_id)
            .map(|(principal, _)| principal)
            .filter(|principal| !roster.is_excluded(principal))
            .collect();
        for principal in &granted {
            if self.add_with_retry(node, principal, Effect::Allow, &Rights::ReadList, report) {
                stats.added += 1;
            }
        }

        // deny
        let mut reaching: Vec<&Principal> = Vec::new();
        for principal in roster.known() {
            if roster.is_excluded(principal) || snapshot.grants.has_grant(node_id, principal) {
                continue;
            }
            let added = if snapshot
                .grants
                .holds_grant_below(&snapshot.tree, node_id, principal)
            {
                reaching.push(principal);
                let rights = traversal_rights(snapshot, node_id);
                self.add_with_retry(node, principal, Effect::Allow, &rights, report)
            } else {
                self.add_with_retry(node, principal, Effect::Deny, &Rights::Full, report)
            };
            if added {
                stats.added += 1;
            }
        }

        // propagate
        for principal in granted.into_iter().chain(reaching) {
            let (removed, retrofitted) = self.propagate(node, principal, report);
            stats.removed += removed;
            stats.retrofitted += retrofitted;
        }

        info!(
            node_id = %node_id,
            removed = stats.removed,
            added = stats.added,
            retrofitted = stats.retrofitted,
            "node reconciled"
        );
        Ok(stats)
    }

    /// Walk from the parent of `node` to the root on behalf of `principal`.
    /// Returns (denies removed, traversal allows added).
    fn propagate(
        &mut self,
        node: &Node,
        principal: &Principal,
        report: &mut RunReport,
    ) -> (usize, usize) {
        let snapshot = self.snapshot;
        let mut removed = 0;
        let mut retrofitted = 0;

        for ancestor_id in snapshot.tree.ancestors(node.id) {
            if snapshot.grants.has_grant(ancestor_id, principal) {
                break;
            }
            let Some(ancestor) = snapshot.tree.node(ancestor_id) else {
                break;
            };

            let entries = match self.gateway.list_entries(ancestor) {
                Ok(entries) => entries,
                Err(err) => {
                    record_inspect_failure(ancestor, principal, &err, report);
                    break;
                }
            };
            if entries
                .iter()
                .any(|entry| entry.is_explicit_for(principal, Effect::Allow))
            {
                debug!(
                    principal = %principal,
                    path = %ancestor.logical_path,
                    "ancestor already allows principal"
                );
                break;
            }

            let inherited_deny_levels: Vec<u32> = entries
                .iter()
                .filter(|entry| {
                    !entry.is_explicit() && entry.effect == Effect::Deny && entry.applies_to(principal)
                })
                .map(|entry| entry.level)
                .collect();

            match self.delete_matching(
                ancestor,
                |entry| entry.is_explicit_for(principal, Effect::Deny),
                report,
            ) {
                Ok(count) => removed += count,
                Err(err) => {
                    record_inspect_failure(ancestor, principal, &err, report);
                    break;
                }
            }

            for level in inherited_deny_levels {
                let Some(source) = usize::try_from(level)
                    .ok()
                    .and_then(|distance| snapshot.tree.ancestor_at(ancestor_id, distance))
                    .and_then(|id| snapshot.tree.node(id))
                else {
                    continue;
                };
                match self.delete_matching(
                    source,
                    |entry| entry.is_explicit_for(principal, Effect::Deny),
                    report,
                ) {
                    Ok(count) => removed += count,
                    Err(err) => record_inspect_failure(source, principal, &err, report),
                }
            }

            let rights = traversal_rights(snapshot, ancestor_id);
            if self.add_with_retry(ancestor, principal, Effect::Allow, &rights, report) {
                retrofitted += 1;
            }
        }

        (removed, retrofitted)
    }

    /// Delete every entry on `node` matching `matches`, listing afresh before
    /// each delete. Only entries that actually leave the listing count as
    /// removed; a delete that reports success while its target stays listed
    /// is a failed attempt. Entries whose delete keeps failing are recorded
    /// and skipped. Fails only when the node cannot be listed.
    fn delete_matching(
        &mut self,
        node: &Node,
        matches: impl Fn(&AccessEntry) -> bool,
        report: &mut RunReport,
    ) -> Result<usize> {
        let mut removed = 0;
        let mut skip = 0;
        let mut attempts = 0;
        let mut budget: Option<usize> = None;
        let mut listed_before: Option<usize> = None;
        let mut unconfirmed: Option<(usize, Option<Principal>)> = None;

        loop {
            let entries = self.gateway.list_entries(node)?;
            let targets: Vec<&AccessEntry> = entries.iter().filter(|entry| matches(entry)).collect();

            let dropped = listed_before.map_or(0, |before| before.saturating_sub(targets.len()));
            removed += dropped;
            listed_before = Some(targets.len());
            if let Some((position, principal)) = unconfirmed.take() {
                if dropped > 0 {
                    attempts = 0;
                } else {
                    attempts += 1;
                    if attempts > self.policy.retries {
                        warn!(
                            path = %node.logical_path,
                            position,
                            attempts,
                            "entry still listed after delete, skipping"
                        );
                        record_delete_failure(
                            node,
                            position,
                            principal,
                            attempts,
                            "entry still listed after a successful delete".to_owned(),
                            report,
                        );
                        skip += 1;
                        attempts = 0;
                    } else {
                        debug!(path = %node.logical_path, position, "delete had no effect, retrying");
                    }
                }
            }

            let remaining = budget.get_or_insert_with(|| {
                let retries = usize::try_from(self.policy.retries).unwrap_or(usize::MAX);
                targets.len().saturating_mul(retries.saturating_add(1)).saturating_add(1)
            });
            if *remaining == 0 {
                let left = targets.iter().skip(skip);
                warn!(
                    path = %node.logical_path,
                    left = left.len(),
                    "giving up on entry deletion"
                );
                for target in left {
                    record_delete_failure(
                        node,
                        target.position,
                        target.subject.user().cloned(),
                        attempts.max(1),
                        "deletion budget exhausted".to_owned(),
                        report,
                    );
                }
                break;
            }
            *remaining -= 1;

            let Some(target) = targets.get(skip) else {
                break;
            };
            let position = target.position;
            let principal = target.subject.user().cloned();

            match self.gateway.delete_entry(node, position) {
                Ok(()) => {
                    debug!(
                        path = %node.logical_path,
                        position,
                        entry = %target,
                        "entry delete accepted"
                    );
                    unconfirmed = Some((position, principal));
                }
                Err(err) => {
                    attempts += 1;
                    if attempts > self.policy.retries {
                        warn!(
                            path = %node.logical_path,
                            position,
                            attempts,
                            error = %err,
                            "entry delete failed, skipping"
                        );
                        record_delete_failure(node, position, principal, attempts, err.to_string(), report);
                        skip += 1;
                        attempts = 0;
                    } else {
                        debug!(path = %node.logical_path, position, error = %err, "retrying delete");
                    }
                }
            }
        }

        Ok(removed)
    }

    /// Add an explicit entry, retrying after re-reading the node. An entry
    /// that shows up in the listing despite the error counts as added.
    fn add_with_retry(
        &mut self,
        node: &Node,
        principal: &Principal,
        effect: Effect,
        rights: &Rights,
        report: &mut RunReport,
    ) -> bool {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.gateway.add_entry(node, principal, effect, rights) {
                Ok(()) => {
                    debug!(
                        path = %node.logical_path,
                        principal = %principal,
                        effect = %effect,
                        rights = %rights,
                        "entry added"
                    );
                    return true;
                }
                Err(err) => err,
            };

            let landed = self.gateway.list_entries(node).is_ok_and(|entries| {
                entries
                    .iter()
                    .any(|entry| entry.is_explicit_for(principal, effect) && entry.rights == *rights)
            });
            if landed {
                debug!(
                    path = %node.logical_path,
                    principal = %principal,
                    error = %err,
                    "add reported failure but entry is present"
                );
                return true;
            }

            if attempts > self.policy.retries {
                warn!(
                    path = %node.logical_path,
                    principal = %principal,
                    effect = %effect,
                    rights = %rights,
                    attempts,
                    error = %err,
                    "entry add failed, skipping"
                );
                report.record_mutation_failure(MutationFailure {
                    node_id: node.id,
                    path: node.logical_path.clone(),
                    principal: Some(principal.clone()),
                    action: MutationAction::Add {
                        effect,
                        rights: rights.clone(),
                    },
                    attempts,
                    error: err.to_string(),
                });
                return false;
            }
            debug!(path = %node.logical_path, principal = %principal, error = %err, "retrying add");
        }
    }
}

fn record_delete_failure(
    node: &Node,
    position: usize,
    principal: Option<Principal>,
    attempts: u32,
    error: String,
    report: &mut RunReport,
) {
    report.record_mutation_failure(MutationFailure {
        node_id: node.id,
        path: node.logical_path.clone(),
        principal,
        action: MutationAction::Delete { position },
        attempts,
        error,
    });
}

fn record_inspect_failure(
    node: &Node,
    principal: &Principal,
    err: &SyncError,
    report: &mut RunReport,
) {
    warn!(
        path = %node.logical_path,
        principal = %principal,
        error = %err,
        "cannot inspect ancestor, traversal walk stopped"
    );
    report.record_mutation_failure(MutationFailure {
        node_id: node.id,
        path: node.logical_path.clone(),
        principal: Some(principal.clone()),
        action: MutationAction::Inspect,
        attempts: 1,
        error: err.to_string(),
    });
}
