//! Post-reconciliation invariant checks over a [`SimulatedAclTree`].

use std::collections::BTreeMap;
use std::fmt;

use grantsync_core::GrantSnapshot;
use grantsync_types::{Effect, NodeId, Principal, Rights};
use serde::Serialize;

use crate::simulated::{SimulatedAclTree, StoredEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// More than one explicit allow, or deny, for a principal on a node.
    DuplicateEntry,
    /// Granted principal lacks its `ReadList` allow, or carries a deny.
    GrantNotApplied,
    /// Ungranted principal neither denied nor shielded from inherited allows.
    DenyNotApplied,
    /// An ancestor on the path to a granted node blocks the principal.
    TraversalBlocked,
    /// A principal holding only traversal on a node can still enumerate it
    /// through an allow inherited from a node it is granted on.
    ReadThroughTraversal,
    /// Content rights on a node the principal holds no grant on.
    ExcessRights,
    /// Principal granted somewhere lacks discovery on the root.
    RootNotAggregated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: Rule,
    pub node_id: NodeId,
    pub principal: Principal,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} node={} principal={}: {}",
            self.rule, self.node_id, self.principal, self.detail
        )
    }
}

fn explicit_for<'e>(
    entries: &'e [StoredEntry],
    principal: &Principal,
    effect: Effect,
) -> impl Iterator<Item = &'e StoredEntry> {
    let principal = principal.clone();
    entries
        .iter()
        .filter(move |entry| entry.effect == effect && entry.subject.user() == Some(&principal))
}

/// Every explicit entry on every node is unique per (principal, effect), and
/// content rights only sit where a grant exists.
#[must_use]
pub fn check_tree_wide(snapshot: &GrantSnapshot, sim: &SimulatedAclTree) -> Vec<Violation> {
    let mut violations = Vec::new();
    for node in sim.tree().iter() {
        let entries = sim.explicit_entries(node.id);
        let mut counts: BTreeMap<(&Principal, &str), usize> = BTreeMap::new();
        for entry in entries {
            if let Some(principal) = entry.subject.user() {
                *counts.entry((principal, entry.effect.as_str())).or_default() += 1;
            }
        }
        for ((principal, effect), count) in counts {
            if count > 1 {
                violations.push(Violation {
                    rule: Rule::DuplicateEntry,
                    node_id: node.id,
                    principal: principal.clone(),
                    detail: format!("{count} explicit {effect} entries"),
                });
            }
        }

        for entry in entries {
            let Some(principal) = entry.subject.user() else {
                continue;
            };
            if snapshot.roster.is_excluded(principal) || entry.effect != Effect::Allow {
                continue;
            }
            if !entry.rights.is_traversal_only() && !snapshot.grants.has_grant(node.id, principal) {
                violations.push(Violation {
                    rule: Rule::ExcessRights,
                    node_id: node.id,
                    principal: principal.clone(),
                    detail: format!("allow {} without a grant", entry.rights),
                });
            }
        }
    }
    violations
}

/// Invariants of every node in `reconciled`, plus the traversal path above
/// each of them.
#[must_use]
pub fn check_reconciled(
    snapshot: &GrantSnapshot,
    sim: &SimulatedAclTree,
    reconciled: &[NodeId],
) -> Vec<Violation> {
    let mut violations = check_tree_wide(snapshot, sim);
    let mut violation = |rule, node_id, principal: &Principal, detail: String| {
        violations.push(Violation {
            rule,
            node_id,
            principal: principal.clone(),
            detail,
        });
    };

    for &node_id in reconciled {
        let entries = sim.explicit_entries(node_id);
        for principal in snapshot.roster.known() {
            let allows: Vec<&StoredEntry> = explicit_for(entries, principal, Effect::Allow).collect();
            let has_deny = explicit_for(entries, principal, Effect::Deny).next().is_some();

            if snapshot.grants.has_grant(node_id, principal) {
                if has_deny || !allows.iter().any(|entry| entry.rights == Rights::ReadList) {
                    violation(
                        Rule::GrantNotApplied,
                        node_id,
                        principal,
                        format!("allows={allows:?} deny={has_deny}"),
                    );
                }
                continue;
            }

            if snapshot
                .grants
                .holds_grant_below(&snapshot.tree, node_id, principal)
            {
                if has_deny || !allows.iter().any(|entry| entry.rights.is_traversal_only()) {
                    violation(
                        Rule::TraversalBlocked,
                        node_id,
                        principal,
                        format!("granted below but allows={allows:?} deny={has_deny}"),
                    );
                }
                let inherited_read = sim.listing(node_id).iter().any(|entry| {
                    !entry.is_explicit()
                        && entry.effect == Effect::Allow
                        && entry.applies_to(principal)
                        && entry.rights.covers_enumerate()
                });
                if !has_deny && inherited_read {
                    violation(
                        Rule::ReadThroughTraversal,
                        node_id,
                        principal,
                        "inherited allow enumerates a traversal-only node".to_owned(),
                    );
                }
                continue;
            }

            let inherited_allow = sim.listing(node_id).iter().any(|entry| {
                !entry.is_explicit() && entry.effect == Effect::Allow && entry.applies_to(principal)
            });
            if !has_deny && inherited_allow {
                violation(
                    Rule::DenyNotApplied,
                    node_id,
                    principal,
                    "inherited allow reaches an ungranted principal".to_owned(),
                );
            }
        }

        for (principal, _) in snapshot.grants.granted_on(node_id) {
            if snapshot.roster.is_excluded(principal) {
                continue;
            }
            for ancestor in snapshot.tree.ancestors(node_id) {
                if snapshot.grants.has_grant(ancestor, principal) {
                    break;
                }
                let entries = sim.explicit_entries(ancestor);
                let has_deny = explicit_for(entries, principal, Effect::Deny).next().is_some();
                let traversal = explicit_for(entries, principal, Effect::Allow)
                    .any(|entry| entry.rights.is_traversal_only());
                if has_deny || !traversal {
                    violation(
                        Rule::TraversalBlocked,
                        ancestor,
                        principal,
                        format!("on the way to node {node_id}: deny={has_deny} traversal={traversal}"),
                    );
                }
            }
        }
    }

    if let Some(root) = snapshot.tree.root() {
        for principal in snapshot.grants.principals_with_grants() {
            if snapshot.roster.is_excluded(&principal) || snapshot.grants.has_grant(root.id, &principal)
            {
                continue;
            }
            let granted_in_tree = reconciled
                .iter()
                .any(|node| snapshot.grants.has_grant(*node, &principal));
            let discovers = explicit_for(sim.explicit_entries(root.id), &principal, Effect::Allow)
                .any(|entry| entry.rights == Rights::Discover);
            if granted_in_tree && !discovers {
                violation(
                    Rule::RootNotAggregated,
                    root.id,
                    &principal,
                    "no discovery allow on the root".to_owned(),
                );
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioBuilder;

    #[test]
    fn duplicate_and_excess_entries_are_flagged() {
        let scenario = ScenarioBuilder::new()
            .folder("/")
            .folder("/Scans")
            .grant("/Scans", "bonzac", 1)
            .principal("valentin")
            .build();
        let snapshot = scenario.snapshot();
        let mut sim = scenario.simulated(&snapshot);
        let scans = scenario.id("/Scans");
        sim.seed(scans, StoredEntry::user("bonzac", Effect::Allow, Rights::ReadList));
        sim.seed(scans, StoredEntry::user("bonzac", Effect::Allow, Rights::ReadList));
        sim.seed(scans, StoredEntry::user("valentin", Effect::Allow, Rights::ReadList));

        let rules: Vec<Rule> = check_tree_wide(&snapshot, &sim)
            .into_iter()
            .map(|violation| violation.rule)
            .collect();
        assert_eq!(rules, vec![Rule::DuplicateEntry, Rule::ExcessRights]);
    }
}
