//! Simulated inheritance-evaluating ACL tree.
//!
//! Stands in for both the ACL tool and the access probe. Entries are stored
//! per node as explicit entries; listings append the inheritable entries of
//! every ancestor at their distance, so positions shift exactly like the real
//! tool's after a delete.
//!
//! Evaluation for a (principal, node, right): walk the listing by increasing
//! level; at the first level holding a matching entry, a deny wins over an
//! allow. Entering a node also requires entering every ancestor.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use grantsync_core::gateway::AclGateway;
use grantsync_core::probe::AccessProbe;
use grantsync_error::{Result, SyncError};
use grantsync_types::{
    AccessEntry, ActualAccess, Effect, Node, NodeId, Principal, Rights, Subject, TreeIndex,
};
use serde::Serialize;

/// An entry stored on a node, without position or level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StoredEntry {
    pub subject: Subject,
    pub effect: Effect,
    pub rights: Rights,
}

impl StoredEntry {
    pub fn user(principal: impl Into<Principal>, effect: Effect, rights: Rights) -> Self {
        Self {
            subject: Subject::User(principal.into()),
            effect,
            rights,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    List,
    Add,
    Delete,
}

/// An injected failure. `remaining` counts down on each hit; `u32::MAX`
/// never runs out.
#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    node: NodeId,
    principal: Option<Principal>,
    remaining: u32,
    /// Apply the mutation, then report failure anyway.
    applies: bool,
}

/// Every gateway call, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    List(NodeId),
    Add {
        node: NodeId,
        principal: Principal,
        effect: Effect,
        rights: Rights,
    },
    Delete {
        node: NodeId,
        position: usize,
    },
}

#[derive(Debug, Clone)]
enum ProbeOverride {
    Access(ActualAccess),
    Fail,
}

#[derive(Debug, Default)]
pub struct SimulatedAclTree {
    tree: TreeIndex,
    explicit: BTreeMap<NodeId, Vec<StoredEntry>>,
    missing: BTreeSet<NodeId>,
    faults: RefCell<Vec<Fault>>,
    probe_overrides: BTreeMap<(NodeId, Principal), ProbeOverride>,
    calls: RefCell<Vec<GatewayCall>>,
}

impl SimulatedAclTree {
    #[must_use]
    pub fn new(tree: TreeIndex) -> Self {
        Self {
            tree,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    /// Store an explicit entry without going through the gateway.
    pub fn seed(&mut self, node: NodeId, entry: StoredEntry) {
        self.explicit.entry(node).or_default().push(entry);
    }

    /// Make the node's physical location disappear.
    pub fn mark_missing(&mut self, node: NodeId) {
        self.missing.insert(node);
    }

    /// Fail the next `times` adds on `node` (for `principal` if given).
    pub fn fail_add(&mut self, node: NodeId, principal: Option<&Principal>, times: u32) {
        self.push_fault(FaultOp::Add, node, principal, times, false);
    }

    /// Apply the next `times` adds on `node`, then report failure anyway.
    pub fn fail_add_after_applying(&mut self, node: NodeId, principal: Option<&Principal>, times: u32) {
        self.push_fault(FaultOp::Add, node, principal, times, true);
    }

    pub fn fail_delete(&mut self, node: NodeId, times: u32) {
        self.push_fault(FaultOp::Delete, node, None, times, false);
    }

    pub fn fail_list(&mut self, node: NodeId, times: u32) {
        self.push_fault(FaultOp::List, node, None, times, false);
    }

    pub fn clear_faults(&mut self) {
        self.faults.get_mut().clear();
    }

    pub fn force_probe(&mut self, node: NodeId, principal: &Principal, access: ActualAccess) {
        self.probe_overrides
            .insert((node, principal.clone()), ProbeOverride::Access(access));
    }

    pub fn fail_probe(&mut self, node: NodeId, principal: &Principal) {
        self.probe_overrides
            .insert((node, principal.clone()), ProbeOverride::Fail);
    }

    fn push_fault(
        &mut self,
        op: FaultOp,
        node: NodeId,
        principal: Option<&Principal>,
        remaining: u32,
        applies: bool,
    ) {
        self.faults.get_mut().push(Fault {
            op,
            node,
            principal: principal.cloned(),
            remaining,
            applies,
        });
    }

    /// Consume a matching fault. Returns whether the mutation still applies.
    fn take_fault(&self, op: FaultOp, node: NodeId, principal: Option<&Principal>) -> Option<bool> {
        let mut faults = self.faults.borrow_mut();
        let fault = faults.iter_mut().find(|fault| {
            fault.op == op
                && fault.node == node
                && fault.remaining > 0
                && (fault.principal.is_none() || fault.principal.as_ref() == principal)
        })?;
        if fault.remaining != u32::MAX {
            fault.remaining -= 1;
        }
        Some(fault.applies)
    }

    fn injected(node: &Node, op: &str) -> SyncError {
        SyncError::acl_tool(&node.physical_path, format!("injected {op} failure"))
    }

    /// Explicit entries of `node`, in stored order.
    #[must_use]
    pub fn explicit_entries(&self, node: NodeId) -> &[StoredEntry] {
        self.explicit.get(&node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Full listing as the tool would print it: explicit entries, then
    /// inherited ones by increasing level.
    #[must_use]
    pub fn listing(&self, node: NodeId) -> Vec<AccessEntry> {
        let own = self.explicit_entries(node).iter().map(|entry| (entry, 0));
        let ancestors = self.tree.ancestors(node);
        let inherited = ancestors.iter().zip(1_u32..).flat_map(|(ancestor, level)| {
            self.explicit_entries(*ancestor)
                .iter()
                .filter(|entry| entry.rights.inherits())
                .map(move |entry| (entry, level))
        });
        own.chain(inherited)
            .enumerate()
            .map(|(position, (entry, level))| AccessEntry {
                position,
                subject: entry.subject.clone(),
                effect: entry.effect,
                rights: entry.rights.clone(),
                level,
            })
            .collect()
    }

    /// Explicit entries of every node rendered as sorted strings, for
    /// order-insensitive state comparison.
    #[must_use]
    pub fn entry_set(&self) -> BTreeMap<NodeId, Vec<String>> {
        self.explicit
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(node, entries)| {
                let mut rendered: Vec<String> = entries
                    .iter()
                    .map(|entry| format!("{}:{}:{}", entry.subject, entry.effect, entry.rights))
                    .collect();
                rendered.sort();
                (*node, rendered)
            })
            .collect()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&mut self) {
        self.calls.get_mut().clear();
    }

    /// Number of add and delete calls made so far.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| !matches!(call, GatewayCall::List(_)))
            .count()
    }

    fn decides(&self, principal: &Principal, node: NodeId, covers: fn(&Rights) -> bool) -> bool {
        let listing = self.listing(node);
        let mut levels: Vec<u32> = listing.iter().map(|entry| entry.level).collect();
        levels.dedup();
        for level in levels {
            let matching: Vec<&AccessEntry> = listing
                .iter()
                .filter(|entry| entry.level == level && covers(&entry.rights))
                .filter(|entry| entry.applies_to(principal) || entry.subject == Subject::Everyone)
                .collect();
            if matching.iter().any(|entry| entry.effect == Effect::Deny) {
                return false;
            }
            if matching.iter().any(|entry| entry.effect == Effect::Allow) {
                return true;
            }
        }
        false
    }

    /// What `principal` can actually do on `node` under the stored entries.
    #[must_use]
    pub fn effective_access(&self, principal: &Principal, node: NodeId) -> ActualAccess {
        let reachable = self
            .tree
            .ancestors(node)
            .into_iter()
            .all(|ancestor| self.decides(principal, ancestor, Rights::covers_enter));
        if !reachable || !self.decides(principal, node, Rights::covers_enter) {
            return ActualAccess::Denied;
        }
        if self.decides(principal, node, Rights::covers_enumerate) {
            ActualAccess::Full
        } else {
            ActualAccess::TraversalOnly
        }
    }
}

impl AclGateway for SimulatedAclTree {
    fn node_exists(&self, node: &Node) -> bool {
        self.tree.node(node.id).is_some() && !self.missing.contains(&node.id)
    }

    fn list_entries(&self, node: &Node) -> Result<Vec<AccessEntry>> {
        self.calls.borrow_mut().push(GatewayCall::List(node.id));
        if self.take_fault(FaultOp::List, node.id, None).is_some() {
            return Err(Self::injected(node, "list"));
        }
        Ok(self.listing(node.id))
    }

    fn add_entry(
        &mut self,
        node: &Node,
        principal: &Principal,
        effect: Effect,
        rights: &Rights,
    ) -> Result<()> {
        self.calls.get_mut().push(GatewayCall::Add {
            node: node.id,
            principal: principal.clone(),
            effect,
            rights: rights.clone(),
        });
        let fault = self.take_fault(FaultOp::Add, node.id, Some(principal));
        if fault != Some(false) {
            self.seed(node.id, StoredEntry::user(principal.clone(), effect, rights.clone()));
        }
        match fault {
            Some(_) => Err(Self::injected(node, "add")),
            None => Ok(()),
        }
    }

    fn delete_entry(&mut self, node: &Node, position: usize) -> Result<()> {
        self.calls.get_mut().push(GatewayCall::Delete {
            node: node.id,
            position,
        });
        if self.take_fault(FaultOp::Delete, node.id, None).is_some() {
            return Err(Self::injected(node, "delete"));
        }
        let entries = self.explicit.entry(node.id).or_default();
        if position >= entries.len() {
            return Err(SyncError::acl_tool(
                &node.physical_path,
                format!("position {position} is not an explicit entry"),
            ));
        }
        entries.remove(position);
        Ok(())
    }
}

impl AccessProbe for SimulatedAclTree {
    fn probe(&self, principal: &Principal, node: &Node) -> Result<ActualAccess> {
        match self.probe_overrides.get(&(node.id, principal.clone())) {
            Some(ProbeOverride::Access(access)) => Ok(*access),
            Some(ProbeOverride::Fail) => Err(SyncError::Probe {
                principal: principal.to_string(),
                path: node.physical_path.clone(),
                detail: "injected probe failure".to_owned(),
            }),
            None => Ok(self.effective_access(principal, node.id)),
        }
    }
}
