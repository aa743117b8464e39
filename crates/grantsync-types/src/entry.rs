use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Principal;

/// Who an access-control entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Subject {
    User(Principal),
    /// Group entries are observed but never modified.
    Group(String),
    Everyone,
    Owner,
}

impl Subject {
    #[must_use]
    pub const fn user(&self) -> Option<&Principal> {
        match self {
            Self::User(principal) => Some(principal),
            _ => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(principal) => write!(f, "user:{principal}"),
            Self::Group(name) => write!(f, "group:{name}"),
            Self::Everyone => f.write_str("everyone"),
            Self::Owner => f.write_str("owner"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rights carried by an entry.
///
/// The first four variants are the only ones the reconciler writes;
/// `Custom` holds whatever else is found on disk, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rights {
    /// Enter the node without enumerating it. Applies to this node only.
    Traverse,
    /// Enter and enumerate this node only; used for discovery at the root.
    Discover,
    /// Enter, enumerate and read. Inherited by every descendant.
    ReadList,
    /// Every right. Written only on deny entries; inherited by descendants.
    Full,
    Custom { perms: String, inherit: String },
}

impl Rights {
    /// Whether the entry is copied onto descendants as an inherited entry.
    #[must_use]
    pub fn inherits(&self) -> bool {
        match self {
            Self::Traverse | Self::Discover => false,
            Self::ReadList | Self::Full => true,
            Self::Custom { inherit, .. } => inherit.contains('f') || inherit.contains('d'),
        }
    }

    /// Covers the right to enter the node.
    #[must_use]
    pub fn covers_enter(&self) -> bool {
        match self {
            Self::Traverse | Self::Discover | Self::ReadList | Self::Full => true,
            Self::Custom { perms, .. } => perms.contains('x'),
        }
    }

    /// Covers the right to enumerate the node's contents.
    #[must_use]
    pub fn covers_enumerate(&self) -> bool {
        match self {
            Self::Traverse => false,
            Self::Discover | Self::ReadList | Self::Full => true,
            Self::Custom { perms, .. } => perms.contains('r'),
        }
    }

    /// Traversal-only in the reconciliation sense: reach, never read content.
    #[must_use]
    pub const fn is_traversal_only(&self) -> bool {
        matches!(self, Self::Traverse | Self::Discover)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Traverse => f.write_str("traverse"),
            Self::Discover => f.write_str("discover"),
            Self::ReadList => f.write_str("read_list"),
            Self::Full => f.write_str("full"),
            Self::Custom { perms, inherit } => write!(f, "custom({perms}:{inherit})"),
        }
    }
}

/// One entry of a node's access-control list, as listed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    /// Position in the listing. Only valid until the next mutation.
    pub position: usize,
    pub subject: Subject,
    pub effect: Effect,
    pub rights: Rights,
    /// 0 for explicit entries, k for entries inherited from the k-th ancestor.
    pub level: u32,
}

impl AccessEntry {
    #[must_use]
    pub const fn is_explicit(&self) -> bool {
        self.level == 0
    }

    #[must_use]
    pub fn applies_to(&self, principal: &Principal) -> bool {
        self.subject.user() == Some(principal)
    }

    #[must_use]
    pub fn is_explicit_for(&self, principal: &Principal, effect: Effect) -> bool {
        self.is_explicit() && self.effect == effect && self.applies_to(principal)
    }
}

impl fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{}:{} (level:{})",
            self.position, self.subject, self.effect, self.rights, self.level
        )
    }
}

/// Access a principal actually has on a node, as observed by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualAccess {
    /// Can enumerate the node's contents.
    Full,
    /// Can enter the node but not enumerate it.
    TraversalOnly,
    /// Cannot enter the node.
    Denied,
}

impl fmt::Display for ActualAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::TraversalOnly => "traversal-only",
            Self::Denied => "denied",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Aligned,
    MissingPermission,
    OverPrivileged,
}

impl Classification {
    #[must_use]
    pub const fn is_aligned(self) -> bool {
        matches!(self, Self::Aligned)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aligned => "ALIGNED",
            Self::MissingPermission => "MISSING_PERMISSION",
            Self::OverPrivileged => "OVER_PRIVILEGED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(subject: Subject, effect: Effect, rights: Rights, level: u32) -> AccessEntry {
        AccessEntry {
            position: 0,
            subject,
            effect,
            rights,
            level,
        }
    }

    #[test]
    fn inheritance_by_rights() {
        assert!(!Rights::Traverse.inherits());
        assert!(!Rights::Discover.inherits());
        assert!(Rights::ReadList.inherits());
        assert!(Rights::Full.inherits());
        let custom = Rights::Custom {
            perms: "r-x---a-R-c--".to_owned(),
            inherit: "fd--".to_owned(),
        };
        assert!(custom.inherits());
        assert!(custom.covers_enumerate());
        assert!(custom.covers_enter());
    }

    #[test]
    fn traversal_only_rights() {
        assert!(Rights::Traverse.is_traversal_only());
        assert!(Rights::Discover.is_traversal_only());
        assert!(!Rights::ReadList.is_traversal_only());
        assert!(!Rights::Traverse.covers_enumerate());
    }

    #[test]
    fn explicit_match_requires_level_zero_user() {
        let bonzac = Principal::from("bonzac");
        let explicit = entry(Subject::User(bonzac.clone()), Effect::Deny, Rights::Full, 0);
        let inherited = entry(Subject::User(bonzac.clone()), Effect::Deny, Rights::Full, 2);
        let group = entry(
            Subject::Group("bonzac".to_owned()),
            Effect::Deny,
            Rights::Full,
            0,
        );
        assert!(explicit.is_explicit_for(&bonzac, Effect::Deny));
        assert!(!explicit.is_explicit_for(&bonzac, Effect::Allow));
        assert!(!inherited.is_explicit_for(&bonzac, Effect::Deny));
        assert!(!group.is_explicit_for(&bonzac, Effect::Deny));
    }

    #[test]
    fn classification_serializes_screaming() {
        let json = serde_json::to_string(&Classification::MissingPermission).unwrap();
        assert_eq!(json, "\"MISSING_PERMISSION\"");
        assert_eq!(Classification::OverPrivileged.to_string(), "OVER_PRIVILEGED");
    }
}
