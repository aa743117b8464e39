use std::fmt;

use grantsync_error::{Result, SyncError};
use serde::{Deserialize, Serialize};

use crate::{NodeId, Principal};

/// Stored permission level of a grant.
///
/// The datastore encodes levels as cumulative bit masks, so the numeric
/// order is also the privilege order. Every level above `None` maps to the
/// same read/list right on the filesystem side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    None,
    View,
    Download,
    Upload,
    Manage,
}

impl PermissionLevel {
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::View,
        Self::Download,
        Self::Upload,
        Self::Manage,
    ];

    /// Decode a stored level. Unknown codes yield `None` so the caller can
    /// reject the grant with its full context.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::View),
            3 => Some(Self::Download),
            7 => Some(Self::Upload),
            15 => Some(Self::Manage),
            _ => None,
        }
    }

    /// Decode a stored level, rejecting unknown codes with their context.
    pub fn decode(node: NodeId, principal: &Principal, code: i64) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| SyncError::UnrecognizedLevel {
            node_id: node.get(),
            principal: principal.to_string(),
            code,
        })
    }

    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::View => 1,
            Self::Download => 3,
            Self::Upload => 7,
            Self::Manage => 15,
        }
    }

    /// "Any grant" in the reconciliation sense.
    #[must_use]
    pub fn is_granted(self) -> bool {
        self > Self::None
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::View => "view",
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Manage => "manage",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for level in PermissionLevel::ALL {
            assert_eq!(PermissionLevel::from_code(level.code()), Some(level));
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        for code in [-1, 2, 4, 5, 8, 16, 255] {
            assert_eq!(PermissionLevel::from_code(code), None, "code={code}");
        }
    }

    #[test]
    fn decode_carries_context() {
        let principal = Principal::from("valentin");
        assert_eq!(
            PermissionLevel::decode(NodeId(4), &principal, 15).unwrap(),
            PermissionLevel::Manage
        );
        let err = PermissionLevel::decode(NodeId(4), &principal, 6).unwrap_err();
        assert!(matches!(
            err,
            SyncError::UnrecognizedLevel { node_id: 4, code: 6, .. }
        ));
    }

    #[test]
    fn ordering_matches_privilege() {
        assert!(PermissionLevel::None < PermissionLevel::View);
        assert!(PermissionLevel::View < PermissionLevel::Download);
        assert!(PermissionLevel::Upload < PermissionLevel::Manage);
        assert!(!PermissionLevel::None.is_granted());
        assert!(PermissionLevel::View.is_granted());
        assert!(PermissionLevel::Manage.is_granted());
    }
}
