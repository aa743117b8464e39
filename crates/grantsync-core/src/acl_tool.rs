//! [`AclGateway`] over a Synology-style ACL command line tool.
//!
//! The tool speaks text: `-get <path>` prints one line per entry,
//! `-add <path> <ace>` appends an entry and `-del <path> <index>` removes one.
//! Text is decoded into typed [`AccessEntry`] values here and nowhere else.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use grantsync_error::{Result, SyncError};
use grantsync_types::{AccessEntry, Effect, Node, Principal, Rights, Subject};
use regex::Regex;
use tracing::debug;

use crate::gateway::AclGateway;

/// Default tool binary.
pub const DEFAULT_ACL_TOOL: &str = "synoacltool";

/// Permission/inheritance strings for each right the reconciler writes.
pub const TRAVERSE_SPEC: (&str, &str) = ("--x----------", "----");
pub const DISCOVER_SPEC: (&str, &str) = ("r-x---a-R-c--", "----");
pub const READ_LIST_SPEC: (&str, &str) = ("r-x---a-R-c--", "fd--");
pub const FULL_SPEC: (&str, &str) = ("rwxpdDaARWcCo", "fd--");

static ENTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[(\d+)\]\s+(.+?)\s+\(level:(\d+)\)\s*$").expect("entry line regex is valid")
});

/// Permission and inheritance strings for `rights`.
#[must_use]
pub fn rights_spec(rights: &Rights) -> (&str, &str) {
    match rights {
        Rights::Traverse => TRAVERSE_SPEC,
        Rights::Discover => DISCOVER_SPEC,
        Rights::ReadList => READ_LIST_SPEC,
        Rights::Full => FULL_SPEC,
        Rights::Custom { perms, inherit } => (perms.as_str(), inherit.as_str()),
    }
}

/// Inverse of [`rights_spec`]; unknown combinations are kept verbatim.
#[must_use]
pub fn parse_rights(perms: &str, inherit: &str) -> Rights {
    match (perms, inherit) {
        spec if spec == TRAVERSE_SPEC => Rights::Traverse,
        spec if spec == DISCOVER_SPEC => Rights::Discover,
        spec if spec == READ_LIST_SPEC => Rights::ReadList,
        spec if spec == FULL_SPEC => Rights::Full,
        _ => Rights::Custom {
            perms: perms.to_owned(),
            inherit: inherit.to_owned(),
        },
    }
}

/// Render the ACE argument for `-add`.
#[must_use]
pub fn format_ace(principal: &Principal, effect: Effect, rights: &Rights) -> String {
    let (perms, inherit) = rights_spec(rights);
    format!("user:{principal}:{effect}:{perms}:{inherit}")
}

/// Parse one ACE, e.g. `user:bonzac:allow:r-x---a-R-c--:fd--`.
pub fn parse_ace(position: usize, level: u32, ace: &str) -> Result<AccessEntry> {
    let parse_error = |detail: &str| SyncError::AclParse {
        line: ace.to_owned(),
        detail: detail.to_owned(),
    };

    let (kind, rest) = ace
        .split_once(':')
        .ok_or_else(|| parse_error("missing subject kind"))?;
    let mut tail = rest.rsplitn(4, ':');
    let inherit = tail.next().ok_or_else(|| parse_error("missing inheritance"))?;
    let perms = tail.next().ok_or_else(|| parse_error("missing permissions"))?;
    let effect = tail.next().ok_or_else(|| parse_error("missing effect"))?;
    let name = tail.next().ok_or_else(|| parse_error("missing subject name"))?;

    let subject = match kind {
        "user" if !name.is_empty() => Subject::User(Principal::from(name)),
        "group" => Subject::Group(name.to_owned()),
        "everyone" => Subject::Everyone,
        "owner" => Subject::Owner,
        _ => return Err(parse_error("unknown subject")),
    };
    let effect = match effect {
        "allow" => Effect::Allow,
        "deny" => Effect::Deny,
        _ => return Err(parse_error("unknown effect")),
    };

    Ok(AccessEntry {
        position,
        subject,
        effect,
        rights: parse_rights(perms, inherit),
        level,
    })
}

/// Parse `-get` output. Header lines (version, owner, separators) are skipped.
pub fn parse_listing(output: &str) -> Result<Vec<AccessEntry>> {
    let mut entries = Vec::new();
    for line in output.lines() {
        let Some(captures) = ENTRY_LINE.captures(line) else {
            continue;
        };
        let position = captures[1].parse::<usize>().map_err(|err| SyncError::AclParse {
            line: line.to_owned(),
            detail: format!("bad index: {err}"),
        })?;
        let level = captures[3].parse::<u32>().map_err(|err| SyncError::AclParse {
            line: line.to_owned(),
            detail: format!("bad level: {err}"),
        })?;
        entries.push(parse_ace(position, level, &captures[2])?);
    }
    Ok(entries)
}

/// Gateway that shells out to the ACL tool for every call.
#[derive(Debug, Clone)]
pub struct ToolAclGateway {
    program: PathBuf,
}

impl ToolAclGateway {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, path: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .arg(args[0])
            .arg(path)
            .args(&args[1..])
            .output()
            .map_err(|err| {
                SyncError::acl_tool(path, format!("spawn {}: {err}", self.program.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::acl_tool(
                path,
                format!(
                    "{} {} exited with {}: {}",
                    self.program.display(),
                    args[0],
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ToolAclGateway {
    fn default() -> Self {
        Self::new(DEFAULT_ACL_TOOL)
    }
}

impl AclGateway for ToolAclGateway {
    fn node_exists(&self, node: &Node) -> bool {
        node.physical_path.is_dir()
    }

    fn list_entries(&self, node: &Node) -> Result<Vec<AccessEntry>> {
        let stdout = self.run(&node.physical_path, &["-get"])?;
        parse_listing(&stdout)
    }

    fn add_entry(
        &mut self,
        node: &Node,
        principal: &Principal,
        effect: Effect,
        rights: &Rights,
    ) -> Result<()> {
        let ace = format_ace(principal, effect, rights);
        debug!(path = %node.physical_path.display(), ace = %ace, "acl add");
        self.run(&node.physical_path, &["-add", &ace]).map(|_| ())
    }

    fn delete_entry(&mut self, node: &Node, position: usize) -> Result<()> {
        let index = position.to_string();
        debug!(path = %node.physical_path.display(), position, "acl delete");
        self.run(&node.physical_path, &["-del", &index]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
ACL version: 1
Archive: has_ACL,is_support_ACL
Owner: [admin(user)]
---------------------
\t [0] user:bonzac:allow:r-x---a-R-c--:fd-- (level:0)
\t [1] user:valentin:deny:rwxpdDaARWcCo:fd-- (level:0)
\t [2] user:famille:allow:--x----------:---- (level:0)
\t [3] group:administrators:allow:rwxpdDaARWc--:fd-- (level:1)
\t [4] everyone::allow:r-x---a-R-c--:fd-- (level:2)
";

    #[test]
    fn listing_parses_into_typed_entries() {
        let entries = parse_listing(LISTING).unwrap();
        assert_eq!(entries.len(), 5);

        assert_eq!(entries[0].subject, Subject::User(Principal::from("bonzac")));
        assert_eq!(entries[0].effect, Effect::Allow);
        assert_eq!(entries[0].rights, Rights::ReadList);
        assert_eq!(entries[0].level, 0);

        assert_eq!(entries[1].effect, Effect::Deny);
        assert_eq!(entries[1].rights, Rights::Full);
        assert_eq!(entries[2].rights, Rights::Traverse);

        assert_eq!(entries[3].subject, Subject::Group("administrators".to_owned()));
        assert_eq!(entries[3].level, 1);
        assert!(matches!(entries[3].rights, Rights::Custom { .. }));

        assert_eq!(entries[4].subject, Subject::Everyone);
        assert_eq!(entries[4].position, 4);
        assert_eq!(entries[4].level, 2);
    }

    #[test]
    fn empty_listing_has_no_entries() {
        let entries = parse_listing("ACL version: 1\nArchive: is_support_ACL\n").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn malformed_entry_is_an_error() {
        let err = parse_listing("\t [0] user:bonzac:permit:r-x---a-R-c--:fd-- (level:0)\n")
            .unwrap_err();
        assert!(matches!(err, SyncError::AclParse { .. }));

        let err = parse_listing("\t [0] nonsense (level:0)\n").unwrap_err();
        assert!(matches!(err, SyncError::AclParse { .. }));
    }

    #[test]
    fn ace_format_matches_listing_format() {
        let principal = Principal::from("bonzac");
        for rights in [Rights::Traverse, Rights::Discover, Rights::ReadList, Rights::Full] {
            let ace = format_ace(&principal, Effect::Allow, &rights);
            let parsed = parse_ace(0, 0, &ace).unwrap();
            assert_eq!(parsed.rights, rights, "ace={ace}");
            assert_eq!(parsed.subject, Subject::User(principal.clone()));
        }
        assert_eq!(
            format_ace(&principal, Effect::Deny, &Rights::Full),
            "user:bonzac:deny:rwxpdDaARWcCo:fd--"
        );
    }

    #[test]
    fn missing_tool_binary_is_reported_not_panicked() {
        let gateway = ToolAclGateway::new("/nonexistent/grantsync-acl-tool");
        let node = Node {
            id: grantsync_types::NodeId(1),
            logical_path: "/".to_owned(),
            parent: None,
            physical_path: PathBuf::from("/tmp"),
        };
        let err = gateway.list_entries(&node).unwrap_err();
        assert!(matches!(err, SyncError::AclTool { .. }));
    }
}
