//! Actual-access probing by direct attempt.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use grantsync_error::{Result, SyncError};
use grantsync_types::{ActualAccess, Node, Principal};
use tracing::{trace, warn};

/// Determines what a principal can actually do on a node. Never mutates.
pub trait AccessProbe {
    fn probe(&self, principal: &Principal, node: &Node) -> Result<ActualAccess>;
}

/// Default command prefix used to act as another user.
pub const DEFAULT_RUNAS: [&str; 3] = ["sudo", "-n", "-u"];

/// Probe that runs `ls` and `cd` as the principal through a run-as prefix.
///
/// The principal name is appended to the prefix, so the default runs
/// `sudo -n -u <principal> ls -A -- <path>`. Before the first probe for a
/// principal, `<prefix> <principal> true` must succeed; otherwise every
/// probe for that principal is an error rather than a denial.
#[derive(Debug, Clone)]
pub struct CommandAccessProbe {
    runas: Vec<String>,
    runas_checked: RefCell<BTreeMap<Principal, bool>>,
}

impl CommandAccessProbe {
    pub fn new(runas: Vec<String>) -> Self {
        Self {
            runas,
            runas_checked: RefCell::new(BTreeMap::new()),
        }
    }

    fn run_as<I, S>(&self, principal: &Principal, path: &Path, args: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let Some((program, prefix)) = self.runas.split_first() else {
            return Err(SyncError::Probe {
                principal: principal.to_string(),
                path: path.to_path_buf(),
                detail: "empty run-as command".to_owned(),
            });
        };

        let status = Command::new(program)
            .args(prefix)
            .arg(principal.as_str())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| SyncError::Probe {
                principal: principal.to_string(),
                path: path.to_path_buf(),
                detail: format!("spawn {program}: {err}"),
            })?;
        Ok(status.success())
    }

    /// Runs the preflight once per principal and remembers the outcome.
    fn ensure_runas(&self, principal: &Principal, path: &Path) -> Result<()> {
        let cached = self.runas_checked.borrow().get(principal).copied();
        let usable = match cached {
            Some(usable) => usable,
            None => {
                let usable = self.run_as(principal, path, ["true"])?;
                if !usable {
                    warn!(principal = %principal, "run-as preflight failed");
                }
                self.runas_checked
                    .borrow_mut()
                    .insert(principal.clone(), usable);
                usable
            }
        };
        if usable {
            Ok(())
        } else {
            Err(SyncError::Probe {
                principal: principal.to_string(),
                path: path.to_path_buf(),
                detail: format!("cannot run commands as {principal}"),
            })
        }
    }

    fn attempt(&self, principal: &Principal, path: &Path, action: &[&str]) -> Result<bool> {
        let args = action
            .iter()
            .map(OsStr::new)
            .chain(std::iter::once(path.as_os_str()));
        let success = self.run_as(principal, path, args)?;

        trace!(
            principal = %principal,
            path = %path.display(),
            action = action[0],
            success,
            "probe attempt"
        );
        Ok(success)
    }
}

impl Default for CommandAccessProbe {
    fn default() -> Self {
        Self::new(DEFAULT_RUNAS.iter().map(|part| (*part).to_owned()).collect())
    }
}

impl AccessProbe for CommandAccessProbe {
    fn probe(&self, principal: &Principal, node: &Node) -> Result<ActualAccess> {
        let path = node.physical_path.as_path();
        self.ensure_runas(principal, path)?;
        if self.attempt(principal, path, &["ls", "-A", "--"])? {
            return Ok(ActualAccess::Full);
        }
        if self.attempt(principal, path, &["sh", "-c", "cd -- \"$1\"", "probe"])? {
            return Ok(ActualAccess::TraversalOnly);
        }
        Ok(ActualAccess::Denied)
    }
}
