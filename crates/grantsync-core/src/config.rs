//! TOML configuration.
//!
//! ```toml
//! share_root = "/volume1/photo"
//!
//! [datastore]
//! path = "/var/lib/grantsync/grants.db"
//! excluded_path_components = ["@eaDir", "#recycle", "#snapshot", "@tmp"]
//!
//! [principals]
//! excluded = ["backup"]
//!
//! [acl_tool]
//! program = "synoacltool"
//! retries = 1
//!
//! [probe]
//! runas = ["sudo", "-n", "-u"]
//! ```

use std::path::{Path, PathBuf};

use grantsync_error::{Result, SyncError};
use grantsync_types::DEFAULT_EXCLUDED_PRINCIPALS;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::acl_tool::DEFAULT_ACL_TOOL;
use crate::probe::DEFAULT_RUNAS;
use crate::reconcile::ReconcilePolicy;
use crate::sqlite_source::{DEFAULT_EXCLUDED_PATH_COMPONENTS, SourceFilter};

/// Config file looked up when none is named explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "grantsync.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Physical directory corresponding to the logical root `/`.
    pub share_root: PathBuf,
    pub datastore: DatastoreConfig,
    pub principals: PrincipalsConfig,
    pub acl_tool: AclToolConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatastoreConfig {
    pub path: PathBuf,
    pub excluded_path_components: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrincipalsConfig {
    /// Added to the built-in exclusion set, never replacing it.
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AclToolConfig {
    pub program: PathBuf,
    /// Extra attempts for a failed add or delete.
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Command prefix; the principal name is appended.
    pub runas: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            share_root: PathBuf::from("/volume1/photo"),
            datastore: DatastoreConfig::default(),
            principals: PrincipalsConfig::default(),
            acl_tool: AclToolConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/grantsync/grants.db"),
            excluded_path_components: DEFAULT_EXCLUDED_PATH_COMPONENTS
                .iter()
                .map(|component| (*component).to_owned())
                .collect(),
        }
    }
}

impl Default for AclToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ACL_TOOL),
            retries: ReconcilePolicy::default().retries,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            runas: DEFAULT_RUNAS.iter().map(|part| (*part).to_owned()).collect(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| SyncError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a named config file. A missing or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config = Self::from_toml_str(&text).map_err(|err| match err {
            SyncError::Config(detail) => SyncError::Config(format!("{}: {detail}", path.display())),
            other => other,
        })?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults. Only used
    /// for the implicit default location.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.share_root.as_os_str().is_empty() {
            return Err(SyncError::Config("share_root must not be empty".to_owned()));
        }
        if self.datastore.path.as_os_str().is_empty() {
            return Err(SyncError::Config("datastore.path must not be empty".to_owned()));
        }
        if self.acl_tool.program.as_os_str().is_empty() {
            return Err(SyncError::Config("acl_tool.program must not be empty".to_owned()));
        }
        if self.probe.runas.is_empty() {
            return Err(SyncError::Config("probe.runas must name a command".to_owned()));
        }
        if let Some(name) = self.principals.excluded.iter().find(|name| name.trim().is_empty()) {
            return Err(SyncError::Config(format!(
                "principals.excluded contains a blank name: {name:?}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            retries: self.acl_tool.retries,
        }
    }

    /// Built-in exclusions plus the configured extras.
    #[must_use]
    pub fn excluded_principals(&self) -> Vec<String> {
        let mut names: Vec<String> = DEFAULT_EXCLUDED_PRINCIPALS
            .iter()
            .map(|name| (*name).to_owned())
            .collect();
        for name in &self.principals.excluded {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    #[must_use]
    pub fn source_filter(&self) -> SourceFilter {
        SourceFilter {
            excluded_principals: self.excluded_principals().into_iter().collect(),
            excluded_path_components: self.datastore.excluded_path_components.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.acl_tool.retries, 1);
        assert_eq!(config.probe.runas, vec!["sudo", "-n", "-u"]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
share_root = "/srv/share"

[principals]
excluded = ["backup"]

[acl_tool]
retries = 3
"#,
        )
        .unwrap();
        assert_eq!(config.share_root, PathBuf::from("/srv/share"));
        assert_eq!(config.acl_tool.retries, 3);
        assert_eq!(config.acl_tool.program, PathBuf::from(DEFAULT_ACL_TOOL));
        assert_eq!(config.reconcile_policy().retries, 3);

        let excluded = config.excluded_principals();
        assert!(excluded.iter().any(|name| name == "backup"));
        assert!(excluded.iter().any(|name| name == "admin"));
        assert!(config.source_filter().is_excluded_principal("backup"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str("[acl_tool]\nprogramme = \"x\"\n").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)), "{err}");
        assert!(err.is_fatal());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = Config::from_toml_str("[probe]\nrunas = []\n").unwrap_err();
        assert!(err.to_string().contains("probe.runas"), "{err}");

        let err = Config::from_toml_str("[principals]\nexcluded = [\" \"]\n").unwrap_err();
        assert!(err.to_string().contains("blank"), "{err}");
    }

    #[test]
    fn load_reports_path_and_default_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());
        assert!(Config::load(&missing).is_err());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "share_root = [").unwrap();
        let err = Config::load_or_default(&bad).unwrap_err();
        assert!(err.to_string().contains("bad.toml"), "{err}");
    }
}
