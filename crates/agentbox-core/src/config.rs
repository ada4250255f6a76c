//! Registry configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::SessionScope;

/// Directory name under the platform config dir.
pub const APP_DIR: &str = "agentbox";

/// Explicit configuration for the session registry.
///
/// Every path the registry touches is derived from `config_home`, so two
/// registries with different homes never share state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Root of the agentbox configuration tree.
    pub config_home: PathBuf,
}

impl RegistryConfig {
    #[must_use]
    pub fn new(config_home: impl Into<PathBuf>) -> Self {
        Self {
            config_home: config_home.into(),
        }
    }

    /// Use `<platform config dir>/agentbox`, if the platform has one.
    #[must_use]
    pub fn from_default_home() -> Option<Self> {
        let home = dirs::config_dir()?.join(APP_DIR);
        tracing::debug!(home = %home.display(), "Resolved default config home");
        Some(Self::new(home))
    }

    #[must_use]
    pub fn config_home(&self) -> &Path {
        &self.config_home
    }

    /// Default on-disk directory for the key-value store.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.config_home.join("state")
    }

    /// Root of the legacy per-project resume layout:
    /// `<home>/profiles/global/<workspace>/<agent>/projects/<project key>`.
    #[must_use]
    pub fn resume_root(&self, scope: &SessionScope) -> PathBuf {
        self.config_home
            .join("profiles")
            .join("global")
            .join(scope.workspace())
            .join(scope.agent())
            .join("projects")
            .join(scope.project_key().as_str())
    }
}
