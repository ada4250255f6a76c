//! Session scope shared by every registry call.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::project::{ProjectKey, derive_project_key};

/// A scope component that cannot be embedded in keys or paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} {value:?}: must be a single path component without ':'")]
pub struct ScopeError {
    pub field: &'static str,
    pub value: String,
}

/// Whether `value` can serve both as one colon-delimited key segment and as
/// one directory name.
#[must_use]
pub fn is_plain_component(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\', ':'])
}

/// The `(agent, workspace, project)` triple a session lives under.
///
/// The project key is derived once from `project_dir` when the scope is
/// built and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    agent: String,
    workspace: String,
    project_dir: PathBuf,
    project_key: ProjectKey,
}

impl SessionScope {
    /// Create a scope for `agent` working on `project_dir` inside `workspace`.
    ///
    /// # Errors
    /// Returns `ScopeError` if `agent` or `workspace` is empty, `.`, `..`,
    /// or contains a path separator or `:`.
    pub fn new(
        agent: impl Into<String>,
        workspace: impl Into<String>,
        project_dir: impl Into<PathBuf>,
    ) -> Result<Self, ScopeError> {
        let agent = checked("agent", agent.into())?;
        let workspace = checked("workspace", workspace.into())?;
        let project_dir = project_dir.into();
        let project_key = derive_project_key(&project_dir);
        Ok(Self {
            agent,
            workspace,
            project_dir,
            project_key,
        })
    }

    #[must_use]
    pub fn agent(&self) -> &str {
        &self.agent
    }

    #[must_use]
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    #[must_use]
    pub const fn project_key(&self) -> &ProjectKey {
        &self.project_key
    }
}

fn checked(field: &'static str, value: String) -> Result<String, ScopeError> {
    if is_plain_component(&value) {
        Ok(value)
    } else {
        Err(ScopeError { field, value })
    }
}
