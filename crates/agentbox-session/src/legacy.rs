//! Legacy on-disk session layout.
//!
//! ```text
//! <resume root>/.active-session            active session name
//! <resume root>/sessions/<key>/.name         display name
//! <resume root>/sessions/<key>/.resume-token resume token
//! ```
//!
//! Every file holds one newline-trimmed value.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{
    error::{RegistryError, io_at},
    keys::{ACTIVE_SESSION_FILE, NAME_FILE, RESUME_TOKEN_FILE},
    removal::{Removal, RemovalReport},
};

/// Subdirectory of the resume root holding one directory per session.
pub const SESSIONS_DIR: &str = "sessions";

/// One session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySession {
    /// Directory name, i.e. the session key.
    pub id: String,
    /// Trimmed `.name` content, if present and non-empty.
    pub name: Option<String>,
}

impl LegacySession {
    /// The name, or the id for sessions that were never named.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Filesystem-only view of one `(workspace, agent, project)` resume root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLayout {
    root: PathBuf,
}

impl LegacyLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    #[must_use]
    pub fn session_dir(&self, session_key: &str) -> PathBuf {
        self.sessions_dir().join(session_key)
    }

    #[must_use]
    pub fn active_session_path(&self) -> PathBuf {
        self.root.join(ACTIVE_SESSION_FILE)
    }

    pub fn read_resume_token(&self, session_key: &str) -> Result<Option<String>, RegistryError> {
        read_trimmed(&self.session_dir(session_key).join(RESUME_TOKEN_FILE))
    }

    pub fn read_active_session(&self) -> Result<Option<String>, RegistryError> {
        read_trimmed(&self.active_session_path())
    }

    /// All session directories, ordered by id. A missing sessions
    /// directory is an empty layout.
    pub fn sessions(&self) -> Result<Vec<LegacySession>, RegistryError> {
        let dir = self.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(RegistryError::io("listing sessions", &dir, source)),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_at("listing sessions", &dir))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Ok(id) = entry.file_name().into_string() else {
                continue;
            };
            let name = read_trimmed(&path.join(NAME_FILE))?;
            sessions.push(LegacySession { id, name });
        }

        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    /// Distinct session names, sorted.
    pub fn list_names(&self) -> Result<Vec<String>, RegistryError> {
        let mut names: Vec<String> = self
            .sessions()?
            .into_iter()
            .filter_map(|session| session.name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Delete every session directory named `name`, and the active-session
    /// file if it points at `name`.
    ///
    /// # Errors
    /// A failure after some directories were already deleted is reported
    /// as `RegistryError::PartialRemoval`.
    pub fn remove_by_name(&self, name: &str) -> Result<RemovalReport, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument("session name must not be empty"));
        }

        let mut report = RemovalReport::default();
        let mut removed = 0;
        for session in self.sessions()? {
            if session.name.as_deref() != Some(name) {
                continue;
            }
            let dir = self.session_dir(&session.id);
            if let Err(source) = fs::remove_dir_all(&dir) {
                report.legacy = Removal::from_count(removed);
                return Err(RegistryError::after_removal(
                    report,
                    RegistryError::io("removing session", dir, source),
                ));
            }
            tracing::debug!(session = %session.id, name, "Removed legacy session directory");
            removed += 1;
        }
        report.legacy = Removal::from_count(removed);

        match self.read_active_session() {
            Ok(Some(active)) if active == name => {
                let path = self.active_session_path();
                match fs::remove_file(&path) {
                    Ok(()) => report.active_cleared = true,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(RegistryError::after_removal(
                            report,
                            RegistryError::io("clearing active session", path, source),
                        ));
                    }
                }
            }
            Ok(_) => {}
            Err(err) => return Err(RegistryError::after_removal(report, err)),
        }

        Ok(report)
    }

    /// Resolve a user-supplied selector to a session name.
    ///
    /// A session whose name or id equals the selector wins immediately.
    /// Otherwise the selector must be a prefix of exactly one session id.
    /// An empty selector, or one that matches nothing, resolves to `None`.
    pub fn resolve_selector(&self, selector: &str) -> Result<Option<String>, RegistryError> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Ok(None);
        }

        let mut candidates = Vec::new();
        for session in self.sessions()? {
            if session.id == selector || session.name.as_deref() == Some(selector) {
                return Ok(Some(session.display_name().to_string()));
            }
            if session.id.starts_with(selector) {
                candidates.push(session);
            }
        }

        if candidates.len() > 1 {
            return Err(RegistryError::Ambiguous {
                selector: selector.to_string(),
                candidates: candidates.into_iter().map(|s| s.id).collect(),
            });
        }
        Ok(candidates.pop().map(|s| s.display_name().to_string()))
    }
}

/// Read a one-value file. Missing and blank files both read as `None`.
fn read_trimmed(path: &Path) -> Result<Option<String>, RegistryError> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let value = raw.trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RegistryError::io("reading", path, source)),
    }
}
