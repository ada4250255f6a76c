//! Store key scheme and session identifiers.

use std::fmt;

use agentbox_core::{ProjectKey, SessionScope};
use uuid::Uuid;

/// Per-session display name, in the store and as a legacy file.
pub const NAME_FILE: &str = ".name";
/// Per-session resume token, in the store and as a legacy file.
pub const RESUME_TOKEN_FILE: &str = ".resume-token";
/// Per-project active session pointer, in the store and as a legacy file.
pub const ACTIVE_SESSION_FILE: &str = ".active-session";

/// Opaque identifier of one session within an `(agent, project)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// A fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sess_{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What a key under a `KeySpace` prefix refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionField<'k> {
    Name(&'k str),
    ResumeToken(&'k str),
    ActiveSession,
}

/// Keys for one `(agent, project)` namespace:
///
/// ```text
/// session:<agent>:<project>:<session>:.name
/// session:<agent>:<project>:<session>:.resume-token
/// session:<agent>:<project>:.active-session
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    #[must_use]
    pub fn new(agent: &str, project_key: &ProjectKey) -> Self {
        Self {
            prefix: format!("session:{agent}:{project_key}:"),
        }
    }

    #[must_use]
    pub fn for_scope(scope: &SessionScope) -> Self {
        Self::new(scope.agent(), scope.project_key())
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn name(&self, session_key: &str) -> String {
        format!("{}{session_key}:{NAME_FILE}", self.prefix)
    }

    #[must_use]
    pub fn resume_token(&self, session_key: &str) -> String {
        format!("{}{session_key}:{RESUME_TOKEN_FILE}", self.prefix)
    }

    #[must_use]
    pub fn active_session(&self) -> String {
        format!("{}{ACTIVE_SESSION_FILE}", self.prefix)
    }

    /// Classify a raw store key. Keys outside this namespace, or with an
    /// unknown suffix, yield `None`.
    #[must_use]
    pub fn classify<'k>(&self, key: &'k [u8]) -> Option<SessionField<'k>> {
        let rest = std::str::from_utf8(key).ok()?.strip_prefix(&self.prefix)?;
        if rest == ACTIVE_SESSION_FILE {
            return Some(SessionField::ActiveSession);
        }

        let (session_key, field) = rest.rsplit_once(':')?;
        if session_key.is_empty() {
            return None;
        }
        match field {
            NAME_FILE => Some(SessionField::Name(session_key)),
            RESUME_TOKEN_FILE => Some(SessionField::ResumeToken(session_key)),
            _ => None,
        }
    }
}
