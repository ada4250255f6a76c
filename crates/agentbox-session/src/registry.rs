//! Session registry over a key-value store and the legacy layout.

use std::collections::{BTreeMap, BTreeSet};

use agentbox_core::{KvStore, RegistryConfig, SessionScope, is_plain_component};
use serde::Serialize;

use crate::{
    error::RegistryError,
    fallback::{self, Fetched, SideEffectPolicy},
    keys::{KeySpace, SessionField, SessionKey},
    legacy::LegacyLayout,
    removal::{Removal, RemovalReport},
};

/// How the registry treats failed side-effect writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Writing a legacy value back into the store after a fallback read.
    pub migration: SideEffectPolicy,
    /// Clearing the active-session pointer while removing a session.
    pub pointer_cleanup: SideEffectPolicy,
}

/// One session as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub key: String,
    pub name: Option<String>,
    pub has_resume_token: bool,
}

/// Session registry.
///
/// Writes go to the store only. Reads of resume tokens and the active
/// session fall back to the legacy layout and migrate what they find.
pub struct SessionRegistry<S> {
    store: S,
    config: RegistryConfig,
    options: RegistryOptions,
}

impl<S: KvStore> SessionRegistry<S> {
    /// Create a registry with the default (ignoring) side-effect policies.
    #[must_use]
    pub fn new(store: S, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            options: RegistryOptions::default(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub const fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Filesystem-only view of the scope's legacy layout.
    #[must_use]
    pub fn legacy(&self, scope: &SessionScope) -> LegacyLayout {
        LegacyLayout::new(self.config.resume_root(scope))
    }

    /// Store the resume token for a session.
    pub fn save_resume_token(
        &self,
        scope: &SessionScope,
        session_key: &str,
        token: &str,
    ) -> Result<(), RegistryError> {
        validate_session_key(session_key)?;
        let key = KeySpace::for_scope(scope).resume_token(session_key);
        self.store.set(key.as_bytes(), token.as_bytes())?;
        Ok(())
    }

    /// Load a session's resume token, migrating it from the legacy layout
    /// when the store has none.
    pub fn load_resume_token(
        &self,
        scope: &SessionScope,
        session_key: &str,
    ) -> Result<Option<Fetched>, RegistryError> {
        validate_session_key(session_key)?;
        let key = KeySpace::for_scope(scope).resume_token(session_key);
        let legacy = self.legacy(scope);
        fallback::fetch(&self.store, &key, self.options.migration, || {
            legacy.read_resume_token(session_key)
        })
    }

    /// Store the display name of a session.
    pub fn save_session_name(
        &self,
        scope: &SessionScope,
        session_key: &str,
        name: &str,
    ) -> Result<(), RegistryError> {
        validate_session_key(session_key)?;
        let key = KeySpace::for_scope(scope).name(session_key);
        self.store.set(key.as_bytes(), name.as_bytes())?;
        Ok(())
    }

    /// Generate a key for a new session named `name` and record the name.
    pub fn create_session(
        &self,
        scope: &SessionScope,
        name: &str,
    ) -> Result<SessionKey, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument("session name must not be empty"));
        }
        let session_key = SessionKey::generate();
        self.save_session_name(scope, session_key.as_str(), name)?;
        tracing::debug!(session = %session_key, name, "Created session");
        Ok(session_key)
    }

    /// Remember `name` as the scope's active session.
    pub fn set_active_session(&self, scope: &SessionScope, name: &str) -> Result<(), RegistryError> {
        let key = KeySpace::for_scope(scope).active_session();
        self.store.set(key.as_bytes(), name.as_bytes())?;
        Ok(())
    }

    /// The scope's active session name, migrating it from the legacy
    /// layout when the store has none.
    pub fn active_session(&self, scope: &SessionScope) -> Result<Option<Fetched>, RegistryError> {
        let key = KeySpace::for_scope(scope).active_session();
        let legacy = self.legacy(scope);
        fallback::fetch(&self.store, &key, self.options.migration, || {
            legacy.read_active_session()
        })
    }

    /// Distinct session names, sorted.
    ///
    /// Names come from the store. Only when the store holds none is the
    /// legacy layout listed instead; the two sources are never merged.
    pub fn list_names(&self, scope: &SessionScope) -> Result<Vec<String>, RegistryError> {
        let space = KeySpace::for_scope(scope);
        let mut names = BTreeSet::new();
        self.store
            .iterate(space.prefix().as_bytes(), |key, value| {
                if let Some(SessionField::Name(_)) = space.classify(key) {
                    let name = String::from_utf8_lossy(value);
                    let name = name.trim();
                    if !name.is_empty() {
                        names.insert(name.to_string());
                    }
                }
                Ok::<_, RegistryError>(())
            })?;

        if names.is_empty() {
            tracing::debug!(project = %scope.project_key(), "No sessions in store, listing legacy layout");
            return self.legacy(scope).list_names();
        }
        Ok(names.into_iter().collect())
    }

    /// Every session the store knows about, ordered by name then key.
    pub fn list_sessions(&self, scope: &SessionScope) -> Result<Vec<SessionRecord>, RegistryError> {
        let space = KeySpace::for_scope(scope);
        let mut records: BTreeMap<String, SessionRecord> = BTreeMap::new();
        self.store
            .iterate(space.prefix().as_bytes(), |key, value| {
                let (session_key, name) = match space.classify(key) {
                    Some(SessionField::Name(session_key)) => (
                        session_key,
                        Some(String::from_utf8_lossy(value).trim().to_string()),
                    ),
                    Some(SessionField::ResumeToken(session_key)) => (session_key, None),
                    _ => return Ok(()),
                };

                let record = records
                    .entry(session_key.to_string())
                    .or_insert_with(|| SessionRecord {
                        key: session_key.to_string(),
                        name: None,
                        has_resume_token: false,
                    });
                match name {
                    Some(name) => record.name = Some(name).filter(|n| !n.is_empty()),
                    None => record.has_resume_token = true,
                }
                Ok::<_, RegistryError>(())
            })?;

        let mut records: Vec<SessionRecord> = records.into_values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
        Ok(records)
    }

    /// Remove every session named `name` from both backends.
    ///
    /// Store records matching the name lose both their name and resume
    /// token, and an active pointer naming the session is cleared. The
    /// legacy layout is then cleaned the same way regardless of what the
    /// store held.
    ///
    /// # Errors
    /// `InvalidArgument` for a blank name. A legacy failure after anything
    /// was removed is reported as `PartialRemoval` with the full report.
    pub fn remove_by_name(
        &self,
        scope: &SessionScope,
        name: &str,
    ) -> Result<RemovalReport, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument("session name must not be empty"));
        }

        let space = KeySpace::for_scope(scope);
        let mut matched = Vec::new();
        self.store
            .iterate(space.prefix().as_bytes(), |key, value| {
                if let Some(SessionField::Name(session_key)) = space.classify(key) {
                    if String::from_utf8_lossy(value).trim() == name {
                        matched.push(session_key.to_string());
                    }
                }
                Ok::<_, RegistryError>(())
            })?;

        let mut report = RemovalReport::default();
        for (removed, session_key) in matched.iter().enumerate() {
            let result = self
                .store
                .delete(space.name(session_key).as_bytes())
                .and_then(|()| self.store.delete(space.resume_token(session_key).as_bytes()));
            if let Err(err) = result {
                report.store = Removal::from_count(removed);
                return Err(RegistryError::after_removal(report, err.into()));
            }
        }
        report.store = Removal::from_count(matched.len());
        if report.store.is_removed() {
            tracing::debug!(name, removed = matched.len(), "Removed sessions from store");
        }

        if let Err(err) = self.clear_active_pointer(&space, name, &mut report) {
            return Err(RegistryError::after_removal(report, err));
        }

        match self.legacy(scope).remove_by_name(name) {
            Ok(legacy) => {
                report.legacy = legacy.legacy;
                report.active_cleared |= legacy.active_cleared;
                Ok(report)
            }
            Err(RegistryError::PartialRemoval {
                report: legacy,
                source,
            }) => {
                report.legacy = legacy.legacy;
                report.active_cleared |= legacy.active_cleared;
                Err(RegistryError::PartialRemoval { report, source })
            }
            Err(err) => Err(RegistryError::after_removal(report, err)),
        }
    }

    /// Resolve a selector against the legacy session directories.
    ///
    /// See `LegacyLayout::resolve_selector`.
    pub fn resolve_selector(
        &self,
        scope: &SessionScope,
        selector: &str,
    ) -> Result<Option<String>, RegistryError> {
        self.legacy(scope).resolve_selector(selector)
    }

    fn clear_active_pointer(
        &self,
        space: &KeySpace,
        name: &str,
        report: &mut RemovalReport,
    ) -> Result<(), RegistryError> {
        let key = space.active_session();
        let cleared = self.store.try_get(key.as_bytes()).and_then(|current| {
            let points_at_name =
                current.is_some_and(|value| String::from_utf8_lossy(&value).trim() == name);
            if points_at_name {
                self.store.delete(key.as_bytes()).map(|()| true)
            } else {
                Ok(false)
            }
        });

        match cleared {
            Ok(cleared) => {
                report.active_cleared |= cleared;
                Ok(())
            }
            Err(source) => match self.options.pointer_cleanup {
                SideEffectPolicy::Ignore => {
                    tracing::warn!(name, error = %source, "Failed to clear active session pointer");
                    report.pointer_cleanup_failure = Some(source);
                    Ok(())
                }
                SideEffectPolicy::Propagate => Err(RegistryError::SideEffect {
                    operation: "active session cleanup",
                    source,
                }),
            },
        }
    }
}

/// Session keys double as legacy directory names and key segments.
fn validate_session_key(session_key: &str) -> Result<(), RegistryError> {
    if !is_plain_component(session_key) {
        return Err(RegistryError::InvalidArgument(
            "session key must be a single path component without ':'",
        ));
    }
    Ok(())
}
