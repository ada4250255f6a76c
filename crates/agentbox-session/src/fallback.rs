//! Read-through from the legacy layout with opportunistic migration.
//!
//! A lookup tries the store first. On a store miss it reads the legacy
//! filesystem copy and, if that yields a value, writes it back into the
//! store. The write-back is best-effort by default: its outcome is reported
//! in `Origin::Legacy` next to the value instead of failing the read.

use agentbox_core::{KvStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// What to do when a side-effect write (migration, pointer cleanup) fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectPolicy {
    /// Log the failure and carry on; the triggering call still succeeds.
    #[default]
    Ignore,
    /// Fail the triggering call with `RegistryError::SideEffect`.
    Propagate,
}

/// Outcome of writing a legacy value back into the store.
#[derive(Debug)]
pub enum Migration {
    Migrated,
    Failed(StoreError),
}

/// Where a fetched value came from.
#[derive(Debug)]
pub enum Origin {
    Store,
    Legacy(Migration),
}

/// A value found by a two-tier lookup.
#[derive(Debug)]
pub struct Fetched {
    pub value: String,
    pub origin: Origin,
}

impl Fetched {
    #[must_use]
    pub fn into_value(self) -> String {
        self.value
    }

    #[must_use]
    pub const fn from_legacy(&self) -> bool {
        matches!(self.origin, Origin::Legacy(_))
    }

    /// Set when the value was read from the legacy layout but could not be
    /// written back.
    #[must_use]
    pub const fn migration_failure(&self) -> Option<&StoreError> {
        match &self.origin {
            Origin::Legacy(Migration::Failed(err)) => Some(err),
            _ => None,
        }
    }
}

/// Look `key` up in `store`, falling back to `legacy` on a miss.
pub(crate) fn fetch<S, L>(
    store: &S,
    key: &str,
    policy: SideEffectPolicy,
    legacy: L,
) -> Result<Option<Fetched>, RegistryError>
where
    S: KvStore,
    L: FnOnce() -> Result<Option<String>, RegistryError>,
{
    if let Some(raw) = store.try_get(key.as_bytes())? {
        return Ok(Some(Fetched {
            value: String::from_utf8_lossy(&raw).into_owned(),
            origin: Origin::Store,
        }));
    }

    let Some(value) = legacy()? else {
        return Ok(None);
    };

    let migration = match store.set(key.as_bytes(), value.as_bytes()) {
        Ok(()) => {
            tracing::debug!(key, "Migrated legacy value into store");
            Migration::Migrated
        }
        Err(source) => match policy {
            SideEffectPolicy::Ignore => {
                tracing::warn!(key, error = %source, "Legacy migration failed; filesystem copy kept");
                Migration::Failed(source)
            }
            SideEffectPolicy::Propagate => {
                return Err(RegistryError::SideEffect {
                    operation: "legacy migration",
                    source,
                });
            }
        },
    };

    Ok(Some(Fetched {
        value,
        origin: Origin::Legacy(migration),
    }))
}

#[cfg(test)]
mod tests {
    use agentbox_store::{Store, StoreConfig};
    use tempfile::TempDir;

    use super::*;

    fn read_only_store(dir: &TempDir) -> Store {
        Store::open(StoreConfig::disk(dir.path())).unwrap().close().unwrap();
        Store::open(StoreConfig::disk(dir.path()).read_only()).unwrap()
    }

    #[test]
    fn test_store_hit_skips_legacy() {
        let store = Store::open(StoreConfig::in_memory()).unwrap();
        store.set(b"k", b"from-store").unwrap();

        let fetched = fetch(&store, "k", SideEffectPolicy::Ignore, || {
            panic!("legacy must not be consulted on a store hit")
        })
        .unwrap()
        .unwrap();
        assert_eq!(fetched.value, "from-store");
        assert!(matches!(fetched.origin, Origin::Store));
    }

    #[test]
    fn test_legacy_hit_migrates() {
        let store = Store::open(StoreConfig::in_memory()).unwrap();
        let fetched = fetch(&store, "k", SideEffectPolicy::Ignore, || {
            Ok(Some("from-disk".to_string()))
        })
        .unwrap()
        .unwrap();

        assert!(matches!(fetched.origin, Origin::Legacy(Migration::Migrated)));
        assert_eq!(store.get(b"k").unwrap(), b"from-disk");
    }

    #[test]
    fn test_double_miss() {
        let store = Store::open(StoreConfig::in_memory()).unwrap();
        let fetched = fetch(&store, "k", SideEffectPolicy::Ignore, || Ok(None)).unwrap();
        assert!(fetched.is_none());
    }

    #[test]
    fn test_failed_migration_is_ignored_by_default() {
        let dir = TempDir::new().unwrap();
        let store = read_only_store(&dir);

        let fetched = fetch(&store, "k", SideEffectPolicy::Ignore, || {
            Ok(Some("from-disk".to_string()))
        })
        .unwrap()
        .unwrap();

        assert_eq!(fetched.value, "from-disk");
        assert!(fetched.from_legacy());
        assert!(matches!(
            fetched.migration_failure(),
            Some(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn test_failed_migration_propagates_when_asked() {
        let dir = TempDir::new().unwrap();
        let store = read_only_store(&dir);

        let err = fetch(&store, "k", SideEffectPolicy::Propagate, || {
            Ok(Some("from-disk".to_string()))
        })
        .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::SideEffect {
                source: StoreError::ReadOnly,
                ..
            }
        ));
    }
}
