//! Core traits for key-value storage.

use std::time::Duration;

use thiserror::Error;

/// Boxed engine error carried through `StoreError::Storage`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent (or its TTL has elapsed).
    #[error("key not found")]
    NotFound,
    /// A mutation was attempted on a handle opened read-only.
    #[error("store is opened read-only")]
    ReadOnly,
    /// Any other engine or I/O failure, passed through unchanged.
    #[error("storage failure: {0}")]
    Storage(#[source] BoxError),
}

impl StoreError {
    /// Wrap an engine error.
    pub fn storage(err: impl Into<BoxError>) -> Self {
        Self::Storage(err.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Trait for ordered byte-string key-value backends.
///
/// The interface is deliberately narrow: exact-key lookup, upsert, upsert
/// with expiry, delete and ordered prefix iteration.
pub trait KvStore: Send + Sync {
    /// Copy the value stored under `key` out of the engine.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Unconditional single-key upsert.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Upsert a key that the store expires on its own after `ttl`.
    fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Absent keys are not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Visit every key starting with `prefix` in ascending key order.
    ///
    /// An empty prefix visits all keys. The first error returned by `visit`
    /// stops iteration and is returned unchanged.
    fn iterate<F, E>(&self, prefix: &[u8], visit: F) -> Result<(), E>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), E>,
        E: From<StoreError>;

    /// `get` with `NotFound` folded into `None`.
    fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<S: KvStore> KvStore for &S {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        (**self).set_with_ttl(key, value, ttl)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn iterate<F, E>(&self, prefix: &[u8], visit: F) -> Result<(), E>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), E>,
        E: From<StoreError>,
    {
        (**self).iterate(prefix, visit)
    }
}
