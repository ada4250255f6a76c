//! `redb`-backed key-value store.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use agentbox_core::{KvStore, StoreError};
use redb::{
    Database, DatabaseError, Key, ReadOnlyTable, ReadTransaction, ReadableTable, RepairSession,
    TableDefinition, TableError, Value, backends::InMemoryBackend,
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::{Location, StoreConfig},
    recovery::{self, Access},
};

/// Database file inside the configured directory.
pub const DB_FILE: &str = "store.redb";

/// Stored values.
const VALUES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("values");

/// Expiry deadlines (unix millis) for keys written with a TTL.
const EXPIRY: TableDefinition<&[u8], u64> = TableDefinition::new("expiry");

/// Store open error.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no store exists at {path}")]
    Missing { path: PathBuf },
    #[error("failed to open store at {path}: {source}")]
    Engine {
        path: PathBuf,
        #[source]
        source: DatabaseError,
    },
    #[error("failed to create in-memory store: {0}")]
    InMemory(#[source] DatabaseError),
    #[error("failed to initialise store tables: {0}")]
    Init(#[source] StoreError),
}

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Keys whose TTL had elapsed and were physically removed.
    pub expired_purged: usize,
    /// Compaction passes that reclaimed space.
    pub compactions: usize,
}

/// Embedded key-value store.
///
/// At most one writable handle may exist per directory; the engine holds a
/// file lock for the lifetime of the handle.
pub struct Store {
    db: Database,
    location: Location,
    read_only: bool,
    discard_ratio: f64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open a store, repairing recoverable on-disk corruption first.
    ///
    /// Only failures the engine reports as errors are recovered. A file
    /// damaged in ways the engine does not check for, such as one truncated
    /// mid-region, can make the engine panic inside this call.
    ///
    /// # Errors
    /// Returns the engine's original error when the repair pass fails.
    pub fn open(config: StoreConfig) -> Result<Self, OpenError> {
        Self::open_with(config, open_engine)
    }

    pub(crate) fn open_with<O>(config: StoreConfig, mut opener: O) -> Result<Self, OpenError>
    where
        O: FnMut(&Path, Access) -> Result<Database, DatabaseError>,
    {
        let db = match &config.location {
            Location::InMemory => Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .map_err(OpenError::InMemory)?,
            Location::Disk { dir } => {
                let file = dir.join(DB_FILE);
                let access = if config.read_only {
                    if !file.is_file() {
                        return Err(OpenError::Missing { path: file });
                    }
                    Access::ReadOnly
                } else {
                    std::fs::create_dir_all(dir).map_err(|source| OpenError::CreateDir {
                        path: dir.clone(),
                        source,
                    })?;
                    Access::ReadWrite
                };

                recovery::open_with_recovery(
                    access,
                    |access| opener(&file, access),
                    recovery::is_recoverable,
                )
                .map_err(|source| OpenError::Engine { path: file, source })?
            }
        };

        let store = Self {
            db,
            location: config.location,
            read_only: config.read_only,
            discard_ratio: config.discard_ratio,
        };
        if !store.read_only {
            store.create_tables().map_err(OpenError::Init)?;
        }

        tracing::debug!(location = ?store.location, read_only = store.read_only, "Opened store");
        Ok(store)
    }

    /// Reclaim space, then release the handle.
    ///
    /// # Errors
    /// Returns error if reclamation fails; the handle is released either way.
    pub fn close(mut self) -> Result<(), StoreError> {
        let report = self.run_gc();
        tracing::debug!(location = ?self.location, "Closing store");
        report.map(|_| ())
    }

    /// Purge expired keys and compact the database file while at least
    /// `discard_ratio` of it is dead space.
    ///
    /// Compaction repeats until the engine reports nothing left to reclaim.
    /// A no-op in read-only and in-memory mode.
    ///
    /// # Errors
    /// Returns error if the engine fails mid-pass.
    pub fn run_gc(&mut self) -> Result<GcReport, StoreError> {
        if self.read_only || matches!(self.location, Location::InMemory) {
            return Ok(GcReport::default());
        }

        let mut report = GcReport {
            expired_purged: self.purge_expired()?,
            compactions: 0,
        };

        while self.dead_ratio()? >= self.discard_ratio {
            if !self.db.compact().map_err(StoreError::storage)? {
                break;
            }
            report.compactions += 1;
        }

        if report != GcReport::default() {
            tracing::info!(
                expired = report.expired_purged,
                compactions = report.compactions,
                "Reclaimed store space"
            );
        }
        Ok(report)
    }

    #[must_use]
    pub const fn location(&self) -> &Location {
        &self.location
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(engine)?;
        txn.open_table(VALUES).map_err(engine)?;
        txn.open_table(EXPIRY).map_err(engine)?;
        txn.commit().map_err(engine)
    }

    const fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = now_millis();
        let txn = self.db.begin_write().map_err(engine)?;
        let purged = {
            let mut values = txn.open_table(VALUES).map_err(engine)?;
            let mut expiry = txn.open_table(EXPIRY).map_err(engine)?;

            let mut dead = Vec::new();
            for entry in expiry.iter().map_err(engine)? {
                let (key, deadline) = entry.map_err(engine)?;
                if deadline.value() <= now {
                    dead.push(key.value().to_vec());
                }
            }

            for key in &dead {
                values.remove(key.as_slice()).map_err(engine)?;
                expiry.remove(key.as_slice()).map_err(engine)?;
            }
            dead.len()
        };
        txn.commit().map_err(engine)?;
        Ok(purged)
    }

    /// Share of the engine's pages that hold no live data, in `0.0..=1.0`.
    ///
    /// `allocated_pages` counts live pages only; freed pages show up in
    /// `fragmented_bytes`.
    #[allow(clippy::cast_precision_loss)]
    fn dead_ratio(&self) -> Result<f64, StoreError> {
        let txn = self.db.begin_write().map_err(engine)?;
        let stats = txn.stats().map_err(engine)?;
        txn.abort().map_err(engine)?;

        let live = stats.allocated_pages() * stats.page_size() as u64;
        let dead = stats.fragmented_bytes();
        let total = live + dead;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(dead as f64 / total as f64)
    }
}

impl KvStore for Store {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        let txn = self.db.begin_read().map_err(engine)?;
        let Some(values) = open_optional(&txn, VALUES)? else {
            return Err(StoreError::NotFound);
        };
        let Some(value) = values.get(key).map_err(engine)? else {
            return Err(StoreError::NotFound);
        };

        if let Some(expiry) = open_optional(&txn, EXPIRY)? {
            if is_expired(&expiry, key, now_millis())? {
                return Err(StoreError::NotFound);
            }
        }
        Ok(value.value().to_vec())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let txn = self.db.begin_write().map_err(engine)?;
        {
            let mut values = txn.open_table(VALUES).map_err(engine)?;
            values.insert(key, value).map_err(engine)?;
            let mut expiry = txn.open_table(EXPIRY).map_err(engine)?;
            expiry.remove(key).map_err(engine)?;
        }
        txn.commit().map_err(engine)
    }

    fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let deadline = now_millis().saturating_add(ttl_millis);

        let txn = self.db.begin_write().map_err(engine)?;
        {
            let mut values = txn.open_table(VALUES).map_err(engine)?;
            values.insert(key, value).map_err(engine)?;
            let mut expiry = txn.open_table(EXPIRY).map_err(engine)?;
            expiry.insert(key, deadline).map_err(engine)?;
        }
        txn.commit().map_err(engine)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let txn = self.db.begin_write().map_err(engine)?;
        {
            let mut values = txn.open_table(VALUES).map_err(engine)?;
            values.remove(key).map_err(engine)?;
            let mut expiry = txn.open_table(EXPIRY).map_err(engine)?;
            expiry.remove(key).map_err(engine)?;
        }
        txn.commit().map_err(engine)
    }

    fn iterate<F, E>(&self, prefix: &[u8], mut visit: F) -> Result<(), E>
    where
        F: FnMut(&[u8], &[u8]) -> Result<(), E>,
        E: From<StoreError>,
    {
        let txn = self.db.begin_read().map_err(engine)?;
        let Some(values) = open_optional(&txn, VALUES)? else {
            return Ok(());
        };
        let expiry = open_optional(&txn, EXPIRY)?;
        let now = now_millis();

        for entry in values.range(prefix..).map_err(engine)? {
            let (key_guard, value_guard) = entry.map_err(engine)?;
            let key = key_guard.value();
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(expiry) = &expiry {
                if is_expired(expiry, key, now)? {
                    continue;
                }
            }
            visit(key, value_guard.value())?;
        }
        Ok(())
    }
}

fn open_engine(file: &Path, access: Access) -> Result<Database, DatabaseError> {
    let mut builder = Database::builder();
    builder.set_repair_callback(|session: &mut RepairSession| {
        tracing::warn!(progress = session.progress(), "Repairing store after unclean shutdown");
    });
    match access {
        Access::ReadWrite => builder.create(file),
        Access::ReadOnly => builder.open(file),
    }
}

/// Open a table that may not have been created yet.
fn open_optional<K: Key + 'static, V: Value + 'static>(
    txn: &ReadTransaction,
    definition: TableDefinition<K, V>,
) -> Result<Option<ReadOnlyTable<K, V>>, StoreError> {
    match txn.open_table(definition) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(err) => Err(engine(err)),
    }
}

fn is_expired(
    expiry: &ReadOnlyTable<&'static [u8], u64>,
    key: &[u8],
    now: u64,
) -> Result<bool, StoreError> {
    Ok(expiry
        .get(key)
        .map_err(engine)?
        .is_some_and(|deadline| deadline.value() <= now))
}

fn engine(err: impl Into<redb::Error>) -> StoreError {
    StoreError::storage(err.into())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use redb::StorageError as EngineStorageError;
    use tempfile::TempDir;

    use super::*;

    fn memory_store() -> Store {
        Store::open(StoreConfig::in_memory()).unwrap()
    }

    fn collect(store: &Store, prefix: &[u8]) -> Vec<String> {
        let mut keys = Vec::new();
        store
            .iterate(prefix, |key, _| {
                keys.push(String::from_utf8_lossy(key).into_owned());
                Ok::<_, StoreError>(())
            })
            .unwrap();
        keys
    }

    #[derive(Debug)]
    enum VisitError {
        Stop,
        Store(StoreError),
    }

    impl From<StoreError> for VisitError {
        fn from(err: StoreError) -> Self {
            Self::Store(err)
        }
    }

    #[test]
    fn test_set_then_get() {
        let store = memory_store();
        store.set(b"alpha", b"\x00\x01binary").unwrap();
        assert_eq!(store.get(b"alpha").unwrap(), b"\x00\x01binary");

        store.set(b"alpha", b"second").unwrap();
        assert_eq!(store.get(b"alpha").unwrap(), b"second");
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let store = memory_store();
        assert!(store.get(b"never").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete() {
        let store = memory_store();
        store.set(b"k", b"v").unwrap();
        store.delete(b"k").unwrap();
        assert!(matches!(store.get(b"k"), Err(StoreError::NotFound)));

        // Deleting an absent key is fine.
        store.delete(b"k").unwrap();
    }

    #[test]
    fn test_iterate_prefix_in_order() {
        let store = memory_store();
        for key in ["b:2", "a:1", "b:1", "c:1", "b", "ba"] {
            store.set(key.as_bytes(), b"x").unwrap();
        }

        assert_eq!(collect(&store, b"b:"), vec!["b:1", "b:2"]);
        assert_eq!(collect(&store, b""), vec!["a:1", "b", "b:1", "b:2", "ba", "c:1"]);
        assert!(collect(&store, b"zzz").is_empty());
    }

    #[test]
    fn test_visitor_error_stops_iteration() {
        let store = memory_store();
        for i in 0..10 {
            store.set(format!("k{i}").as_bytes(), b"v").unwrap();
        }

        let mut visits = 0;
        let result = store.iterate(b"k", |_, _| {
            visits += 1;
            if visits == 3 { Err(VisitError::Stop) } else { Ok(()) }
        });

        assert!(matches!(result, Err(VisitError::Stop)));
        assert_eq!(visits, 3);
    }

    #[test]
    fn test_ttl_expiry() {
        let store = memory_store();
        store.set_with_ttl(b"gone", b"v", Duration::ZERO).unwrap();
        store
            .set_with_ttl(b"kept", b"v", Duration::from_secs(3600))
            .unwrap();

        assert!(store.get(b"gone").unwrap_err().is_not_found());
        assert_eq!(store.get(b"kept").unwrap(), b"v");
        assert_eq!(collect(&store, b""), vec!["kept"]);
    }

    #[test]
    fn test_plain_set_clears_ttl() {
        let store = memory_store();
        store.set_with_ttl(b"k", b"old", Duration::ZERO).unwrap();
        store.set(b"k", b"new").unwrap();
        assert_eq!(store.get(b"k").unwrap(), b"new");
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let value = vec![0xAB_u8; 10 * 1024];

        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        for i in 0..1000 {
            store.set(format!("key-{i:04}").as_bytes(), &value).unwrap();
        }
        store.close().unwrap();

        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        for i in [0, 500, 999] {
            assert_eq!(store.get(format!("key-{i:04}").as_bytes()).unwrap(), value);
        }
        assert_eq!(collect(&store, b"key-").len(), 1000);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        store.set(b"k", b"v").unwrap();
        store.close().unwrap();

        let mut store = Store::open(StoreConfig::disk(dir.path()).read_only()).unwrap();
        assert!(store.is_read_only());
        assert_eq!(store.get(b"k").unwrap(), b"v");
        assert!(matches!(store.set(b"k", b"w"), Err(StoreError::ReadOnly)));
        assert!(matches!(store.delete(b"k"), Err(StoreError::ReadOnly)));
        assert!(matches!(
            store.set_with_ttl(b"k", b"w", Duration::ZERO),
            Err(StoreError::ReadOnly)
        ));
        assert_eq!(store.run_gc().unwrap(), GcReport::default());
    }

    #[test]
    fn test_read_only_requires_existing_store() {
        let dir = TempDir::new().unwrap();
        let err = Store::open(StoreConfig::disk(dir.path().join("absent")).read_only()).unwrap_err();
        assert!(matches!(err, OpenError::Missing { .. }));
    }

    #[test]
    fn test_gc_is_noop_in_memory() {
        let mut store = memory_store();
        store.set_with_ttl(b"k", b"v", Duration::ZERO).unwrap();
        assert_eq!(store.run_gc().unwrap(), GcReport::default());
    }

    #[test]
    fn test_gc_purges_expired_and_keeps_live_data() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        let value = vec![7_u8; 4096];
        for i in 0..200 {
            store.set(format!("k{i:03}").as_bytes(), &value).unwrap();
        }
        for i in 0..150 {
            store.delete(format!("k{i:03}").as_bytes()).unwrap();
        }
        store.set_with_ttl(b"ttl", b"v", Duration::ZERO).unwrap();

        let report = store.run_gc().unwrap();
        assert_eq!(report.expired_purged, 1);
        // Nothing left to purge on a second pass.
        assert_eq!(store.run_gc().unwrap().expired_purged, 0);
        store.close().unwrap();

        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        assert_eq!(collect(&store, b"k").len(), 50);
        assert_eq!(store.get(b"k199").unwrap(), value);
    }

    fn fill(store: &Store, count: usize) -> Vec<u8> {
        let value = vec![0x5A_u8; 10 * 1024];
        for i in 0..count {
            store.set(format!("key-{i:04}").as_bytes(), &value).unwrap();
        }
        value
    }

    fn file_len(dir: &TempDir) -> u64 {
        fs::metadata(dir.path().join(DB_FILE)).unwrap().len()
    }

    #[test]
    fn test_dead_ratio_is_a_fraction() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        fill(&store, 500);
        for i in 0..495 {
            store.delete(format!("key-{i:04}").as_bytes()).unwrap();
        }

        let ratio = store.dead_ratio().unwrap();
        assert!((0.0..=1.0).contains(&ratio), "ratio {ratio}");
        assert!(ratio > 0.5, "ratio {ratio}");
    }

    #[test]
    fn test_gc_skips_compaction_below_discard_ratio() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        fill(&store, 1000);
        for i in 0..100 {
            store.delete(format!("key-{i:04}").as_bytes()).unwrap();
        }

        let report = store.run_gc().unwrap();
        assert_eq!(report.compactions, 0);
    }

    #[test]
    fn test_gc_compacts_above_discard_ratio() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        let value = fill(&store, 1000);
        for i in 0..990 {
            store.delete(format!("key-{i:04}").as_bytes()).unwrap();
        }
        let before = file_len(&dir);

        let report = store.run_gc().unwrap();
        assert!(report.compactions >= 1);
        store.close().unwrap();

        assert!(file_len(&dir) < before);
        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        assert_eq!(collect(&store, b"key-").len(), 10);
        assert_eq!(store.get(b"key-0999").unwrap(), value);
    }

    #[test]
    fn test_open_rejects_damaged_file_without_clobbering_it() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(DB_FILE);
        fs::write(&file, vec![0xAB_u8; 8192]).unwrap();

        let err = Store::open(StoreConfig::disk(dir.path())).unwrap_err();
        assert!(matches!(err, OpenError::Engine { .. }));
        assert_eq!(fs::read(&file).unwrap(), vec![0xAB_u8; 8192]);
    }

    #[test]
    fn test_open_recovers_from_corruption() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::disk(dir.path())).unwrap();
        store.set(b"committed", b"before crash").unwrap();
        store.close().unwrap();

        let mut calls = Vec::new();
        let store = Store::open_with(StoreConfig::disk(dir.path()), |file, access| {
            calls.push(access);
            if calls.len() == 1 {
                Err(DatabaseError::Storage(EngineStorageError::Corrupted(
                    "incomplete commit".into(),
                )))
            } else {
                open_engine(file, access)
            }
        })
        .unwrap();

        assert_eq!(
            calls,
            vec![Access::ReadWrite, Access::ReadWrite, Access::ReadWrite]
        );
        assert_eq!(store.get(b"committed").unwrap(), b"before crash");
    }

    #[test]
    fn test_failed_recovery_surfaces_original_error() {
        let dir = TempDir::new().unwrap();
        let mut calls = 0;
        let err = Store::open_with(StoreConfig::disk(dir.path()), |_, _| {
            calls += 1;
            if calls == 1 {
                Err(DatabaseError::Storage(EngineStorageError::Corrupted(
                    "incomplete commit".into(),
                )))
            } else {
                Err(DatabaseError::DatabaseAlreadyOpen)
            }
        })
        .unwrap_err();

        assert!(matches!(
            err,
            OpenError::Engine {
                source: DatabaseError::Storage(EngineStorageError::Corrupted(_)),
                ..
            }
        ));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_disk_store_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = Store::open(StoreConfig::disk(&nested)).unwrap();
        store.close().unwrap();
        assert!(fs::metadata(nested.join(DB_FILE)).unwrap().is_file());
    }
}
