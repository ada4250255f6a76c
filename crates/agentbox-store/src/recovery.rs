//! Open-time corruption recovery.

use redb::{DatabaseError, StorageError};

/// How the engine is asked to open the database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Create if missing, take the write lock, let the engine repair.
    ReadWrite,
    /// Open an existing file without creating it.
    ReadOnly,
}

/// Whether `err` is one of the corruption categories the engine can repair
/// on its own when reopened writable: an interrupted commit left behind by
/// an unclean shutdown, or an on-disk format that needs an upgrade pass.
pub(crate) const fn is_recoverable(err: &DatabaseError) -> bool {
    matches!(
        err,
        DatabaseError::RepairAborted
            | DatabaseError::UpgradeRequired(_)
            | DatabaseError::Storage(StorageError::Corrupted(_))
    )
}

/// Open with `requested` access, attempting one repair pass on a
/// recoverable failure.
///
/// The repair pass opens writable, drops the handle and retries the
/// original access exactly once. If the repair open itself fails the
/// original error is returned.
pub(crate) fn open_with_recovery<T, E, O, R>(
    requested: Access,
    mut open: O,
    recoverable: R,
) -> Result<T, E>
where
    O: FnMut(Access) -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let original = match open(requested) {
        Ok(handle) => return Ok(handle),
        Err(err) if recoverable(&err) => err,
        Err(err) => return Err(err),
    };

    tracing::warn!(error = %original, ?requested, "Store open failed, attempting repair");

    match open(Access::ReadWrite) {
        Ok(repaired) => drop(repaired),
        Err(repair_err) => {
            tracing::warn!(error = %repair_err, "Store repair open failed");
            return Err(original);
        }
    }

    let handle = open(requested)?;
    tracing::info!(?requested, "Store recovered after repair");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn corrupted() -> DatabaseError {
        DatabaseError::Storage(StorageError::Corrupted("truncated commit".into()))
    }

    fn io_failure() -> DatabaseError {
        DatabaseError::Storage(StorageError::Io(io::Error::other("disk unplugged")))
    }

    #[test]
    fn test_recognised_categories() {
        assert!(is_recoverable(&corrupted()));
        assert!(is_recoverable(&DatabaseError::RepairAborted));
        assert!(is_recoverable(&DatabaseError::UpgradeRequired(1)));
        assert!(!is_recoverable(&DatabaseError::DatabaseAlreadyOpen));
        assert!(!is_recoverable(&io_failure()));
    }

    #[test]
    fn test_success_does_not_retry() {
        let mut calls = Vec::new();
        let result = open_with_recovery(
            Access::ReadOnly,
            |access| {
                calls.push(access);
                Ok::<_, DatabaseError>(7)
            },
            is_recoverable,
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, vec![Access::ReadOnly]);
    }

    #[test]
    fn test_recovers_then_retries_original_access() {
        let mut calls = Vec::new();
        let result = open_with_recovery(
            Access::ReadOnly,
            |access| {
                calls.push(access);
                if calls.len() == 1 {
                    Err(corrupted())
                } else {
                    Ok(calls.len())
                }
            },
            is_recoverable,
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            calls,
            vec![Access::ReadOnly, Access::ReadWrite, Access::ReadOnly]
        );
    }

    #[test]
    fn test_failed_repair_returns_original_error() {
        let mut calls = 0;
        let result: Result<(), _> = open_with_recovery(
            Access::ReadWrite,
            |_| {
                calls += 1;
                if calls == 1 { Err(corrupted()) } else { Err(io_failure()) }
            },
            is_recoverable,
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Storage(StorageError::Corrupted(_))
        ));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_recovery_attempted_once() {
        let mut calls = 0;
        let result: Result<(), _> = open_with_recovery(
            Access::ReadWrite,
            |access| {
                calls += 1;
                // The repair open succeeds, every other open stays corrupted.
                if calls == 2 {
                    assert_eq!(access, Access::ReadWrite);
                    Ok(())
                } else {
                    Err(corrupted())
                }
            },
            is_recoverable,
        );
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_unrecognised_error_propagates() {
        let mut calls = 0;
        let result: Result<(), _> = open_with_recovery(
            Access::ReadWrite,
            |_| {
                calls += 1;
                Err(DatabaseError::DatabaseAlreadyOpen)
            },
            is_recoverable,
        );
        assert!(matches!(result, Err(DatabaseError::DatabaseAlreadyOpen)));
        assert_eq!(calls, 1);
    }
}
