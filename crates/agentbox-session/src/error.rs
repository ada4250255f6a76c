use std::path::{Path, PathBuf};

use agentbox_core::StoreError;
use thiserror::Error;

use crate::removal::RemovalReport;

/// Session registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("session selector {selector:?} is ambiguous; it matches {}", .candidates.join(", "))]
    Ambiguous {
        selector: String,
        candidates: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed: {source}")]
    SideEffect {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("removal stopped after removing {} session(s): {source}", .report.total())]
    PartialRemoval {
        report: RemovalReport,
        #[source]
        source: Box<RegistryError>,
    },
}

impl RegistryError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Attach what was already removed to `source`, unless nothing was.
    #[must_use]
    pub fn after_removal(report: RemovalReport, source: Self) -> Self {
        if report.removed() || report.active_cleared {
            Self::PartialRemoval {
                report,
                source: Box::new(source),
            }
        } else {
            source
        }
    }
}

pub(crate) fn io_at(operation: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError {
    move |source| RegistryError::io(operation, path, source)
}
