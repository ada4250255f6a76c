//! Store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Dead-byte fraction at which reclamation rewrites the database file.
pub const DEFAULT_DISCARD_RATIO: f64 = 0.5;

const fn default_discard_ratio() -> f64 {
    DEFAULT_DISCARD_RATIO
}

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// A directory on disk holding the database file.
    Disk { dir: PathBuf },
    /// Volatile storage for isolated runs. Nothing is persisted.
    InMemory,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub location: Location,
    /// Reject every mutation and skip reclamation.
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_discard_ratio")]
    pub discard_ratio: f64,
}

impl StoreConfig {
    /// Persistent store rooted at `dir`.
    #[must_use]
    pub fn disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Disk { dir: dir.into() },
            read_only: false,
            discard_ratio: DEFAULT_DISCARD_RATIO,
        }
    }

    /// Volatile store.
    #[must_use]
    pub const fn in_memory() -> Self {
        Self {
            location: Location::InMemory,
            read_only: false,
            discard_ratio: DEFAULT_DISCARD_RATIO,
        }
    }

    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Override the reclamation threshold. Values are clamped to `0.0..=1.0`.
    #[must_use]
    pub fn discard_ratio(mut self, ratio: f64) -> Self {
        self.discard_ratio = ratio.clamp(0.0, 1.0);
        self
    }
}
