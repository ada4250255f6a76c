//! Crash-tolerant embedded key-value store.
//!
//! Provides:
//! - `Store` - `KvStore` implementation over `redb` with TTL support
//! - `StoreConfig` - On-disk, in-memory and read-only modes
//! - Open-time corruption recovery and space reclamation (`Store::run_gc`)

pub mod config;
mod recovery;
pub mod store;

pub use config::{Location, StoreConfig};
pub use store::{GcReport, OpenError, Store};
