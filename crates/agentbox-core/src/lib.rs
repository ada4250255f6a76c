//! Core abstractions for agentbox session state.
//!
//! This crate provides the fundamental building blocks:
//! - `KvStore` - Narrow key-value interface the registry is written against
//! - `StoreError` - Error taxonomy shared by every store implementation
//! - `ProjectKey` - Stable namespace component derived from a project path
//! - `SessionScope` - The `(agent, workspace, project)` triple every call is scoped to
//! - `RegistryConfig` - Explicit configuration home for the legacy layout

pub mod config;
pub mod context;
pub mod project;
pub mod traits;

pub use config::RegistryConfig;
pub use context::{ScopeError, SessionScope, is_plain_component};
pub use project::{ProjectKey, derive_project_key};
pub use traits::{KvStore, StoreError};
