//! Session registry for agentbox.
//!
//! Provides:
//! - `SessionRegistry` - Names, resume tokens and the active-session pointer
//!   per `(agent, project)`, stored in a `KvStore` with read-through
//!   migration from the legacy directory layout
//! - `LegacyLayout` - Filesystem-only primitives over the legacy layout,
//!   including selector resolution
//! - `KeySpace` - The colon-delimited key scheme

pub mod error;
pub mod fallback;
pub mod keys;
pub mod legacy;
pub mod registry;
pub mod removal;

pub use error::RegistryError;
pub use fallback::{Fetched, Migration, Origin, SideEffectPolicy};
pub use keys::{KeySpace, SessionField, SessionKey};
pub use legacy::{LegacyLayout, LegacySession};
pub use registry::{RegistryOptions, SessionRecord, SessionRegistry};
pub use removal::{Removal, RemovalReport};
