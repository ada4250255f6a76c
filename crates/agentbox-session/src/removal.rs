//! Removal outcomes.

use agentbox_core::StoreError;

/// How many session records one removal step deleted.
///
/// Several sessions may share a display name; removing by name deletes all
/// of them, so "many" is a normal outcome rather than an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Removal {
    #[default]
    None,
    One,
    Many(usize),
}

impl Removal {
    #[must_use]
    pub const fn from_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1 => Self::One,
            n => Self::Many(n),
        }
    }

    #[must_use]
    pub const fn count(self) -> usize {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Many(n) => n,
        }
    }

    #[must_use]
    pub const fn is_removed(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Result of removing a session name from both backends.
#[derive(Debug, Default)]
pub struct RemovalReport {
    /// Sessions removed from the key-value store.
    pub store: Removal,
    /// Session directories removed from the legacy layout.
    pub legacy: Removal,
    /// Whether an active-session pointer naming the session was cleared.
    pub active_cleared: bool,
    /// Store failure while clearing the active pointer, when ignored.
    pub pointer_cleanup_failure: Option<StoreError>,
}

impl RemovalReport {
    /// True when either backend removed at least one session.
    #[must_use]
    pub const fn removed(&self) -> bool {
        self.store.is_removed() || self.legacy.is_removed()
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.store.count() + self.legacy.count()
    }
}
