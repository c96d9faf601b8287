//! Lock state with the arming token carried by the locked variant.

use std::fmt;

use crate::TokenId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Locked,
}

impl LockStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Committed lock state.
///
/// The arming token exists exactly when the state is locked, so a locked
/// state without a key is unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked { armed_by: TokenId },
}

impl LockState {
    #[must_use]
    pub fn status(&self) -> LockStatus {
        match self {
            Self::Unlocked => LockStatus::Unlocked,
            Self::Locked { .. } => LockStatus::Locked,
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    #[must_use]
    pub fn armed_by(&self) -> Option<&TokenId> {
        match self {
            Self::Unlocked => None,
            Self::Locked { armed_by } => Some(armed_by),
        }
    }

    /// Rebuild from the persisted scalar pair.
    ///
    /// Returns the state and whether the pair had to be reconciled: a locked
    /// flag with no tag, or a stale tag on an unlocked record.
    #[must_use]
    pub fn from_persisted(is_blocking: bool, locked_tag_id: &str) -> (Self, bool) {
        match (is_blocking, TokenId::new(locked_tag_id)) {
            (true, Ok(armed_by)) => (Self::Locked { armed_by }, false),
            (true, Err(_)) => (Self::Unlocked, true),
            (false, Ok(_)) => (Self::Unlocked, true),
            (false, Err(_)) => (Self::Unlocked, false),
        }
    }
}
