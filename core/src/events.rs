//! State-change notifications emitted by the lock controller.

use tagblock_types::ProfileId;

use crate::errors::FailureSide;

/// Emitted after every committed transition and every reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Locked { profile_id: ProfileId },
    Unlocked,
    /// A toggle was refused; state is unchanged.
    Rejected { side: FailureSide, message: String },
    /// A transition committed but restrictions or persistence lagged behind.
    Degraded { side: FailureSide, message: String },
    AuthorizationChanged { granted: bool },
}

impl LockEvent {
    /// The message a status line should show, if this event carries one.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } | Self::Degraded { message, .. } => Some(message),
            Self::Locked { .. } | Self::Unlocked | Self::AuthorizationChanged { .. } => None,
        }
    }
}
