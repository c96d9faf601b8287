//! Toggle failures, degraded-success conditions, and their user-facing text.
//!
//! Every failure names the side that failed so a front end can render a
//! specific remediation instead of a generic error.

use tagblock_store::PersistenceError;
use tagblock_types::TokenId;

use crate::ports::{AuthorizationError, EnforcementError, ScanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSide {
    /// The token reader could not produce exactly one identifier.
    Reader,
    /// The restriction capability has not been granted.
    Authorization,
    /// The enforcement backend rejected an apply/clear.
    Enforcement,
    /// The lock record could not be saved.
    Persistence,
    /// The scanned tag is not the one that armed the lock.
    Mismatch,
    /// Another toggle is already waiting on the reader.
    Busy,
}

impl FailureSide {
    #[must_use]
    pub const fn badge(self) -> &'static str {
        match self {
            Self::Reader => "[Reader]",
            Self::Authorization => "[Not authorized]",
            Self::Enforcement => "[Blocking failed]",
            Self::Persistence => "[Not saved]",
            Self::Mismatch => "[Wrong tag]",
            Self::Busy => "[Busy]",
        }
    }
}

/// A toggle that did not change state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToggleError {
    #[error("a scan is already in progress")]
    ScanInProgress,
    #[error("token reader unavailable: {0}")]
    ReaderUnavailable(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("{count} tags detected in one scan")]
    AmbiguousScan { count: usize },
    #[error("scan cancelled")]
    Cancelled,
    #[error(
        "tag does not match the one used to lock (expected {}, got {})",
        .expected.redacted(),
        .scanned.redacted()
    )]
    TokenMismatch { expected: TokenId, scanned: TokenId },
}

impl From<ScanError> for ToggleError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::ReaderUnavailable(reason) => Self::ReaderUnavailable(reason),
            ScanError::ScanFailed(reason) => Self::ScanFailed(reason),
            ScanError::AmbiguousScan { count } => Self::AmbiguousScan { count },
            ScanError::Cancelled => Self::Cancelled,
        }
    }
}

impl ToggleError {
    #[must_use]
    pub fn side(&self) -> FailureSide {
        match self {
            Self::ScanInProgress => FailureSide::Busy,
            Self::TokenMismatch { .. } => FailureSide::Mismatch,
            Self::ReaderUnavailable(_)
            | Self::ScanFailed(_)
            | Self::AmbiguousScan { .. }
            | Self::Cancelled => FailureSide::Reader,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::ScanInProgress => "Finish or dismiss the scan that is already running.",
            Self::ReaderUnavailable(_) => "Enable the tag reader on this device and try again.",
            Self::ScanFailed(_) => "Hold the tag still against the reader and try again.",
            Self::AmbiguousScan { .. } => "Move other tags away and scan a single tag.",
            Self::Cancelled => "Start the scan again when you are ready.",
            Self::TokenMismatch { .. } => "Scan the same tag that was used to lock.",
        }
    }

    /// Multi-line message for display.
    #[must_use]
    pub fn user_message(&self) -> String {
        format_failure(self.side(), &self.to_string(), self.remediation())
    }
}

/// A lock transition that committed but may not be fully in effect.
#[derive(Debug, thiserror::Error)]
pub enum Degradation {
    #[error("restrictions may not be in effect: {0}")]
    NotAuthorized(AuthorizationError),
    #[error("restrictions may not be in effect: {0}")]
    Enforcement(EnforcementError),
    #[error("lock state was not saved and will be retried: {0}")]
    Persistence(PersistenceError),
}

impl Degradation {
    #[must_use]
    pub fn side(&self) -> FailureSide {
        match self {
            Self::NotAuthorized(_) => FailureSide::Authorization,
            Self::Enforcement(_) => FailureSide::Enforcement,
            Self::Persistence(_) => FailureSide::Persistence,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::NotAuthorized(_) => "Grant screen-time access, then lock again.",
            Self::Enforcement(_) => "Check the blocking service and toggle the lock again.",
            Self::Persistence(_) => "Check free space and permissions on the data directory.",
        }
    }

    #[must_use]
    pub fn user_message(&self) -> String {
        format_failure(self.side(), &self.to_string(), self.remediation())
    }
}

fn format_failure(side: FailureSide, detail: &str, fix: &str) -> String {
    let mut content = String::new();
    content.push_str(side.badge());
    content.push_str("\n\n");
    content.push_str(detail.trim());
    content.push_str("\n\nFix:\n- ");
    content.push_str(fix);
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_errors_map_to_reader_side() {
        for err in [
            ScanError::ReaderUnavailable("off".to_owned()),
            ScanError::ScanFailed("lost".to_owned()),
            ScanError::AmbiguousScan { count: 3 },
            ScanError::Cancelled,
        ] {
            assert_eq!(ToggleError::from(err).side(), FailureSide::Reader);
        }
        assert_eq!(ToggleError::ScanInProgress.side(), FailureSide::Busy);
    }

    #[test]
    fn mismatch_message_redacts_both_tokens() {
        let err = ToggleError::TokenMismatch {
            expected: TokenId::new("04A10BFFC3").unwrap(),
            scanned: TokenId::new("049912AB77").unwrap(),
        };
        let text = err.to_string();
        assert!(text.contains("…FFC3"));
        assert!(text.contains("…AB77"));
        assert!(!text.contains("04A10B"));
        assert!(!text.contains("049912"));
        assert_eq!(err.side(), FailureSide::Mismatch);
        assert!(matches!(
            err,
            ToggleError::TokenMismatch { ref scanned, .. } if scanned.as_str() == "049912AB77"
        ));
    }

    #[test]
    fn user_message_names_side_and_fix() {
        let msg = ToggleError::AmbiguousScan { count: 2 }.user_message();
        assert!(msg.starts_with("[Reader]"));
        assert!(msg.contains("2 tags detected"));
        assert!(msg.contains("Fix:\n- Move other tags away"));
    }

    #[test]
    fn degradations_identify_their_side() {
        let auth = Degradation::NotAuthorized(AuthorizationError::new("denied"));
        assert_eq!(auth.side(), FailureSide::Authorization);
        assert!(auth.user_message().starts_with("[Not authorized]"));

        let enforcement = Degradation::Enforcement(EnforcementError::new("store busy"));
        assert_eq!(enforcement.side(), FailureSide::Enforcement);
        assert!(enforcement.to_string().contains("store busy"));
    }
}
