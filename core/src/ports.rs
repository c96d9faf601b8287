//! Collaborator ports: the token reader and the restriction enforcement backend.
//!
//! Neither is implemented here. Hardware scanning and OS-level shielding plug in
//! behind these traits.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tagblock_types::{RestrictionSet, TokenId};

/// Scan future type alias.
pub type ScanFut<'a> = Pin<Box<dyn Future<Output = Result<TokenId, ScanError>> + Send + 'a>>;

/// Authorization future type alias.
pub type AuthFut<'a> = Pin<Box<dyn Future<Output = Result<(), AuthorizationError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("token reader unavailable: {0}")]
    ReaderUnavailable(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("{count} tokens detected in one scan")]
    AmbiguousScan { count: usize },
    #[error("scan cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("restriction enforcement failed: {message}")]
pub struct EnforcementError {
    pub message: String,
}

impl EnforcementError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("restriction authorization not granted: {message}")]
pub struct AuthorizationError {
    pub message: String,
}

impl AuthorizationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait TokenReader: Send + Sync {
    /// Read exactly one token identifier.
    ///
    /// The controller never issues a second call while one is outstanding,
    /// and may drop the returned future to cancel the session.
    fn scan(&self, timeout: Option<Duration>) -> ScanFut<'_>;
}

pub trait RestrictionEnforcer: Send + Sync {
    /// Ask for the capability needed before `apply` has any effect.
    fn request_authorization(&self) -> AuthFut<'_>;

    /// Replace the active restriction set. An empty set means no restriction.
    fn apply(&self, restrictions: &RestrictionSet) -> Result<(), EnforcementError>;

    fn clear(&self) -> Result<(), EnforcementError>;
}

/// Pick the single identifier from one reader session.
///
/// Readers that can see several tags at once use this so the choice is
/// never arbitrary.
pub fn select_single(candidates: Vec<TokenId>) -> Result<TokenId, ScanError> {
    let count = candidates.len();
    let mut candidates = candidates.into_iter();
    match (candidates.next(), count) {
        (None, _) => Err(ScanError::ScanFailed("no tag detected".to_owned())),
        (Some(only), 1) => Ok(only),
        (Some(_), count) => Err(ScanError::AmbiguousScan { count }),
    }
}

#[cfg(test)]
mod tests {
    use super::{ScanError, select_single};
    use tagblock_types::TokenId;

    fn token(id: &str) -> TokenId {
        TokenId::new(id).unwrap()
    }

    #[test]
    fn single_candidate_is_selected() {
        assert_eq!(select_single(vec![token("04A1")]), Ok(token("04A1")));
    }

    #[test]
    fn several_candidates_are_ambiguous() {
        assert_eq!(
            select_single(vec![token("04A1"), token("04B2")]),
            Err(ScanError::AmbiguousScan { count: 2 })
        );
    }

    #[test]
    fn no_candidates_is_a_failed_scan() {
        assert!(matches!(select_single(Vec::new()), Err(ScanError::ScanFailed(_))));
    }
}
