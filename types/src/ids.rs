use std::fmt;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of trailing characters kept by [`TokenId::redacted`].
const REDACTED_SUFFIX_LEN: usize = 4;

/// Opaque profile identifier. Immutable once a profile exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random v4 UUID in uppercase hyphenated form.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self(
            uuid.hyphenated()
                .encode_upper(&mut uuid::Uuid::encode_buffer())
                .to_owned(),
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token identifier must not be empty")]
pub struct EmptyTokenError;

/// Public identifier read from a physical tag.
///
/// Never empty: the persisted layout uses the empty string to mean
/// "no arming token", so an empty identifier cannot be a key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(String);

impl TokenId {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyTokenError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EmptyTokenError);
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_owned()))
        }
    }

    /// Render a tag UID as uppercase hex, two digits per byte.
    pub fn from_uid_bytes(uid: &[u8]) -> Result<Self, EmptyTokenError> {
        let mut hex = String::with_capacity(uid.len() * 2);
        for byte in uid {
            let _ = write!(hex, "{byte:02X}");
        }
        Self::new(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier suitable for logs and user-facing messages.
    #[must_use]
    pub fn redacted(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let keep = if chars.len() > REDACTED_SUFFIX_LEN {
            REDACTED_SUFFIX_LEN
        } else {
            1
        };
        let suffix: String = chars[chars.len() - keep..].iter().collect();
        format!("…{suffix}")
    }
}

// Debug goes to logs; keep the full identifier out of them.
impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenId").field(&self.redacted()).finish()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TokenId {
    type Error = EmptyTokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TokenId {
    type Error = EmptyTokenError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TokenId> for String {
    fn from(value: TokenId) -> Self {
        value.0
    }
}
