//! Blocking profiles and the restriction sets derived from them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ProfileId;

pub const DEFAULT_PROFILE_NAME: &str = "Default";
pub const DEFAULT_PROFILE_ICON: &str = "bell.slash";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("profile name must not be empty")]
pub struct EmptyStringError;

/// A profile display name, guaranteed non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileName(String);

impl ProfileName {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyStringError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyStringError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for ProfileName {
    type Error = EmptyStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ProfileName {
    type Error = EmptyStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProfileName> for String {
    fn from(value: ProfileName) -> Self {
        value.0
    }
}

impl std::ops::Deref for ProfileName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque application identity understood by the enforcement backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppToken(String);

impl AppToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque category identity understood by the enforcement backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryToken(String);

impl CategoryToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Concrete set of targets handed to the enforcement backend.
///
/// An empty set means "apply no restriction", not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestrictionSet {
    pub apps: BTreeSet<AppToken>,
    pub categories: BTreeSet<CategoryToken>,
}

impl RestrictionSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.categories.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    id: ProfileId,
    pub name: ProfileName,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub blocked_apps: BTreeSet<AppToken>,
    #[serde(default)]
    pub blocked_categories: BTreeSet<CategoryToken>,
}

fn default_icon() -> String {
    DEFAULT_PROFILE_ICON.to_owned()
}

impl Profile {
    /// New profile with a freshly generated id, the default icon and
    /// nothing blocked.
    #[must_use]
    pub fn new(name: ProfileName) -> Self {
        Self::with_id(ProfileId::generate(), name)
    }

    #[must_use]
    pub fn with_id(id: ProfileId, name: ProfileName) -> Self {
        Self {
            id,
            name,
            icon: default_icon(),
            blocked_apps: BTreeSet::new(),
            blocked_categories: BTreeSet::new(),
        }
    }

    /// The profile synthesized when none exist.
    #[must_use]
    pub fn default_profile() -> Self {
        Self::new(ProfileName(DEFAULT_PROFILE_NAME.to_owned()))
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_apps(mut self, apps: impl IntoIterator<Item = AppToken>) -> Self {
        self.blocked_apps = apps.into_iter().collect();
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = CategoryToken>) -> Self {
        self.blocked_categories = categories.into_iter().collect();
        self
    }

    #[must_use]
    pub fn id(&self) -> &ProfileId {
        &self.id
    }

    #[must_use]
    pub fn restriction_set(&self) -> RestrictionSet {
        RestrictionSet {
            apps: self.blocked_apps.clone(),
            categories: self.blocked_categories.clone(),
        }
    }
}

/// Partial update for a profile. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub name: Option<ProfileName>,
    pub icon: Option<String>,
    pub blocked_apps: Option<BTreeSet<AppToken>>,
    pub blocked_categories: Option<BTreeSet<CategoryToken>>,
}

impl ProfilePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.icon.is_none()
            && self.blocked_apps.is_none()
            && self.blocked_categories.is_none()
    }

    pub fn apply(self, profile: &mut Profile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(icon) = self.icon {
            profile.icon = icon;
        }
        if let Some(apps) = self.blocked_apps {
            profile.blocked_apps = apps;
        }
        if let Some(categories) = self.blocked_categories {
            profile.blocked_categories = categories;
        }
    }
}
