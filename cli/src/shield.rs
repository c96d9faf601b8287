//! File-backed restriction backend.
//!
//! The set in effect is mirrored to `shield.json` in the data directory,
//! where a platform agent (or a curious user) can pick it up.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tagblock_core::{AuthFut, AuthorizationError, EnforcementError, RestrictionEnforcer};
use tagblock_types::RestrictionSet;
use tagblock_utils::{WriteOptions, atomic_write};

pub const SHIELD_FILE: &str = "shield.json";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldDocument {
    pub active: bool,
    pub apps: Vec<String>,
    pub categories: Vec<String>,
}

impl From<&RestrictionSet> for ShieldDocument {
    fn from(set: &RestrictionSet) -> Self {
        Self {
            active: true,
            apps: set.apps.iter().map(|app| app.as_str().to_owned()).collect(),
            categories: set
                .categories
                .iter()
                .map(|category| category.as_str().to_owned())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShieldEnforcer {
    dir: PathBuf,
}

impl ShieldEnforcer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SHIELD_FILE)
    }

    /// The last written document, if any.
    pub fn current(&self) -> Option<ShieldDocument> {
        read_shield(&self.path())
    }

    fn write(&self, doc: &ShieldDocument) -> Result<(), EnforcementError> {
        let raw = serde_json::to_string_pretty(doc)
            .map_err(|e| EnforcementError::new(format!("failed to encode shield: {e}")))?;
        fs::create_dir_all(&self.dir).map_err(|e| {
            EnforcementError::new(format!("failed to create {}: {e}", self.dir.display()))
        })?;
        atomic_write(self.path(), raw.as_bytes(), WriteOptions::default()).map_err(|e| {
            EnforcementError::new(format!("failed to write {}: {e}", self.path().display()))
        })?;
        tracing::debug!(
            active = doc.active,
            apps = doc.apps.len(),
            categories = doc.categories.len(),
            "Shield updated"
        );
        Ok(())
    }

    fn probe_writable(&self) -> Result<(), AuthorizationError> {
        fs::create_dir_all(&self.dir)
            .and_then(|()| tempfile::tempfile_in(&self.dir))
            .map(drop)
            .map_err(|e| {
                AuthorizationError::new(format!("{} is not writable: {e}", self.dir.display()))
            })
    }
}

impl RestrictionEnforcer for ShieldEnforcer {
    fn request_authorization(&self) -> AuthFut<'_> {
        Box::pin(async move { self.probe_writable() })
    }

    fn apply(&self, restrictions: &RestrictionSet) -> Result<(), EnforcementError> {
        self.write(&ShieldDocument::from(restrictions))
    }

    fn clear(&self) -> Result<(), EnforcementError> {
        self.write(&ShieldDocument::default())
    }
}

fn read_shield(path: &Path) -> Option<ShieldDocument> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable shield file: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagblock_types::{AppToken, CategoryToken};

    #[test]
    fn apply_then_clear_rewrites_the_shield() {
        let dir = tempfile::tempdir().unwrap();
        let shield = ShieldEnforcer::new(dir.path().join("data"));
        assert_eq!(shield.current(), None);

        let set = RestrictionSet {
            apps: [AppToken::new("com.example.chat")].into_iter().collect(),
            categories: [CategoryToken::new("games")].into_iter().collect(),
        };
        shield.apply(&set).unwrap();
        assert_eq!(
            shield.current(),
            Some(ShieldDocument {
                active: true,
                apps: vec!["com.example.chat".to_owned()],
                categories: vec!["games".to_owned()],
            })
        );

        shield.clear().unwrap();
        assert_eq!(shield.current(), Some(ShieldDocument::default()));
    }

    #[test]
    fn empty_set_still_activates() {
        let dir = tempfile::tempdir().unwrap();
        let shield = ShieldEnforcer::new(dir.path());

        shield.apply(&RestrictionSet::default()).unwrap();

        let doc = shield.current().unwrap();
        assert!(doc.active);
        assert!(doc.apps.is_empty());
    }

    #[tokio::test]
    async fn authorization_requires_a_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let shield = ShieldEnforcer::new(dir.path().join("nested"));
        shield.request_authorization().await.unwrap();

        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let shield = ShieldEnforcer::new(blocker.join("data"));
        assert!(shield.request_authorization().await.is_err());
    }
}
