//! Persisted document layout.
//!
//! Profiles live in one versioned document; the current selection and the
//! lock record are scalar documents under their own keys.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tagblock_types::{LockState, Profile, ProfileId};

use crate::{DocumentStore, PersistenceError};

pub mod keys {
    pub const SAVED_PROFILES: &str = "savedProfiles";
    pub const CURRENT_PROFILE_ID: &str = "currentProfileId";
    pub const IS_BLOCKING: &str = "isBlocking";
    pub const LOCKED_TAG_ID: &str = "lockedTagID";
}

pub const PROFILES_VERSION: u32 = 1;

#[derive(Serialize)]
struct ProfilesDocumentRef<'a> {
    version: u32,
    profiles: &'a [Profile],
}

#[derive(Deserialize)]
struct ProfilesDocument {
    version: u32,
    profiles: Vec<Profile>,
}

/// Accepts the versioned document and the bare array written before versioning.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredProfiles {
    Versioned(ProfilesDocument),
    Unversioned(Vec<Profile>),
}

pub fn encode_profiles(profiles: &[Profile]) -> Result<String, PersistenceError> {
    let doc = ProfilesDocumentRef {
        version: PROFILES_VERSION,
        profiles,
    };
    serde_json::to_string_pretty(&doc).map_err(|source| PersistenceError::Encode {
        key: keys::SAVED_PROFILES.to_owned(),
        source,
    })
}

pub fn decode_profiles(raw: &str) -> Result<Vec<Profile>, PersistenceError> {
    let stored: StoredProfiles =
        serde_json::from_str(raw).map_err(|source| PersistenceError::Decode {
            key: keys::SAVED_PROFILES.to_owned(),
            source,
        })?;
    match stored {
        StoredProfiles::Versioned(doc) if doc.version == PROFILES_VERSION => Ok(doc.profiles),
        StoredProfiles::Versioned(doc) => Err(PersistenceError::UnsupportedVersion {
            key: keys::SAVED_PROFILES.to_owned(),
            found: doc.version,
            expected: PROFILES_VERSION,
        }),
        StoredProfiles::Unversioned(profiles) => Ok(profiles),
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    let Some(raw) = store.read(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistenceError::Decode {
            key: key.to_owned(),
            source,
        })
}

pub(crate) fn write_json<T: Serialize + ?Sized>(
    store: &dyn DocumentStore,
    key: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let raw = serde_json::to_string(value).map_err(|source| PersistenceError::Encode {
        key: key.to_owned(),
        source,
    })?;
    store.write(key, &raw)
}

pub(crate) fn write_profiles(
    store: &dyn DocumentStore,
    profiles: &[Profile],
    current: Option<&ProfileId>,
) -> Result<(), PersistenceError> {
    store.write(keys::SAVED_PROFILES, &encode_profiles(profiles)?)?;
    write_json(store, keys::CURRENT_PROFILE_ID, &current)
}

/// Load the lock record, reconciling an inconsistent flag/tag pair to unlocked.
pub fn load_lock_state(store: &dyn DocumentStore) -> Result<LockState, PersistenceError> {
    let is_blocking: bool = read_json(store, keys::IS_BLOCKING)?.unwrap_or(false);
    let locked_tag_id: String = read_json(store, keys::LOCKED_TAG_ID)?.unwrap_or_default();

    let (state, reconciled) = LockState::from_persisted(is_blocking, &locked_tag_id);
    if reconciled {
        tracing::warn!(
            is_blocking,
            has_tag = !locked_tag_id.trim().is_empty(),
            "Inconsistent lock record; treating as unlocked"
        );
    }
    Ok(state)
}

/// Persist the lock record.
///
/// Write order keeps "locked" and "no tag" from ever being on disk together:
/// the tag goes first when locking and is cleared last when unlocking.
pub fn save_lock_state(store: &dyn DocumentStore, state: &LockState) -> Result<(), PersistenceError> {
    match state {
        LockState::Locked { armed_by } => {
            write_json(store, keys::LOCKED_TAG_ID, armed_by.as_str())?;
            write_json(store, keys::IS_BLOCKING, &true)
        }
        LockState::Unlocked => {
            write_json(store, keys::IS_BLOCKING, &false)?;
            write_json(store, keys::LOCKED_TAG_ID, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDocumentStore;
    use tagblock_types::{ProfileName, TokenId};

    fn profile(id: &str, name: &str) -> Profile {
        Profile::with_id(ProfileId::new(id), ProfileName::new(name).unwrap())
    }

    #[test]
    fn profiles_document_is_versioned() {
        let raw = encode_profiles(&[profile("A", "Default")]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], PROFILES_VERSION);
        assert_eq!(value["profiles"][0]["id"], "A");

        let decoded = decode_profiles(&raw).unwrap();
        assert_eq!(decoded, vec![profile("A", "Default")]);
    }

    #[test]
    fn unversioned_array_is_accepted() {
        let raw = r#"[{"id":"A","name":"Default","icon":"bell.slash","blockedApps":[],"blockedCategories":[]}]"#;
        let decoded = decode_profiles(raw).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id().as_str(), "A");
    }

    #[test]
    fn future_version_is_rejected() {
        let raw = r#"{"version":7,"profiles":[]}"#;
        let err = decode_profiles(raw).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedVersion { found: 7, .. }
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_profiles("{not json").unwrap_err();
        assert!(matches!(err, PersistenceError::Decode { .. }));
    }

    #[test]
    fn lock_record_uses_scalar_keys() {
        let store = MemoryDocumentStore::new();
        let locked = LockState::Locked {
            armed_by: TokenId::new("04A1B2").unwrap(),
        };

        save_lock_state(&store, &locked).unwrap();
        assert_eq!(store.get(keys::IS_BLOCKING).as_deref(), Some("true"));
        assert_eq!(store.get(keys::LOCKED_TAG_ID).as_deref(), Some("\"04A1B2\""));
        assert_eq!(load_lock_state(&store).unwrap(), locked);

        save_lock_state(&store, &LockState::Unlocked).unwrap();
        assert_eq!(store.get(keys::IS_BLOCKING).as_deref(), Some("false"));
        assert_eq!(store.get(keys::LOCKED_TAG_ID).as_deref(), Some("\"\""));
        assert_eq!(load_lock_state(&store).unwrap(), LockState::Unlocked);
    }

    #[test]
    fn empty_store_loads_unlocked() {
        let store = MemoryDocumentStore::new();
        assert_eq!(load_lock_state(&store).unwrap(), LockState::Unlocked);
    }

    #[test]
    fn locked_flag_without_tag_loads_unlocked() {
        let store = MemoryDocumentStore::new();
        store.insert(keys::IS_BLOCKING, "true");
        store.insert(keys::LOCKED_TAG_ID, "\"\"");
        assert_eq!(load_lock_state(&store).unwrap(), LockState::Unlocked);
    }
}
