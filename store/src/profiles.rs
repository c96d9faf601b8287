//! The profile store: durable, never-empty list of profiles plus the current selection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use tagblock_types::{Profile, ProfileId, ProfilePatch};

use crate::codec::{self, keys};
use crate::{DocumentStore, PersistenceError};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("a profile with id {0} already exists")]
    DuplicateId(ProfileId),
}

/// Failure of a profile mutation.
///
/// `Persistence` is returned after the in-memory change has been applied;
/// the store stays dirty and the write is retried on the next mutation or
/// [`ProfileStore::flush`].
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("profile change kept in memory but not saved: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Emitted after every committed profile mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    Added(ProfileId),
    Updated(ProfileId),
    Deleted(ProfileId),
    CurrentChanged(ProfileId),
    DefaultSynthesized(ProfileId),
}

#[derive(Debug)]
struct ProfileState {
    profiles: Vec<Profile>,
    current: Option<ProfileId>,
    dirty: bool,
}

/// What [`ProfileState::normalize`] had to repair.
#[derive(Debug, Default)]
struct Repair {
    synthesized: Option<ProfileId>,
    reselected: Option<ProfileId>,
}

impl Repair {
    fn changed(&self) -> bool {
        self.synthesized.is_some() || self.reselected.is_some()
    }
}

impl ProfileState {
    fn position(&self, id: &ProfileId) -> Option<usize> {
        self.profiles.iter().position(|p| p.id() == id)
    }

    /// Restore the invariants: at least one profile, current always resolvable.
    fn normalize(&mut self) -> Repair {
        let mut repair = Repair::default();
        if self.profiles.is_empty() {
            let fallback = Profile::default_profile();
            repair.synthesized = Some(fallback.id().clone());
            self.profiles.push(fallback);
        }
        let resolvable = self
            .current
            .as_ref()
            .is_some_and(|id| self.position(id).is_some());
        if !resolvable {
            let first = self.profiles[0].id().clone();
            self.current = Some(first.clone());
            repair.reselected = Some(first);
        }
        repair
    }

    fn current(&self) -> &Profile {
        self.current
            .as_ref()
            .and_then(|id| self.position(id))
            .and_then(|idx| self.profiles.get(idx))
            .or_else(|| self.profiles.first())
            .expect("profile list is never empty")
    }
}

pub struct ProfileStore {
    storage: Arc<dyn DocumentStore>,
    state: Mutex<ProfileState>,
    events: broadcast::Sender<ProfileEvent>,
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ProfileStore")
            .field("profiles", &state.profiles.len())
            .field("current", &state.current)
            .field("dirty", &state.dirty)
            .finish_non_exhaustive()
    }
}

impl ProfileStore {
    /// Load from storage. Empty or unreadable storage yields a single `Default` profile.
    pub fn open(storage: Arc<dyn DocumentStore>) -> Self {
        let (profiles, profiles_readable) = load_profiles(storage.as_ref());
        let (current, current_readable) = match codec::read_json::<Option<ProfileId>>(
            storage.as_ref(),
            keys::CURRENT_PROFILE_ID,
        ) {
            Ok(current) => (current.flatten(), true),
            Err(e) => {
                tracing::warn!("Failed to load current profile id: {e}");
                (None, false)
            }
        };

        let mut state = ProfileState {
            profiles,
            current,
            dirty: false,
        };
        let repair = state.normalize();
        if let Some(id) = &repair.synthesized {
            tracing::info!(profile_id = %id, "No stored profiles; created default profile");
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            storage,
            state: Mutex::new(state),
            events,
        };

        if repair.changed() {
            store.commit_repair(profiles_readable && current_readable);
        }
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.events.subscribe()
    }

    /// Snapshot of all profiles in order.
    #[must_use]
    pub fn list(&self) -> Vec<Profile> {
        self.lock_state().profiles.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().profiles.len()
    }

    /// Never true once opened; the store always holds at least one profile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_state().profiles.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ProfileId) -> Option<Profile> {
        let state = self.lock_state();
        state.position(id).map(|idx| state.profiles[idx].clone())
    }

    #[must_use]
    pub fn current(&self) -> Profile {
        self.lock_state().current().clone()
    }

    #[must_use]
    pub fn current_id(&self) -> ProfileId {
        self.lock_state().current().id().clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    /// Append a profile and make it current.
    pub fn add(&self, profile: Profile) -> Result<(), ProfileError> {
        let mut state = self.lock_state();
        let id = profile.id().clone();
        if state.position(&id).is_some() {
            return Err(ValidationError::DuplicateId(id).into());
        }

        state.profiles.push(profile);
        state.current = Some(id.clone());
        tracing::debug!(profile_id = %id, "Profile added");
        self.emit(ProfileEvent::Added(id.clone()));
        self.emit(ProfileEvent::CurrentChanged(id));

        self.persist(&mut state)?;
        Ok(())
    }

    /// Apply the supplied fields. Returns `Ok(false)` if no profile has this id.
    pub fn update(&self, id: &ProfileId, patch: ProfilePatch) -> Result<bool, ProfileError> {
        let mut state = self.lock_state();
        let Some(idx) = state.position(id) else {
            tracing::debug!(profile_id = %id, "Update ignored; no such profile");
            return Ok(false);
        };

        patch.apply(&mut state.profiles[idx]);
        self.emit(ProfileEvent::Updated(id.clone()));

        self.persist(&mut state)?;
        Ok(true)
    }

    /// Select the current profile. Returns `Ok(false)` if no profile has this id.
    pub fn set_current(&self, id: &ProfileId) -> Result<bool, ProfileError> {
        let mut state = self.lock_state();
        if state.position(id).is_none() {
            tracing::debug!(profile_id = %id, "Selection ignored; no such profile");
            return Ok(false);
        }

        if state.current.as_ref() != Some(id) {
            state.current = Some(id.clone());
            self.emit(ProfileEvent::CurrentChanged(id.clone()));
        }

        self.persist(&mut state)?;
        Ok(true)
    }

    /// Remove a profile, reselecting or synthesizing a default in the same step.
    /// Returns `Ok(false)` if no profile has this id.
    pub fn delete(&self, id: &ProfileId) -> Result<bool, ProfileError> {
        let mut state = self.lock_state();
        let Some(idx) = state.position(id) else {
            return Ok(false);
        };

        state.profiles.remove(idx);
        let repair = state.normalize();
        tracing::debug!(profile_id = %id, remaining = state.profiles.len(), "Profile deleted");

        self.emit(ProfileEvent::Deleted(id.clone()));
        if let Some(synthesized) = repair.synthesized {
            self.emit(ProfileEvent::DefaultSynthesized(synthesized));
        }
        if let Some(reselected) = repair.reselected {
            self.emit(ProfileEvent::CurrentChanged(reselected));
        }

        self.persist(&mut state)?;
        Ok(true)
    }

    /// Retry a previously failed write. No-op when nothing is pending.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let mut state = self.lock_state();
        if !state.dirty {
            return Ok(());
        }
        self.persist(&mut state)
    }

    fn commit_repair(&self, storage_readable: bool) {
        let mut state = self.lock_state();
        if storage_readable {
            // Failure is logged inside persist and retried on the next write.
            let _ = self.persist(&mut state);
        } else {
            // Storage could not be read; do not clobber it until the user changes something.
            state.dirty = true;
        }
    }

    fn persist(&self, state: &mut MutexGuard<'_, ProfileState>) -> Result<(), PersistenceError> {
        match codec::write_profiles(
            self.storage.as_ref(),
            &state.profiles,
            state.current.as_ref(),
        ) {
            Ok(()) => {
                state.dirty = false;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = e.key(), "Failed to save profiles: {e}");
                state.dirty = true;
                Err(e)
            }
        }
    }

    fn emit(&self, event: ProfileEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, ProfileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the decoded profiles and whether storage was readable at all.
fn load_profiles(storage: &dyn DocumentStore) -> (Vec<Profile>, bool) {
    let raw = match storage.read(keys::SAVED_PROFILES) {
        Ok(Some(raw)) => raw,
        Ok(None) => return (Vec::new(), true),
        Err(e) => {
            tracing::warn!("Failed to read profiles: {e}");
            return (Vec::new(), false);
        }
    };

    let profiles = match codec::decode_profiles(&raw) {
        Ok(profiles) => profiles,
        Err(e @ PersistenceError::UnsupportedVersion { .. }) => {
            // Written by a newer build; leave it on disk until the user changes something.
            tracing::warn!("Stored profiles use an unknown format, starting fresh: {e}");
            return (Vec::new(), false);
        }
        Err(e) => {
            tracing::warn!("Stored profiles unusable, starting fresh: {e}");
            return (Vec::new(), true);
        }
    };

    let mut seen = HashSet::new();
    let before = profiles.len();
    let unique: Vec<Profile> = profiles
        .into_iter()
        .filter(|p| seen.insert(p.id().clone()))
        .collect();
    if unique.len() != before {
        tracing::warn!(
            dropped = before - unique.len(),
            "Dropped profiles with duplicate ids"
        );
    }
    (unique, true)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use tagblock_types::{AppToken, CategoryToken, DEFAULT_PROFILE_NAME, ProfileName};

    use super::*;
    use crate::MemoryDocumentStore;

    fn named(id: &str, name: &str) -> Profile {
        Profile::with_id(ProfileId::new(id), ProfileName::new(name).unwrap())
    }

    fn open(storage: &Arc<MemoryDocumentStore>) -> ProfileStore {
        ProfileStore::open(storage.clone())
    }

    fn assert_invariants(store: &ProfileStore) {
        let profiles = store.list();
        assert!(!profiles.is_empty());
        let current = store.current_id();
        assert!(profiles.iter().any(|p| p.id() == &current));
        let ids: HashSet<_> = profiles.iter().map(|p| p.id().clone()).collect();
        assert_eq!(ids.len(), profiles.len());
    }

    #[test]
    fn empty_storage_synthesizes_current_default() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);

        let profiles = store.list();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name.as_str(), DEFAULT_PROFILE_NAME);
        assert!(profiles[0].restriction_set().is_empty());
        assert_eq!(store.current_id(), *profiles[0].id());
        assert!(storage.get(keys::SAVED_PROFILES).is_some());
        assert!(!store.is_dirty());
    }

    #[test]
    fn corrupt_storage_synthesizes_default() {
        let storage = Arc::new(MemoryDocumentStore::new());
        storage.insert(keys::SAVED_PROFILES, "{oops");
        let store = open(&storage);

        assert_eq!(store.len(), 1);
        assert_eq!(store.current().name.as_str(), DEFAULT_PROFILE_NAME);
    }

    #[test]
    fn unreadable_storage_is_not_overwritten_on_open() {
        let storage = Arc::new(MemoryDocumentStore::new());
        storage.insert(keys::SAVED_PROFILES, "[]");
        storage.set_fail_reads(true);
        let store = open(&storage);

        assert_eq!(store.len(), 1);
        assert!(store.is_dirty());
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn newer_profiles_document_is_not_overwritten_on_open() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let newer = r#"{"version":2,"profiles":[{"id":"W","name":"Work"}]}"#;
        storage.insert(keys::SAVED_PROFILES, newer);
        let store = open(&storage);

        assert_eq!(store.len(), 1);
        assert_eq!(store.current().name.as_str(), DEFAULT_PROFILE_NAME);
        assert!(store.is_dirty());
        assert_eq!(storage.write_count(), 0);
        assert_eq!(storage.get(keys::SAVED_PROFILES).as_deref(), Some(newer));
    }

    #[test]
    fn unreadable_current_id_is_not_overwritten_on_open() {
        let storage = Arc::new(MemoryDocumentStore::new());
        storage.insert(
            keys::SAVED_PROFILES,
            codec::encode_profiles(&[named("A", "One"), named("B", "Two")]).unwrap(),
        );
        storage.insert(keys::CURRENT_PROFILE_ID, "\"B\"");
        storage.fail_reads_for(keys::CURRENT_PROFILE_ID);
        let store = open(&storage);

        assert_eq!(store.current_id(), ProfileId::new("A"));
        assert!(store.is_dirty());
        assert_eq!(storage.write_count(), 0);
        assert_eq!(
            storage.get(keys::CURRENT_PROFILE_ID).as_deref(),
            Some("\"B\"")
        );
    }

    #[test]
    fn dangling_current_resolves_to_first() {
        let storage = Arc::new(MemoryDocumentStore::new());
        storage.insert(
            keys::SAVED_PROFILES,
            codec::encode_profiles(&[named("A", "One"), named("B", "Two")]).unwrap(),
        );
        storage.insert(keys::CURRENT_PROFILE_ID, "\"ZZZ\"");

        let store = open(&storage);
        assert_eq!(store.current_id(), ProfileId::new("A"));
        assert_eq!(
            storage.get(keys::CURRENT_PROFILE_ID).as_deref(),
            Some("\"A\"")
        );
    }

    #[test]
    fn duplicate_ids_in_storage_keep_first() {
        let storage = Arc::new(MemoryDocumentStore::new());
        storage.insert(
            keys::SAVED_PROFILES,
            codec::encode_profiles(&[named("A", "One"), named("A", "Shadow")]).unwrap(),
        );
        let store = open(&storage);
        let profiles = store.list();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name.as_str(), "One");
    }

    #[test]
    fn add_appends_and_selects() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        let mut events = store.subscribe();

        store.add(named("W", "Work")).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.list()[1].id().as_str(), "W");
        assert_eq!(store.current_id(), ProfileId::new("W"));
        assert_eq!(events.try_recv().unwrap(), ProfileEvent::Added(ProfileId::new("W")));
        assert_eq!(
            events.try_recv().unwrap(),
            ProfileEvent::CurrentChanged(ProfileId::new("W"))
        );
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        store.add(named("W", "Work")).unwrap();

        let err = store.add(named("W", "Again")).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Validation(ValidationError::DuplicateId(_))
        ));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&ProfileId::new("W")).unwrap().name.as_str(), "Work");
    }

    #[test]
    fn update_applies_only_supplied_fields() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        store
            .add(named("W", "Work").with_apps([AppToken::new("mail")]))
            .unwrap();

        let changed = store
            .update(
                &ProfileId::new("W"),
                ProfilePatch {
                    blocked_categories: Some(BTreeSet::from([CategoryToken::new("social")])),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(changed);
        let profile = store.get(&ProfileId::new("W")).unwrap();
        assert_eq!(profile.name.as_str(), "Work");
        assert!(profile.blocked_apps.contains(&AppToken::new("mail")));
        assert!(profile.blocked_categories.contains(&CategoryToken::new("social")));
    }

    #[test]
    fn update_unknown_id_is_a_noop() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        let writes = storage.write_count();

        let changed = store
            .update(&ProfileId::new("missing"), ProfilePatch::default())
            .unwrap();

        assert!(!changed);
        assert_eq!(storage.write_count(), writes);
    }

    #[test]
    fn set_current_ignores_unknown_ids() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        let original = store.current_id();

        assert!(!store.set_current(&ProfileId::new("missing")).unwrap());
        assert_eq!(store.current_id(), original);

        store.add(named("W", "Work")).unwrap();
        assert!(store.set_current(&original).unwrap());
        assert_eq!(store.current_id(), original);
    }

    #[test]
    fn deleting_current_reselects_first() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        let first = store.current_id();
        store.add(named("W", "Work")).unwrap();

        assert!(store.delete(&ProfileId::new("W")).unwrap());

        assert_eq!(store.current_id(), first);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deleting_last_profile_synthesizes_new_default() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        let only = store.current_id();
        let mut events = store.subscribe();

        assert!(store.delete(&only).unwrap());

        let profiles = store.list();
        assert_eq!(profiles.len(), 1);
        assert_ne!(profiles[0].id(), &only);
        assert_eq!(profiles[0].name.as_str(), DEFAULT_PROFILE_NAME);
        assert_eq!(store.current_id(), *profiles[0].id());

        assert_eq!(events.try_recv().unwrap(), ProfileEvent::Deleted(only));
        assert!(matches!(
            events.try_recv().unwrap(),
            ProfileEvent::DefaultSynthesized(_)
        ));
    }

    #[test]
    fn delete_unknown_id_returns_false() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        assert!(!store.delete(&ProfileId::new("missing")).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_is_a_copy() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        let mut snapshot = store.list();
        snapshot.clear();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persistence_failure_keeps_memory_state_and_retries() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        storage.set_fail_writes(true);

        let err = store.add(named("W", "Work")).unwrap_err();
        assert!(matches!(err, ProfileError::Persistence(_)));
        assert_eq!(store.current_id(), ProfileId::new("W"));
        assert!(store.is_dirty());

        storage.set_fail_writes(false);
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let reopened = open(&storage);
        assert_eq!(reopened.list(), store.list());
        assert_eq!(reopened.current_id(), ProfileId::new("W"));
    }

    #[test]
    fn state_survives_reopen() {
        let storage = Arc::new(MemoryDocumentStore::new());
        let store = open(&storage);
        store
            .add(named("W", "Work").with_icon("briefcase"))
            .unwrap();
        store.add(named("S", "Study")).unwrap();
        store.set_current(&ProfileId::new("W")).unwrap();

        let reopened = open(&storage);
        assert_eq!(reopened.list(), store.list());
        assert_eq!(reopened.current_id(), ProfileId::new("W"));
        assert_eq!(reopened.current().icon, "briefcase");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Update(u8),
        Select(u8),
        Delete(u8),
        DeleteCurrent,
    }

    fn op_strategy() -> impl Strategy<Value = Vec<Op>> {
        let op = prop_oneof![
            (0u8..6).prop_map(Op::Add),
            (0u8..6).prop_map(Op::Update),
            (0u8..6).prop_map(Op::Select),
            (0u8..6).prop_map(Op::Delete),
            Just(Op::DeleteCurrent),
        ];
        prop::collection::vec(op, 0..40)
    }

    proptest! {
        #[test]
        fn never_empty_and_current_always_resolves(ops in op_strategy(), fail_writes in any::<bool>()) {
            let storage = Arc::new(MemoryDocumentStore::new());
            let store = ProfileStore::open(storage.clone());
            storage.set_fail_writes(fail_writes);

            for op in ops {
                let id = |n: u8| ProfileId::new(format!("P{n}"));
                let _ = match op {
                    Op::Add(n) => store.add(named(id(n).as_str(), "Generated")).map(|()| true),
                    Op::Update(n) => store.update(&id(n), ProfilePatch {
                        icon: Some("moon".to_owned()),
                        ..Default::default()
                    }),
                    Op::Select(n) => store.set_current(&id(n)),
                    Op::Delete(n) => store.delete(&id(n)),
                    Op::DeleteCurrent => store.delete(&store.current_id()),
                };
                assert_invariants(&store);
            }

            storage.set_fail_writes(false);
            store.flush().unwrap();
            let reopened = ProfileStore::open(storage);
            prop_assert_eq!(reopened.list(), store.list());
            prop_assert_eq!(reopened.current_id(), store.current_id());
        }
    }
}
