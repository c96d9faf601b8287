//! The lock controller: a two-state machine keyed by the tag that armed it.
//!
//! ```text
//!            scan (any tag) / apply current profile
//!   Unlocked ───────────────────────────────────────▶ Locked { armed_by }
//!       ▲                                                  │
//!       └──────────── scan == armed_by / clear ────────────┘
//!                     scan != armed_by → TokenMismatch, state unchanged
//! ```
//!
//! Only one toggle runs at a time. Every await (the scan, an inline
//! authorization request) happens before the commit, so cancelling or
//! dropping a toggle leaves no trace.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{AbortHandle, AbortRegistration, Abortable};
use tokio::sync::broadcast;

use tagblock_store::{DocumentStore, PersistenceError, ProfileStore, load_lock_state, save_lock_state};
use tagblock_types::{LockState, LockStatus, ProfileId, TokenId};

use crate::errors::{Degradation, ToggleError};
use crate::events::LockEvent;
use crate::ports::{AuthorizationError, RestrictionEnforcer, ScanError, TokenReader};

const EVENT_CAPACITY: usize = 32;
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// `None` waits until the scan is cancelled.
    pub scan_timeout: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            scan_timeout: Some(DEFAULT_SCAN_TIMEOUT),
        }
    }
}

/// The external collaborators the controller drives.
#[derive(Clone)]
pub struct Ports {
    pub reader: Arc<dyn TokenReader>,
    pub enforcer: Arc<dyn RestrictionEnforcer>,
}

/// Result of a committed toggle.
#[derive(Debug)]
pub struct ToggleOutcome {
    pub status: LockStatus,
    /// Profile whose restrictions were applied; `None` after unlocking.
    pub profile_id: Option<ProfileId>,
    pub degradations: Vec<Degradation>,
}

impl ToggleOutcome {
    /// True when the transition committed but restrictions may not be in effect
    /// or the new state was not saved.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

#[derive(Debug)]
struct ControllerState {
    lock: LockState,
    authorized: bool,
    dirty: bool,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct ScanSlot {
    in_flight: bool,
    abort: Option<AbortHandle>,
}

/// Releases the scan slot when a toggle finishes or is dropped.
struct ScanGuard<'a> {
    slot: &'a Mutex<ScanSlot>,
}

impl ScanGuard<'_> {
    /// The reader has answered; cancellation no longer applies.
    fn scan_finished(&self) {
        lock_ignoring_poison(self.slot).abort = None;
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock_ignoring_poison(self.slot);
        slot.in_flight = false;
        slot.abort = None;
    }
}

pub struct LockController {
    ports: Ports,
    profiles: Arc<ProfileStore>,
    storage: Arc<dyn DocumentStore>,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    scan: Mutex<ScanSlot>,
    events: broadcast::Sender<LockEvent>,
}

impl std::fmt::Debug for LockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockController")
            .field("state", &self.lock_state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LockController {
    /// Load the committed lock record. Missing or unreadable records start unlocked.
    pub fn open(
        ports: Ports,
        profiles: Arc<ProfileStore>,
        storage: Arc<dyn DocumentStore>,
        settings: ControllerSettings,
    ) -> Self {
        let lock = match load_lock_state(storage.as_ref()) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!("Failed to load lock record, starting unlocked: {e}");
                LockState::Unlocked
            }
        };
        tracing::debug!(status = %lock.status(), "Lock controller loaded");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ports,
            profiles,
            storage,
            settings,
            state: Mutex::new(ControllerState {
                lock,
                authorized: false,
                dirty: false,
                last_error: None,
            }),
            scan: Mutex::new(ScanSlot::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_state().lock.is_locked()
    }

    #[must_use]
    pub fn status(&self) -> LockStatus {
        self.lock_state().lock.status()
    }

    /// Redacted identifier of the arming tag, for display.
    #[must_use]
    pub fn armed_token_hint(&self) -> Option<String> {
        self.lock_state().lock.armed_by().map(TokenId::redacted)
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.lock_state().authorized
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    #[must_use]
    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        lock_ignoring_poison(&self.scan).in_flight
    }

    /// Request the restriction capability from the enforcement backend.
    pub async fn authorize(&self) -> Result<(), AuthorizationError> {
        let result = self.ports.enforcer.request_authorization().await;
        let granted = result.is_ok();

        let changed = {
            let mut state = self.lock_state();
            let changed = state.authorized != granted;
            state.authorized = granted;
            changed
        };
        if changed {
            self.emit(LockEvent::AuthorizationChanged { granted });
        }
        match &result {
            Ok(()) => tracing::debug!("Restriction authorization granted"),
            Err(e) => tracing::warn!("Restriction authorization failed: {e}"),
        }
        result
    }

    /// Abort the in-flight scan. Returns false if no scan is waiting on the reader.
    pub fn cancel_scan(&self) -> bool {
        match lock_ignoring_poison(&self.scan).abort.take() {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Scan cancelled");
                true
            }
            None => false,
        }
    }

    /// Scan one tag and lock or unlock depending on the current state.
    ///
    /// From `Unlocked` any tag arms the lock. From `Locked` only the arming
    /// tag unlocks it. Errors leave state and storage untouched.
    pub async fn request_toggle(&self) -> Result<ToggleOutcome, ToggleError> {
        let (guard, registration) = match self.begin_scan() {
            Ok(started) => started,
            Err(err) => return Err(self.reject(err)),
        };

        let armed_by = self.lock_state().lock.armed_by().cloned();

        let scanned = self.scan_once(registration).await;
        guard.scan_finished();
        let scanned = match scanned {
            Ok(token) => token,
            Err(err) => return Err(self.reject(err.into())),
        };

        match armed_by {
            None => Ok(self.arm(scanned).await),
            Some(expected) => self.disarm(expected, scanned),
        }
    }

    /// Retry a lock-record write that failed earlier.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let mut state = self.lock_state();
        if !state.dirty {
            return Ok(());
        }
        self.persist(&mut state)
    }

    fn begin_scan(&self) -> Result<(ScanGuard<'_>, AbortRegistration), ToggleError> {
        let mut slot = lock_ignoring_poison(&self.scan);
        if slot.in_flight {
            return Err(ToggleError::ScanInProgress);
        }
        let (handle, registration) = AbortHandle::new_pair();
        slot.in_flight = true;
        slot.abort = Some(handle);
        Ok((ScanGuard { slot: &self.scan }, registration))
    }

    async fn scan_once(&self, registration: AbortRegistration) -> Result<TokenId, ScanError> {
        let timeout = self.settings.scan_timeout;
        let scan = Abortable::new(self.ports.reader.scan(timeout), registration);

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, scan).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(timeout_secs = limit.as_secs(), "Scan timed out");
                    return Err(ScanError::Cancelled);
                }
            },
            None => scan.await,
        };

        // Aborted means cancel_scan was called.
        result.unwrap_or(Err(ScanError::Cancelled))
    }

    async fn arm(&self, token: TokenId) -> ToggleOutcome {
        let mut degradations = Vec::new();

        if !self.is_authorized()
            && let Err(e) = self.authorize().await
        {
            degradations.push(Degradation::NotAuthorized(e));
        }

        let profile = self.profiles.current();
        let restrictions = profile.restriction_set();

        self.lock_state().lock = LockState::Locked {
            armed_by: token.clone(),
        };

        if let Err(e) = self.ports.enforcer.apply(&restrictions) {
            tracing::warn!(profile_id = %profile.id(), "Failed to apply restrictions: {e}");
            degradations.push(Degradation::Enforcement(e));
        }
        if let Err(e) = self.persist(&mut self.lock_state()) {
            degradations.push(Degradation::Persistence(e));
        }

        tracing::info!(
            profile_id = %profile.id(),
            token = %token.redacted(),
            apps = restrictions.apps.len(),
            categories = restrictions.categories.len(),
            "Lock engaged"
        );
        self.emit(LockEvent::Locked {
            profile_id: profile.id().clone(),
        });
        self.finish(&degradations);

        ToggleOutcome {
            status: LockStatus::Locked,
            profile_id: Some(profile.id().clone()),
            degradations,
        }
    }

    fn disarm(&self, expected: TokenId, scanned: TokenId) -> Result<ToggleOutcome, ToggleError> {
        if scanned != expected {
            tracing::warn!(
                expected = %expected.redacted(),
                scanned = %scanned.redacted(),
                "Unlock rejected: wrong tag"
            );
            return Err(self.reject(ToggleError::TokenMismatch { expected, scanned }));
        }

        let mut degradations = Vec::new();
        self.lock_state().lock = LockState::Unlocked;

        if let Err(e) = self.ports.enforcer.clear() {
            tracing::warn!("Failed to clear restrictions: {e}");
            degradations.push(Degradation::Enforcement(e));
        }
        if let Err(e) = self.persist(&mut self.lock_state()) {
            degradations.push(Degradation::Persistence(e));
        }

        tracing::info!("Lock released");
        self.emit(LockEvent::Unlocked);
        self.finish(&degradations);

        Ok(ToggleOutcome {
            status: LockStatus::Unlocked,
            profile_id: None,
            degradations,
        })
    }

    fn persist(&self, state: &mut ControllerState) -> Result<(), PersistenceError> {
        match save_lock_state(self.storage.as_ref(), &state.lock) {
            Ok(()) => {
                state.dirty = false;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = e.key(), "Failed to save lock record: {e}");
                state.dirty = true;
                Err(e)
            }
        }
    }

    fn reject(&self, err: ToggleError) -> ToggleError {
        if err != ToggleError::Cancelled {
            tracing::debug!(side = ?err.side(), "Toggle rejected: {err}");
        }
        self.lock_state().last_error = Some(err.user_message());
        self.emit(LockEvent::Rejected {
            side: err.side(),
            message: err.to_string(),
        });
        err
    }

    fn finish(&self, degradations: &[Degradation]) {
        for degradation in degradations {
            self.emit(LockEvent::Degraded {
                side: degradation.side(),
                message: degradation.to_string(),
            });
        }
        self.lock_state().last_error = degradations.last().map(Degradation::user_message);
    }

    fn emit(&self, event: LockEvent) {
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        lock_ignoring_poison(&self.state)
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
