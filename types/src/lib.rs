//! Core domain types for tagblock.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod ids;
mod lock;
mod profile;

pub use ids::{EmptyTokenError, ProfileId, TokenId};
pub use lock::{LockState, LockStatus};
pub use profile::{
    AppToken, CategoryToken, DEFAULT_PROFILE_ICON, DEFAULT_PROFILE_NAME, EmptyStringError,
    Profile, ProfileName, ProfilePatch, RestrictionSet,
};
