//! Durable state for tagblock.
//!
//! - **`document`**: the injected storage capability and its file/in-memory implementations
//! - **`codec`**: persisted layout of profiles and the lock record
//! - **`profiles`**: the profile store

pub mod codec;
mod document;
mod profiles;

pub use codec::{load_lock_state, save_lock_state};
pub use document::{DocumentStore, FileDocumentStore, MemoryDocumentStore, PersistenceError};
pub use profiles::{ProfileError, ProfileEvent, ProfileStore, ValidationError};
