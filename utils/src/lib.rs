//! Shared infrastructure utilities for tagblock.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)

pub mod atomic_write;

pub use atomic_write::{Durability, FileMode, WriteOptions, atomic_write, recover_bak_file};
