//! Core domain logic for tagblock.
//!
//! This crate holds the token-gated lock state machine and the ports it
//! drives: a token reader that yields one tag identifier per scan and a
//! restriction backend that applies or clears the current profile's
//! blocked set.

mod controller;
pub mod errors;
mod events;
pub mod ports;


pub use controller::{
    ControllerSettings, DEFAULT_SCAN_TIMEOUT, LockController, Ports, ToggleOutcome,
};
pub use errors::{Degradation, FailureSide, ToggleError};
pub use events::LockEvent;
pub use ports::{
    AuthFut, AuthorizationError, EnforcementError, RestrictionEnforcer, ScanError, ScanFut,
    TokenReader, select_single,
};
