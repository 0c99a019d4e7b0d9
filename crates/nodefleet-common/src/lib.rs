//! # Nodefleet Common
//!
//! Shared types, errors, and constants used by the Nodefleet daemon.
//!
//! ## Modules
//! - `types` - Data model (NodeIdentity, LifecycleState, remote payloads, events)
//! - `error` - The fleet error taxonomy
//! - `constants` - Remote API defaults and timing constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::FleetError;
pub use types::*;
