//! # Fleetd - Nodefleet Daemon
//!
//! Keeps a fixed fleet of nodes registered and alive against the remote
//! session API. Each node runs its own lifecycle:
//!
//! ```text
//! discover IP (proxy mode) → register → start session → ping every 60s
//!          ↑                                                  │
//!          └──────────────── failure: restart node ───────────┘
//! ```
//!
//! The supervisor launches one lifecycle per identity and restarts the
//! whole fleet when a failure escapes a node's own recovery.

pub mod config;
pub mod heartbeat;
pub mod lifecycle;
pub mod presenter;
pub mod sources;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod testing;
