//! # rqsteward
//!
//! Bootstrap and membership coordinator for an rqlite cluster node:
//! - Static bootstrap leader chosen by ordinal, no runtime election
//! - Bounded join for followers, delegated to the daemon
//! - Single supervised daemon per service key, restarted on every boot
//! - Leader-side reclamation of members left behind by replaced instances
//!
//! ## Flow
//!
//! ```text
//! config ──► role ──► startup command ──► supervisor.launch
//!                                              │
//!                                              ▼
//!                                     reboot registry.upsert
//!                                              │
//!                                   (leader)   ▼
//!                          /readyz ─► /nodes ─► DELETE /remove (ordinal < own)
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Show what this node would do
//! rqsteward --config /etc/rqsteward/rqsteward.toml plan
//!
//! # Launch the daemon, register it for reboot, reclaim stale members
//! rqsteward --config /etc/rqsteward/rqsteward.toml run
//!
//! # Reclamation only (leader)
//! rqsteward --config /etc/rqsteward/rqsteward.toml reclaim
//! ```

pub mod common;
pub mod coordinator;
pub mod supervisor;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
