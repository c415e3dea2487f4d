//! Bootstrap and membership coordination for one datastore node
//!
//! The coordinator is responsible for:
//! - Role resolution (static bootstrap leader, everyone else joins)
//! - Building the daemon startup command (bounded join for followers)
//! - Handing the command to the supervisor and registering it for reboot
//! - Reclaiming stale predecessor members (leader only)

pub mod client;
pub mod identity;
pub mod join;
pub mod reclaim;
pub mod runner;

pub use client::{ClusterApi, HttpClusterClient, MemberState, Membership, MembershipRecord};
pub use identity::{resolve_role, Role};
pub use join::{build_startup_command, StartCommand, StartMode};
pub use reclaim::{ReclaimReport, SkipReason, StaleMemberReclaimer};
pub use runner::{Coordinator, Phase, Plan, RebootTarget, RunReport};
