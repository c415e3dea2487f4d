//! Daemon startup invocation
//!
//! The leader bootstraps a single-node cluster; followers start with a
//! join target and a bounded attempt count. Retrying the join is the
//! daemon's job: once it exhausts the bound it exits non-zero and stays
//! down until an operator intervenes.

use crate::common::{shell_quote, ClusterConfig, DaemonConfig, Error, NodeIdentity, Result};
use crate::coordinator::identity::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StartMode {
    Bootstrap,
    Join { target: String, max_attempts: u32 },
}

/// A fully rendered command line plus how it will start the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub mode: StartMode,
}

impl StartCommand {
    /// Single-line `sh` rendering, suitable for a crontab entry.
    pub fn to_shell(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|word| shell_quote(&word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn join_target(&self) -> Option<&str> {
        match &self.mode {
            StartMode::Join { target, .. } => Some(target),
            StartMode::Bootstrap => None,
        }
    }
}

impl std::fmt::Display for StartCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Build the daemon invocation for this node.
///
/// Fails with [`Error::JoinConfiguration`] when a follower has no join
/// address; a follower must never start as a leaderless single-node cluster.
pub fn build_startup_command(
    identity: &NodeIdentity,
    role: Role,
    cluster: &ClusterConfig,
    daemon: &DaemonConfig,
) -> Result<StartCommand> {
    let mode = match role {
        Role::Leader => {
            if let Some(target) = cluster.join_target() {
                tracing::debug!(%target, "ignoring join address on bootstrap leader");
            }
            StartMode::Bootstrap
        }
        Role::Follower => {
            let target = cluster.join_target().ok_or_else(|| Error::JoinConfiguration {
                ordinal: identity.ordinal,
                reason: format!(
                    "node is not the default leader ({}) and no join address is configured",
                    cluster.default_leader_ordinal
                ),
            })?;
            StartMode::Join {
                target: target.to_string(),
                max_attempts: cluster.max_join_attempts,
            }
        }
    };

    let mut args = vec![
        "-node-id".to_string(),
        identity.ordinal.to_string(),
        "-http-addr".to_string(),
        format!("{}:{}", identity.address, daemon.http_port),
        "-raft-addr".to_string(),
        format!("{}:{}", identity.address, daemon.raft_port),
        "-on-disk".to_string(),
        "-raft-non-voter=false".to_string(),
    ];

    if let StartMode::Join {
        target,
        max_attempts,
    } = &mode
    {
        args.push("-join".to_string());
        args.push(target.clone());
        args.push("-join-attempts".to_string());
        args.push(max_attempts.to_string());
    }

    args.extend(daemon.extra_args.iter().cloned());
    args.push(daemon.data_dir.to_string_lossy().into_owned());

    Ok(StartCommand {
        program: daemon.binary.clone(),
        args,
        mode,
    })
}
