//! One coordinator run
//!
//! `Start → IdentityResolved → {LeaderBootstrapping | FollowerJoining} →
//! DaemonLaunched → RebootRegistered → [ReclaimingStaleMembers → ReclaimDone]
//! → Idle`
//!
//! No phase is retried as a whole. A failure before `RebootRegistered` aborts
//! the run; reclamation never does.

use crate::common::{Config, Result};
use crate::coordinator::client::{ClusterApi, HttpClusterClient};
use crate::coordinator::identity::{resolve_role, Role};
use crate::coordinator::join::{build_startup_command, StartCommand};
use crate::coordinator::reclaim::{ReclaimReport, StaleMemberReclaimer};
use crate::supervisor::{CronRegistry, LocalSupervisor, RebootRegistry, Supervisor};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    IdentityResolved,
    LeaderBootstrapping,
    FollowerJoining,
    DaemonLaunched,
    RebootRegistered,
    ReclaimingStaleMembers,
    ReclaimDone,
    Idle,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::IdentityResolved => "identity-resolved",
            Phase::LeaderBootstrapping => "leader-bootstrapping",
            Phase::FollowerJoining => "follower-joining",
            Phase::DaemonLaunched => "daemon-launched",
            Phase::RebootRegistered => "reboot-registered",
            Phase::ReclaimingStaleMembers => "reclaiming-stale-members",
            Phase::ReclaimDone => "reclaim-done",
            Phase::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// What the reboot entry starts: this coordinator again, reading the
/// configuration snapshot of the run that registered it.
///
/// Every boot goes through the supervisor, so the daemon is never started
/// behind its back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootTarget {
    exe: PathBuf,
}

impl RebootTarget {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    fn command_for(&self, daemon: &StartCommand, snapshot: &Path) -> StartCommand {
        StartCommand {
            program: self.exe.clone(),
            args: vec![
                "--config".to_string(),
                snapshot.to_string_lossy().into_owned(),
                "run".to_string(),
            ],
            mode: daemon.mode.clone(),
        }
    }
}

/// Resolved role and daemon command, without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub ordinal: u64,
    pub role: Role,
    pub command: StartCommand,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ordinal: u64,
    pub role: Role,
    pub command: StartCommand,
    pub pid: u32,
    pub reboot_entry: String,
    pub reclaim: Option<ReclaimReport>,
}

pub struct Coordinator<S, R, A> {
    config: Config,
    supervisor: S,
    registry: R,
    api: A,
    reboot: RebootTarget,
}

impl Coordinator<LocalSupervisor, CronRegistry, HttpClusterClient> {
    /// Wire the coordinator to the local process table, the cron registry
    /// and the daemon's HTTP API on this node's address.
    pub fn from_config(config: Config, reboot: RebootTarget) -> Result<Self> {
        let supervisor = LocalSupervisor::new(&config.supervisor);
        let registry = CronRegistry::new(
            &config.supervisor.registry_path,
            config.supervisor.registry_user.clone(),
            &config.supervisor.log_dir,
        );
        let api = HttpClusterClient::new(config.daemon_url(), config.reclaim.request_timeout())?;
        Ok(Self::new(config, supervisor, registry, api, reboot))
    }
}

impl<S, R, A> Coordinator<S, R, A>
where
    S: Supervisor,
    R: RebootRegistry,
    A: ClusterApi,
{
    pub fn new(config: Config, supervisor: S, registry: R, api: A, reboot: RebootTarget) -> Self {
        Self {
            config,
            supervisor,
            registry,
            api,
            reboot,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn plan(&self) -> Result<Plan> {
        let role = resolve_role(&self.config.node, &self.config.cluster);
        let command = build_startup_command(
            &self.config.node,
            role,
            &self.config.cluster,
            &self.config.daemon,
        )?;
        Ok(Plan {
            ordinal: self.config.node.ordinal,
            role,
            command,
        })
    }

    /// Execute the full flow once.
    ///
    /// Fatal errors are logged with the phase they interrupted before they
    /// are returned.
    pub async fn run(&self) -> Result<RunReport> {
        let mut phase = Phase::Start;
        let outcome = self.run_phases(&mut phase).await;
        match outcome {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(
                    %phase,
                    ordinal = self.config.node.ordinal,
                    fatal = e.is_fatal(),
                    "coordinator run aborted: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_phases(&self, phase: &mut Phase) -> Result<RunReport> {
        let node = &self.config.node;
        let service_key = self.config.supervisor.service_key.as_str();
        tracing::info!(
            ordinal = node.ordinal,
            address = %node.address,
            service_key,
            "coordinator run starting"
        );

        let role = resolve_role(node, &self.config.cluster);
        advance(phase, Phase::IdentityResolved);
        tracing::info!(
            %role,
            default_leader = self.config.cluster.default_leader_ordinal,
            "role resolved"
        );

        advance(
            phase,
            match role {
                Role::Leader => Phase::LeaderBootstrapping,
                Role::Follower => Phase::FollowerJoining,
            },
        );
        let command = build_startup_command(node, role, &self.config.cluster, &self.config.daemon)?;
        tracing::info!(command = %command, "daemon command built");

        let pid = self.supervisor.launch(&command, service_key).await?;
        advance(phase, Phase::DaemonLaunched);

        let snapshot = self.config.snapshot_path();
        self.config.save_snapshot(&snapshot)?;
        let entry = self
            .registry
            .upsert(service_key, &self.reboot.command_for(&command, &snapshot))?;
        advance(phase, Phase::RebootRegistered);

        let reclaim = if role.is_leader() {
            advance(phase, Phase::ReclaimingStaleMembers);
            let report = self.reclaim().await;
            advance(phase, Phase::ReclaimDone);
            Some(report)
        } else {
            None
        };

        advance(phase, Phase::Idle);
        Ok(RunReport {
            ordinal: node.ordinal,
            role,
            command,
            pid,
            reboot_entry: entry.line,
            reclaim,
        })
    }

    /// A single reclamation pass; a no-op on followers.
    pub async fn reclaim(&self) -> ReclaimReport {
        StaleMemberReclaimer::new(&self.api, &self.config.reclaim)
            .reclaim(&self.config.node, &self.config.cluster)
            .await
    }
}

fn advance(phase: &mut Phase, next: Phase) {
    tracing::debug!(from = %phase, to = %next, "phase transition");
    *phase = next;
}
