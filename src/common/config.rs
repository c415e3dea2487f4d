//! Configuration for rqsteward
//!
//! Loaded once at process entry (TOML file, then `RQSTEWARD_*` environment
//! overrides) and handed to every component by reference.

use crate::common::utils::{service_file, validate_service_key};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default upper bound on follower join attempts.
pub const DEFAULT_MAX_JOIN_ATTEMPTS: u32 = 1000;

/// Coordinator log file name under the log directory.
pub const LOG_FILE_NAME: &str = "rqsteward.log";

/// Environment variable prefix for overrides, e.g. `RQSTEWARD_NODE__ORDINAL=7`.
pub const ENV_PREFIX: &str = "RQSTEWARD";

/// Global configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// This node's identity
    pub node: NodeIdentity,

    /// Cluster-wide bootstrap settings
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub reclaim: ReclaimConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable identity of a node, assigned at provisioning time.
///
/// Ordinals are strictly increasing over the cluster's lifetime and never
/// reused, so a smaller ordinal always belongs to an older instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub ordinal: u64,
    /// Address (IP or hostname) both daemon endpoints bind to
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Ordinal of the node that bootstraps the cluster standalone
    pub default_leader_ordinal: u64,

    /// Existing member to join through (followers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_address: Option<String>,

    #[serde(default = "default_max_join_attempts")]
    pub max_join_attempts: u32,
}

fn default_max_join_attempts() -> u32 {
    DEFAULT_MAX_JOIN_ATTEMPTS
}

impl ClusterConfig {
    /// Join address with blank values treated as absent.
    pub fn join_target(&self) -> Option<&str> {
        self.join_address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }
}

/// Datastore daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Daemon executable
    pub binary: PathBuf,

    /// On-disk data directory
    pub data_dir: PathBuf,

    /// Client-facing HTTP port
    pub http_port: u16,

    /// Internal consensus (Raft) port
    pub raft_port: u16,

    /// Extra flags passed through verbatim
    pub extra_args: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("rqlited"),
            data_dir: PathBuf::from("/var/lib/rqlite"),
            http_port: 4001,
            raft_port: 4002,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Name of the supervised service (pid record, log and reboot entry key)
    pub service_key: String,

    /// Directory holding pid records
    pub run_dir: PathBuf,

    /// Directory holding daemon output logs
    pub log_dir: PathBuf,

    /// Persistent directory for the configuration snapshot boot-time runs read
    pub state_dir: PathBuf,

    /// Crontab-format file holding `@reboot` entries
    pub registry_path: PathBuf,

    /// User column for system cron files (`/etc/cron.d` style); omitted when unset
    pub registry_user: Option<String>,

    /// Delay between stop signals while waiting for a prior instance to exit
    pub stop_poll_interval_ms: u64,

    /// Number of stop checks before giving up
    pub stop_max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            service_key: "rqlite".to_string(),
            run_dir: PathBuf::from("/run/rqsteward"),
            log_dir: PathBuf::from("/var/log/rqsteward"),
            state_dir: PathBuf::from("/var/lib/rqsteward"),
            registry_path: PathBuf::from("/etc/cron.d/rqsteward"),
            registry_user: Some("root".to_string()),
            stop_poll_interval_ms: 1000,
            stop_max_attempts: 30,
        }
    }
}

impl SupervisorConfig {
    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Delay between readiness probes
    pub readiness_interval_ms: u64,

    /// Per-request timeout against the local daemon
    pub request_timeout_ms: u64,

    /// Attempts at listing membership before the pass is abandoned
    pub membership_attempts: u32,

    pub membership_interval_ms: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            readiness_interval_ms: 1000,
            request_timeout_ms: 5000,
            membership_attempts: 5,
            membership_interval_ms: 1000,
        }
    }
}

impl ReclaimConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn membership_interval(&self) -> Duration {
        Duration::from_millis(self.membership_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Append-only log file; `<supervisor.log_dir>/rqsteward.log` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, then apply environment overrides.
    ///
    /// `.json` files (configuration snapshots) are read as JSON, anything
    /// else as TOML. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => config::FileFormat::Json,
            _ => config::FileFormat::Toml,
        };
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.to_path_buf())
                    .format(format)
                    .required(true),
            )
            .add_source(env_source())
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no component could act on safely.
    pub fn validate(&self) -> Result<()> {
        if self.node.ordinal == 0 {
            return Err(Error::InvalidConfig(
                "node.ordinal must be a positive integer".into(),
            ));
        }
        if self.cluster.default_leader_ordinal == 0 {
            return Err(Error::InvalidConfig(
                "cluster.default_leader_ordinal must be a positive integer".into(),
            ));
        }
        if self.node.address.trim().is_empty() {
            return Err(Error::InvalidConfig("node.address cannot be empty".into()));
        }
        if self.cluster.max_join_attempts == 0 {
            return Err(Error::InvalidConfig(
                "cluster.max_join_attempts must be at least 1".into(),
            ));
        }
        if self.daemon.http_port == self.daemon.raft_port {
            return Err(Error::InvalidConfig(format!(
                "daemon.http_port and daemon.raft_port are both {}",
                self.daemon.http_port
            )));
        }
        if self.supervisor.stop_max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "supervisor.stop_max_attempts must be at least 1".into(),
            ));
        }
        if self.reclaim.membership_attempts == 0 {
            return Err(Error::InvalidConfig(
                "reclaim.membership_attempts must be at least 1".into(),
            ));
        }
        validate_service_key(&self.supervisor.service_key)?;
        Ok(())
    }

    /// Where this run's effective configuration is kept for boot-time runs.
    pub fn snapshot_path(&self) -> PathBuf {
        service_file(
            &self.supervisor.state_dir,
            &self.supervisor.service_key,
            "config.json",
        )
    }

    /// Persist the effective configuration, environment overrides included,
    /// so that a run started from the bare boot environment sees the same
    /// settings. Replaced in one rename.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), "configuration snapshot written");
        Ok(())
    }

    /// Coordinator log file, explicit or under the supervisor log directory.
    pub fn log_file(&self) -> PathBuf {
        self.logging
            .file
            .clone()
            .unwrap_or_else(|| self.supervisor.log_dir.join(LOG_FILE_NAME))
    }

    /// Base URL of the local daemon's HTTP API.
    pub fn daemon_url(&self) -> String {
        format!("http://{}:{}", self.node.address, self.daemon.http_port)
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
