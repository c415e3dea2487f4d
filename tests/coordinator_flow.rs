//! End-to-end coordinator runs with a recording supervisor and a fake daemon API

mod common;

use async_trait::async_trait;
use common::{spawn_daemon, FakeDaemon};
use rqsteward::coordinator::{
    Coordinator, HttpClusterClient, RebootTarget, Role, SkipReason, StartCommand, StartMode,
};
use rqsteward::supervisor::{CronRegistry, RebootRegistry, Supervisor};
use rqsteward::{Config, Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Supervisor that records instead of spawning.
#[derive(Default)]
struct RecordingSupervisor {
    stuck: bool,
    stops: Mutex<Vec<String>>,
    starts: Mutex<Vec<StartCommand>>,
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    async fn start(&self, command: &StartCommand, _service_key: &str) -> Result<u32> {
        let mut starts = self.starts.lock().unwrap();
        starts.push(command.clone());
        Ok(1000 + starts.len() as u32)
    }

    async fn stop(&self, service_key: &str) -> Result<()> {
        self.stops.lock().unwrap().push(service_key.to_string());
        if self.stuck {
            return Err(Error::SupervisionTimeout {
                service_key: service_key.to_string(),
                pid: 999,
                attempts: 30,
            });
        }
        Ok(())
    }

    fn is_running(&self, _service_key: &str) -> Result<bool> {
        Ok(!self.starts.lock().unwrap().is_empty())
    }
}

fn config(ordinal: u64, leader: u64, join: Option<&str>, http_port: u16, dir: &TempDir) -> Config {
    let join = join
        .map(|j| format!("join_address = \"{}\"", j))
        .unwrap_or_default();
    Config::from_toml(&format!(
        r#"
        [node]
        ordinal = {ordinal}
        address = "127.0.0.1"

        [cluster]
        default_leader_ordinal = {leader}
        {join}

        [daemon]
        http_port = {http_port}
        raft_port = {raft_port}

        [supervisor]
        registry_path = "{registry}"
        log_dir = "{log}"
        state_dir = "{state}"

        [reclaim]
        readiness_interval_ms = 10
        membership_interval_ms = 10
        "#,
        raft_port = http_port.wrapping_add(1),
        registry = dir.path().join("cron").display(),
        log = dir.path().join("log").display(),
        state = dir.path().join("state").display(),
    ))
    .unwrap()
}

fn coordinator(
    config: Config,
    supervisor: RecordingSupervisor,
    dir: &TempDir,
) -> Coordinator<RecordingSupervisor, CronRegistry, HttpClusterClient> {
    let registry = CronRegistry::new(&dir.path().join("cron"), None, &dir.path().join("log"));
    let api = HttpClusterClient::new(config.daemon_url(), Duration::from_secs(2)).unwrap();
    let reboot = RebootTarget::new("/usr/local/bin/rqsteward");
    Coordinator::new(config, supervisor, registry, api, reboot)
}

#[tokio::test]
async fn test_leader_run_launches_registers_and_reclaims() {
    let dir = TempDir::new().unwrap();
    let daemon = Arc::new(FakeDaemon {
        not_ready_for: 2,
        ..FakeDaemon::with_members(&[2, 3, 4, 5, 6])
    });
    let addr = spawn_daemon(daemon.clone()).await;

    let coord = coordinator(
        config(5, 5, None, addr.port(), &dir),
        RecordingSupervisor::default(),
        &dir,
    );
    let report = coord.run().await.unwrap();

    assert_eq!(report.role, Role::Leader);
    assert_eq!(report.command.mode, StartMode::Bootstrap);
    assert_eq!(*coord.supervisor().stops.lock().unwrap(), vec!["rqlite"]);
    assert_eq!(coord.supervisor().starts.lock().unwrap().len(), 1);

    let entry = coord.registry().entry("rqlite").unwrap().unwrap();
    assert_eq!(entry.line, report.reboot_entry);
    let snapshot = coord.config().snapshot_path();
    assert!(entry.line.contains(&format!(
        "/usr/local/bin/rqsteward --config {} run",
        snapshot.display()
    )));
    assert!(snapshot.exists());

    let reclaim = report.reclaim.unwrap();
    assert_eq!(reclaim.evicted, vec![2, 3, 4]);
    assert_eq!(reclaim.retained, vec![5, 6]);
    assert_eq!(daemon.removed(), vec!["2", "3", "4"]);
}

#[tokio::test]
async fn test_follower_run_joins_and_skips_reclaim() {
    let dir = TempDir::new().unwrap();
    let daemon = Arc::new(FakeDaemon::with_members(&[1, 7]));
    let addr = spawn_daemon(daemon.clone()).await;

    let coord = coordinator(
        config(7, 1, Some("10.0.0.1:4002"), addr.port(), &dir),
        RecordingSupervisor::default(),
        &dir,
    );
    let report = coord.run().await.unwrap();

    assert_eq!(report.role, Role::Follower);
    assert_eq!(
        report.command.mode,
        StartMode::Join {
            target: "10.0.0.1:4002".into(),
            max_attempts: 1000
        }
    );
    assert!(report.reclaim.is_none());
    assert!(daemon.removed().is_empty());
    assert_eq!(daemon.readyz_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // A standalone reclaim on a follower is a no-op too.
    assert_eq!(coord.reclaim().await.skipped, Some(SkipReason::NotLeader));
}

#[tokio::test]
async fn test_follower_without_join_address_aborts_before_launch() {
    let dir = TempDir::new().unwrap();
    let coord = coordinator(
        config(7, 1, None, 4001, &dir),
        RecordingSupervisor::default(),
        &dir,
    );

    let err = coord.run().await.unwrap_err();
    assert!(matches!(err, Error::JoinConfiguration { ordinal: 7, .. }), "got {:?}", err);
    assert!(coord.supervisor().stops.lock().unwrap().is_empty());
    assert!(coord.supervisor().starts.lock().unwrap().is_empty());
    assert!(coord.registry().entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_supervision_timeout_aborts_before_registration() {
    let dir = TempDir::new().unwrap();
    let coord = coordinator(
        config(1, 1, None, 4001, &dir),
        RecordingSupervisor {
            stuck: true,
            ..Default::default()
        },
        &dir,
    );

    let err = coord.run().await.unwrap_err();
    assert!(matches!(err, Error::SupervisionTimeout { .. }));
    assert!(coord.supervisor().starts.lock().unwrap().is_empty());
    assert!(coord.registry().entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_replaces_reboot_entry() {
    let dir = TempDir::new().unwrap();
    let daemon = Arc::new(FakeDaemon {
        failing_removals: HashSet::from([1]),
        ..FakeDaemon::with_members(&[1, 2])
    });
    let addr = spawn_daemon(daemon.clone()).await;

    let coord = coordinator(
        config(2, 2, None, addr.port(), &dir),
        RecordingSupervisor::default(),
        &dir,
    );
    let first = coord.run().await.unwrap();
    let second = coord.run().await.unwrap();

    // Eviction failure is reported, never fatal, and retried only by a new run.
    assert_eq!(first.reclaim.unwrap().failed, vec![1]);
    assert_eq!(second.reclaim.unwrap().failed, vec![1]);
    assert_eq!(coord.registry().entries().unwrap().len(), 1);
    assert_eq!(coord.supervisor().stops.lock().unwrap().len(), 2);
}

#[test]
fn test_plan_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let coord = coordinator(
        config(7, 1, Some("10.0.0.1:4002"), 4001, &dir),
        RecordingSupervisor::default(),
        &dir,
    );
    let plan = coord.plan().unwrap();
    assert_eq!(plan.role, Role::Follower);
    assert_eq!(plan.command.join_target(), Some("10.0.0.1:4002"));
    assert!(coord.supervisor().stops.lock().unwrap().is_empty());
    assert!(!dir.path().join("cron").exists());
    assert!(!coord.config().snapshot_path().exists());
}

#[tokio::test]
async fn test_boot_entry_reproduces_environment_overrides() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("rqsteward.toml");
    std::fs::write(
        &file,
        format!(
            r#"
            [cluster]
            default_leader_ordinal = 1
            join_address = "10.0.0.1:4002"

            [supervisor]
            registry_path = "{registry}"
            log_dir = "{log}"
            state_dir = "{state}"
            "#,
            registry = dir.path().join("cron").display(),
            log = dir.path().join("log").display(),
            state = dir.path().join("state").display(),
        ),
    )
    .unwrap();

    // Identity supplied only through the environment, as provisioning does.
    std::env::set_var("RQSTEWARD_NODE__ORDINAL", "3");
    std::env::set_var("RQSTEWARD_NODE__ADDRESS", "10.0.0.3");
    let effective = Config::load(&file);
    std::env::remove_var("RQSTEWARD_NODE__ORDINAL");
    std::env::remove_var("RQSTEWARD_NODE__ADDRESS");
    let effective = effective.unwrap();
    assert_eq!(effective.node.ordinal, 3);

    let coord = coordinator(effective.clone(), RecordingSupervisor::default(), &dir);
    let report = coord.run().await.unwrap();

    // The boot environment has no overrides; the registered command must
    // still resolve to the same configuration.
    assert!(Config::load(&file).is_err());
    let snapshot = effective.snapshot_path();
    assert!(report
        .reboot_entry
        .contains(&format!("--config {} run", snapshot.display())));
    assert_eq!(Config::load(&snapshot).unwrap(), effective);
}
