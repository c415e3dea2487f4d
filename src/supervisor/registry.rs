//! Reboot registration
//!
//! Entries live in a crontab-format file as `@reboot` lines tagged with the
//! service key. Lines without our tag are left untouched. Output of a
//! boot-time run goes to `<log_dir>/<key>.boot.log`, apart from the daemon's
//! own log.

use crate::common::{service_file, validate_service_key, Error, Result};
use crate::coordinator::join::StartCommand;
use std::path::{Path, PathBuf};

const MARKER_PREFIX: &str = "# managed-by=rqsteward service=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootEntry {
    pub service_key: String,
    /// The complete line as written to the registry
    pub line: String,
}

/// Persistent restart registrations, at most one per service key.
pub trait RebootRegistry: Send + Sync {
    /// Register `command` for `service_key`, replacing any prior entry.
    fn upsert(&self, service_key: &str, command: &StartCommand) -> Result<RebootEntry>;

    fn entries(&self) -> Result<Vec<RebootEntry>>;

    /// Drop the entry for `service_key`; returns whether one existed.
    fn remove(&self, service_key: &str) -> Result<bool>;

    fn entry(&self, service_key: &str) -> Result<Option<RebootEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.service_key == service_key))
    }
}

pub struct CronRegistry {
    path: PathBuf,
    /// User column, required by system cron directories
    user: Option<String>,
    log_dir: PathBuf,
}

impl CronRegistry {
    pub fn new(path: &Path, user: Option<String>, log_dir: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            user,
            log_dir: log_dir.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Registry(format!("read {}: {}", self.path.display(), e))),
        }
    }

    /// Replace the file in one rename so readers never see a partial table.
    fn write_lines(&self, lines: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = lines.join("\n");
        // cron ignores a final line without a newline
        if !text.is_empty() {
            text.push('\n');
        }

        let tmp = self.path.with_extension("rqsteward.tmp");
        std::fs::write(&tmp, text)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Registry(format!("write {}: {}", self.path.display(), e)))
    }

    fn render(&self, service_key: &str, command: &StartCommand) -> String {
        let log = service_file(&self.log_dir, service_key, "boot.log");
        let mut line = String::from("@reboot ");
        if let Some(user) = &self.user {
            line.push_str(user);
            line.push(' ');
        }
        line.push_str(&format!(
            "{} >> {} 2>&1 {}{}",
            command.to_shell(),
            crate::common::shell_quote(&log.to_string_lossy()),
            MARKER_PREFIX,
            service_key
        ));
        line
    }
}

/// Service key a registry line belongs to, if it is one of ours.
fn owner(line: &str) -> Option<&str> {
    line.rsplit_once(MARKER_PREFIX)
        .map(|(_, key)| key.trim())
        .filter(|key| !key.is_empty() && !key.contains(char::is_whitespace))
}

impl RebootRegistry for CronRegistry {
    fn upsert(&self, service_key: &str, command: &StartCommand) -> Result<RebootEntry> {
        validate_service_key(service_key)?;
        let mut lines = self.read_lines()?;
        let before = lines.len();
        lines.retain(|line| owner(line) != Some(service_key));
        let replaced = before - lines.len();

        let line = self.render(service_key, command);
        lines.push(line.clone());
        self.write_lines(&lines)?;

        tracing::info!(
            service_key,
            replaced,
            registry = %self.path.display(),
            "reboot entry registered"
        );
        Ok(RebootEntry {
            service_key: service_key.to_string(),
            line,
        })
    }

    fn entries(&self) -> Result<Vec<RebootEntry>> {
        Ok(self
            .read_lines()?
            .into_iter()
            .filter_map(|line| {
                owner(&line).map(|key| RebootEntry {
                    service_key: key.to_string(),
                    line: line.clone(),
                })
            })
            .collect())
    }

    fn remove(&self, service_key: &str) -> Result<bool> {
        let mut lines = self.read_lines()?;
        let before = lines.len();
        lines.retain(|line| owner(line) != Some(service_key));
        if lines.len() == before {
            return Ok(false);
        }
        self.write_lines(&lines)?;
        Ok(true)
    }
}
