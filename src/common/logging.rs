//! Tracing setup shared by the binary and ad-hoc tools
//!
//! Runs are usually unattended (triggered at boot), so besides stdout the
//! subscriber appends to a plain-text log file that survives the run.

use crate::common::{Config, SupervisorConfig, LOG_FILE_NAME};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. An explicitly configured log
/// file that cannot be opened is an error; the default one is skipped with a
/// warning so unprivileged invocations still work.
pub fn init_tracing(config: &Config) -> crate::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let path = config.log_file();
    let (file, skipped) = match open_log(&path) {
        Ok(file) => (Some(file), None),
        Err(e) if config.logging.file.is_none() => (None, Some(e)),
        Err(e) => return Err(e.into()),
    };
    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(filter())
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();

    if let Some(e) = skipped {
        tracing::warn!(path = %path.display(), "not logging to file: {}", e);
    }
    Ok(())
}

/// Log file used before any configuration could be read.
pub fn fallback_log_file() -> PathBuf {
    SupervisorConfig::default().log_dir.join(LOG_FILE_NAME)
}

/// Append a failure that happened before the subscriber existed.
///
/// Best effort: the message still goes to the caller's stderr.
pub fn record_startup_failure(path: &Path, message: &str) {
    let written = open_log(path).and_then(|mut file| {
        writeln!(
            file,
            "{} ERROR rqsteward: {}",
            Utc::now().to_rfc3339(),
            message
        )
    });
    if let Err(e) = written {
        eprintln!("cannot record failure in {}: {}", path.display(), e);
    }
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
