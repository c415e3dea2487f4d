//! Common utilities and types shared across rqsteward

pub mod config;
pub mod error;
pub mod logging;
pub mod poll;
pub mod utils;

pub use self::config::{
    ClusterConfig, Config, DaemonConfig, LoggingConfig, NodeIdentity, ReclaimConfig,
    SupervisorConfig, DEFAULT_MAX_JOIN_ATTEMPTS, LOG_FILE_NAME,
};
pub use error::{Error, Result};
pub use poll::{poll_until, PollBound, PollPolicy};
pub use utils::{service_file, shell_quote, validate_service_key};
