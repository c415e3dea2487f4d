//! Error types for rqsteward

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Config Errors ===
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Join configuration error for node {ordinal}: {reason}")]
    JoinConfiguration { ordinal: u64, reason: String },

    // === Supervision Errors ===
    #[error("Supervision timeout: {service_key} (pid {pid}) alive after {attempts} stop attempts")]
    SupervisionTimeout {
        service_key: String,
        pid: u32,
        attempts: u32,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reboot registry error: {0}")]
    Registry(String),

    #[error("Gave up waiting for {what} after {attempts} attempts: {last_error}")]
    PollExhausted {
        what: String,
        attempts: u32,
        last_error: String,
    },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unexpected status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("Malformed response: {0}")]
    Decode(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Does this error abort a coordinator run?
    ///
    /// Network errors are handled where they happen (retried or logged);
    /// everything else stops the run before any further side effect.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Http(_)
                | Error::ConnectionFailed(_)
                | Error::UnexpectedStatus { .. }
                | Error::Decode(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            Error::Decode(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
