//! Utility functions for rqsteward

use std::path::{Path, PathBuf};

/// Validate a service key.
///
/// Keys name files under the run and log directories and tag reboot
/// entries, so they are restricted to `[A-Za-z0-9._-]` and cannot start
/// with a dot.
pub fn validate_service_key(key: &str) -> crate::Result<()> {
    if key.is_empty() {
        return Err(crate::Error::InvalidConfig(
            "service key cannot be empty".into(),
        ));
    }

    if key.len() > 64 {
        return Err(crate::Error::InvalidConfig(
            "service key too long (max 64 bytes)".into(),
        ));
    }

    if key.starts_with('.')
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(crate::Error::InvalidConfig(format!(
            "service key contains invalid characters: {:?}",
            key
        )));
    }

    Ok(())
}

/// Quote a word for POSIX `sh`.
///
/// Words made only of unambiguous characters are returned unchanged.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if plain {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Path of a per-service file, e.g. `<dir>/<key>.log`.
pub fn service_file(dir: &Path, service_key: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", service_key, extension))
}
