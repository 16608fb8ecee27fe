//! Runner command files
//!
//! The CI runner exposes append-only files (`GITHUB_STATE`, `GITHUB_OUTPUT`)
//! that accept `key<<DELIMITER` blocks. The delimiter is random per write and
//! regenerated if the value happens to contain it.

use std::io::Write;
use std::path::Path;
use tracing::debug;

const DELIMITER_PREFIX: &str = "ghadelimiter_";

fn delimiter() -> String {
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(24)
        .collect();
    format!("{}{}", DELIMITER_PREFIX, suffix)
}

/// Format one `key<<DELIMITER` block
pub fn format_entry(key: &str, value: &str) -> String {
    let mut delim = delimiter();
    while key.contains(&delim) || value.contains(&delim) {
        delim = delimiter();
    }
    format!("{key}<<{delim}\n{value}\n{delim}\n")
}

/// Append one entry to a runner command file, creating it if needed
pub fn append_command_file(path: &Path, key: &str, value: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(format_entry(key, value).as_bytes())?;
    file.flush()?;
    debug!("Appended '{}' to {}", key, path.display());
    Ok(())
}
