//! Per-instance environment files.
//!
//! ```text
//! export PGDATABASE="pgbouncer"
//! export PGPORT="6432"   # mandatory
//! export PGVERSION="14"
//! ```

use std::path::Path;

use super::ConfigError;
use crate::collector::traits::FileSystem;

/// Database PgBouncer exposes its admin console under.
pub const DEFAULT_ADMIN_DATABASE: &str = "pgbouncer";

/// Connection settings read from one env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    pub database: String,
    pub host: Option<String>,
    pub port: String,
    pub version: Option<String>,
}

/// Reads and parses the env file at `path`.
pub fn read_env_file(fs: &impl FileSystem, path: &str) -> Result<EnvFile, ConfigError> {
    let content = fs
        .read_to_string(Path::new(path))
        .map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
    parse_env_file(&content, path)
}

/// Parses env file content. `path` is only used for error messages.
pub fn parse_env_file(content: &str, path: &str) -> Result<EnvFile, ConfigError> {
    let mut database = DEFAULT_ADMIN_DATABASE.to_string();
    let mut host = None;
    let mut port = None;
    let mut version = None;

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.contains("PGDATABASE=") {
            database = env_value(line);
        } else if line.contains("PGHOST=") {
            host = Some(env_value(line));
        } else if line.contains("PGPORT=") {
            port = Some(env_value(line));
        } else if line.contains("PGVERSION=") {
            version = Some(env_value(line));
        }
    }

    let port = port
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ConfigError::MissingPort {
            env_file: path.to_string(),
        })?;

    Ok(EnvFile {
        database,
        host: host.filter(|h| !h.is_empty()),
        port,
        version: version.filter(|v| !v.is_empty()),
    })
}

/// Value after the last `=`, without trailing comment and quotes.
fn env_value(line: &str) -> String {
    let value = line.rsplit('=').next().unwrap_or_default();
    let value = match value.find('#') {
        Some(pos) => &value[..pos],
        None => value,
    };
    unquote(value.trim()).to_string()
}

pub(crate) fn unquote(value: &str) -> &str {
    let value = value.trim_matches('"');
    value.trim_matches('\'')
}
