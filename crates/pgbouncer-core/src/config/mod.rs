//! `pgbouncer.cfg` resolution.
//!
//! ```text
//! DBUSER=postgres
//! PG_BINARY_PATH=/usr/bin/psql
//! INSTANCE=/home/postgres/db1.env:USER_NAME:/PATH/TO/.pgpass:
//! INSTANCE=/home/postgres/db2.env:USER_NAME:/PATH/TO/.pgpass:INSTANCE_NAME
//! ```
//!
//! Resolution happens in three steps: the text is tokenised into an ordered
//! list of [`ConfigEvent`]s, scalar events are folded over the default
//! [`Settings`] (last occurrence wins), and finally every `INSTANCE` event is
//! materialised into an [`InstanceDescriptor`] by reading its env file.
//! Without any resolvable instance a single `default` instance is built from
//! the settings, so there is always something to collect.

mod env_file;
mod platform;

pub use env_file::{DEFAULT_ADMIN_DATABASE, EnvFile, parse_env_file, read_env_file};
pub use platform::{CONFIG_DIR_ENV, CONFIG_FILE_NAME, HostOs};

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::traits::FileSystem;
use env_file::unquote;

/// Name of the instance synthesised when nothing else is configured.
pub const DEFAULT_INSTANCE_NAME: &str = "default";

pub const DEFAULT_PORT: &str = "6432";

/// Error type for configuration resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A file could not be read.
    Io { path: String, message: String },
    /// The env file of an instance lacks `PGPORT`.
    MissingPort { env_file: String },
    /// An `INSTANCE=` value has the wrong number of fields.
    InvalidInstance { line: String },
    /// A second instance resolved to a name already in use.
    DuplicateInstance { name: String, env_file: String },
    /// The host OS has no execution backend.
    UnsupportedOs(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, message } => write!(f, "cannot read {}: {}", path, message),
            ConfigError::MissingPort { env_file } => {
                write!(f, "PGPORT is not specified in {}", env_file)
            }
            ConfigError::InvalidInstance { line } => {
                write!(f, "invalid INSTANCE entry: {}", line)
            }
            ConfigError::DuplicateInstance { name, env_file } => {
                write!(f, "instance name {} of {} is already in use", name, env_file)
            }
            ConfigError::UnsupportedOs(os) => {
                write!(f, "The OS type ({}) is not yet implemented.", os)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// One monitored PgBouncer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceDescriptor {
    /// Unique name, used as the `[[[name]]]` marker.
    pub name: String,
    /// Database user passed to `psql -U`.
    pub db_user: String,
    pub host: Option<String>,
    pub port: String,
    pub database: String,
    pub passfile: Option<String>,
    /// Server major version, used to locate a version specific `psql`.
    pub version_hint: Option<String>,
}

/// Global settings after folding all scalar keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// OS account `psql` runs as (`DBUSER`).
    pub os_user: String,
    /// Explicit `psql` binary (`PG_BINARY_PATH`).
    pub binary_path: Option<String>,
    pub database: String,
    pub host: Option<String>,
    pub port: String,
    pub version: Option<String>,
    pub passfile: String,
}

impl Settings {
    /// Built-in defaults for the given OS account.
    pub fn defaults(os_user: impl Into<String>) -> Self {
        Self {
            os_user: os_user.into(),
            binary_path: None,
            database: DEFAULT_ADMIN_DATABASE.to_string(),
            host: None,
            port: DEFAULT_PORT.to_string(),
            version: None,
            passfile: String::new(),
        }
    }

    /// Returns the settings with one scalar event applied.
    pub fn apply(self, event: &ConfigEvent) -> Self {
        match event {
            ConfigEvent::OsUser(v) => Self {
                os_user: v.clone(),
                ..self
            },
            ConfigEvent::BinaryPath(v) => Self {
                binary_path: Some(v.clone()),
                ..self
            },
            ConfigEvent::Database(v) => Self {
                database: v.clone(),
                ..self
            },
            ConfigEvent::Host(v) => Self {
                host: Some(v.clone()),
                ..self
            },
            ConfigEvent::Port(v) => Self {
                port: v.clone(),
                ..self
            },
            ConfigEvent::Version(v) => Self {
                version: Some(v.clone()),
                ..self
            },
            ConfigEvent::PassFile(v) => Self {
                passfile: v.clone(),
                ..self
            },
            ConfigEvent::Instance(_) => self,
        }
    }

    /// The instance used when no `INSTANCE` entry resolves.
    pub fn default_instance(&self) -> InstanceDescriptor {
        InstanceDescriptor {
            name: DEFAULT_INSTANCE_NAME.to_string(),
            db_user: self.os_user.clone(),
            host: self.host.clone(),
            port: self.port.clone(),
            database: self.database.clone(),
            passfile: non_empty(&self.passfile),
            version_hint: self.version.clone(),
        }
    }
}

/// Fields of one `INSTANCE=` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEntry {
    pub env_file: String,
    pub db_user: String,
    pub passfile: String,
    /// Explicit name; empty in the legacy three-field form.
    pub name: String,
}

impl InstanceEntry {
    /// Splits an `INSTANCE=` value on the OS specific separator.
    pub fn parse(value: &str, separator: char) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = value.split(separator).collect();
        let (env_file, db_user, passfile, name) = match fields.as_slice() {
            [env, user, pass] => (*env, *user, *pass, ""),
            [env, user, pass, name] => (*env, *user, *pass, *name),
            _ => {
                return Err(ConfigError::InvalidInstance {
                    line: value.to_string(),
                });
            }
        };
        Ok(Self {
            env_file: env_file.trim().to_string(),
            db_user: db_user.trim().to_string(),
            passfile: passfile.trim().to_string(),
            name: name.trim().to_string(),
        })
    }

    /// Explicit name, or the env file's base name up to the first dot.
    pub fn instance_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        let base = self.env_file.rsplit(['/', '\\']).next().unwrap_or_default();
        base.split('.').next().unwrap_or_default().to_string()
    }
}

/// One recognised line of `pgbouncer.cfg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    OsUser(String),
    BinaryPath(String),
    Database(String),
    Host(String),
    Port(String),
    Version(String),
    PassFile(String),
    Instance(InstanceEntry),
}

/// Tokenises config text into events, in file order.
///
/// Blank lines, `#` comments and unknown keys are skipped. Malformed
/// `INSTANCE` values are returned as errors in place.
pub fn parse_events(text: &str, separator: char) -> Vec<Result<ConfigEvent, ConfigError>> {
    let mut events = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim()).trim_end().to_string();
        let event = match key.trim() {
            "DBUSER" => ConfigEvent::OsUser(value),
            "PG_BINARY_PATH" => ConfigEvent::BinaryPath(value),
            "PGDATABASE" => ConfigEvent::Database(value),
            "PGHOST" => ConfigEvent::Host(value),
            "PGPORT" => ConfigEvent::Port(value),
            "PGVERSION" => ConfigEvent::Version(value),
            "PGPASSFILE" => ConfigEvent::PassFile(value),
            "INSTANCE" => match InstanceEntry::parse(&value, separator) {
                Ok(entry) => ConfigEvent::Instance(entry),
                Err(e) => {
                    events.push(Err(e));
                    continue;
                }
            },
            other => {
                debug!("Ignoring unknown config key {}", other);
                continue;
            }
        };
        events.push(Ok(event));
    }
    events
}

/// Outcome of resolving a configuration.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub settings: Settings,
    /// Never empty.
    pub instances: Vec<InstanceDescriptor>,
    /// Instance entries that could not be resolved.
    pub errors: Vec<ConfigError>,
}

/// Resolves config text into settings and instances.
pub fn resolve(
    text: &str,
    separator: char,
    defaults: Settings,
    fs: &impl FileSystem,
) -> Resolution {
    let mut errors = Vec::new();
    let mut entries = Vec::new();
    let mut settings = defaults;

    for event in parse_events(text, separator) {
        match event {
            Ok(ConfigEvent::Instance(entry)) => entries.push(entry),
            Ok(scalar) => settings = settings.apply(&scalar),
            Err(e) => errors.push(e),
        }
    }

    let mut instances = Vec::with_capacity(entries.len());
    for entry in &entries {
        // names double as stream markers and must be unique
        let resolved = resolve_instance(entry, &settings, fs).and_then(|instance| {
            if instances
                .iter()
                .any(|known: &InstanceDescriptor| known.name == instance.name)
            {
                Err(ConfigError::DuplicateInstance {
                    name: instance.name,
                    env_file: entry.env_file.clone(),
                })
            } else {
                Ok(instance)
            }
        });
        match resolved {
            Ok(instance) => instances.push(instance),
            Err(e) => {
                warn!("Skipping instance {}: {}", entry.instance_name(), e);
                errors.push(e);
            }
        }
    }

    if instances.is_empty() {
        debug!("No instances configured, using defaults");
        instances.push(settings.default_instance());
    }

    Resolution {
        settings,
        instances,
        errors,
    }
}

/// Reads `config_path` and resolves it.
///
/// An unreadable config file is not an error: collection then proceeds
/// with the default instance only.
pub fn load(
    config_path: &Path,
    separator: char,
    defaults: Settings,
    fs: &impl FileSystem,
) -> Resolution {
    let text = match fs.read_to_string(config_path) {
        Ok(text) => text,
        Err(e) => {
            debug!("Cannot read {}: {}", config_path.display(), e);
            String::new()
        }
    };
    resolve(&text, separator, defaults, fs)
}

fn resolve_instance(
    entry: &InstanceEntry,
    settings: &Settings,
    fs: &impl FileSystem,
) -> Result<InstanceDescriptor, ConfigError> {
    let env = read_env_file(fs, &entry.env_file)?;
    let db_user = if entry.db_user.is_empty() {
        settings.os_user.clone()
    } else {
        entry.db_user.clone()
    };
    Ok(InstanceDescriptor {
        name: entry.instance_name(),
        db_user,
        host: env.host,
        port: env.port,
        database: env.database,
        passfile: non_empty(&entry.passfile),
        version_hint: env.version,
    })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
