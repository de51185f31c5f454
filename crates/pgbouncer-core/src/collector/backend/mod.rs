//! OS-specific execution of admin console commands through `psql`.
//!
//! Both variants implement [`ExecutionBackend`]; [`select_backend`] picks one
//! from the detected [`HostOs`] once at startup. They share no state, only
//! the argument builder below.
//!
//! Every query asks `psql` for unaligned output (`-A`), a field separator
//! (`-F`) and NUL row terminators (`-0`), so a line break inside a field can
//! never be mistaken for a row break.

mod linux;
mod windows;

pub use linux::LinuxBackend;
pub use windows::WindowsBackend;

use crate::collector::sanitize::sanitize;
use crate::collector::traits::{CommandRunner, FileSystem};
use crate::config::{HostOs, InstanceDescriptor, Settings};

/// Base name of the PostgreSQL client binary.
pub const PSQL_BINARY_NAME: &str = "psql";

/// Error type for query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The external program could not be started.
    Spawn { program: String, message: String },
    /// The instance returned no data (connection failed).
    NoData { instance: String },
    /// No usable `psql` binary was found.
    BinaryNotFound(String),
    /// Output did not have the expected shape.
    InvalidOutput(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Spawn { program, message } => {
                write!(f, "failed to run {}: {}", program, message)
            }
            QueryError::NoData { instance } => {
                write!(f, "psql connection to {} returned with no data", instance)
            }
            QueryError::BinaryNotFound(msg) => write!(f, "psql binary not found: {}", msg),
            QueryError::InvalidOutput(msg) => write!(f, "unexpected psql output: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

/// How `psql` is asked to format a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Additional `psql` arguments placed before the connection arguments.
    pub extra_args: Vec<String>,
    pub field_separator: char,
    /// `-q`
    pub quiet: bool,
    /// `-t`: suppress the header row.
    pub rows_only: bool,
    /// Pipe the command through stdin instead of passing `-c`.
    ///
    /// Needed for meta commands mixed with SQL and for command text that is
    /// unsafe to embed in a shell argument.
    pub mixed: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            extra_args: Vec::new(),
            field_separator: ';',
            quiet: true,
            rows_only: true,
            mixed: false,
        }
    }
}

impl QueryOptions {
    /// Keeps the header row and turns off the `(N rows)` footer.
    pub fn tabular() -> Self {
        Self {
            extra_args: vec!["-P".to_string(), "footer=off".to_string()],
            rows_only: false,
            ..Self::default()
        }
    }

    pub fn mixed(mut self) -> Self {
        self.mixed = true;
        self
    }
}

/// Capability set of an OS specific `psql` runner.
pub trait ExecutionBackend {
    /// Runs one admin command against `instance` and returns raw stdout.
    fn run_query(
        &self,
        instance: &InstanceDescriptor,
        command: &str,
        options: &QueryOptions,
    ) -> Result<Vec<u8>, QueryError>;

    /// Locates the `psql` binary used for `instance`.
    fn resolve_client_binary_path(&self, instance: &InstanceDescriptor)
    -> Result<String, QueryError>;

    /// Queries the server version and measures how long that took.
    ///
    /// Doubles as the connectivity probe: an unreachable instance yields
    /// [`QueryError::NoData`].
    fn measure_connection_latency(
        &self,
        instance: &InstanceDescriptor,
    ) -> Result<(String, f64), QueryError>;
}

/// Creates the backend for `os`.
pub fn select_backend<'a, R, F>(
    os: HostOs,
    settings: &Settings,
    runner: R,
    fs: F,
) -> Box<dyn ExecutionBackend + 'a>
where
    R: CommandRunner + 'a,
    F: FileSystem + 'a,
{
    match os {
        HostOs::Linux => Box::new(LinuxBackend::new(runner, fs, settings)),
        HostOs::Windows => Box::new(WindowsBackend::new(runner, fs, settings)),
    }
}

/// Connection arguments shared by both variants.
pub(crate) fn psql_args(instance: &InstanceDescriptor, options: &QueryOptions) -> Vec<String> {
    let mut args = options.extra_args.clone();
    args.extend(["-U".to_string(), instance.db_user.clone()]);
    args.extend(["-d".to_string(), instance.database.clone()]);
    if let Some(host) = &instance.host {
        args.extend(["-h".to_string(), host.clone()]);
    }
    args.extend(["-p".to_string(), instance.port.clone()]);
    if options.quiet {
        args.push("-q".to_string());
    }
    if options.rows_only {
        args.push("-t".to_string());
    }
    args
}

/// Runs `SHOW VERSION;` and extracts the version number.
///
/// `PgBouncer 1.21.0` yields `1.21.0`.
pub(crate) fn fetch_server_version<B: ExecutionBackend + ?Sized>(
    backend: &B,
    instance: &InstanceDescriptor,
) -> Result<String, QueryError> {
    let raw = backend.run_query(instance, "SHOW VERSION;", &QueryOptions::default())?;
    let out = sanitize(&raw);
    if out.is_empty() {
        return Err(QueryError::NoData {
            instance: instance.name.clone(),
        });
    }
    out.split_whitespace()
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| QueryError::InvalidOutput(out.clone()))
}

/// Formats a latency the way the transport carries it.
pub fn format_latency(seconds: f64) -> String {
    format!("{:.3}", seconds)
}
