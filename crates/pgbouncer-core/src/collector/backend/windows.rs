//! Windows backend: `psql` runs directly through `cmd /c`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use tracing::debug;

use super::{
    ExecutionBackend, PSQL_BINARY_NAME, QueryError, QueryOptions, fetch_server_version, psql_args,
};
use crate::collector::traits::{CommandRunner, FileSystem, Invocation};
use crate::config::{InstanceDescriptor, Settings};

/// Major versions probed, newest first, when no version hint is configured.
pub const SUPPORTED_VERSIONS: &[&str] = &["17", "16", "15", "14", "13", "12"];

/// Installation directories probed on every logical drive.
const PROGRAM_DIRS: &[&str] = &[
    "Program Files\\PostgreSQL",
    "Program Files (x86)\\PostgreSQL",
    "PostgreSQL",
];

/// Runs `psql` without privilege switching.
pub struct WindowsBackend<R, F> {
    runner: R,
    fs: F,
    binary_override: Option<String>,
    binaries: RefCell<HashMap<String, String>>,
}

impl<R: CommandRunner, F: FileSystem> WindowsBackend<R, F> {
    pub fn new(runner: R, fs: F, settings: &Settings) -> Self {
        Self {
            runner,
            fs,
            binary_override: settings.binary_path.clone(),
            binaries: RefCell::new(HashMap::new()),
        }
    }

    fn logical_drives(&self) -> Result<Vec<String>, QueryError> {
        let inv = Invocation::new("wmic")
            .arg("logicaldisk")
            .arg("get")
            .arg("deviceid");
        let out = self.runner.run(&inv).map_err(|e| QueryError::Spawn {
            program: "wmic".to_string(),
            message: e.to_string(),
        })?;
        Ok(parse_logical_drives(&String::from_utf8_lossy(&out)))
    }

    /// Probes every drive and install directory for one major version.
    fn probe_version(&self, drives: &[String], version: &str) -> Option<String> {
        let major = version.split('.').next().unwrap_or(version);
        for drive in drives {
            for dir in PROGRAM_DIRS {
                let candidate = format!(
                    "{}:\\{}\\{}\\bin\\{}.exe",
                    drive, dir, major, PSQL_BINARY_NAME
                );
                if self.fs.is_file(Path::new(&candidate)) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn lookup_binary(&self, instance: &InstanceDescriptor) -> Result<String, QueryError> {
        let drives = self.logical_drives()?;
        let found = match &instance.version_hint {
            Some(version) => self.probe_version(&drives, version),
            None => SUPPORTED_VERSIONS
                .iter()
                .find_map(|v| self.probe_version(&drives, v)),
        };
        found.ok_or_else(|| {
            QueryError::BinaryNotFound(format!(
                "could not determine {} bin and its path",
                PSQL_BINARY_NAME
            ))
        })
    }
}

impl<R: CommandRunner, F: FileSystem> ExecutionBackend for WindowsBackend<R, F> {
    fn run_query(
        &self,
        instance: &InstanceDescriptor,
        command: &str,
        options: &QueryOptions,
    ) -> Result<Vec<u8>, QueryError> {
        let psql = self.resolve_client_binary_path(instance)?;
        let psql_line = format!(
            "\"{}\" -X {} -A -0 -F\"{}\"",
            psql,
            psql_args(instance, options).join(" "),
            options.field_separator
        );
        let line = if options.mixed {
            format!("echo {} | cmd /c \"{}\"", command, psql_line)
        } else {
            format!("\"{} -c \"{}\"\"", psql_line, command)
        };

        let inv = Invocation::new("cmd")
            .arg("/c")
            .arg(line)
            .env("PGPASSFILE", instance.passfile.clone().unwrap_or_default());

        debug!("[{}] {}", instance.name, inv.display());
        self.runner.run(&inv).map_err(|e| QueryError::Spawn {
            program: "cmd".to_string(),
            message: e.to_string(),
        })
    }

    fn resolve_client_binary_path(
        &self,
        instance: &InstanceDescriptor,
    ) -> Result<String, QueryError> {
        if let Some(path) = &self.binary_override {
            return Ok(path.clone());
        }
        if let Some(path) = self.binaries.borrow().get(&instance.name) {
            return Ok(path.clone());
        }
        let path = self.lookup_binary(instance)?;
        self.binaries
            .borrow_mut()
            .insert(instance.name.clone(), path.clone());
        Ok(path)
    }

    fn measure_connection_latency(
        &self,
        instance: &InstanceDescriptor,
    ) -> Result<(String, f64), QueryError> {
        let started = Instant::now();
        let version = fetch_server_version(self, instance)?;
        Ok((version, started.elapsed().as_secs_f64()))
    }
}

/// Drive letters from `wmic logicaldisk get deviceid` output.
fn parse_logical_drives(output: &str) -> Vec<String> {
    let cleaned = output.replace("DeviceID", "");
    let mut parts: Vec<&str> = cleaned.split(':').collect();
    // everything after the last ':' is trailing whitespace
    parts.pop();
    parts
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}
