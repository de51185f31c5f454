//! Host operating system detection and the per-OS configuration defaults.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::ConfigError;
use crate::collector::traits::{CommandRunner, Invocation};

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "pgbouncer.cfg";

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "MK_CONFDIR";

/// OS accounts probed, in order, for the default `DBUSER` on Linux.
const LINUX_USER_CANDIDATES: &[&str] = &["pgsql", "postgres"];

const FALLBACK_OS_USER: &str = "postgres";

/// Operating systems the agent knows how to run `psql` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    Windows,
}

impl HostOs {
    /// Detects the OS this binary was built for.
    pub fn detect() -> Result<Self, ConfigError> {
        Self::from_name(std::env::consts::OS)
    }

    /// Maps a `std::env::consts::OS` style name to a supported OS.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "linux" => Ok(HostOs::Linux),
            "windows" => Ok(HostOs::Windows),
            other => Err(ConfigError::UnsupportedOs(other.to_string())),
        }
    }

    pub fn default_config_dir(self) -> &'static str {
        match self {
            HostOs::Linux => "/etc/check_mk",
            HostOs::Windows => "c:\\ProgramData\\checkmk\\agent\\config",
        }
    }

    /// Separator between the fields of an `INSTANCE=` value.
    ///
    /// Windows paths contain `:`, so Windows uses `|`.
    pub fn instance_separator(self) -> char {
        match self {
            HostOs::Linux => ':',
            HostOs::Windows => '|',
        }
    }

    /// Full path of `pgbouncer.cfg`, honouring the directory override.
    pub fn config_path(self, dir_override: Option<&str>) -> PathBuf {
        let dir = dir_override
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.default_config_dir());
        match self {
            HostOs::Linux => PathBuf::from(dir).join(CONFIG_FILE_NAME),
            HostOs::Windows => {
                PathBuf::from(format!("{}\\{}", dir.trim_end_matches('\\'), CONFIG_FILE_NAME))
            }
        }
    }

    /// OS account that owns the database tooling.
    ///
    /// On Linux the first existing account of `pgsql`, `postgres` wins.
    pub fn default_os_user(self, runner: &impl CommandRunner) -> String {
        if self == HostOs::Windows {
            return FALLBACK_OS_USER.to_string();
        }
        for candidate in LINUX_USER_CANDIDATES {
            if runner.succeeds(&Invocation::new("id").arg(*candidate)) {
                debug!("Default database OS user: {}", candidate);
                return candidate.to_string();
            }
        }
        warn!(
            "Could not determine postgres user, using \"{}\" as default",
            FALLBACK_OS_USER
        );
        FALLBACK_OS_USER.to_string()
    }
}
