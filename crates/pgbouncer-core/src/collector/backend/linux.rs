//! Linux backend: `psql` runs as the database OS account via `su`.

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

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: f64 = 100.0;

const SELF_STAT_PATH: &str = "/proc/self/stat";

/// Runs `psql` through `su - <os_user> -c "..."`.
pub struct LinuxBackend<R, F> {
    runner: R,
    fs: F,
    os_user: String,
    binary_override: Option<String>,
    /// Resolved `psql` path per instance name.
    binaries: RefCell<HashMap<String, String>>,
}

impl<R: CommandRunner, F: FileSystem> LinuxBackend<R, F> {
    pub fn new(runner: R, fs: F, settings: &Settings) -> Self {
        Self {
            runner,
            fs,
            os_user: settings.os_user.clone(),
            binary_override: settings.binary_path.clone(),
            binaries: RefCell::new(HashMap::new()),
        }
    }

    /// `psql` from `PATH`.
    ///
    /// Only a fallback: a generic binary may not find the right UNIX socket.
    fn binary_from_path(&self) -> Result<String, QueryError> {
        let inv = Invocation::new("which").arg(PSQL_BINARY_NAME);
        let out = self.runner.run(&inv).map_err(|e| QueryError::Spawn {
            program: "which".to_string(),
            message: e.to_string(),
        })?;
        let path = String::from_utf8_lossy(&out).trim().to_string();
        if path.is_empty() {
            return Err(QueryError::BinaryNotFound(format!(
                "could not determine {} executable",
                PSQL_BINARY_NAME
            )));
        }
        Ok(path)
    }

    fn lookup_binary(&self, instance: &InstanceDescriptor) -> Result<String, QueryError> {
        let Some(version) = &instance.version_hint else {
            return self.binary_from_path();
        };
        let candidate = format!(
            "/{}/{}/bin/{}",
            instance.database, version, PSQL_BINARY_NAME
        );
        if self.fs.is_file(Path::new(&candidate)) {
            Ok(candidate)
        } else {
            debug!("{} does not exist, falling back to PATH", candidate);
            self.binary_from_path()
        }
    }

    /// Children user+system CPU ticks of this process.
    fn children_cpu_ticks(&self) -> Option<u64> {
        let content = self.fs.read_to_string(Path::new(SELF_STAT_PATH)).ok()?;
        parse_children_cpu_ticks(&content)
    }
}

impl<R: CommandRunner, F: FileSystem> ExecutionBackend for LinuxBackend<R, F> {
    fn run_query(
        &self,
        instance: &InstanceDescriptor,
        command: &str,
        options: &QueryOptions,
    ) -> Result<Vec<u8>, QueryError> {
        let psql = self.resolve_client_binary_path(instance)?;
        let passfile = instance.passfile.clone().unwrap_or_default();

        let mut shell = format!(
            "PGPASSFILE={} {} -X {} -A0 -F'{}'",
            passfile,
            psql,
            psql_args(instance, options).join(" "),
            options.field_separator
        );
        if !options.mixed {
            shell.push_str(&format!(" -c \"{}\"", command));
        }

        let mut inv = Invocation::new("su")
            .arg("-")
            .arg(&self.os_user)
            .arg("-c")
            .arg(shell)
            .env("PGPASSFILE", passfile);
        if options.mixed {
            inv = inv.stdin(command);
        }

        debug!("[{}] {}", instance.name, inv.display());
        self.runner.run(&inv).map_err(|e| QueryError::Spawn {
            program: "su".to_string(),
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

    /// Latency is the CPU time the query's child processes consumed.
    ///
    /// Falls back to wall-clock time when `/proc/self/stat` is unreadable.
    fn measure_connection_latency(
        &self,
        instance: &InstanceDescriptor,
    ) -> Result<(String, f64), QueryError> {
        // a first-time `which psql` must not count towards the latency
        self.resolve_client_binary_path(instance)?;
        let ticks_before = self.children_cpu_ticks();
        let started = Instant::now();
        let version = fetch_server_version(self, instance)?;
        let elapsed = started.elapsed().as_secs_f64();

        let seconds = match (ticks_before, self.children_cpu_ticks()) {
            (Some(before), Some(after)) => after.saturating_sub(before) as f64 / CLK_TCK,
            _ => elapsed,
        };
        Ok((version, seconds))
    }
}

/// Sum of `cutime` and `cstime` from `/proc/[pid]/stat` content.
fn parse_children_cpu_ticks(content: &str) -> Option<u64> {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let close_paren = content.rfind(')')?;
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    // fields[0] is field 3 (state); cutime and cstime are fields 16 and 17
    let cutime: u64 = fields.get(13)?.parse().ok()?;
    let cstime: u64 = fields.get(14)?.parse().ok()?;
    Some(cutime + cstime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::backend::test_support::instance;
    use crate::collector::mock::{MockFs, MockRunner};

    const STAT: &str = "4242 (pgbouncer agent) S 1 4242 4242 0 -1 4194304 100 0 0 0 10 5 7 3 20 0 1 0 12345 12345678 100";

    fn settings() -> Settings {
        Settings::defaults("postgres")
    }

    #[test]
    fn test_run_query_builds_su_command() {
        let runner = MockRunner::new().respond(&["which psql"], b"/usr/bin/psql\n");
        let backend = LinuxBackend::new(&runner, MockFs::new(), &settings());

        backend
            .run_query(&instance("db1", "6432"), "SHOW POOLS;", &QueryOptions::tabular())
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        let su = &calls[1];
        assert_eq!(su.program, "su");
        assert_eq!(su.args[..3], ["-", "postgres", "-c"]);
        assert_eq!(
            su.args[3],
            "PGPASSFILE=/home/postgres/.pgpass /usr/bin/psql -X -P footer=off -U monitor -d pgbouncer -p 6432 -q -A0 -F';' -c \"SHOW POOLS;\""
        );
        assert_eq!(
            su.env,
            vec![("PGPASSFILE".to_string(), "/home/postgres/.pgpass".to_string())]
        );
        assert_eq!(su.stdin, None);
    }

    #[test]
    fn test_run_query_mixed_pipes_command() {
        let runner = MockRunner::new();
        let settings = Settings {
            binary_path: Some("/opt/psql".into()),
            ..settings()
        };
        let backend = LinuxBackend::new(&runner, MockFs::new(), &settings);
        let options = QueryOptions::default().mixed();

        backend
            .run_query(&instance("db1", "6432"), "\\x\nSHOW LISTS;", &options)
            .unwrap();

        let su = &runner.calls()[0];
        assert!(!su.args[3].contains("-c"));
        assert!(su.args[3].ends_with("-A0 -F';'"));
        assert_eq!(su.stdin.as_deref(), Some("\\x\nSHOW LISTS;"));
    }

    #[test]
    fn test_binary_prefers_versioned_path() {
        let runner = MockRunner::new().respond(&["which psql"], b"/usr/bin/psql\n");
        let fs = MockFs::new().with_file("/pgbouncer/14/bin/psql", "");
        let backend = LinuxBackend::new(&runner, &fs, &settings());

        let mut inst = instance("db1", "6432");
        inst.version_hint = Some("14".into());
        assert_eq!(
            backend.resolve_client_binary_path(&inst).unwrap(),
            "/pgbouncer/14/bin/psql"
        );

        inst.name = "db2".into();
        inst.version_hint = Some("15".into());
        assert_eq!(
            backend.resolve_client_binary_path(&inst).unwrap(),
            "/usr/bin/psql"
        );
    }

    #[test]
    fn test_binary_resolved_once_per_instance() {
        let runner = MockRunner::new().respond(&["which psql"], b"/usr/bin/psql\n");
        let backend = LinuxBackend::new(&runner, MockFs::new(), &settings());
        let inst = instance("db1", "6432");
        backend.resolve_client_binary_path(&inst).unwrap();
        backend.resolve_client_binary_path(&inst).unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_binary_not_found() {
        let runner = MockRunner::new();
        let backend = LinuxBackend::new(&runner, MockFs::new(), &settings());
        let err = backend
            .resolve_client_binary_path(&instance("db1", "6432"))
            .unwrap_err();
        assert!(matches!(err, QueryError::BinaryNotFound(_)));
    }

    #[test]
    fn test_spawn_failure() {
        let runner = MockRunner::new().fail(&["su"], "permission denied");
        let settings = Settings {
            binary_path: Some("/usr/bin/psql".into()),
            ..settings()
        };
        let backend = LinuxBackend::new(&runner, MockFs::new(), &settings);
        let err = backend
            .run_query(&instance("db1", "6432"), "SHOW POOLS;", &QueryOptions::default())
            .unwrap_err();
        assert!(matches!(err, QueryError::Spawn { .. }));
    }

    #[test]
    fn test_latency_from_children_ticks() {
        let runner = MockRunner::new().healthy_instance("6432");
        let settings = Settings {
            binary_path: Some("/usr/bin/psql".into()),
            ..settings()
        };
        let fs = MockFs::new().with_file(SELF_STAT_PATH, STAT);
        let backend = LinuxBackend::new(&runner, fs, &settings);

        let (version, seconds) = backend
            .measure_connection_latency(&instance("db1", "6432"))
            .unwrap();
        assert_eq!(version, "1.21.0");
        assert_eq!(seconds, 0.0);
    }

    /// `/proc/self/stat` whose children ticks grow by 5 per spawned command.
    struct TickingStat<'a> {
        runner: &'a MockRunner,
    }

    impl FileSystem for TickingStat<'_> {
        fn read_to_string(&self, _path: &Path) -> std::io::Result<String> {
            let ticks = 5 * self.runner.calls().len();
            Ok(format!(
                "4242 (agent) S 1 4242 4242 0 -1 4194304 100 0 0 0 10 5 {} 0 20 0 1 0",
                ticks
            ))
        }

        fn is_file(&self, _path: &Path) -> bool {
            false
        }
    }

    #[test]
    fn test_latency_excludes_binary_lookup() {
        let runner = MockRunner::new()
            .respond(&["which psql"], b"/usr/bin/psql\n")
            .healthy_instance("6432");
        let backend = LinuxBackend::new(&runner, TickingStat { runner: &runner }, &settings());

        let (_, seconds) = backend
            .measure_connection_latency(&instance("db1", "6432"))
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].program, "which");
        assert_eq!(calls.len(), 2);
        // only the version query ran between the two samples
        assert_eq!(seconds, 0.05);
    }

    #[test]
    fn test_parse_children_cpu_ticks() {
        assert_eq!(parse_children_cpu_ticks(STAT), Some(10));
        assert_eq!(parse_children_cpu_ticks("1 (x) S 1"), None);
        assert_eq!(parse_children_cpu_ticks(""), None);
    }
}
