//! pgbouncer-agent - PgBouncer telemetry collector.
//!
//! Resolves the configured instances, queries each one through `psql` and
//! writes the sectioned transport stream to stdout. Logs go to stderr.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use pgbouncer_core::collector::backend::format_latency;
use pgbouncer_core::collector::{Collector, QueryError, RealFs, SystemRunner, select_backend};
use pgbouncer_core::config::{self, HostOs, InstanceDescriptor, Settings};

/// PgBouncer monitoring agent.
#[derive(Parser, Debug)]
#[command(name = "pgbouncer-agent", about = "PgBouncer telemetry collector", version)]
struct Args {
    /// Increase logging verbosity (-v for info, -vv for debug). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only probe every instance and report whether it answers.
    #[arg(short, long)]
    test_connection: bool,

    /// Directory holding pgbouncer.cfg.
    #[arg(long, value_name = "DIR", env = "MK_CONFDIR")]
    config_dir: Option<String>,
}

/// Exit status for an unsupported host OS.
const EXIT_UNSUPPORTED_OS: u8 = 2;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// One line of `--test-connection` output.
fn probe_line(instance: &InstanceDescriptor, probe: &Result<(String, f64), QueryError>) -> String {
    match probe {
        Ok((version, latency)) => format!(
            "{}: ready (PgBouncer {}, port {}, {}s)",
            instance.name,
            version,
            instance.port,
            format_latency(*latency)
        ),
        Err(e) => format!(
            "{}: no response (port {}): {}",
            instance.name, instance.port, e
        ),
    }
}

fn test_connections(collector: &Collector<'_>, instances: &[InstanceDescriptor]) -> ExitCode {
    let mut all_ready = true;
    for instance in instances {
        let probe = collector.probe(instance);
        all_ready &= probe.is_ok();
        println!("{}", probe_line(instance, &probe));
    }
    if all_ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let os = match HostOs::detect() {
        Ok(os) => os,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_UNSUPPORTED_OS);
        }
    };

    let runner = SystemRunner::new();
    let fs = RealFs::new();

    let defaults = Settings::defaults(os.default_os_user(&runner));
    let config_path = os.config_path(args.config_dir.as_deref());
    info!("pgbouncer-agent {} using {}", env!("CARGO_PKG_VERSION"), config_path.display());

    let resolution = config::load(&config_path, os.instance_separator(), defaults, &fs);
    for instance in &resolution.instances {
        debug!(
            "Instance {}: user={} database={} port={}",
            instance.name, instance.db_user, instance.database, instance.port
        );
    }

    let backend = select_backend(os, &resolution.settings, &runner, &fs);
    let collector = Collector::new(backend.as_ref());

    if args.test_connection {
        return test_connections(&collector, &resolution.instances);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match collector.collect(&resolution.instances, &mut out) {
        Ok(summary) => {
            info!(
                "Collected {} instance(s), {} unreachable",
                summary.instances,
                summary.unreachable.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to write output: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> InstanceDescriptor {
        Settings::defaults("postgres").default_instance()
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["pgbouncer-agent", "-vv", "-t", "--config-dir", "/tmp/cfg"])
            .unwrap();
        assert_eq!(args.verbose, 2);
        assert!(args.test_connection);
        assert_eq!(args.config_dir.as_deref(), Some("/tmp/cfg"));
    }

    #[test]
    fn test_probe_line_ready() {
        let line = probe_line(&instance(), &Ok(("1.21.0".to_string(), 0.0104)));
        assert_eq!(line, "default: ready (PgBouncer 1.21.0, port 6432, 0.010s)");
    }

    #[test]
    fn test_probe_line_no_response() {
        let err = QueryError::NoData {
            instance: "default".to_string(),
        };
        let line = probe_line(&instance(), &Err(err));
        assert_eq!(
            line,
            "default: no response (port 6432): psql connection to default returned with no data"
        );
    }
}
