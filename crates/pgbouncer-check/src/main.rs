//! pgbouncer-check - discovery and health checks over a PgBouncer
//! transport stream produced by `pgbouncer-agent`.

use std::io::{self, Read};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use pgbouncer_core::checks::{
    Check, CheckOutcome, DatabaseConnectionsCheck, Discovery, InstanceCheck, PoolMaxwaitCheck,
    State, ThresholdPolicy,
};
use pgbouncer_core::transport::{TransportStream, parse_stream};

/// PgBouncer service discovery and checks.
#[derive(Parser, Debug)]
#[command(name = "pgbouncer-check", about = "PgBouncer discovery and checks", version)]
struct Args {
    /// Read the transport stream from this file instead of stdin.
    #[arg(short, long, value_name = "FILE", global = true)]
    input: Option<String>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Increase logging verbosity (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Warning and critical connection usage in percent.
    #[arg(long, value_name = "WARN,CRIT", default_value = "90,95", value_parser = parse_levels, global = true)]
    connection_usage_levels: (f64, f64),

    /// Warning and critical pool maxwait in seconds.
    #[arg(long, value_name = "WARN,CRIT", default_value = "5,10", value_parser = parse_levels, global = true)]
    maxwait_levels: (f64, f64),

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the items of a section.
    Discover {
        #[arg(short, long)]
        section: SectionArg,
    },
    /// Check one item.
    Check {
        #[arg(short, long)]
        section: SectionArg,
        #[arg(long)]
        item: String,
    },
    /// Discover and check every item of a section.
    CheckAll {
        #[arg(short, long)]
        section: SectionArg,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SectionArg {
    Databases,
    Pools,
    Instances,
}

/// Parses `WARN,CRIT`, e.g. `90,95`.
fn parse_levels(s: &str) -> Result<(f64, f64), String> {
    let (warn, crit) = s
        .split_once(',')
        .ok_or_else(|| format!("expected WARN,CRIT, got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid level '{}': {}", v.trim(), e))
    };
    Ok((parse(warn)?, parse(crit)?))
}

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

fn build_check(section: SectionArg, args: &Args) -> Box<dyn Check> {
    match section {
        SectionArg::Databases => {
            let (warn, crit) = args.connection_usage_levels;
            Box::new(DatabaseConnectionsCheck {
                levels: ThresholdPolicy::upper(warn, crit),
            })
        }
        SectionArg::Pools => {
            let (warn, crit) = args.maxwait_levels;
            Box::new(PoolMaxwaitCheck {
                levels: ThresholdPolicy::upper(warn, crit),
            })
        }
        SectionArg::Instances => Box::new(InstanceCheck),
    }
}

fn read_input(path: Option<&str>) -> io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

#[derive(Serialize)]
struct DiscoveryReport<'a> {
    service: &'static str,
    items: &'a [String],
    malformed: Vec<String>,
}

#[derive(Serialize)]
struct CheckAllReport<'a> {
    state: State,
    outcomes: &'a [CheckOutcome],
    malformed: Vec<String>,
}

fn malformed_rows(discovery: &Discovery) -> Vec<String> {
    discovery
        .errors
        .iter()
        .map(|e| {
            warn!("{}", e);
            e.to_string()
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

/// Runs `command` and returns the overall state.
fn run(args: &Args, stream: &TransportStream) -> Result<State, String> {
    match &args.command {
        Command::Discover { section } => {
            let check = build_check(*section, args);
            let discovery = check.discover(stream);
            let malformed = malformed_rows(&discovery);
            if args.json {
                print_json(&DiscoveryReport {
                    service: check.service(),
                    items: &discovery.items,
                    malformed,
                })?;
            } else {
                for item in &discovery.items {
                    println!("{} {}", check.service(), item);
                }
            }
            Ok(State::Ok)
        }
        Command::Check { section, item } => {
            let outcome = build_check(*section, args).check(item, stream);
            if args.json {
                print_json(&outcome)?;
            } else {
                println!("{}", outcome.render());
            }
            Ok(outcome.state)
        }
        Command::CheckAll { section } => {
            let check = build_check(*section, args);
            let discovery = check.discover(stream);
            let malformed = malformed_rows(&discovery);
            let outcomes: Vec<CheckOutcome> = discovery
                .items
                .iter()
                .map(|item| check.check(item, stream))
                .collect();
            let state = outcomes
                .iter()
                .fold(State::Ok, |acc, o| acc.worst(o.state));
            if args.json {
                print_json(&CheckAllReport {
                    state,
                    outcomes: &outcomes,
                    malformed,
                })?;
            } else {
                for outcome in &outcomes {
                    println!("{}", outcome.render());
                }
            }
            Ok(state)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let text = match read_input(args.input.as_deref()) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to read input: {}", e);
            return exit_code(State::Unknown);
        }
    };
    let stream = parse_stream(&text);

    match run(&args, &stream) {
        Ok(state) => exit_code(state),
        Err(e) => {
            error!("{}", e);
            exit_code(State::Unknown)
        }
    }
}

fn exit_code(state: State) -> ExitCode {
    ExitCode::from(state.code() as u8)
}
