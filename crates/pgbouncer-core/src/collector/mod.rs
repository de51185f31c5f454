//! PgBouncer telemetry collection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Collector                           │
//! │   probe ─▶ admin queries ─▶ sanitize ─▶ write_block (stdout) │
//! │                 │                                            │
//! │        ┌────────▼─────────┐                                  │
//! │        │ ExecutionBackend │ (trait, picked by HostOs)        │
//! │        └───┬──────────┬───┘                                  │
//! │   LinuxBackend    WindowsBackend                             │
//! │        └─────┬────────┘                                      │
//! │    CommandRunner + FileSystem (traits)                       │
//! └──────────────┼───────────────────────────────────────────────┘
//!        ┌───────┴────────┐
//!  SystemRunner/RealFs  MockRunner/MockFs
//! ```
//!
//! # Usage
//!
//! ```
//! use pgbouncer_core::collector::mock::{MockFs, MockRunner};
//! use pgbouncer_core::collector::{Collector, select_backend};
//! use pgbouncer_core::config::{HostOs, Settings};
//!
//! let settings = Settings::defaults("postgres");
//! let runner = MockRunner::new()
//!     .respond(&["which psql"], "/usr/bin/psql\n")
//!     .healthy_instance("6432");
//! let backend = select_backend(HostOs::Linux, &settings, &runner, MockFs::new());
//!
//! let mut out = Vec::new();
//! let summary = Collector::new(backend.as_ref())
//!     .collect(&[settings.default_instance()], &mut out)
//!     .unwrap();
//! assert!(summary.unreachable.is_empty());
//! ```

pub mod backend;
#[allow(clippy::module_inception)]
mod collector;
pub mod mock;
pub mod queries;
pub mod sanitize;
pub mod traits;

pub use backend::{ExecutionBackend, QueryError, QueryOptions, select_backend};
pub use collector::{CollectionSummary, Collector, InstanceReport};
pub use sanitize::sanitize;
pub use traits::{CommandRunner, FileSystem, Invocation, RealFs, SystemRunner};
