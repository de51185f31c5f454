//! pgbouncer-core — shared library for the PgBouncer agent and check tools.
//!
//! Provides:
//! - `config` — `pgbouncer.cfg` and per-instance env file resolution
//! - `collector` — OS-specific `psql` execution, output sanitizing and the
//!   collection pass that writes the transport stream
//! - `transport` — the sectioned `<<<kind>>>` / `[[[instance]]]` stream format
//! - `checks` — discovery and threshold evaluation of parsed sections

pub mod checks;
pub mod collector;
pub mod config;
pub mod transport;
