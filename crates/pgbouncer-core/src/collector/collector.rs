//! The collection pass: probe, query and emit every configured instance.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::backend::{ExecutionBackend, QueryError, format_latency};
use super::queries::admin_queries;
use super::sanitize::sanitize;
use crate::config::InstanceDescriptor;
use crate::transport::{SectionKind, write_block};

/// Section bodies collected from one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceReport {
    pub name: String,
    /// `None` if the probe failed.
    pub version: Option<String>,
    /// Body of every section kind, in emission order.
    pub bodies: Vec<(SectionKind, String)>,
    pub elapsed: Duration,
}

impl InstanceReport {
    pub fn reachable(&self) -> bool {
        self.version.is_some()
    }

    pub fn body(&self, kind: SectionKind) -> &str {
        self.bodies
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, b)| b.as_str())
            .unwrap_or_default()
    }

    /// Writes one block per section kind.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (kind, body) in &self.bodies {
            write_block(out, &kind.header(), &self.name, body)?;
        }
        Ok(())
    }
}

/// Outcome of a full collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub instances: usize,
    /// Instances whose probe failed; their sections are empty.
    pub unreachable: Vec<String>,
}

/// Drives one collection pass over a list of instances.
///
/// Instances are handled sequentially in input order and share nothing, so
/// one unreachable instance only empties its own sections.
pub struct Collector<'a> {
    backend: &'a dyn ExecutionBackend,
}

impl<'a> Collector<'a> {
    pub fn new(backend: &'a dyn ExecutionBackend) -> Self {
        Self { backend }
    }

    /// Connectivity probe: server version plus connection latency.
    pub fn probe(&self, instance: &InstanceDescriptor) -> Result<(String, f64), QueryError> {
        self.backend.measure_connection_latency(instance)
    }

    /// Collects all section bodies of one instance.
    ///
    /// A failed probe yields empty bodies instead of an error.
    pub fn collect_instance(&self, instance: &InstanceDescriptor) -> InstanceReport {
        let started = Instant::now();

        let (version, mut bodies) = match self.probe(instance) {
            Ok((version, latency)) => {
                debug!(
                    "[{}] PgBouncer {} answered in {}s",
                    instance.name,
                    version,
                    format_latency(latency)
                );
                let mut bodies = self.query_all(instance);
                bodies.push((SectionKind::Version, version.clone()));
                bodies.push((SectionKind::ConnTime, format_latency(latency)));
                (Some(version), bodies)
            }
            Err(e) => {
                warn!("[{}] {}", instance.name, e);
                (None, Vec::new())
            }
        };

        let bodies = SectionKind::ALL
            .into_iter()
            .map(|kind| {
                let body = bodies
                    .iter_mut()
                    .find(|(k, _)| *k == kind)
                    .map(|(_, b)| std::mem::take(b))
                    .unwrap_or_default();
                (kind, body)
            })
            .collect();

        InstanceReport {
            name: instance.name.clone(),
            version,
            bodies,
            elapsed: started.elapsed(),
        }
    }

    /// Collects every instance and writes the transport stream to `out`.
    pub fn collect<W: Write>(
        &self,
        instances: &[InstanceDescriptor],
        out: &mut W,
    ) -> io::Result<CollectionSummary> {
        let mut summary = CollectionSummary::default();

        for instance in instances {
            let report = self.collect_instance(instance);
            info!(
                "[{}] collected in {:.3}s{}",
                report.name,
                report.elapsed.as_secs_f64(),
                if report.reachable() {
                    ""
                } else {
                    " (unreachable)"
                }
            );
            report.write(out)?;
            summary.instances += 1;
            if !report.reachable() {
                summary.unreachable.push(report.name);
            }
        }

        out.flush()?;
        Ok(summary)
    }

    fn query_all(&self, instance: &InstanceDescriptor) -> Vec<(SectionKind, String)> {
        admin_queries()
            .into_iter()
            .map(|query| {
                let body = match self
                    .backend
                    .run_query(instance, query.command, &query.options)
                {
                    Ok(raw) => query.filter(&sanitize(&raw)),
                    Err(e) => {
                        warn!("[{}] {} failed: {}", instance.name, query.command, e);
                        String::new()
                    }
                };
                (query.kind, body)
            })
            .collect()
    }
}
