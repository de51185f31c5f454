//! Reachability and version of each collected instance.

use super::{Check, CheckOutcome, CheckResult, Discovery, Metric, State};
use crate::transport::{SectionKind, TransportStream};

/// One service per `[[[instance]]]` of `pgbouncer_instances`.
///
/// The section carries markers only, so this check implements [`Check`]
/// directly instead of evaluating rows.
///
/// The version and connection time sections are empty for an instance whose
/// probe failed, which turns into a critical result.
#[derive(Debug, Clone, Default)]
pub struct InstanceCheck;

fn value<'a>(stream: &'a TransportStream, kind: SectionKind, instance: &str) -> Option<&'a str> {
    stream
        .section(kind.name())?
        .block(instance)?
        .value()
        .filter(|v| !v.trim().is_empty())
}

impl Check for InstanceCheck {
    fn service(&self) -> &'static str {
        "PgBouncer Instance"
    }

    fn section(&self) -> SectionKind {
        SectionKind::Instances
    }

    fn entity(&self) -> &'static str {
        "Instance"
    }

    fn discover(&self, stream: &TransportStream) -> Discovery {
        let items = stream
            .section(self.section().name())
            .map(|s| s.instances().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        Discovery {
            items,
            errors: Vec::new(),
        }
    }

    fn check(&self, item: &str, stream: &TransportStream) -> CheckOutcome {
        let known = stream
            .section(self.section().name())
            .is_some_and(|s| s.block(item).is_some());
        if !known {
            return CheckOutcome::vanished(self.service(), item, self.entity());
        }

        let mut outcome = CheckOutcome::new(self.service(), item);
        match value(stream, SectionKind::Version, item) {
            Some(version) => {
                outcome.push(CheckResult::new(State::Ok, format!("Version {}", version)));
                if let Some(seconds) = value(stream, SectionKind::ConnTime, item)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                {
                    outcome.detail(format!("Connection time: {:.3} seconds", seconds));
                    outcome.metric(Metric::new("conn_time", seconds));
                }
            }
            None => outcome.push(CheckResult::new(State::Crit, "no response from instance")),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::parse_stream;

    const STREAM: &str = "\
<<<pgbouncer_instances>>>
[[[db1]]]
<<<pgbouncer_version:sep(1)>>>
[[[db1]]]
<<<pgbouncer_conn_time>>>
[[[db1]]]
<<<pgbouncer_instances>>>
[[[db2]]]
<<<pgbouncer_version:sep(1)>>>
[[[db2]]]
1.21.0
<<<pgbouncer_conn_time>>>
[[[db2]]]
0.020
";

    #[test]
    fn test_discovery_lists_every_instance() {
        let discovery = InstanceCheck.discover(&parse_stream(STREAM));
        assert_eq!(discovery.items, vec!["db1", "db2"]);
    }

    #[test]
    fn test_reachable_instance() {
        let outcome = InstanceCheck.check("db2", &parse_stream(STREAM));
        assert_eq!(outcome.state, State::Ok);
        assert_eq!(outcome.summary(), "Version 1.21.0");
        assert_eq!(outcome.metrics, vec![Metric::new("conn_time", 0.02)]);
    }

    #[test]
    fn test_unreachable_instance() {
        let outcome = InstanceCheck.check("db1", &parse_stream(STREAM));
        assert_eq!(outcome.state, State::Crit);
        assert_eq!(outcome.summary(), "no response from instance(!!)");
        assert!(outcome.metrics.is_empty());
    }

    #[test]
    fn test_unknown_instance() {
        let outcome = InstanceCheck.check("db3", &parse_stream(STREAM));
        assert_eq!(outcome.state, State::Unknown);
    }
}
