//! Connection usage of each PgBouncer database entry.

use super::{
    Check, CheckOutcome, CheckResult, Discovery, Metric, RecordCheck, State, ThresholdPolicy,
    check_levels, number, render_percent,
};
use crate::transport::{EntityRecord, SectionKind, TransportStream};

/// Columns emitted as metrics when they hold a number.
const METRIC_COLUMNS: &[&str] = &[
    "pool_size",
    "reserve_pool",
    "reserve_pool_size",
    "max_connections",
    "current_connections",
];

/// `current_connections` relative to the effective connection maximum.
#[derive(Debug, Clone)]
pub struct DatabaseConnectionsCheck {
    pub levels: ThresholdPolicy,
}

impl Default for DatabaseConnectionsCheck {
    fn default() -> Self {
        Self {
            levels: ThresholdPolicy::upper(90.0, 95.0),
        }
    }
}

/// Declared `max_connections`, or `pool_size` plus the reserve pool when it is 0.
///
/// Older PgBouncer versions name the reserve column `reserve_pool_size`;
/// `reserve_pool` wins when both are present.
pub fn effective_max_connections(record: &EntityRecord) -> f64 {
    let declared = number(record, "max_connections").unwrap_or(0.0);
    if declared != 0.0 {
        return declared;
    }
    let reserve = number(record, "reserve_pool")
        .or_else(|| number(record, "reserve_pool_size"))
        .unwrap_or(0.0);
    number(record, "pool_size").unwrap_or(0.0) + reserve
}

/// Usage in percent, `None` without a limit to relate to.
pub fn connection_usage(record: &EntityRecord) -> Option<f64> {
    let current = number(record, "current_connections")?;
    let max = effective_max_connections(record);
    (max > 0.0).then(|| current * 100.0 / max)
}

impl Check for DatabaseConnectionsCheck {
    fn service(&self) -> &'static str {
        "PgBouncer Database connections"
    }

    fn section(&self) -> SectionKind {
        SectionKind::Databases
    }

    fn entity(&self) -> &'static str {
        "Database"
    }

    fn discover(&self, stream: &TransportStream) -> Discovery {
        self.discover_records(stream)
    }

    fn check(&self, item: &str, stream: &TransportStream) -> CheckOutcome {
        self.check_record(item, stream)
    }
}

impl RecordCheck for DatabaseConnectionsCheck {
    fn identity_columns(&self) -> &'static [&'static str] {
        &["name"]
    }

    fn evaluate(&self, item: &str, record: &EntityRecord) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(self.service(), item);

        for column in ["host", "port", "database", "pool_mode"] {
            if let Some(value) = record.get(column).filter(|v| !v.is_empty()) {
                outcome.detail(format!("{}: {}", column, value));
            }
        }
        for &column in METRIC_COLUMNS {
            if let Some(value) = number(record, column) {
                outcome.metric(Metric::new(column, value));
            }
        }

        if number(record, "current_connections").is_none() {
            outcome.push(CheckResult::new(
                State::Unknown,
                "current connections not available",
            ));
            return outcome;
        }
        let Some(usage) = connection_usage(record) else {
            outcome.push(CheckResult::new(State::Unknown, "no connection limit"));
            return outcome;
        };

        outcome.push(CheckResult::new(
            State::Ok,
            format!("Connection usage: {}", render_percent(usage)),
        ));
        outcome.push(
            check_levels(usage, "Connection usage in %", &self.levels, render_percent).notice(),
        );
        outcome.metric(Metric::new("connection_usage", usage).with_levels(&self.levels));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::DATABASES_OUTPUT;
    use crate::collector::sanitize;
    use crate::transport::{SectionKind, parse_stream, write_block};

    fn stream(body: &str) -> crate::transport::TransportStream {
        let mut out = Vec::new();
        write_block(&mut out, &SectionKind::Databases.header(), "db2", body).unwrap();
        parse_stream(&String::from_utf8(out).unwrap())
    }

    fn canned() -> crate::transport::TransportStream {
        stream(&sanitize(DATABASES_OUTPUT))
    }

    #[test]
    fn test_discovery() {
        let discovery = DatabaseConnectionsCheck::default().discover(&canned());
        assert_eq!(
            discovery.items,
            vec!["db2/appdb", "db2/pgbouncer", "db2/reporting"]
        );
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_usage_falls_back_to_pool_sizes() {
        let outcome = DatabaseConnectionsCheck::default().check("db2/appdb", &canned());
        // 45 / (20 + 5)
        assert_eq!(outcome.state, State::Crit);
        assert_eq!(
            outcome.summary(),
            "Connection usage: 180%, Connection usage in %: 180% (warn/crit at 90%/95%)(!!)"
        );
        let usage = outcome
            .metrics
            .iter()
            .find(|m| m.name == "connection_usage")
            .unwrap();
        assert_eq!(usage.value, 180.0);
        assert_eq!(usage.levels, Some((90.0, 95.0)));
        assert!(outcome.details.contains(&"pool_mode: transaction".to_string()));
    }

    #[test]
    fn test_usage_with_declared_maximum() {
        let outcome = DatabaseConnectionsCheck::default().check("db2/reporting", &canned());
        assert_eq!(outcome.state, State::Ok);
        assert_eq!(outcome.summary(), "Connection usage: 45%");
        let names: Vec<&str> = outcome.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "pool_size",
                "reserve_pool",
                "max_connections",
                "current_connections",
                "connection_usage"
            ]
        );
    }

    #[test]
    fn test_reserve_pool_precedence() {
        let body = "name;pool_size;reserve_pool;reserve_pool_size;max_connections;current_connections\n\
                    a;10;10;0;0;5\n\
                    b;10;;5;0;5";
        let s = stream(body);
        let check = DatabaseConnectionsCheck::default();
        let a = check.check("db2/a", &s);
        assert_eq!(a.results[0].text, "Connection usage: 25%");
        let b = check.check("db2/b", &s);
        assert_eq!(b.results[0].text, "Connection usage: 33%");
        assert_eq!(b.metrics.last().unwrap().value, 500.0 / 15.0);
    }

    #[test]
    fn test_no_connection_limit() {
        let outcome = DatabaseConnectionsCheck::default().check("db2/pgbouncer", &canned());
        // pool 2, reserve 0, current 0: limit is 2
        assert_eq!(outcome.state, State::Ok);

        let s = stream("name;pool_size;reserve_pool;max_connections;current_connections\nx;0;0;0;3");
        let outcome = DatabaseConnectionsCheck::default().check("db2/x", &s);
        assert_eq!(outcome.state, State::Unknown);
        assert_eq!(outcome.summary(), "no connection limit(?)");
    }

    #[test]
    fn test_missing_database() {
        let outcome = DatabaseConnectionsCheck::default().check("db1/appdb", &canned());
        assert_eq!(outcome.state, State::Unknown);
        assert_eq!(outcome.summary(), "Database has been deleted(?)");
        assert!(outcome.metrics.is_empty());
    }
}
