//! Maximum client wait time per pool.

use super::{
    Check, CheckOutcome, CheckResult, Discovery, Metric, RecordCheck, State, ThresholdPolicy,
    check_levels, number,
};
use crate::transport::{EntityRecord, SectionKind, TransportStream};

/// Client and server counters emitted next to `maxwait`.
const COUNTER_COLUMNS: &[&str] = &[
    "cl_active",
    "cl_waiting",
    "sv_active",
    "sv_idle",
    "sv_used",
    "sv_tested",
    "sv_login",
];

/// `maxwait_us` of a `database/user` pool, in seconds.
#[derive(Debug, Clone)]
pub struct PoolMaxwaitCheck {
    pub levels: ThresholdPolicy,
}

impl Default for PoolMaxwaitCheck {
    fn default() -> Self {
        Self {
            levels: ThresholdPolicy::upper(5.0, 10.0),
        }
    }
}

fn render_seconds(value: f64) -> String {
    format!("{:.2} seconds", value)
}

impl Check for PoolMaxwaitCheck {
    fn service(&self) -> &'static str {
        "PgBouncer Pool maxwait"
    }

    fn section(&self) -> SectionKind {
        SectionKind::Pools
    }

    fn entity(&self) -> &'static str {
        "Pool"
    }

    fn discover(&self, stream: &TransportStream) -> Discovery {
        self.discover_records(stream)
    }

    fn check(&self, item: &str, stream: &TransportStream) -> CheckOutcome {
        self.check_record(item, stream)
    }
}

impl RecordCheck for PoolMaxwaitCheck {
    fn identity_columns(&self) -> &'static [&'static str] {
        &["database", "user"]
    }

    fn evaluate(&self, item: &str, record: &EntityRecord) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(self.service(), item);
        if let Some(mode) = record.get("pool_mode") {
            outcome.detail(format!("Mode: {}", mode));
        }

        match number(record, "maxwait_us") {
            Some(us) => {
                let maxwait = us / 1_000_000.0;
                outcome.push(CheckResult::new(State::Ok, render_seconds(maxwait)));
                outcome.push(
                    check_levels(
                        maxwait,
                        "Maximum waiting time in seconds",
                        &self.levels,
                        render_seconds,
                    )
                    .notice(),
                );
                outcome.metric(Metric::new("maxwait", maxwait).with_levels(&self.levels));
            }
            None => outcome.push(CheckResult::new(State::Unknown, "maxwait not available")),
        }

        for &column in COUNTER_COLUMNS {
            if let Some(value) = number(record, column) {
                outcome.metric(Metric::new(column, value));
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::POOLS_OUTPUT;
    use crate::collector::sanitize;
    use crate::transport::{TransportStream, parse_stream, write_block};

    fn canned() -> TransportStream {
        let mut out = Vec::new();
        write_block(
            &mut out,
            &SectionKind::Pools.header(),
            "db2",
            &sanitize(POOLS_OUTPUT),
        )
        .unwrap();
        parse_stream(&String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_discovery_uses_database_and_user() {
        let discovery = PoolMaxwaitCheck::default().discover(&canned());
        assert_eq!(
            discovery.items,
            vec!["db2/appdb/app", "db2/appdb/report", "db2/pgbouncer/pgbouncer"]
        );
    }

    #[test]
    fn test_maxwait_warn() {
        let outcome = PoolMaxwaitCheck::default().check("db2/appdb/app", &canned());
        assert_eq!(outcome.state, State::Warn);
        assert_eq!(outcome.results[0], CheckResult::new(State::Ok, "6.00 seconds"));
        assert!(outcome.results[1].notice_only);
        assert_eq!(
            outcome.summary(),
            "6.00 seconds, Maximum waiting time in seconds: 6.00 seconds \
             (warn/crit at 5.00 seconds/10.00 seconds)(!)"
        );
        assert_eq!(outcome.details, vec!["Mode: transaction"]);
        assert_eq!(outcome.metrics[0], Metric {
            name: "maxwait".into(),
            value: 6.0,
            levels: Some((5.0, 10.0)),
        });
        assert_eq!(outcome.metrics.len(), 1 + COUNTER_COLUMNS.len());
    }

    #[test]
    fn test_maxwait_ok_and_custom_levels() {
        let outcome = PoolMaxwaitCheck::default().check("db2/appdb/report", &canned());
        assert_eq!(outcome.state, State::Ok);
        assert_eq!(outcome.summary(), "0.12 seconds");

        let strict = PoolMaxwaitCheck {
            levels: ThresholdPolicy::upper(0.05, 0.1),
        };
        assert_eq!(strict.check("db2/appdb/report", &canned()).state, State::Crit);
    }

    #[test]
    fn test_non_numeric_counters_are_skipped() {
        let text = "<<<pgbouncer_pools:sep(59)>>>\n[[[db2]]]\n\
                    database;user;cl_active;cl_waiting;maxwait_us;pool_mode\n\
                    appdb;app;n/a;2;;session\n";
        let outcome = PoolMaxwaitCheck::default().check("db2/appdb/app", &parse_stream(text));
        assert_eq!(outcome.state, State::Unknown);
        assert_eq!(outcome.metrics, vec![Metric::new("cl_waiting", 2.0)]);
    }

    #[test]
    fn test_missing_pool() {
        let outcome = PoolMaxwaitCheck::default().check("db1/appdb/app", &canned());
        assert_eq!(outcome.state, State::Unknown);
        assert_eq!(outcome.summary(), "Pool has been deleted(?)");
    }
}
