//! Discovery and health evaluation of a parsed transport stream.
//!
//! Every check owns one section kind. Discovery lists the entity identities
//! found in that section; a check looks one identity up again and turns its
//! values into a [`CheckOutcome`]. Nothing is remembered between runs, so an
//! entity that vanished since discovery is reported as [`State::Unknown`].

mod databases;
mod instances;
mod pools;

pub use databases::DatabaseConnectionsCheck;
pub use instances::InstanceCheck;
pub use pools::PoolMaxwaitCheck;

use serde::Serialize;

use crate::transport::{
    EntityRecord, EntityTable, MalformedSectionError, SectionKind, TransportStream, entities,
};

/// Monitoring state of one result, ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Ok,
    Warn,
    Crit,
    Unknown,
}

impl State {
    pub fn label(self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Warn => "WARN",
            State::Crit => "CRIT",
            State::Unknown => "UNKNOWN",
        }
    }

    /// Exit-code style number (0..=3).
    pub fn code(self) -> i32 {
        match self {
            State::Ok => 0,
            State::Warn => 1,
            State::Crit => 2,
            State::Unknown => 3,
        }
    }

    // CRIT outranks UNKNOWN, UNKNOWN outranks WARN
    fn rank(self) -> u8 {
        match self {
            State::Ok => 0,
            State::Warn => 1,
            State::Unknown => 2,
            State::Crit => 3,
        }
    }

    pub fn worst(self, other: State) -> State {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    fn marker(self) -> &'static str {
        match self {
            State::Ok => "",
            State::Warn => "(!)",
            State::Crit => "(!!)",
            State::Unknown => "(?)",
        }
    }
}

/// Which side of the boundaries is bad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upper,
    Lower,
}

/// Warning and critical boundaries for one observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ThresholdPolicy {
    pub warn: f64,
    pub crit: f64,
    pub direction: Direction,
}

impl ThresholdPolicy {
    pub fn upper(warn: f64, crit: f64) -> Self {
        Self {
            warn,
            crit,
            direction: Direction::Upper,
        }
    }

    pub fn lower(warn: f64, crit: f64) -> Self {
        Self {
            warn,
            crit,
            direction: Direction::Lower,
        }
    }

    /// State of `value`; the critical boundary is tested first.
    pub fn evaluate(&self, value: f64) -> State {
        match self.direction {
            Direction::Upper if value >= self.crit => State::Crit,
            Direction::Upper if value >= self.warn => State::Warn,
            Direction::Lower if value < self.crit => State::Crit,
            Direction::Lower if value < self.warn => State::Warn,
            _ => State::Ok,
        }
    }
}

/// One numeric observation, always emitted regardless of state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<(f64, f64)>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            levels: None,
        }
    }

    pub fn with_levels(mut self, policy: &ThresholdPolicy) -> Self {
        self.levels = Some((policy.warn, policy.crit));
        self
    }

    fn render(&self) -> String {
        match self.levels {
            Some((warn, crit)) => format!("{}={};{};{}", self.name, self.value, warn, crit),
            None => format!("{}={}", self.name, self.value),
        }
    }
}

/// One line of a check's verdict.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckResult {
    pub state: State,
    pub text: String,
    /// Shown in the summary only when the state is not OK.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub notice_only: bool,
}

impl CheckResult {
    pub fn new(state: State, text: impl Into<String>) -> Self {
        Self {
            state,
            text: text.into(),
            notice_only: false,
        }
    }

    pub fn notice(mut self) -> Self {
        self.notice_only = true;
        self
    }
}

/// Compares `value` with `policy` and renders it as `label: value`.
///
/// A breached boundary appends `(warn/crit at W/C)` with both boundaries
/// rendered by `render`.
pub fn check_levels(
    value: f64,
    label: &str,
    policy: &ThresholdPolicy,
    render: impl Fn(f64) -> String,
) -> CheckResult {
    let state = policy.evaluate(value);
    let mut text = format!("{}: {}", label, render(value));
    if state != State::Ok {
        let relation = match policy.direction {
            Direction::Upper => "at",
            Direction::Lower => "below",
        };
        text.push_str(&format!(
            " (warn/crit {} {}/{})",
            relation,
            render(policy.warn),
            render(policy.crit)
        ));
    }
    CheckResult::new(state, text)
}

/// Verdict for one item.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub service: String,
    pub item: String,
    pub state: State,
    pub results: Vec<CheckResult>,
    pub details: Vec<String>,
    pub metrics: Vec<Metric>,
}

impl CheckOutcome {
    pub fn new(service: &str, item: &str) -> Self {
        Self {
            service: service.to_string(),
            item: item.to_string(),
            state: State::Ok,
            results: Vec::new(),
            details: Vec::new(),
            metrics: Vec::new(),
        }
    }

    /// The outcome for an item missing from the stream.
    pub fn vanished(service: &str, item: &str, entity: &str) -> Self {
        let mut outcome = Self::new(service, item);
        outcome.push(CheckResult::new(
            State::Unknown,
            format!("{} has been deleted", entity),
        ));
        outcome
    }

    /// Adds a result; the overall state becomes the worst seen.
    pub fn push(&mut self, result: CheckResult) {
        self.state = self.state.worst(result.state);
        self.results.push(result);
    }

    pub fn metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn summary(&self) -> String {
        self.results
            .iter()
            .filter(|r| !(r.notice_only && r.state == State::Ok))
            .map(|r| format!("{}{}", r.text, r.state.marker()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `STATE service item - summary | metrics`
    pub fn render(&self) -> String {
        let mut line = format!(
            "{} {} {} - {}",
            self.state.label(),
            self.service,
            self.item,
            self.summary()
        );
        if !self.metrics.is_empty() {
            let perf: Vec<String> = self.metrics.iter().map(Metric::render).collect();
            line.push_str(" | ");
            line.push_str(&perf.join(" "));
        }
        line
    }
}

/// Items found by discovery plus the rows that could not be read.
#[derive(Debug, Default)]
pub struct Discovery {
    pub items: Vec<String>,
    pub errors: Vec<MalformedSectionError>,
}

/// A check over one section kind.
pub trait Check {
    /// Service name prefix, e.g. `PgBouncer Pool maxwait`.
    fn service(&self) -> &'static str;

    fn section(&self) -> SectionKind;

    /// Name of the checked entity in messages.
    fn entity(&self) -> &'static str;

    /// Enumerates the monitorable entities.
    fn discover(&self, stream: &TransportStream) -> Discovery;

    /// Looks `item` up and evaluates it.
    fn check(&self, item: &str, stream: &TransportStream) -> CheckOutcome;
}

/// A check whose entities are the data rows of a tabular section.
///
/// Implementors forward [`Check::discover`] and [`Check::check`] to
/// [`discover_records`](Self::discover_records) and
/// [`check_record`](Self::check_record).
pub trait RecordCheck: Check {
    /// Columns that, after the instance name, identify an entity.
    fn identity_columns(&self) -> &'static [&'static str];

    /// Evaluates one record found under `item`.
    fn evaluate(&self, item: &str, record: &EntityRecord) -> CheckOutcome;

    /// Entity table of this check's section.
    fn table(&self, stream: &TransportStream) -> EntityTable {
        stream
            .section(self.section().name())
            .map(|section| entities(section, self.identity_columns()))
            .unwrap_or_default()
    }

    fn discover_records(&self, stream: &TransportStream) -> Discovery {
        let table = self.table(stream);
        Discovery {
            items: table.identities().map(str::to_string).collect(),
            errors: table.errors,
        }
    }

    fn check_record(&self, item: &str, stream: &TransportStream) -> CheckOutcome {
        match self.table(stream).get(item) {
            Some(record) => self.evaluate(item, record),
            None => CheckOutcome::vanished(self.service(), item, self.entity()),
        }
    }
}

/// Parses a record column as a number.
pub(crate) fn number(record: &EntityRecord, column: &str) -> Option<f64> {
    record.get(column)?.trim().parse().ok()
}

/// Renders a percentage rounded to a whole number (`180%`, `33%`).
pub fn render_percent(value: f64) -> String {
    format!("{:.0}%", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_levels() {
        let policy = ThresholdPolicy::upper(5.0, 10.0);
        assert_eq!(policy.evaluate(4.99), State::Ok);
        assert_eq!(policy.evaluate(5.0), State::Warn);
        assert_eq!(policy.evaluate(10.0), State::Crit);
    }

    #[test]
    fn test_lower_levels() {
        let policy = ThresholdPolicy::lower(10.0, 5.0);
        assert_eq!(policy.evaluate(10.0), State::Ok);
        assert_eq!(policy.evaluate(9.0), State::Warn);
        assert_eq!(policy.evaluate(4.0), State::Crit);
    }

    #[test]
    fn test_worst_state() {
        assert_eq!(State::Ok.worst(State::Warn), State::Warn);
        assert_eq!(State::Warn.worst(State::Unknown), State::Unknown);
        assert_eq!(State::Crit.worst(State::Unknown), State::Crit);
    }

    #[test]
    fn test_check_levels_text() {
        let policy = ThresholdPolicy::upper(90.0, 95.0);
        let ok = check_levels(45.0, "Usage", &policy, render_percent);
        assert_eq!(ok.state, State::Ok);
        assert_eq!(ok.text, "Usage: 45%");

        let crit = check_levels(180.0, "Usage", &policy, render_percent);
        assert_eq!(crit.state, State::Crit);
        assert_eq!(crit.text, "Usage: 180% (warn/crit at 90%/95%)");
    }

    #[test]
    fn test_render_percent() {
        assert_eq!(render_percent(180.0), "180%");
        assert_eq!(render_percent(100.0 / 3.0), "33%");
        assert_eq!(render_percent(66.7), "67%");
        assert_eq!(render_percent(0.0), "0%");
    }

    #[test]
    fn test_outcome_summary_hides_ok_notices() {
        let mut outcome = CheckOutcome::new("Svc", "db1/x");
        outcome.push(CheckResult::new(State::Ok, "Usage: 45%"));
        outcome.push(CheckResult::new(State::Ok, "Usage in %: 45%").notice());
        outcome.metric(Metric::new("usage", 45.0).with_levels(&ThresholdPolicy::upper(90.0, 95.0)));
        assert_eq!(outcome.state, State::Ok);
        assert_eq!(outcome.render(), "OK Svc db1/x - Usage: 45% | usage=45;90;95");
    }

    #[test]
    fn test_vanished_outcome() {
        let outcome = CheckOutcome::vanished("Svc", "db1/x", "Pool");
        assert_eq!(outcome.state, State::Unknown);
        assert_eq!(outcome.summary(), "Pool has been deleted(?)");
    }

    #[test]
    fn test_unreachable_instance_entities_are_unknown() {
        use crate::collector::mock::{MockFs, MockRunner};
        use crate::collector::{Collector, select_backend};
        use crate::config::{HostOs, Settings};
        use crate::transport::parse_stream;

        let settings = Settings {
            binary_path: Some("/usr/bin/psql".into()),
            ..Settings::defaults("postgres")
        };
        let runner = MockRunner::new().healthy_instance("6433");
        let backend = select_backend(HostOs::Linux, &settings, &runner, MockFs::new());
        let db1 = crate::config::InstanceDescriptor {
            name: "db1".into(),
            ..settings.default_instance()
        };
        let db2 = crate::config::InstanceDescriptor {
            name: "db2".into(),
            port: "6433".into(),
            ..settings.default_instance()
        };
        let mut out = Vec::new();
        Collector::new(backend.as_ref())
            .collect(&[db1, db2], &mut out)
            .unwrap();
        let stream = parse_stream(&String::from_utf8(out).unwrap());

        let pools = PoolMaxwaitCheck::default();
        assert_eq!(pools.check("db1/appdb/app", &stream).state, State::Unknown);
        assert_eq!(pools.check("db2/appdb/app", &stream).state, State::Warn);

        let databases = DatabaseConnectionsCheck::default();
        assert_eq!(databases.check("db1/appdb", &stream).state, State::Unknown);
        assert_eq!(databases.check("db2/reporting", &stream).state, State::Ok);
        assert!(
            databases
                .discover(&stream)
                .items
                .iter()
                .all(|i| i.starts_with("db2/"))
        );

        assert_eq!(InstanceCheck.check("db1", &stream).state, State::Crit);
        assert_eq!(InstanceCheck.check("db2", &stream).state, State::Ok);
    }

    #[test]
    fn test_outcome_json() {
        let mut outcome = CheckOutcome::new("PgBouncer Pool maxwait", "db1/appdb/app");
        outcome.push(CheckResult::new(State::Ok, "6.00 seconds"));
        outcome.push(CheckResult::new(State::Warn, "Maximum waiting time in seconds: 6.00 seconds").notice());
        outcome.metric(Metric::new("maxwait", 6.0).with_levels(&ThresholdPolicy::upper(5.0, 10.0)));
        outcome.metric(Metric::new("cl_active", 12.0));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["state"], "warn");
        assert_eq!(json["item"], "db1/appdb/app");
        assert_eq!(json["results"][0], serde_json::json!({"state": "ok", "text": "6.00 seconds"}));
        assert_eq!(json["results"][1]["notice_only"], true);
        assert_eq!(json["metrics"][0]["levels"], serde_json::json!([5.0, 10.0]));
        assert!(json["metrics"][1].get("levels").is_none());

        let policy = serde_json::to_value(ThresholdPolicy::lower(10.0, 5.0)).unwrap();
        assert_eq!(policy["direction"], "lower");
    }

    #[test]
    fn test_checks_as_trait_objects() {
        use crate::transport::parse_stream;

        let stream = parse_stream(
            "<<<pgbouncer_instances>>>\n[[[db1]]]\n\
             <<<pgbouncer_pools:sep(59)>>>\n[[[db1]]]\ndatabase;user;maxwait_us\nappdb;app;0\n\
             <<<pgbouncer_databases:sep(59)>>>\n[[[db1]]]\nname;max_connections;current_connections\nappdb;10;1\n",
        );
        let checks: Vec<Box<dyn Check>> = vec![
            Box::new(DatabaseConnectionsCheck::default()),
            Box::new(PoolMaxwaitCheck::default()),
            Box::new(InstanceCheck),
        ];
        let items: Vec<Vec<String>> = checks.iter().map(|c| c.discover(&stream).items).collect();
        assert_eq!(items, vec![vec!["db1/appdb"], vec!["db1/appdb/app"], vec!["db1"]]);

        // the instance has markers only: no version means no response
        assert_eq!(checks[2].check("db1", &stream).state, State::Crit);
        assert_eq!(checks[0].check("db1/appdb", &stream).state, State::Ok);
    }
}
