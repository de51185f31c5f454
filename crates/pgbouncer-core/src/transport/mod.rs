//! The sectioned, line oriented transport stream.
//!
//! ```text
//! <<<pgbouncer_pools:sep(59)>>>
//! [[[db1]]]
//! database;user;cl_active;...
//! appdb;app;12;...
//! <<<pgbouncer_pools:sep(59)>>>
//! [[[db2]]]
//! ...
//! ```
//!
//! A `<<<kind[:sep(N)]>>>` line opens a block of one section kind; `N` is the
//! character code of the field separator (whitespace when absent). Inside a
//! block every `[[[instance]]]` marker starts a sub-block whose first line is
//! the header row, followed by data rows. Blocks of the same kind may repeat;
//! their sub-blocks belong to one logical section.

mod parser;
mod records;

pub use parser::{Line, Section, SubBlock, TransportStream, parse_stream};
pub use records::{EntityRecord, EntityTable, MalformedSectionError, entities};

use std::io::{self, Write};

/// Section kinds emitted by the collector, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Instances,
    Clients,
    Pools,
    Databases,
    Limits,
    Version,
    ConnTime,
}

impl SectionKind {
    /// Fixed per-instance emission order.
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Instances,
        SectionKind::Clients,
        SectionKind::Pools,
        SectionKind::Databases,
        SectionKind::Limits,
        SectionKind::Version,
        SectionKind::ConnTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Instances => "pgbouncer_instances",
            SectionKind::Clients => "pgbouncer_clients",
            SectionKind::Pools => "pgbouncer_pools",
            SectionKind::Databases => "pgbouncer_databases",
            SectionKind::Limits => "pgbouncer_limits",
            SectionKind::Version => "pgbouncer_version",
            SectionKind::ConnTime => "pgbouncer_conn_time",
        }
    }

    /// Field separator declared in the section header.
    pub fn separator(self) -> Option<char> {
        match self {
            SectionKind::Clients | SectionKind::Pools | SectionKind::Databases => Some(';'),
            // SOH never occurs in a version string, so the line stays one field
            SectionKind::Version => Some('\u{1}'),
            SectionKind::Instances | SectionKind::Limits | SectionKind::ConnTime => None,
        }
    }

    pub fn header(self) -> SectionHeader {
        SectionHeader {
            name: self.name().to_string(),
            separator: self.separator(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// A parsed `<<<name:sep(N)>>>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    /// `None` means rows split on whitespace.
    pub separator: Option<char>,
}

impl SectionHeader {
    /// Parses a section header line.
    ///
    /// Options other than `sep(N)` (e.g. `cached(...)`) are accepted and
    /// ignored. Returns `None` for anything that is not a header.
    pub fn parse(line: &str) -> Option<Self> {
        let inner = line.strip_prefix("<<<")?.strip_suffix(">>>")?;
        let mut parts = inner.split(':');
        let name = parts.next().filter(|n| !n.is_empty())?;
        let mut separator = None;
        for option in parts {
            if let Some(code) = option
                .strip_prefix("sep(")
                .and_then(|o| o.strip_suffix(')'))
            {
                separator = Some(char::from_u32(code.trim().parse().ok()?)?);
            }
        }
        Some(Self {
            name: name.to_string(),
            separator,
        })
    }

    pub fn render(&self) -> String {
        match self.separator {
            Some(sep) => format!("<<<{}:sep({})>>>", self.name, sep as u32),
            None => format!("<<<{}>>>", self.name),
        }
    }

    /// Splits one row according to the declared separator.
    pub fn split(&self, line: &str) -> Vec<String> {
        match self.separator {
            Some(sep) => line.split(sep).map(str::to_string).collect(),
            None => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Parses an `[[[instance]]]` marker line.
pub fn parse_instance_marker(line: &str) -> Option<&str> {
    line.strip_prefix("[[[")?
        .strip_suffix("]]]")
        .filter(|name| !name.is_empty())
}

pub fn instance_marker(instance: &str) -> String {
    format!("[[[{}]]]", instance)
}

/// Writes one block: section header, instance marker and body rows.
///
/// An empty body produces no row at all, so an unreachable instance still
/// yields a syntactically valid, empty sub-block. Blank rows are not
/// representable in the stream and are dropped, including the row of a
/// single-column table whose only field is empty.
pub fn write_block<W: Write>(
    out: &mut W,
    header: &SectionHeader,
    instance: &str,
    body: &str,
) -> io::Result<()> {
    writeln!(out, "{}", header.render())?;
    writeln!(out, "{}", instance_marker(instance))?;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

/// Renders a header row and data rows joined by `separator`.
///
/// A row that renders to an empty line is lost once written with
/// [`write_block`]; with two or more columns this cannot happen.
pub fn render_rows(columns: &[String], rows: &[Vec<String>], separator: char) -> String {
    let sep = separator.to_string();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(columns.join(&sep));
    for row in rows {
        lines.push(row.join(&sep));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        assert_eq!(
            SectionHeader::parse("<<<pgbouncer_pools:sep(59)>>>"),
            Some(SectionHeader {
                name: "pgbouncer_pools".into(),
                separator: Some(';'),
            })
        );
        assert_eq!(
            SectionHeader::parse("<<<pgbouncer_limits>>>"),
            Some(SectionHeader {
                name: "pgbouncer_limits".into(),
                separator: None,
            })
        );
        assert_eq!(
            SectionHeader::parse("<<<x:cached(123,456):sep(124)>>>")
                .unwrap()
                .separator,
            Some('|')
        );
        assert_eq!(SectionHeader::parse("[[[db1]]]"), None);
        assert_eq!(SectionHeader::parse("<<<>>>"), None);
        assert_eq!(SectionHeader::parse("<<<x:sep(abc)>>>"), None);
    }

    #[test]
    fn test_header_render_matches_kinds() {
        assert_eq!(
            SectionKind::Pools.header().render(),
            "<<<pgbouncer_pools:sep(59)>>>"
        );
        assert_eq!(
            SectionKind::Version.header().render(),
            "<<<pgbouncer_version:sep(1)>>>"
        );
        assert_eq!(
            SectionKind::ConnTime.header().render(),
            "<<<pgbouncer_conn_time>>>"
        );
        for kind in SectionKind::ALL {
            assert_eq!(SectionKind::from_name(kind.name()), Some(kind));
            assert_eq!(SectionHeader::parse(&kind.header().render()), Some(kind.header()));
        }
    }

    #[test]
    fn test_instance_marker() {
        assert_eq!(parse_instance_marker("[[[db1]]]"), Some("db1"));
        assert_eq!(parse_instance_marker("[[[]]]"), None);
        assert_eq!(parse_instance_marker("[[db1]]"), None);
        assert_eq!(instance_marker("db1"), "[[[db1]]]");
    }

    #[test]
    fn test_write_block_empty_body() {
        let mut out = Vec::new();
        write_block(&mut out, &SectionKind::Pools.header(), "db1", "").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<<<pgbouncer_pools:sep(59)>>>\n[[[db1]]]\n"
        );
    }

    #[test]
    fn test_split_whitespace_section() {
        let header = SectionKind::Limits.header();
        assert_eq!(header.split("max_client_conn  400"), vec!["max_client_conn", "400"]);
    }

    #[test]
    fn test_empty_single_column_row_is_dropped() {
        let columns = vec!["name".to_string()];
        let rows = vec![vec!["a".to_string()], vec![String::new()], vec!["b".to_string()]];
        let body = render_rows(&columns, &rows, ';');
        assert_eq!(body, "name\na\n\nb");

        let mut out = Vec::new();
        write_block(&mut out, &SectionKind::Databases.header(), "db1", &body).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("\n\n"));

        let stream = parse_stream(&text);
        let block = stream.section("pgbouncer_databases").unwrap().block("db1").unwrap();
        let parsed: Vec<&[String]> = block.data().iter().map(|l| l.fields.as_slice()).collect();
        assert_eq!(parsed, vec![&rows[0][..], &rows[2][..]]);

        // an empty field next to a non-empty one survives
        let rows = vec![vec![String::new(), "x".to_string()]];
        let body = render_rows(&["a".to_string(), "b".to_string()], &rows, ';');
        let mut out = Vec::new();
        write_block(&mut out, &SectionKind::Databases.header(), "db1", &body).unwrap();
        let stream = parse_stream(&String::from_utf8(out).unwrap());
        let block = stream.section("pgbouncer_databases").unwrap().block("db1").unwrap();
        assert_eq!(block.data()[0].fields, rows[0]);
    }
}
