//! Mapping of tabular sub-blocks to keyed entity records.

use std::collections::BTreeMap;

use serde::Serialize;

use super::parser::Section;

/// One data row mapped from column names to values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub instance: String,
    /// `instance/<identity column values>`, e.g. `db1/appdb/app`.
    pub identity: String,
    /// Column/value pairs in header order.
    pub values: Vec<(String, String)>,
}

impl EntityRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.iter().any(|(c, _)| c == column)
    }

    /// Values in header order.
    pub fn row(&self) -> Vec<&str> {
        self.values.iter().map(|(_, v)| v.as_str()).collect()
    }
}

/// A data row that could not be mapped. Parsing continues after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MalformedSectionError {
    /// Field count differs from the header's column count.
    FieldCount {
        section: String,
        instance: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    /// The header lacks a column the identity is built from.
    MissingIdentity {
        section: String,
        instance: String,
        line: usize,
        column: String,
    },
}

impl std::fmt::Display for MalformedSectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedSectionError::FieldCount {
                section,
                instance,
                line,
                expected,
                found,
            } => write!(
                f,
                "{} [{}] line {}: expected {} fields, found {}",
                section, instance, line, expected, found
            ),
            MalformedSectionError::MissingIdentity {
                section,
                instance,
                line,
                column,
            } => write!(
                f,
                "{} [{}] line {}: missing identity column {}",
                section, instance, line, column
            ),
        }
    }
}

impl std::error::Error for MalformedSectionError {}

/// Records of one section keyed by identity, plus the rows that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityTable {
    pub records: BTreeMap<String, EntityRecord>,
    pub errors: Vec<MalformedSectionError>,
}

impl EntityTable {
    pub fn get(&self, identity: &str) -> Option<&EntityRecord> {
        self.records.get(identity)
    }

    /// Identities in sorted order.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

/// Maps every data row of `section` to an [`EntityRecord`].
///
/// The identity is the instance name followed by the values of
/// `identity_columns`, joined by `/`. A repeated identity replaces the
/// earlier record.
pub fn entities(section: &Section, identity_columns: &[&str]) -> EntityTable {
    let mut table = EntityTable::default();

    for block in &section.blocks {
        let Some(columns) = block.header() else {
            continue;
        };

        for line in block.data() {
            if line.fields.len() != columns.len() {
                table.errors.push(MalformedSectionError::FieldCount {
                    section: section.name.clone(),
                    instance: block.instance.clone(),
                    line: line.number,
                    expected: columns.len(),
                    found: line.fields.len(),
                });
                continue;
            }

            let values: Vec<(String, String)> = columns
                .iter()
                .cloned()
                .zip(line.fields.iter().cloned())
                .collect();
            let record_value = |column: &str| {
                values
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.clone())
            };

            let mut identity = vec![block.instance.clone()];
            let mut missing = None;
            for &column in identity_columns {
                match record_value(column) {
                    Some(v) => identity.push(v),
                    None => {
                        missing = Some(column.to_string());
                        break;
                    }
                }
            }
            if let Some(column) = missing {
                table.errors.push(MalformedSectionError::MissingIdentity {
                    section: section.name.clone(),
                    instance: block.instance.clone(),
                    line: line.number,
                    column,
                });
                continue;
            }

            let identity = identity.join("/");
            table.records.insert(
                identity.clone(),
                EntityRecord {
                    instance: block.instance.clone(),
                    identity,
                    values,
                },
            );
        }
    }

    table
}
