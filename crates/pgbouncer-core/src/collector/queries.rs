//! Admin console commands behind each transport section.

use super::backend::QueryOptions;
use crate::transport::SectionKind;

/// How one section's body is obtained from the admin console.
#[derive(Debug, Clone)]
pub struct AdminQuery {
    pub kind: SectionKind,
    pub command: &'static str,
    pub options: QueryOptions,
    /// Keeps only rows starting with this prefix.
    pub row_prefix: Option<&'static str>,
}

/// Console queries in emission order.
///
/// `pgbouncer_instances` carries only the marker, and the version and
/// connection time sections come from the probe, so they have no entry.
pub fn admin_queries() -> Vec<AdminQuery> {
    vec![
        AdminQuery {
            kind: SectionKind::Clients,
            command: "SHOW CLIENTS;",
            options: QueryOptions::tabular(),
            row_prefix: None,
        },
        AdminQuery {
            kind: SectionKind::Pools,
            command: "SHOW POOLS;",
            options: QueryOptions::tabular(),
            row_prefix: None,
        },
        AdminQuery {
            kind: SectionKind::Databases,
            command: "SHOW DATABASES;",
            options: QueryOptions::tabular(),
            row_prefix: None,
        },
        AdminQuery {
            kind: SectionKind::Limits,
            command: "SHOW CONFIG;",
            // the limits section splits on whitespace
            options: QueryOptions {
                field_separator: ' ',
                ..QueryOptions::tabular()
            },
            row_prefix: Some("max_"),
        }
        .rows_only(),
    ]
}

impl AdminQuery {
    fn rows_only(mut self) -> Self {
        self.options.rows_only = true;
        self
    }

    /// Applies the row filter to sanitized output.
    pub fn filter(&self, sanitized: &str) -> String {
        match self.row_prefix {
            Some(prefix) => sanitized
                .lines()
                .filter(|l| l.starts_with(prefix))
                .collect::<Vec<_>>()
                .join("\n"),
            None => sanitized.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_follow_section_order() {
        let kinds: Vec<SectionKind> = admin_queries().iter().map(|q| q.kind).collect();
        let expected: Vec<SectionKind> = SectionKind::ALL
            .into_iter()
            .filter(|k| kinds.contains(k))
            .collect();
        assert_eq!(kinds, expected);
    }

    #[test]
    fn test_limits_query() {
        let limits = admin_queries()
            .into_iter()
            .find(|q| q.kind == SectionKind::Limits)
            .unwrap();
        assert!(limits.options.rows_only);
        assert_eq!(limits.options.field_separator, ' ');
        assert_eq!(
            limits.filter("listen_port 6432\nmax_client_conn 400\nmax_db_connections 0"),
            "max_client_conn 400\nmax_db_connections 0"
        );
    }

    #[test]
    fn test_tabular_queries_keep_header() {
        for q in admin_queries()
            .iter()
            .filter(|q| q.kind != SectionKind::Limits)
        {
            assert!(!q.options.rows_only, "{:?}", q.kind);
            assert_eq!(q.options.field_separator, ';');
        }
    }
}
