//! SF-005: Precondition gate.
//!
//! Refuses to start a run while a dependency table is empty or a check
//! script returns nothing. Checks run in order on one connection and stop
//! at the first empty result.

use super::error::GateFailure;
use super::runlog::RunLog;
use crate::backend::{Backend, Connection};
use regex::Regex;
use std::sync::LazyLock;

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)*$")
        .expect("table name pattern is valid")
});

/// Row counts observed by a passing gate, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
    pub checks: Vec<(String, u64)>,
}

pub struct Gate<'a> {
    backend: &'a dyn Backend,
    sample_rows: u32,
}

/// True if `name` is a plain or schema-qualified identifier.
pub fn is_table_name(name: &str) -> bool {
    TABLE_NAME.is_match(name)
}

/// Probe query for one table.
pub fn sample_query(table: &str, sample_rows: u32) -> String {
    format!("SELECT * FROM {} LIMIT {}", table, sample_rows)
}

impl<'a> Gate<'a> {
    pub fn new(backend: &'a dyn Backend, sample_rows: u32) -> Self {
        Self {
            backend,
            sample_rows: sample_rows.max(1),
        }
    }

    /// Run every table check, then every script check.
    pub fn check(
        &self,
        tables: &[String],
        scripts: &[String],
        log: &mut RunLog,
    ) -> Result<GateReport, GateFailure> {
        if let Some(bad) = tables.iter().find(|t| !is_table_name(t)) {
            return Err(GateFailure::InvalidTable(bad.clone()));
        }
        if tables.is_empty() && scripts.is_empty() {
            return Ok(GateReport::default());
        }

        let mut conn = self.backend.open()?;
        let result = self.run_checks(conn.as_mut(), tables, scripts, log);
        let closed = conn.close();
        let report = result?;
        closed?;
        Ok(report)
    }

    fn run_checks(
        &self,
        conn: &mut dyn Connection,
        tables: &[String],
        scripts: &[String],
        log: &mut RunLog,
    ) -> Result<GateReport, GateFailure> {
        let mut report = GateReport::default();

        for table in tables {
            let n = conn.count_rows(&sample_query(table, self.sample_rows))?;
            log.note(&format!("{} rows returned from {}", n, table));
            tracing::info!(table = %table, rows = n, "pre-check table");
            if n == 0 {
                return Err(GateFailure::EmptyTable(table.clone()));
            }
            report.checks.push((table.clone(), n));
        }

        for script in scripts {
            let n = conn.count_rows(script)?;
            log.note(&format!("{} rows returned from {}", n, script));
            tracing::info!(script = %script, rows = n, "pre-check script");
            if n == 0 {
                return Err(GateFailure::EmptyScript(script.clone()));
            }
            report.checks.push((script.clone(), n));
        }

        Ok(report)
    }
}
