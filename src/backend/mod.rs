//! SF-010: Execution backend abstraction over SQLite and psql.
//!
//! A `Backend` hands out independent `Connection`s. Every worker process,
//! the gate, and the planner open their own; nothing is shared.

pub mod psql;
pub mod sqlite;

use crate::core::error::BackendError;
use crate::core::types::BackendSpec;
use std::io::Write;
use std::time::Duration;

/// Rows as text, one `Vec` per row.
pub type Rows = Vec<Vec<String>>;

/// A data store that can be connected to.
pub trait Backend: Send + Sync {
    /// Human-readable target name for errors and logs.
    fn target(&self) -> String;

    /// Open a fresh connection. Honors the backend's connect timeout.
    fn open(&self) -> Result<Box<dyn Connection>, BackendError>;
}

/// One open session.
pub trait Connection {
    /// Run a query and return all rows.
    fn query_rows(&mut self, sql: &str) -> Result<Rows, BackendError>;

    /// Run a query and count the rows it returns.
    fn count_rows(&mut self, sql: &str) -> Result<u64, BackendError> {
        Ok(self.query_rows(sql)?.len() as u64)
    }

    /// Run a query and stream its rows to `out`. `None` means the backend's
    /// default text layout. Returns the number of rows written.
    fn export(
        &mut self,
        sql: &str,
        out: &mut dyn Write,
        delimiter: Option<char>,
    ) -> Result<u64, BackendError>;

    /// Release the session.
    fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Build the backend for a spec.
pub fn from_spec(spec: &BackendSpec) -> Box<dyn Backend> {
    match spec {
        BackendSpec::Sqlite {
            path,
            busy_timeout_ms,
        } => Box::new(sqlite::SqliteBackend::new(
            path.clone(),
            Duration::from_millis(*busy_timeout_ms),
        )),
        BackendSpec::Postgres {
            host,
            port,
            user,
            database,
            password,
            connect_timeout,
        } => Box::new(psql::PsqlBackend::new(psql::PgParams {
            host: host.clone(),
            port: *port,
            user: user.clone(),
            database: database.clone(),
            password: password.clone(),
            connect_timeout: *connect_timeout,
        })),
    }
}

/// Write one row joined by `sep`.
pub(crate) fn write_row(out: &mut dyn Write, row: &[String], sep: &str) -> std::io::Result<()> {
    writeln!(out, "{}", row.join(sep))
}

/// Write rows joined by `delimiter`, one per line.
#[cfg(test)]
pub(crate) fn write_rows(
    out: &mut dyn Write,
    rows: &Rows,
    delimiter: char,
) -> Result<u64, std::io::Error> {
    let sep = delimiter.to_string();
    for row in rows {
        write_row(out, row, &sep)?;
    }
    Ok(rows.len() as u64)
}
