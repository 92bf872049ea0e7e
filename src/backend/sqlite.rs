//! SF-011: SQLite backend via rusqlite.
//!
//! The database file must already exist; opening never creates one, so a
//! missing file surfaces as a connectivity failure rather than an empty store.

use super::{write_row, Backend, Connection, Rows};
use crate::core::error::BackendError;
use rusqlite::types::ValueRef;
use rusqlite::OpenFlags;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Text layout separator when no delimiter is requested (sqlite3 CLI style).
const DEFAULT_SEPARATOR: char = '|';

pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteBackend {
    pub fn new(path: PathBuf, busy_timeout: Duration) -> Self {
        Self { path, busy_timeout }
    }
}

impl Backend for SqliteBackend {
    fn target(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = rusqlite::Connection::open_with_flags(&self.path, flags).map_err(|e| {
            BackendError::Connect {
                target: self.target(),
                reason: e.to_string(),
            }
        })?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| BackendError::Connect {
                target: self.target(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
}

fn query_err(e: rusqlite::Error) -> BackendError {
    BackendError::Query(e.to_string())
}

fn value_text(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
    }
}

impl SqliteConnection {
    /// Run every statement in `sql` in order. Rows from each statement that
    /// returns columns are passed to `f`, the way `psql -f` prints them.
    /// Each statement is prepared only after the previous one ran, so later
    /// statements may depend on earlier ones.
    fn for_each_row(
        &mut self,
        sql: &str,
        mut f: impl FnMut(Vec<String>) -> Result<(), BackendError>,
    ) -> Result<u64, BackendError> {
        let mut batch = rusqlite::Batch::new(&self.conn, sql);
        let mut count = 0u64;
        while let Some(mut stmt) = batch.next().map_err(query_err)? {
            let columns = stmt.column_count();
            if columns == 0 {
                stmt.execute([]).map_err(query_err)?;
                continue;
            }
            let mut rows = stmt.query([]).map_err(query_err)?;
            while let Some(row) = rows.next().map_err(query_err)? {
                let mut values = Vec::with_capacity(columns);
                for i in 0..columns {
                    values.push(value_text(row.get_ref(i).map_err(query_err)?));
                }
                f(values)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Connection for SqliteConnection {
    fn query_rows(&mut self, sql: &str) -> Result<Rows, BackendError> {
        let mut out = Vec::new();
        self.for_each_row(sql, |row| {
            out.push(row);
            Ok(())
        })?;
        Ok(out)
    }

    fn count_rows(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.for_each_row(sql, |_| Ok(()))
    }

    fn export(
        &mut self,
        sql: &str,
        out: &mut dyn Write,
        delimiter: Option<char>,
    ) -> Result<u64, BackendError> {
        let sep = delimiter.unwrap_or(DEFAULT_SEPARATOR).to_string();
        self.for_each_row(sql, |row| {
            write_row(out, &row, &sep)
                .map_err(|e| BackendError::Query(format!("output write error: {}", e)))
        })
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.conn.close().map_err(|(_, e)| query_err(e))
    }
}
