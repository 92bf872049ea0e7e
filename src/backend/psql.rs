//! SF-012: PostgreSQL/Greenplum backend via the `psql` binary.
//!
//! Uses `psql` directly, no libpq binding. SQL is piped to stdin (not passed
//! as an argument) to avoid argument length limits and injection vectors.
//! Every call is its own short-lived session; `open` only proves the server
//! is reachable within `connect_timeout`.

use super::{Backend, Connection, Rows};
use crate::core::error::BackendError;
use std::io::Write;
use std::process::{Child, Command, Output, Stdio};

/// Field separator for `query_rows` (ASCII unit separator).
const FIELD_SEP: char = '\u{1f}';

/// `-0` terminates every record with NUL, so a row of empty values still
/// produces a record.
const RECORD_END: char = '\0';

/// Unaligned field separator when no delimiter is requested.
const DEFAULT_SEPARATOR: char = '|';

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub password: Option<String>,
    pub connect_timeout: u32,
}

pub struct PsqlBackend {
    params: PgParams,
}

impl PsqlBackend {
    pub fn new(params: PgParams) -> Self {
        Self { params }
    }
}

impl Backend for PsqlBackend {
    fn target(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.params.user, self.params.host, self.params.port, self.params.database
        )
    }

    fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
        let mut conn = PsqlConnection {
            params: self.params.clone(),
        };
        conn.run("select 1", &["-A"]).map_err(|e| BackendError::Connect {
            target: self.target(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(conn))
    }
}

struct PsqlConnection {
    params: PgParams,
}

impl PsqlConnection {
    /// Base command: no psqlrc, quiet, tuples only, stop on first error.
    fn command(&self, extra: &[&str]) -> Command {
        let p = &self.params;
        let mut cmd = Command::new("psql");
        cmd.args(["-h", &p.host])
            .args(["-p", &p.port.to_string()])
            .args(["-U", &p.user])
            .args(["-d", &p.database])
            .args(["-X", "-q", "-t", "-v", "ON_ERROR_STOP=1"])
            .args(extra)
            .args(["-f", "-"])
            .env("PGCONNECT_TIMEOUT", p.connect_timeout.to_string());
        if let Some(ref password) = p.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }

    fn run(&mut self, sql: &str, extra: &[&str]) -> Result<Output, BackendError> {
        run_child(self.command(extra), sql)
    }

    /// Unaligned run with `sep` between fields and NUL after every record.
    fn run_records(&mut self, sql: &str, sep: char) -> Result<String, BackendError> {
        let sep = sep.to_string();
        let output = self.run(sql, &["-A", "-0", "-F", &sep])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Feed `sql` on stdin and collect the output. The child is always reaped.
fn run_child(mut cmd: Command, sql: &str) -> Result<Output, BackendError> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackendError::Query(format!("failed to spawn psql: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(sql.as_bytes()) {
            drop(stdin);
            reap(&mut child);
            return Err(BackendError::Query(format!("stdin write error: {}", e)));
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|e| BackendError::Query(format!("psql wait error: {}", e)))?;

    if !output.status.success() {
        return Err(BackendError::Query(format!(
            "psql exit code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("psql kill: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!("psql wait after failed write: {}", e);
    }
}

/// Split NUL-terminated psql output into records. Only the final
/// terminator is dropped; empty records are rows.
fn records(stdout: &str) -> Vec<&str> {
    if stdout.is_empty() {
        return Vec::new();
    }
    let body = stdout.strip_suffix(RECORD_END).unwrap_or(stdout);
    body.split(RECORD_END).collect()
}

fn parse_rows(stdout: &str) -> Rows {
    records(stdout)
        .into_iter()
        .map(|record| record.split(FIELD_SEP).map(str::to_string).collect())
        .collect()
}

impl Connection for PsqlConnection {
    fn query_rows(&mut self, sql: &str) -> Result<Rows, BackendError> {
        let stdout = self.run_records(sql, FIELD_SEP)?;
        Ok(parse_rows(&stdout))
    }

    fn export(
        &mut self,
        sql: &str,
        out: &mut dyn Write,
        delimiter: Option<char>,
    ) -> Result<u64, BackendError> {
        let stdout = self.run_records(sql, delimiter.unwrap_or(DEFAULT_SEPARATOR))?;
        let mut count = 0u64;
        for record in records(&stdout) {
            writeln!(out, "{}", record)
                .map_err(|e| BackendError::Query(format!("output write error: {}", e)))?;
            count += 1;
        }
        Ok(count)
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}
