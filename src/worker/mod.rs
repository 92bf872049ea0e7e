//! SF-013: Worker launch and the worker process entry point.
//!
//! The executor asks a `Launcher` for one OS command per job. Workers never
//! share a connection or a file handle with the coordinator; each opens its
//! own backend session.

pub mod native;
pub mod shell;

use crate::backend;
use crate::core::artifacts::JobArtifacts;
use crate::core::runlog::now_local;
use crate::core::types::{BackendSpec, WorkerSpec};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

/// A ready-to-spawn worker command. `stdin`, if set, is written to the
/// child and then closed.
#[derive(Debug)]
pub struct LaunchCommand {
    pub command: Command,
    pub stdin: Option<String>,
}

/// Builds the OS command for one job.
pub trait Launcher: Send + Sync {
    fn command(&self, job: &JobArtifacts) -> Result<LaunchCommand, String>;
}

/// Everything a worker needs, sent as JSON on its stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub backend: BackendSpec,
    pub query_file: PathBuf,
    pub out_file: PathBuf,
    #[serde(default)]
    pub delimiter: Option<char>,
}

/// Build the launcher configured for a run.
pub fn from_spec(
    spec: &WorkerSpec,
    backend: &BackendSpec,
    delimiter: Option<char>,
) -> Result<Box<dyn Launcher>, String> {
    match spec {
        WorkerSpec::Native => Ok(Box::new(native::NativeLauncher::current(
            backend.clone(),
            delimiter,
        )?)),
        WorkerSpec::Shell { command } => Ok(Box::new(shell::ShellLauncher::new(command))),
    }
}

/// Worker body: run one query file against its own connection and write
/// the rows to the output file. Progress lines go to `report`, which is
/// the job log when run as `sqlfan worker`.
pub fn run_task(task: &WorkerTask, report: &mut dyn Write) -> Result<u64, String> {
    let started = Instant::now();
    let name = task.query_file.display().to_string();
    writeln!(report, "Started {} at {}", name, now_local()).map_err(|e| e.to_string())?;

    let sql = std::fs::read_to_string(&task.query_file)
        .map_err(|e| format!("cannot read {}: {}", name, e))?;
    let file = File::create(&task.out_file)
        .map_err(|e| format!("cannot create {}: {}", task.out_file.display(), e))?;
    let mut out = BufWriter::new(file);

    let backend = backend::from_spec(&task.backend);
    let mut conn = backend.open().map_err(|e| e.to_string())?;
    let exported = conn.export(&sql, &mut out, task.delimiter);
    let closed = conn.close();
    let rows = exported.map_err(|e| e.to_string())?;
    closed.map_err(|e| e.to_string())?;
    out.flush()
        .map_err(|e| format!("cannot flush {}: {}", task.out_file.display(), e))?;

    writeln!(report, "Ended {} at {}", name, now_local()).map_err(|e| e.to_string())?;
    writeln!(
        report,
        "{} rows in {} ms",
        rows,
        started.elapsed().as_millis()
    )
    .map_err(|e| e.to_string())?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("wh.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "create table accounts (employer_id integer, name text);
             insert into accounts values (10, 'acme'), (20, 'globex');",
        )
        .unwrap();
        path
    }

    fn task(dir: &std::path::Path, sql: &str, delimiter: Option<char>) -> WorkerTask {
        let query_file = dir.join("q_1.sql");
        std::fs::write(&query_file, sql).unwrap();
        WorkerTask {
            backend: BackendSpec::Sqlite {
                path: seeded_db(dir),
                busy_timeout_ms: 1000,
            },
            query_file,
            out_file: dir.join("q_1.out"),
            delimiter,
        }
    }

    #[test]
    fn test_sf013_run_task_exports_rows() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(
            dir.path(),
            "select employer_id, name from accounts order by 1;",
            Some(','),
        );
        let mut report = Vec::new();
        let rows = run_task(&t, &mut report).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            std::fs::read_to_string(&t.out_file).unwrap(),
            "10,acme\n20,globex\n"
        );
        let report = String::from_utf8(report).unwrap();
        let lines: Vec<_> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Started "));
        assert!(lines[1].starts_with("Ended "));
        assert!(lines[2].starts_with("2 rows in "));
    }

    #[test]
    fn test_sf013_run_task_bad_sql() {
        let dir = tempfile::tempdir().unwrap();
        let t = task(dir.path(), "select * from nowhere", None);
        let mut report = Vec::new();
        let err = run_task(&t, &mut report).unwrap_err();
        assert!(err.contains("nowhere"));
    }

    #[test]
    fn test_sf013_run_task_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = task(dir.path(), "select 1", None);
        t.backend = BackendSpec::Sqlite {
            path: dir.path().join("ghost.db"),
            busy_timeout_ms: 10,
        };
        assert!(run_task(&t, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_sf013_task_json() {
        let t = WorkerTask {
            backend: BackendSpec::Sqlite {
                path: "/d/wh.db".into(),
                busy_timeout_ms: 50,
            },
            query_file: "/t/q_1.sql".into(),
            out_file: "/t/q_1.out".into(),
            delimiter: Some('|'),
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"adapter\":\"sqlite\""));
        let back: WorkerTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_sf013_from_spec_shell() {
        let backend = BackendSpec::Sqlite {
            path: "/d/wh.db".into(),
            busy_timeout_ms: 50,
        };
        let spec = WorkerSpec::Shell {
            command: "cat {query} > {out}".into(),
        };
        let launcher = from_spec(&spec, &backend, None).unwrap();
        let layout = crate::core::artifacts::ArtifactLayout::new(std::path::Path::new("/t"), "q");
        let cmd = launcher.command(&layout.job(1)).unwrap();
        assert_eq!(cmd.command.get_program(), "bash");
        assert!(cmd.stdin.is_none());
    }
}
