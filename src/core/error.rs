//! SF-009: Error taxonomy for a batch run.
//!
//! Each phase owns one error type. `RunError` is what the orchestrator and
//! the CLI see. Nothing in here retries.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by an execution backend. Zero rows is never an error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Partition planning failure.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("cannot load reference identifiers: {0}")]
    Reference(String),

    #[error("assignment line {line}: '{token}' is not an integer identifier")]
    InvalidIdentifier { line: usize, token: String },

    #[error("identifier {id} is assigned on both line {first_line} and line {second_line}")]
    OverlappingAssignment {
        id: i64,
        first_line: usize,
        second_line: usize,
    },

    #[error("cannot read assignment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Precondition gate failure. Always fatal; the run never starts.
#[derive(Debug, Error)]
pub enum GateFailure {
    #[error("pre-check found an empty table {0}")]
    EmptyTable(String),

    #[error("pre-check did not return any rows for sql {0}")]
    EmptyScript(String),

    #[error("pre-check table name '{0}' is not a valid identifier")]
    InvalidTable(String),

    #[error("pre-check backend error: {0}")]
    Backend(#[from] BackendError),
}

/// The target backend could not be reached before fan-out.
#[derive(Debug, Error)]
#[error("backend {target} unreachable: {reason}")]
pub struct ConnectivityFailure {
    pub target: String,
    pub reason: String,
}

/// Fan-out failure. Per-job logs and outputs stay on disk.
#[derive(Debug, Error)]
pub enum ExecutionFailure {
    #[error("execution failed while running {template} (failed jobs: {failed:?})")]
    JobsFailed { template: String, failed: Vec<usize> },

    #[error("cannot render template {template}: {reason}")]
    Template { template: String, reason: String },

    #[error("cannot start process runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("artifact error on {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Audit publish failure. Fatal for the phase it occurred in.
#[derive(Debug, Error)]
pub enum PublishFailure {
    #[error("unable to connect to queue {queue}: {reason}")]
    Connect { queue: String, reason: String },

    #[error("could not publish to {queue} for tables {tables:?}")]
    Send { queue: String, tables: Vec<String> },
}

/// Top-level run error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Gate(#[from] GateFailure),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityFailure),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error(transparent)]
    Publish(#[from] PublishFailure),

    #[error("run log {path}: {source}")]
    RunLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
