//! SF-001: Configuration and run types.
//!
//! Defines the YAML schema for `batch.yaml`, plus the in-memory types that
//! flow between planner, executor, and ledger.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Top-level batch.yaml
// ============================================================================

/// Root configuration for one batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable job name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Backend used by the gate, the planner, and every worker
    pub target: String,

    /// Named backends (order-preserving)
    #[serde(default)]
    pub backends: IndexMap<String, BackendSpec>,

    /// Directory layout
    #[serde(default)]
    pub paths: Paths,

    /// What to run and what to check first
    pub run: RunSpec,

    /// Partitioning of the template (absent = single job)
    #[serde(default)]
    pub partitions: Option<PartitionSpec>,

    /// Audit ledger (absent = no audit events)
    #[serde(default)]
    pub audit: Option<AuditSpec>,

    /// How workers are launched
    #[serde(default)]
    pub worker: WorkerSpec,
}

impl BatchConfig {
    /// The backend named by `target`.
    pub fn target_backend(&self) -> Option<&BackendSpec> {
        self.backends.get(&self.target)
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Connection settings for one data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum BackendSpec {
    /// Local SQLite database file
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_busy_timeout_ms")]
        busy_timeout_ms: u64,
    },

    /// PostgreSQL or Greenplum, driven through the `psql` binary
    Postgres {
        host: String,
        #[serde(default = "default_pg_port")]
        port: u16,
        user: String,
        database: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default = "default_connect_timeout")]
        connect_timeout: u32,
    },
}

impl BackendSpec {
    pub fn adapter(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "sqlite",
            Self::Postgres { .. } => "postgres",
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    10_000
}

fn default_pg_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u32 {
    10
}

// ============================================================================
// Paths
// ============================================================================

/// Where templates, scratch files, logs, and outputs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    #[serde(default = "default_sql_dir")]
    pub sql_dir: PathBuf,

    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            sql_dir: default_sql_dir(),
            temp_dir: default_temp_dir(),
            log_dir: default_log_dir(),
            out_dir: default_out_dir(),
        }
    }
}

fn default_sql_dir() -> PathBuf {
    PathBuf::from("sql")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

// ============================================================================
// Run
// ============================================================================

/// The template to run and its preconditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    /// Template stem: `<sql_dir>/<file_name>.sql`
    pub file_name: String,

    /// Run the template at all (false = checks and audit only)
    #[serde(default = "default_true")]
    pub execute: bool,

    /// Write delimiter-separated output
    #[serde(default)]
    pub delimited: bool,

    /// Field delimiter for delimited output
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Row cap for table pre-checks
    #[serde(default = "default_sample_rows")]
    pub sample_rows: u32,

    /// Pause between worker launches
    #[serde(default)]
    pub launch_stagger_ms: u64,

    /// Tables that must not be empty
    #[serde(default)]
    pub pre_check_tables: Vec<String>,

    /// Queries that must return at least one row
    #[serde(default)]
    pub pre_check_scripts: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}

fn default_sample_rows() -> u32 {
    5
}

// ============================================================================
// Partitions
// ============================================================================

/// Inputs for the partition planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Query whose first column is the reference identifier universe
    pub reference_query: String,

    /// File of comma-separated identifier lines, one line per partition
    pub assignment_file: PathBuf,

    /// Condition selecting the special-case rows
    pub special_condition: String,

    /// Complement of `special_condition` (default: `NOT (<special>)`)
    #[serde(default)]
    pub other_condition: Option<String>,
}

impl PartitionSpec {
    pub fn conditions(&self) -> Conditions {
        Conditions::new(&self.special_condition, self.other_condition.as_deref())
    }
}

/// The special-case condition and its complement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditions {
    pub special: String,
    pub other: String,
}

impl Conditions {
    pub fn new(special: &str, other: Option<&str>) -> Self {
        let other = match other {
            Some(o) => o.to_string(),
            None => format!("NOT ({})", special),
        };
        Self {
            special: special.to_string(),
            other,
        }
    }
}

/// One partition: a position and its identifier subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub ids: Vec<i64>,
}

/// Template bindings for one job, keyed by placeholder name.
pub type Bindings = IndexMap<String, String>;

/// Named substitution values for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    pub ids: Vec<i64>,
    pub condition: String,
    pub partition: String,
    pub sub_partition: String,
}

impl ParameterSet {
    /// Identifiers joined with commas, in partition order.
    pub fn id_list(&self) -> String {
        self.ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Bindings exposed to the query template.
    pub fn bindings(&self) -> Bindings {
        let mut b = IndexMap::new();
        b.insert("ids".to_string(), self.id_list());
        b.insert("cond".to_string(), self.condition.clone());
        b.insert("prt_name".to_string(), self.partition.clone());
        b.insert("sub_prt_name".to_string(), self.sub_partition.clone());
        b
    }
}

/// Planner output.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Every partition including the synthetic trailing one
    pub partitions: Vec<Partition>,

    /// Parameter sets in ascending partition order
    pub parameter_sets: Vec<ParameterSet>,

    /// Identifiers in the universe but in no assignment line
    pub missing: Vec<i64>,
}

// ============================================================================
// Audit
// ============================================================================

/// Audit ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSpec {
    /// Table that the consumer writes audit rows into
    pub audit_table: String,

    /// Queue the events go to
    pub queue: String,

    /// Tables this run touches (one event each)
    #[serde(default)]
    pub load_tables: Vec<String>,

    /// Where messages are sent
    pub publisher: PublisherSpec,
}

/// Publisher backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublisherSpec {
    /// Durable append-only JSONL file per queue
    Spool { dir: PathBuf },

    /// External publish program, message on stdin
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Audit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pre,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// One audit message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub run_id: String,
    pub phase: Phase,
    pub load_tables: String,
    pub load_description: String,
    pub audit_table: String,
    pub load_time: String,
}

// ============================================================================
// Workers
// ============================================================================

/// Worker launch strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerSpec {
    /// Re-run this binary as `sqlfan worker`
    #[default]
    Native,

    /// Run a command line through bash with `{query}`/`{out}`/`{log}`/`{index}`
    Shell { command: String },
}

/// Final state of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Exited(i32),
    Signaled,
    LaunchFailed(String),
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        *self == Self::Succeeded
    }

    pub fn from_status(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Succeeded,
            Some(code) => Self::Exited(code),
            None => Self::Signaled,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "exitcode = 0"),
            Self::Exited(code) => write!(f, "exitcode = {}", code),
            Self::Signaled => write!(f, "signal"),
            Self::LaunchFailed(reason) => write!(f, "launch failure: {}", reason),
        }
    }
}

/// Outcome of one job, as reported to the coordinator.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub index: usize,
    pub outcome: JobOutcome,
    pub finished_at: String,
}

// ============================================================================
// Tests
// ============================================================================
