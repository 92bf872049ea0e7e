//! SF-017: CLI subcommands: init, validate, plan, check, run, audit, worker.
//!
//! Relative paths in batch.yaml resolve against the directory holding the
//! file, so a job directory can be run from anywhere.

use crate::backend;
use crate::core::gate::Gate;
use crate::core::orchestrator::{resolve, RunContext, RunPaths};
use crate::core::runlog::RunLog;
use crate::core::types::{BackendSpec, BatchConfig, PartitionSpec, Phase, PublisherSpec};
use crate::core::{parser, planner};
use crate::ledger::runid::RunId;
use crate::ledger::{self, Ledger};
use crate::worker::{self, WorkerTask};
use clap::{Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new batch job directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate batch.yaml without connecting to any backend
    Validate {
        /// Path to batch.yaml
        #[arg(short, long, default_value = "batch.yaml")]
        file: PathBuf,
    },

    /// Show partitions and the jobs they expand to
    Plan {
        /// Path to batch.yaml
        #[arg(short, long, default_value = "batch.yaml")]
        file: PathBuf,
    },

    /// Run the precondition checks only
    Check {
        /// Path to batch.yaml
        #[arg(short, long, default_value = "batch.yaml")]
        file: PathBuf,
    },

    /// Check, plan, audit, and fan out the query
    Run {
        /// Path to batch.yaml
        #[arg(short, long, default_value = "batch.yaml")]
        file: PathBuf,

        /// Run checks and audit events but not the query
        #[arg(long)]
        no_execute: bool,
    },

    /// Publish one audit phase by hand
    Audit {
        /// Path to batch.yaml
        #[arg(short, long, default_value = "batch.yaml")]
        file: PathBuf,

        /// Which phase to publish
        #[arg(long, value_enum)]
        phase: PhaseArg,

        /// Reuse an existing run id (default: new one)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Execute one job (task JSON on stdin)
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseArg {
    Pre,
    Post,
}

impl From<PhaseArg> for Phase {
    fn from(p: PhaseArg) -> Self {
        match p {
            PhaseArg::Pre => Phase::Pre,
            PhaseArg::Post => Phase::Post,
        }
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file } => cmd_plan(&file),
        Commands::Check { file } => cmd_check(&file),
        Commands::Run { file, no_execute } => cmd_run(&file, no_execute),
        Commands::Audit {
            file,
            phase,
            run_id,
        } => cmd_audit(&file, phase.into(), run_id.as_deref()),
        Commands::Worker => cmd_worker(),
    }
}

const INIT_CONFIG: &str = r#"version: "1.0"
name: my-batch
description: "Partitioned batch query"
target: warehouse

backends:
  warehouse:
    adapter: sqlite
    path: warehouse.db

paths:
  sql_dir: sql
  temp_dir: tmp
  log_dir: logs
  out_dir: out

run:
  file_name: query
  delimited: true
  delimiter: ","
  pre_check_tables: []
  pre_check_scripts: []

# partitions:
#   reference_query: "select employer_id from accounts group by 1"
#   assignment_file: employer_sets.cfg
#   special_condition: "carrier_id = 15"

# audit:
#   audit_table: adm.load_audit
#   queue: load_audit
#   load_tables: []
#   publisher: { kind: spool, dir: queue }
"#;

const INIT_QUERY: &str = "select 1;\n";

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("batch.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    for dir in ["sql", "tmp", "logs", "out"] {
        std::fs::create_dir_all(path.join(dir))
            .map_err(|e| format!("cannot create {}/: {}", dir, e))?;
    }
    std::fs::write(&config_path, INIT_CONFIG)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;
    let query_path = path.join("sql").join("query.sql");
    std::fs::write(&query_path, INIT_QUERY)
        .map_err(|e| format!("cannot write {}: {}", query_path.display(), e))?;

    println!("Initialized batch job at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}", query_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} (target {}, {} backend(s), {})",
            config.name,
            config.target,
            config.backends.len(),
            if config.partitions.is_some() {
                "partitioned"
            } else {
                "single job"
            }
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a batch config, returning it with its base directory.
fn load(file: &Path) -> Result<(BatchConfig, PathBuf), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err("validation failed".to_string());
    }
    let base = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((config, base))
}

/// The target backend with file paths resolved against `base`.
fn target_spec(config: &BatchConfig, base: &Path) -> Result<BackendSpec, String> {
    let spec = config
        .target_backend()
        .ok_or_else(|| format!("target '{}' is not a declared backend", config.target))?;
    Ok(match spec {
        BackendSpec::Sqlite {
            path,
            busy_timeout_ms,
        } => BackendSpec::Sqlite {
            path: resolve(base, path),
            busy_timeout_ms: *busy_timeout_ms,
        },
        other => other.clone(),
    })
}

fn publisher_spec(spec: &PublisherSpec, base: &Path) -> PublisherSpec {
    match spec {
        PublisherSpec::Spool { dir } => PublisherSpec::Spool {
            dir: resolve(base, dir),
        },
        other => other.clone(),
    }
}

fn cmd_plan(file: &Path) -> Result<(), String> {
    let (config, base) = load(file)?;
    let Some(ref partitions) = config.partitions else {
        println!("Planning: {} (single job, no partitions)", config.name);
        return Ok(());
    };
    let spec = PartitionSpec {
        assignment_file: resolve(&base, &partitions.assignment_file),
        ..partitions.clone()
    };
    let backend = backend::from_spec(&target_spec(&config, &base)?);
    let plan = planner::plan_from_backend(backend.as_ref(), &spec).map_err(|e| e.to_string())?;

    println!(
        "Planning: {} ({} partitions, {} jobs)",
        config.name,
        plan.partitions.len(),
        plan.parameter_sets.len()
    );
    println!();
    for (k, set) in plan.parameter_sets.iter().enumerate() {
        println!(
            "  job {:>3}: {}/{} ({} ids) where {}",
            k + 1,
            set.partition,
            set.sub_partition,
            set.ids.len(),
            set.condition
        );
    }
    println!();
    println!("Unassigned identifiers: {}", plan.missing.len());
    Ok(())
}

fn cmd_check(file: &Path) -> Result<(), String> {
    let (config, base) = load(file)?;
    let backend = backend::from_spec(&target_spec(&config, &base)?);
    let paths = RunPaths::new(&config, &base);
    let log_path = paths.run_log(&config.run.file_name);
    let mut log = RunLog::create(&log_path)
        .map_err(|e| format!("cannot create {}: {}", log_path.display(), e))?;

    let report = Gate::new(backend.as_ref(), config.run.sample_rows)
        .check(
            &config.run.pre_check_tables,
            &config.run.pre_check_scripts,
            &mut log,
        )
        .map_err(|e| {
            log.note(&format!("ERROR: {}", e));
            e.to_string()
        })?;

    for (name, rows) in &report.checks {
        println!("  ok  {} ({} rows)", name, rows);
    }
    println!("Checks passed: {}", report.checks.len());
    Ok(())
}

fn cmd_run(file: &Path, no_execute: bool) -> Result<(), String> {
    let (mut config, base) = load(file)?;
    if no_execute {
        config.run.execute = false;
    }

    let target = target_spec(&config, &base)?;
    let backend = backend::from_spec(&target);
    let delimiter = config.run.delimited.then_some(config.run.delimiter);
    let launcher = worker::from_spec(&config.worker, &target, delimiter)?;
    let publisher = config
        .audit
        .as_ref()
        .map(|a| ledger::from_spec(&publisher_spec(&a.publisher, &base)));

    let ctx = RunContext::new(
        &config,
        &base,
        backend.as_ref(),
        launcher.as_ref(),
        publisher.as_deref(),
    );
    let summary = ctx.run().map_err(|e| e.to_string())?;

    println!("Run {} complete", summary.run_id);
    println!("  Log: {}", summary.log_path.display());
    if let Some(ref f) = summary.fanout {
        println!(
            "  Output: {} ({} jobs, {} bytes, {:.1}s)",
            f.output.display(),
            f.jobs.len(),
            f.bytes,
            f.duration.as_secs_f64()
        );
        println!("  Digest: {}", f.digest);
    }
    Ok(())
}

fn cmd_audit(file: &Path, phase: Phase, run_id: Option<&str>) -> Result<(), String> {
    let (config, base) = load(file)?;
    let audit = config
        .audit
        .as_ref()
        .ok_or_else(|| "no audit section in config".to_string())?;
    let run_id = match run_id {
        Some(s) => RunId::parse(s)?,
        None => RunId::generate(),
    };
    let publisher = ledger::from_spec(&publisher_spec(&audit.publisher, &base));
    let description = config.description.as_deref().unwrap_or(&config.name);

    let report = Ledger::new(publisher.as_ref(), &audit.queue)
        .publish_phase(
            &run_id,
            phase,
            &audit.audit_table,
            &audit.load_tables,
            description,
        )
        .map_err(|e| e.to_string())?;

    println!(
        "Published {} event(s) for phase {} with run id {}",
        report.sent.len(),
        phase,
        run_id
    );
    Ok(())
}

fn parse_task(json: &str) -> Result<WorkerTask, String> {
    serde_json::from_str(json).map_err(|e| format!("invalid worker task: {}", e))
}

fn cmd_worker() -> Result<(), String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("cannot read worker task: {}", e))?;
    let task = parse_task(&input)?;
    let mut stdout = std::io::stdout().lock();
    worker::run_task(&task, &mut stdout)?;
    Ok(())
}
