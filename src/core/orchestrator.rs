//! SF-008: Run orchestration.
//!
//! Strict phase order: run log → gate → plan → audit(pre) → fan-out →
//! audit(post). Any failure is written to the run log before it is
//! returned. The post event is sent even when the fan-out fails.

use super::error::{PlanError, RunError};
use super::executor::{Executor, FanoutConfig, FanoutSummary};
use super::gate::{Gate, GateReport};
use super::planner;
use super::runlog::{now_local, RunLog};
use super::types::{AuditSpec, BatchConfig, Bindings, PartitionSpec, Phase, Plan};
use crate::backend::Backend;
use crate::ledger::publisher::Publisher;
use crate::ledger::runid::RunId;
use crate::ledger::{Ledger, PhaseReport};
use crate::worker::Launcher;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolve `p` against `base` unless it is already absolute.
pub fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Concrete file locations for one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub template: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output: PathBuf,
}

impl RunPaths {
    pub fn new(config: &BatchConfig, base: &Path) -> Self {
        let p = &config.paths;
        let name = &config.run.file_name;
        Self {
            template: resolve(base, &p.sql_dir).join(format!("{}.sql", name)),
            temp_dir: resolve(base, &p.temp_dir),
            log_dir: resolve(base, &p.log_dir),
            output: resolve(base, &p.out_dir).join(format!("{}.out", name)),
        }
    }

    /// `<log_dir>/<file_name>_<YYYY-MM-DD_HH-MM-SS>.log`
    pub fn run_log(&self, file_name: &str) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.log_dir.join(format!("{}_{}.log", file_name, stamp))
    }
}

/// What a completed run did.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunId,
    pub log_path: PathBuf,
    pub gate: GateReport,
    pub plan: Option<Plan>,
    pub pre: Option<PhaseReport>,
    pub fanout: Option<FanoutSummary>,
    pub post: Option<PhaseReport>,
}

pub struct RunContext<'a> {
    pub config: &'a BatchConfig,
    pub base_dir: &'a Path,
    pub backend: &'a dyn Backend,
    pub launcher: &'a dyn Launcher,
    pub publisher: Option<&'a dyn Publisher>,
    pub run_id: RunId,
}

fn note_failure(log: &mut RunLog, err: &RunError) {
    log.note(&format!("ERROR: {}", err));
    tracing::error!("{}", err);
}

fn fail(log: &mut RunLog, err: impl Into<RunError>) -> RunError {
    let err = err.into();
    note_failure(log, &err);
    err
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a BatchConfig,
        base_dir: &'a Path,
        backend: &'a dyn Backend,
        launcher: &'a dyn Launcher,
        publisher: Option<&'a dyn Publisher>,
    ) -> Self {
        Self {
            config,
            base_dir,
            backend,
            launcher,
            publisher,
            run_id: RunId::generate(),
        }
    }

    fn description(&self) -> &str {
        self.config
            .description
            .as_deref()
            .unwrap_or(&self.config.name)
    }

    fn ledger(&self) -> Result<Option<(Ledger<'a>, &'a AuditSpec)>, RunError> {
        let config: &'a BatchConfig = self.config;
        match (&config.audit, self.publisher) {
            (None, _) => Ok(None),
            (Some(spec), Some(publisher)) => Ok(Some((Ledger::new(publisher, &spec.queue), spec))),
            (Some(_), None) => Err(RunError::Config(
                "audit is configured but no publisher was provided".to_string(),
            )),
        }
    }

    fn publish(
        &self,
        ledger: &Option<(Ledger<'a>, &'a AuditSpec)>,
        phase: Phase,
        log: &mut RunLog,
    ) -> Result<Option<PhaseReport>, RunError> {
        let Some((ledger, spec)) = ledger else {
            return Ok(None);
        };
        let report = ledger.publish_phase(
            &self.run_id,
            phase,
            &spec.audit_table,
            &spec.load_tables,
            self.description(),
        )?;
        log.note(&format!(
            "{} audit published for {} table(s) with run id {}",
            phase,
            report.sent.len(),
            self.run_id
        ));
        Ok(Some(report))
    }

    /// Parameter sets for the fan-out. No partitions means one job with no
    /// bindings.
    fn plan(&self, log: &mut RunLog) -> Result<(Option<Plan>, Vec<Bindings>), PlanError> {
        let Some(spec) = &self.config.partitions else {
            log.note("no partitions configured; running a single job");
            return Ok((None, vec![Bindings::new()]));
        };
        let spec = PartitionSpec {
            assignment_file: resolve(self.base_dir, &spec.assignment_file),
            ..spec.clone()
        };
        let plan = planner::plan_from_backend(self.backend, &spec)?;
        log.note(&format!(
            "planned {} job(s) over {} partition(s); {} unassigned identifier(s)",
            plan.parameter_sets.len(),
            plan.partitions.len(),
            plan.missing.len()
        ));
        let bindings = plan.parameter_sets.iter().map(|s| s.bindings()).collect();
        Ok((Some(plan), bindings))
    }

    /// Run every phase in order.
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let cfg = self.config;
        let paths = RunPaths::new(cfg, self.base_dir);
        let log_path = paths.run_log(&cfg.run.file_name);
        let mut log = RunLog::create(&log_path).map_err(|source| RunError::RunLog {
            path: log_path.clone(),
            source,
        })?;
        log.note(&format!(
            "Starting {} (run id {}) at {}",
            cfg.name,
            self.run_id,
            now_local()
        ));
        tracing::info!(name = %cfg.name, run_id = %self.run_id, log = %log_path.display(), "run started");

        let ledger = self.ledger().map_err(|e| fail(&mut log, e))?;

        let gate = Gate::new(self.backend, cfg.run.sample_rows)
            .check(&cfg.run.pre_check_tables, &cfg.run.pre_check_scripts, &mut log)
            .map_err(|e| fail(&mut log, e))?;

        let (plan, bindings) = self.plan(&mut log).map_err(|e| fail(&mut log, e))?;

        let pre = self
            .publish(&ledger, Phase::Pre, &mut log)
            .map_err(|e| fail(&mut log, e))?;

        let fanout = if cfg.run.execute {
            let request = FanoutConfig {
                template: &paths.template,
                bindings: &bindings,
                temp_dir: &paths.temp_dir,
                output: &paths.output,
                launch_stagger: Duration::from_millis(cfg.run.launch_stagger_ms),
            };
            Executor::new(self.backend, self.launcher)
                .run(&request, &mut log)
                .map(Some)
        } else {
            log.note("execution disabled; skipping fan-out");
            Ok(None)
        };

        let post = self.publish(&ledger, Phase::Post, &mut log);

        // The fan-out error wins; a post failure alongside it is only logged.
        let fanout = match fanout {
            Ok(f) => f,
            Err(e) => {
                if let Err(p) = &post {
                    note_failure(&mut log, p);
                }
                return Err(fail(&mut log, e));
            }
        };
        let post = post.map_err(|e| fail(&mut log, e))?;

        log.note(&format!("Completed {} at {}", cfg.name, now_local()));
        tracing::info!(name = %cfg.name, run_id = %self.run_id, "run complete");

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            log_path,
            gate,
            plan,
            pre,
            fanout,
            post,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{rows, FakeBackend};
    use crate::core::error::{ExecutionFailure, GateFailure, PublishFailure};
    use crate::core::parser::parse_config;
    use crate::ledger::testing::RecordingPublisher;
    use crate::worker::shell::ShellLauncher;

    const COPY: &str = "cat {query} > {out}";

    fn config(partitions: bool, audit: bool) -> BatchConfig {
        let mut yaml = String::from(
            r#"
version: "1.0"
name: member-months
description: nightly member months
target: wh
backends:
  wh: { adapter: sqlite, path: wh.db }
run:
  file_name: member_months
  pre_check_tables: [accounts]
"#,
        );
        if partitions {
            yaml.push_str(
                r#"partitions:
  reference_query: "select employer_id from accounts"
  assignment_file: employer_sets.cfg
  special_condition: "carrier_id = 15"
  other_condition: "carrier_id != 15"
"#,
            );
        }
        if audit {
            yaml.push_str(
                r#"audit:
  audit_table: adm.load_audit
  queue: load_audit
  load_tables: [fact_member_months]
  publisher: { kind: spool, dir: queue }
"#,
            );
        }
        parse_config(&yaml).unwrap()
    }

    fn backend() -> FakeBackend {
        FakeBackend::new()
            .with("SELECT * FROM accounts LIMIT 5", rows(&[&["1"], &["2"]]))
            .with(
                "select employer_id from accounts",
                rows(&[&["1"], &["2"], &["3"], &["4"], &["5"]]),
            )
    }

    fn workspace(template: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sql")).unwrap();
        std::fs::write(dir.path().join("sql/member_months.sql"), template).unwrap();
        std::fs::write(dir.path().join("employer_sets.cfg"), "1,2\n3\n4\n").unwrap();
        dir
    }

    fn read_run_log(dir: &Path) -> String {
        let entry = std::fs::read_dir(dir.join("logs"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        std::fs::read_to_string(entry.path()).unwrap()
    }

    #[test]
    fn test_sf008_partitioned_run() {
        let dir = workspace("{p[prt_name]}/{p[sub_prt_name]}: {p[ids]} where {p[cond]}\n");
        let cfg = config(true, true);
        let backend = backend();
        let launcher = ShellLauncher::new(COPY);
        let publisher = RecordingPublisher::default();
        let ctx = RunContext::new(&cfg, dir.path(), &backend, &launcher, Some(&publisher));
        let summary = ctx.run().unwrap();

        let out = std::fs::read_to_string(dir.path().join("out/member_months.out")).unwrap();
        assert_eq!(
            out,
            "emp_set_1/special: 1,2 where carrier_id = 15\n\
             emp_set_1/other: 1,2 where carrier_id != 15\n\
             emp_set_3/other: 4 where carrier_id != 15\n\
             other/other: 5 where carrier_id != 15\n\
             other/special: 5 where carrier_id = 15\n"
        );
        assert_eq!(summary.fanout.unwrap().jobs.len(), 5);
        assert_eq!(summary.plan.unwrap().missing, vec![5]);

        let msgs = publisher.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["phase"], "pre");
        assert_eq!(msgs[1]["phase"], "post");
        assert_eq!(msgs[0]["run_id"], msgs[1]["run_id"]);
        assert_eq!(msgs[0]["load_description"], "nightly member months");

        let log = std::fs::read_to_string(&summary.log_path).unwrap();
        assert!(log.contains("2 rows returned from accounts"));
        assert!(log.contains("planned 5 job(s)"));
    }

    #[test]
    fn test_sf008_gate_failure_stops_everything() {
        let dir = workspace("select 1\n");
        let cfg = config(true, true);
        let backend = FakeBackend::new().with("SELECT * FROM accounts LIMIT 5", vec![]);
        let launcher = ShellLauncher::new(COPY);
        let publisher = RecordingPublisher::default();
        let err = RunContext::new(&cfg, dir.path(), &backend, &launcher, Some(&publisher))
            .run()
            .unwrap_err();
        assert!(matches!(err, RunError::Gate(GateFailure::EmptyTable(_))));
        assert!(publisher.messages().is_empty());
        assert!(!dir.path().join("out").exists());
        assert_eq!(backend.queries().len(), 1);
        assert!(read_run_log(dir.path()).contains("ERROR: pre-check found an empty table accounts"));
    }

    #[test]
    fn test_sf008_post_published_after_failed_fanout() {
        let dir = workspace("select 1\n");
        let cfg = config(false, true);
        let backend = backend();
        let launcher = ShellLauncher::new("exit 4");
        let publisher = RecordingPublisher::default();
        let err = RunContext::new(&cfg, dir.path(), &backend, &launcher, Some(&publisher))
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Execution(ExecutionFailure::JobsFailed { .. })
        ));
        let phases: Vec<_> = publisher
            .messages()
            .iter()
            .map(|m| m["phase"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(phases, vec!["pre", "post"]);
        assert!(read_run_log(dir.path()).contains("execution failed while running"));
    }

    #[test]
    fn test_sf008_pre_publish_failure_blocks_fanout() {
        let dir = workspace("select 1\n");
        let cfg = config(false, true);
        let backend = backend();
        let launcher = ShellLauncher::new(COPY);
        let publisher = RecordingPublisher {
            refuse_connect: true,
            ..Default::default()
        };
        let err = RunContext::new(&cfg, dir.path(), &backend, &launcher, Some(&publisher))
            .run()
            .unwrap_err();
        assert!(matches!(err, RunError::Publish(PublishFailure::Connect { .. })));
        assert!(!dir.path().join("out/member_months.out").exists());
    }

    #[test]
    fn test_sf008_single_job_without_partitions() {
        let dir = workspace("select 1\n");
        let cfg = config(false, false);
        let backend = backend();
        let launcher = ShellLauncher::new(COPY);
        let summary = RunContext::new(&cfg, dir.path(), &backend, &launcher, None)
            .run()
            .unwrap();
        assert!(summary.plan.is_none());
        assert!(summary.pre.is_none());
        let out = std::fs::read_to_string(dir.path().join("out/member_months.out")).unwrap();
        assert_eq!(out, "select 1\n");
    }

    #[test]
    fn test_sf008_execute_disabled() {
        let dir = workspace("select 1\n");
        let mut cfg = config(false, true);
        cfg.run.execute = false;
        let backend = backend();
        let launcher = ShellLauncher::new(COPY);
        let publisher = RecordingPublisher::default();
        let summary = RunContext::new(&cfg, dir.path(), &backend, &launcher, Some(&publisher))
            .run()
            .unwrap();
        assert!(summary.fanout.is_none());
        assert!(summary.post.is_some());
        assert!(!dir.path().join("out").exists());
        assert_eq!(publisher.messages().len(), 2);
    }

    #[test]
    fn test_sf008_audit_without_publisher_is_config_error() {
        let dir = workspace("select 1\n");
        let cfg = config(false, true);
        let backend = backend();
        let launcher = ShellLauncher::new(COPY);
        let err = RunContext::new(&cfg, dir.path(), &backend, &launcher, None)
            .run()
            .unwrap_err();
        assert!(matches!(err, RunError::Config(_)));
    }

    #[test]
    fn test_sf008_run_paths() {
        let cfg = config(false, false);
        let paths = RunPaths::new(&cfg, Path::new("/jobs/mm"));
        assert_eq!(paths.template, PathBuf::from("/jobs/mm/sql/member_months.sql"));
        assert_eq!(paths.output, PathBuf::from("/jobs/mm/out/member_months.out"));
        let log = paths.run_log("member_months");
        let name = log.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("member_months_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "member_months_2026-03-14_15-09-26.log".len());
    }
}
