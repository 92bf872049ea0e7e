//! SF-006: Fan-out executor.
//!
//! One query file per parameter set, one worker process per query file,
//! then a join over all of them:
//! probe → discard stale → render → write → launch → join → merge or keep.
//!
//! Per-job logs and outputs survive a failed run for inspection. Query
//! files are always removed.

use super::artifacts::{self, ArtifactLayout, JobArtifacts};
use super::error::{ConnectivityFailure, ExecutionFailure, RunError};
use super::hasher::Written;
use super::runlog::{now_local, RunLog};
use super::template;
use super::types::{Bindings, JobOutcome, JobReport};
use crate::backend::Backend;
use crate::worker::Launcher;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;

/// One fan-out.
pub struct FanoutConfig<'a> {
    /// Query template with `{p[name]}` placeholders
    pub template: &'a Path,
    /// One entry per job, in job order
    pub bindings: &'a [Bindings],
    /// Scratch directory for per-job files
    pub temp_dir: &'a Path,
    /// Merged output destination (truncated)
    pub output: &'a Path,
    /// Pause between launches
    pub launch_stagger: Duration,
}

/// Result of a successful fan-out.
#[derive(Debug, Clone)]
pub struct FanoutSummary {
    pub jobs: Vec<JobReport>,
    pub output: PathBuf,
    pub bytes: u64,
    pub digest: String,
    pub duration: Duration,
}

pub struct Executor<'a> {
    backend: &'a dyn Backend,
    launcher: &'a dyn Launcher,
}

fn artifact_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExecutionFailure + '_ {
    move |source| ExecutionFailure::Artifact {
        path: path.to_path_buf(),
        source,
    }
}

fn create_parent(path: &Path) -> Result<(), ExecutionFailure> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(artifact_err(parent))
        }
        _ => Ok(()),
    }
}

impl<'a> Executor<'a> {
    pub fn new(backend: &'a dyn Backend, launcher: &'a dyn Launcher) -> Self {
        Self { backend, launcher }
    }

    /// Run every job to completion. Fails if any job fails.
    pub fn run(&self, cfg: &FanoutConfig, log: &mut RunLog) -> Result<FanoutSummary, RunError> {
        let start = Instant::now();
        self.probe()?;

        let layout = ArtifactLayout::for_template(cfg.temp_dir, cfg.template);
        std::fs::create_dir_all(cfg.temp_dir).map_err(artifact_err(cfg.temp_dir))?;
        let stale = layout
            .discard_stale()
            .map_err(artifact_err(cfg.temp_dir))?;
        if stale > 0 {
            tracing::info!(removed = stale, base = layout.base(), "discarded stale artifacts");
        }
        create_parent(cfg.output)?;

        let template_name = cfg.template.display().to_string();
        if cfg.bindings.is_empty() {
            let written =
                artifacts::merge_in_order(&[], cfg.output, false).map_err(artifact_err(cfg.output))?;
            log.note(&format!("no jobs for {}", template_name));
            tracing::warn!(template = %template_name, "no parameter sets; empty output");
            return Ok(self.finish(cfg, Vec::new(), written, start));
        }

        let source =
            std::fs::read_to_string(cfg.template).map_err(artifact_err(cfg.template))?;
        let queries = cfg
            .bindings
            .iter()
            .map(|b| template::render(&source, b))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ExecutionFailure::Template {
                template: template_name.clone(),
                reason,
            })?;

        let jobs = layout.jobs(queries.len());
        for (job, query) in jobs.iter().zip(&queries) {
            std::fs::write(&job.query, query).map_err(artifact_err(&job.query))?;
            File::create(&job.log).map_err(artifact_err(&job.log))?;
            File::create(&job.out).map_err(artifact_err(&job.out))?;
        }

        tracing::info!(jobs = jobs.len(), template = %template_name, "launching workers");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExecutionFailure::Runtime)?;
        let reports = runtime.block_on(self.launch_and_join(&jobs, cfg.launch_stagger, log));

        let query_files: Vec<PathBuf> = jobs.iter().map(|j| j.query.clone()).collect();
        if let Err(e) = artifacts::remove_all(&query_files) {
            tracing::warn!("cannot remove query files: {}", e);
        }

        let failed: Vec<usize> = reports
            .iter()
            .filter(|r| !r.outcome.success())
            .map(|r| r.index)
            .collect();
        if !failed.is_empty() {
            log.note(&format!("execution failed while running {}", template_name));
            tracing::error!(template = %template_name, ?failed, "execution failed");
            return Err(ExecutionFailure::JobsFailed {
                template: template_name,
                failed,
            }
            .into());
        }

        let logs: Vec<PathBuf> = jobs.iter().map(|j| j.log.clone()).collect();
        artifacts::merge_in_order(&logs, log.path(), true).map_err(artifact_err(log.path()))?;
        let outs: Vec<PathBuf> = jobs.iter().map(|j| j.out.clone()).collect();
        let written =
            artifacts::merge_in_order(&outs, cfg.output, false).map_err(artifact_err(cfg.output))?;

        let summary = self.finish(cfg, reports, written, start);
        log.note(&format!(
            "merged {} job outputs into {} ({})",
            summary.jobs.len(),
            summary.output.display(),
            summary.digest
        ));
        Ok(summary)
    }

    /// Connect and disconnect once before any file is touched.
    fn probe(&self) -> Result<(), ConnectivityFailure> {
        let unreachable = |reason: String| ConnectivityFailure {
            target: self.backend.target(),
            reason,
        };
        let conn = self.backend.open().map_err(|e| unreachable(e.to_string()))?;
        conn.close().map_err(|e| unreachable(e.to_string()))
    }

    fn finish(
        &self,
        cfg: &FanoutConfig,
        jobs: Vec<JobReport>,
        written: Written,
        start: Instant,
    ) -> FanoutSummary {
        tracing::info!(
            output = %cfg.output.display(),
            jobs = jobs.len(),
            bytes = written.bytes,
            digest = %written.digest,
            "fan-out complete"
        );
        FanoutSummary {
            jobs,
            output: cfg.output.to_path_buf(),
            bytes: written.bytes,
            digest: written.digest,
            duration: start.elapsed(),
        }
    }

    /// Start every job, then await them in completion order. Reports come
    /// back sorted by job index.
    async fn launch_and_join(
        &self,
        jobs: &[JobArtifacts],
        stagger: Duration,
        log: &mut RunLog,
    ) -> Vec<JobReport> {
        let mut set = JoinSet::new();
        let mut reports = Vec::with_capacity(jobs.len());

        for (n, job) in jobs.iter().enumerate() {
            if n > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            let index = job.index;
            match self.spawn(job) {
                Ok((child, input)) => {
                    tracing::debug!(job = index, "worker started");
                    set.spawn(async move {
                        let outcome = wait_child(child, input).await;
                        JobReport {
                            index,
                            outcome,
                            finished_at: now_local(),
                        }
                    });
                }
                Err(reason) => {
                    tracing::error!(job = index, "cannot launch worker: {}", reason);
                    let report = JobReport {
                        index,
                        outcome: JobOutcome::LaunchFailed(reason),
                        finished_at: now_local(),
                    };
                    record(log, &report);
                    reports.push(report);
                }
            }
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => {
                    record(log, &report);
                    reports.push(report);
                }
                Err(e) => tracing::error!("worker task aborted: {}", e),
            }
        }

        // A panicked join task leaves a hole; count it as a failure.
        for job in jobs {
            if !reports.iter().any(|r| r.index == job.index) {
                reports.push(JobReport {
                    index: job.index,
                    outcome: JobOutcome::LaunchFailed("worker task aborted".to_string()),
                    finished_at: now_local(),
                });
            }
        }
        reports.sort_by_key(|r| r.index);
        reports
    }

    fn spawn(&self, job: &JobArtifacts) -> Result<(tokio::process::Child, Option<String>), String> {
        let launch = self.launcher.command(job)?;
        let mut command = launch.command;

        let stdout = OpenOptions::new()
            .append(true)
            .open(&job.log)
            .map_err(|e| format!("cannot open {}: {}", job.log.display(), e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| format!("cannot share {}: {}", job.log.display(), e))?;
        command
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .stdin(if launch.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let child = tokio::process::Command::from(command)
            .spawn()
            .map_err(|e| format!("failed to spawn worker: {}", e))?;
        Ok((child, launch.stdin))
    }
}

/// Feed stdin (if any), close it, and wait for exit.
async fn wait_child(mut child: tokio::process::Child, input: Option<String>) -> JobOutcome {
    if let (Some(input), Some(mut pipe)) = (input, child.stdin.take()) {
        // The child may exit without reading; its exit status decides.
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            tracing::warn!("worker stdin write error: {}", e);
        }
        drop(pipe);
    }
    match child.wait().await {
        Ok(status) => JobOutcome::from_status(status),
        Err(e) => JobOutcome::LaunchFailed(format!("wait error: {}", e)),
    }
}

fn record(log: &mut RunLog, report: &JobReport) {
    log.note(&format!("job {} exited with {}", report.index, report.outcome));
    log.note(&format!(
        "completed job {} at {}",
        report.index, report.finished_at
    ));
    if report.outcome.success() {
        tracing::info!(job = report.index, "worker finished");
    } else {
        tracing::warn!(job = report.index, outcome = %report.outcome, "worker failed");
    }
}
