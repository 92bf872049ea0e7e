//! SF-013: Native launcher: re-run this binary as `sqlfan worker`.
//!
//! The task, credentials included, travels as JSON on stdin so nothing
//! sensitive shows up in the process table.

use super::{LaunchCommand, Launcher, WorkerTask};
use crate::core::artifacts::JobArtifacts;
use crate::core::types::BackendSpec;
use std::path::PathBuf;
use std::process::Command;

pub struct NativeLauncher {
    program: PathBuf,
    backend: BackendSpec,
    delimiter: Option<char>,
}

impl NativeLauncher {
    pub fn new(program: PathBuf, backend: BackendSpec, delimiter: Option<char>) -> Self {
        Self {
            program,
            backend,
            delimiter,
        }
    }

    /// Launcher that re-executes the running binary.
    pub fn current(backend: BackendSpec, delimiter: Option<char>) -> Result<Self, String> {
        let program =
            std::env::current_exe().map_err(|e| format!("cannot locate sqlfan binary: {}", e))?;
        Ok(Self::new(program, backend, delimiter))
    }

    pub fn task(&self, job: &JobArtifacts) -> WorkerTask {
        WorkerTask {
            backend: self.backend.clone(),
            query_file: job.query.clone(),
            out_file: job.out.clone(),
            delimiter: self.delimiter,
        }
    }
}

impl Launcher for NativeLauncher {
    fn command(&self, job: &JobArtifacts) -> Result<LaunchCommand, String> {
        let payload = serde_json::to_string(&self.task(job))
            .map_err(|e| format!("cannot encode worker task: {}", e))?;
        let mut command = Command::new(&self.program);
        command.arg("worker");
        Ok(LaunchCommand {
            command,
            stdin: Some(payload),
        })
    }
}
