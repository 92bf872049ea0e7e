//! SF-013: Shell launcher.
//!
//! Runs a configured command line through `bash -c`. The placeholders
//! `{query}`, `{out}`, `{log}` and `{index}` are replaced with the job's
//! values, single-quoted for the shell.

use super::{LaunchCommand, Launcher};
use crate::core::artifacts::JobArtifacts;
use std::path::Path;
use std::process::Command;

pub struct ShellLauncher {
    template: String,
}

impl ShellLauncher {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// The script for one job.
    pub fn script(&self, job: &JobArtifacts) -> String {
        self.template
            .replace("{query}", &quote_path(&job.query))
            .replace("{out}", &quote_path(&job.out))
            .replace("{log}", &quote_path(&job.log))
            .replace("{index}", &job.index.to_string())
    }
}

/// Single-quote a word for bash.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

impl Launcher for ShellLauncher {
    fn command(&self, job: &JobArtifacts) -> Result<LaunchCommand, String> {
        // bash, not sh: configured commands may use pipefail
        let mut command = Command::new("bash");
        command.arg("-c").arg(self.script(job));
        Ok(LaunchCommand {
            command,
            stdin: None,
        })
    }
}
