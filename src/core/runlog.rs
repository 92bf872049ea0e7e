//! SF-008: Append-only plain-text run log.
//!
//! One per run. The gate, the executor, and the orchestrator all write
//! here; only the coordinator process holds it, so lines never interleave
//! mid-write. Per-job logs are merged in after a successful fan-out.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
pub fn now_local() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Start a fresh log, truncating any previous content.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        File::create(path)?;
        Self::append_to(path)
    }

    /// Continue an existing log (or create it).
    pub fn append_to(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and flush.
    pub fn line(&mut self, text: &str) -> std::io::Result<()> {
        writeln!(self.file, "{}", text)?;
        self.file.flush()
    }

    /// Append a line, logging instead of failing if the write fails.
    pub fn note(&mut self, text: &str) {
        if let Err(e) = self.line(text) {
            tracing::warn!(path = %self.path.display(), "run log write failed: {}", e);
        }
    }
}
