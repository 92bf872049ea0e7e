//! SF-007: Per-job artifact layout, stale cleanup, and ordered merge.
//!
//! Job `k` owns `<temp>/<base>_<k>.sql`, `.log` and `.out`. Merges walk
//! `k = 1..=M` explicitly; directory listing order is never consulted
//! for ordering.

use super::hasher::{DigestWriter, Written};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const KINDS: [&str; 3] = ["sql", "log", "out"];

/// Files owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArtifacts {
    pub index: usize,
    pub query: PathBuf,
    pub log: PathBuf,
    pub out: PathBuf,
}

/// Naming scheme for one template's scratch files.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    temp_dir: PathBuf,
    base: String,
}

impl ArtifactLayout {
    pub fn new(temp_dir: &Path, base: &str) -> Self {
        Self {
            temp_dir: temp_dir.to_path_buf(),
            base: base.to_string(),
        }
    }

    /// Base name from a template path: lowercased file stem.
    pub fn for_template(temp_dir: &Path, template: &Path) -> Self {
        let base = template
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "query".to_string());
        Self::new(temp_dir, &base)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn path(&self, index: usize, ext: &str) -> PathBuf {
        self.temp_dir.join(format!("{}_{}.{}", self.base, index, ext))
    }

    /// Artifact paths for job `index` (1-based).
    pub fn job(&self, index: usize) -> JobArtifacts {
        JobArtifacts {
            index,
            query: self.path(index, "sql"),
            log: self.path(index, "log"),
            out: self.path(index, "out"),
        }
    }

    /// Artifacts for jobs `1..=count`.
    pub fn jobs(&self, count: usize) -> Vec<JobArtifacts> {
        (1..=count).map(|k| self.job(k)).collect()
    }

    /// True if `name` is `<base>_<digits>.<sql|log|out>`.
    fn is_job_artifact(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(&self.base) else {
            return false;
        };
        let Some(rest) = rest.strip_prefix('_') else {
            return false;
        };
        let Some((index, ext)) = rest.rsplit_once('.') else {
            return false;
        };
        !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) && KINDS.contains(&ext)
    }

    /// Delete artifacts left behind by an earlier run of the same template.
    /// Returns how many files were removed.
    pub fn discard_stale(&self) -> io::Result<usize> {
        let pattern = format!(
            "{}/{}_*",
            glob::Pattern::escape(&self.temp_dir.to_string_lossy()),
            glob::Pattern::escape(&self.base)
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let mut removed = 0;
        for path in entries.flatten() {
            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().to_string(),
                None => continue,
            };
            if !self.is_job_artifact(&name) || !path.is_file() {
                continue;
            }
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Concatenate `parts` into `dest` in the order given, deleting each part
/// after it is copied. `append` keeps existing `dest` content. The returned
/// size and digest cover only the bytes this merge wrote.
pub fn merge_in_order(parts: &[PathBuf], dest: &Path, append: bool) -> io::Result<Written> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(dest)?
    } else {
        File::create(dest)?
    };

    let mut out = DigestWriter::new(file);
    for part in parts {
        let mut input = File::open(part)?;
        io::copy(&mut input, &mut out)?;
    }
    let (file, written) = out.finish();
    file.sync_all()?;
    drop(file);

    for part in parts {
        std::fs::remove_file(part)?;
    }
    Ok(written)
}

/// Remove files that exist; missing files are not an error.
pub fn remove_all(paths: &[PathBuf]) -> io::Result<()> {
    for p in paths {
        match std::fs::remove_file(p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
