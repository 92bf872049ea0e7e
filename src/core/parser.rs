//! SF-002: YAML parsing and validation.
//!
//! Parses batch.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - `target` must name a declared backend
//! - Run, partition, and audit sections must be usable

use super::types::*;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn err(message: String) -> ValidationError {
    ValidationError { message }
}

/// Parse a batch.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<BatchConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a batch.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<BatchConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &BatchConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(err(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(err("name must not be empty".to_string()));
    }

    if !config.backends.contains_key(&config.target) {
        errors.push(err(format!(
            "target '{}' is not a declared backend",
            config.target
        )));
    }

    for (name, backend) in &config.backends {
        if let BackendSpec::Postgres { host, user, database, .. } = backend {
            if host.is_empty() || user.is_empty() || database.is_empty() {
                errors.push(err(format!(
                    "backend '{}' (postgres) needs host, user and database",
                    name
                )));
            }
        }
    }

    if config.run.file_name.is_empty() {
        errors.push(err("run.file_name must not be empty".to_string()));
    }
    if config.run.delimiter == '\n' || config.run.delimiter == '\r' {
        errors.push(err("run.delimiter must not be a line break".to_string()));
    }
    if config.run.sample_rows == 0 {
        errors.push(err("run.sample_rows must be at least 1".to_string()));
    }

    if let Some(ref p) = config.partitions {
        if p.reference_query.trim().is_empty() {
            errors.push(err("partitions.reference_query must not be empty".to_string()));
        }
        if p.special_condition.trim().is_empty() {
            errors.push(err(
                "partitions.special_condition must not be empty".to_string(),
            ));
        }
    }

    if let Some(ref a) = config.audit {
        if a.queue.is_empty() {
            errors.push(err("audit.queue must not be empty".to_string()));
        }
        if a.audit_table.is_empty() {
            errors.push(err("audit.audit_table must not be empty".to_string()));
        }
        if let PublisherSpec::Command { ref program, .. } = a.publisher {
            if program.is_empty() {
                errors.push(err("audit.publisher.program must not be empty".to_string()));
            }
        }
    }

    if let WorkerSpec::Shell { ref command } = config.worker {
        if !command.contains("{query}") {
            errors.push(err("worker.command must reference {query}".to_string()));
        }
    }

    errors
}
