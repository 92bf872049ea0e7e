//! SF-014: Queue publishers.
//!
//! `SpoolPublisher` appends to `<dir>/<queue>.jsonl`, syncing every line so
//! a message survives a crash once `publish` returns. `CommandPublisher`
//! hands each message to an external program on stdin.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Something that accepts durable messages on a named queue.
pub trait Publisher: Send + Sync {
    fn connect(&self, queue: &str) -> Result<Box<dyn QueueSession>, String>;
}

/// One open publishing session.
pub trait QueueSession {
    fn publish(&mut self, message: &str) -> Result<(), String>;
    fn close(self: Box<Self>) -> Result<(), String>;
}

fn check_queue_name(queue: &str) -> Result<(), String> {
    if queue.is_empty() || queue.contains(['/', '\\']) || queue.starts_with('.') {
        return Err(format!("invalid queue name '{}'", queue));
    }
    Ok(())
}

// ============================================================================
// Spool
// ============================================================================

pub struct SpoolPublisher {
    dir: PathBuf,
}

impl SpoolPublisher {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn queue_path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", queue))
    }
}

struct SpoolSession {
    path: PathBuf,
    file: File,
}

impl Publisher for SpoolPublisher {
    fn connect(&self, queue: &str) -> Result<Box<dyn QueueSession>, String> {
        check_queue_name(queue)?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| format!("cannot create spool dir {}: {}", self.dir.display(), e))?;
        let path = self.queue_path(queue);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("cannot open queue {}: {}", path.display(), e))?;
        Ok(Box::new(SpoolSession { path, file }))
    }
}

impl QueueSession for SpoolSession {
    fn publish(&mut self, message: &str) -> Result<(), String> {
        if message.contains('\n') {
            return Err("message spans multiple lines".to_string());
        }
        writeln!(self.file, "{}", message)
            .map_err(|e| format!("write error {}: {}", self.path.display(), e))?;
        self.file
            .sync_data()
            .map_err(|e| format!("sync error {}: {}", self.path.display(), e))
    }

    fn close(self: Box<Self>) -> Result<(), String> {
        self.file
            .sync_all()
            .map_err(|e| format!("sync error {}: {}", self.path.display(), e))
    }
}

// ============================================================================
// Command
// ============================================================================

pub struct CommandPublisher {
    program: String,
    args: Vec<String>,
}

impl CommandPublisher {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }
}

struct CommandSession {
    program: String,
    args: Vec<String>,
}

impl Publisher for CommandPublisher {
    fn connect(&self, queue: &str) -> Result<Box<dyn QueueSession>, String> {
        check_queue_name(queue)?;
        if self.program.is_empty() {
            return Err("publish program is empty".to_string());
        }
        if self.program.contains('/') && !Path::new(&self.program).exists() {
            return Err(format!("publish program not found: {}", self.program));
        }
        Ok(Box::new(CommandSession {
            program: self.program.clone(),
            args: self.args.iter().map(|a| a.replace("{queue}", queue)).collect(),
        }))
    }
}

impl QueueSession for CommandSession {
    fn publish(&mut self, message: &str) -> Result<(), String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.program, e))?;

        if let Some(ref mut stdin) = child.stdin {
            stdin
                .write_all(message.as_bytes())
                .map_err(|e| format!("stdin write error: {}", e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("wait error: {}", e))?;
        if !output.status.success() {
            return Err(format!(
                "{} exit code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sf014_spool_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let p = SpoolPublisher::new(&dir.path().join("queue"));
        for msg in ["{\"a\":1}", "{\"a\":2}"] {
            let mut s = p.connect("load_audit").unwrap();
            s.publish(msg).unwrap();
            s.close().unwrap();
        }
        let content = std::fs::read_to_string(p.queue_path("load_audit")).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_sf014_spool_rejects_bad_queue() {
        let dir = tempfile::tempdir().unwrap();
        let p = SpoolPublisher::new(dir.path());
        assert!(p.connect("../escape").is_err());
        assert!(p.connect("").is_err());
    }

    #[test]
    fn test_sf014_spool_rejects_multiline() {
        let dir = tempfile::tempdir().unwrap();
        let p = SpoolPublisher::new(dir.path());
        let mut s = p.connect("q").unwrap();
        assert!(s.publish("a\nb").is_err());
    }

    #[test]
    fn test_sf014_command_publisher() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("sink.txt");
        let p = CommandPublisher::new(
            "bash",
            &[
                "-c".to_string(),
                format!("echo {{queue}}: $(cat) >> '{}'", sink.display()),
            ],
        );
        let mut s = p.connect("load_audit").unwrap();
        s.publish("hello").unwrap();
        s.close().unwrap();
        assert_eq!(std::fs::read_to_string(&sink).unwrap(), "load_audit: hello\n");
    }

    #[test]
    fn test_sf014_command_publisher_failure() {
        let p = CommandPublisher::new("bash", &["-c".to_string(), "exit 2".to_string()]);
        let mut s = p.connect("q").unwrap();
        let err = s.publish("x").unwrap_err();
        assert!(err.contains("exit code 2"));
    }

    #[test]
    fn test_sf014_command_missing_program() {
        let p = CommandPublisher::new("/nonexistent/publish", &[]);
        assert!(p.connect("q").is_err());
    }
}
