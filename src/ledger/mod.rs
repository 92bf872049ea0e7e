//! SF-014: Audit ledger.
//!
//! Publishes one durable message per touched table at the start (`pre`)
//! and end (`post`) of a run. One session per phase; a failed send does
//! not stop the remaining sends, and the session is always closed.

pub mod publisher;
pub mod runid;

use crate::core::error::PublishFailure;
use crate::core::types::{AuditEvent, Phase, PublisherSpec};
use publisher::{CommandPublisher, Publisher, SpoolPublisher};
use runid::RunId;

/// Messages sent for one phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub run_id: RunId,
    pub sent: Vec<String>,
}

/// Build the publisher for a spec.
pub fn from_spec(spec: &PublisherSpec) -> Box<dyn Publisher> {
    match spec {
        PublisherSpec::Spool { dir } => Box::new(SpoolPublisher::new(dir)),
        PublisherSpec::Command { program, args } => Box::new(CommandPublisher::new(program, args)),
    }
}

pub struct Ledger<'a> {
    publisher: &'a dyn Publisher,
    queue: String,
}

impl<'a> Ledger<'a> {
    pub fn new(publisher: &'a dyn Publisher, queue: &str) -> Self {
        Self {
            publisher,
            queue: queue.to_string(),
        }
    }

    /// The event for one table.
    pub fn event(
        run_id: &RunId,
        phase: Phase,
        audit_table: &str,
        table: &str,
        description: &str,
    ) -> AuditEvent {
        AuditEvent {
            run_id: run_id.to_string(),
            phase,
            load_tables: table.to_string(),
            load_description: description.to_string(),
            audit_table: audit_table.to_string(),
            load_time: runid::load_time(),
        }
    }

    /// Send one event per table in `tables`.
    pub fn publish_phase(
        &self,
        run_id: &RunId,
        phase: Phase,
        audit_table: &str,
        tables: &[String],
        description: &str,
    ) -> Result<PhaseReport, PublishFailure> {
        let mut session = self.publisher.connect(&self.queue).map_err(|reason| {
            tracing::error!(queue = %self.queue, %phase, "unable to connect: {}", reason);
            PublishFailure::Connect {
                queue: self.queue.clone(),
                reason,
            }
        })?;

        let mut sent = Vec::new();
        let mut failed = Vec::new();
        for table in tables {
            let event = Self::event(run_id, phase, audit_table, table, description);
            let result = serde_json::to_string(&event)
                .map_err(|e| format!("JSON serialize error: {}", e))
                .and_then(|json| session.publish(&json));
            match result {
                Ok(()) => {
                    tracing::info!(queue = %self.queue, %phase, table = %table, %run_id, "audit event published");
                    sent.push(table.clone());
                }
                Err(e) => {
                    tracing::error!(queue = %self.queue, %phase, table = %table, "could not publish: {}", e);
                    failed.push(table.clone());
                }
            }
        }

        if let Err(e) = session.close() {
            tracing::warn!(queue = %self.queue, "close failed: {}", e);
        }

        if !failed.is_empty() {
            return Err(PublishFailure::Send {
                queue: self.queue.clone(),
                tables: failed,
            });
        }
        Ok(PhaseReport {
            phase,
            run_id: run_id.clone(),
            sent,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingPublisher;
    use super::*;

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sf014_pre_phase_one_message_per_table() {
        let p = RecordingPublisher::default();
        let id = RunId::from_parts("20260314150926000000", 1, 2);
        let report = Ledger::new(&p, "load_audit")
            .publish_phase(&id, Phase::Pre, "adm.load_audit", &tables(&["T1", "T2"]), "nightly")
            .unwrap();
        assert_eq!(report.sent, tables(&["T1", "T2"]));

        let msgs = p.messages();
        assert_eq!(msgs.len(), 2);
        for m in &msgs {
            assert_eq!(m["run_id"], "2026031415092600000012");
            assert_eq!(m["phase"], "pre");
            assert_eq!(m["audit_table"], "adm.load_audit");
            assert_eq!(m["load_description"], "nightly");
        }
        assert_eq!(msgs[0]["load_tables"], "T1");
        assert_eq!(msgs[1]["load_tables"], "T2");
        assert_eq!(p.closes(), 1);
    }

    #[test]
    fn test_sf014_connect_failure_sends_nothing() {
        let p = RecordingPublisher {
            refuse_connect: true,
            ..Default::default()
        };
        let id = RunId::from_parts("1", 0, 0);
        let err = Ledger::new(&p, "q")
            .publish_phase(&id, Phase::Post, "a", &tables(&["T1"]), "")
            .unwrap_err();
        assert!(matches!(err, PublishFailure::Connect { .. }));
        assert!(p.messages().is_empty());
    }

    #[test]
    fn test_sf014_failed_send_continues_and_closes() {
        let p = RecordingPublisher {
            reject: vec!["\"T1\"".to_string()],
            ..Default::default()
        };
        let id = RunId::from_parts("1", 0, 0);
        let err = Ledger::new(&p, "q")
            .publish_phase(&id, Phase::Post, "a", &tables(&["T1", "T2"]), "")
            .unwrap_err();
        match err {
            PublishFailure::Send { tables, .. } => assert_eq!(tables, vec!["T1"]),
            other => panic!("unexpected {:?}", other),
        }
        let msgs = p.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["load_tables"], "T2");
        assert_eq!(p.closes(), 1);
    }

    #[test]
    fn test_sf014_no_tables_still_connects() {
        let p = RecordingPublisher::default();
        let id = RunId::from_parts("1", 0, 0);
        let report = Ledger::new(&p, "q")
            .publish_phase(&id, Phase::Pre, "a", &[], "")
            .unwrap();
        assert!(report.sent.is_empty());
        assert_eq!(p.closes(), 1);
    }

    #[test]
    fn test_sf014_spool_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let spec = PublisherSpec::Spool {
            dir: dir.path().to_path_buf(),
        };
        let p = from_spec(&spec);
        let id = RunId::from_parts("20260314150926000000", 9, 9);
        Ledger::new(p.as_ref(), "load_audit")
            .publish_phase(&id, Phase::Pre, "adm.load_audit", &tables(&["fact"]), "d")
            .unwrap();
        let content = std::fs::read_to_string(dir.path().join("load_audit.jsonl")).unwrap();
        let event: AuditEvent = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(event.run_id, "2026031415092600000099");
        assert_eq!(event.phase, Phase::Pre);
    }
}
