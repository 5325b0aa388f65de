// src/ingest/run.rs
//! Run lifecycle as a value: `queued → running → success | failed`.
//! Transitions are pure and return the next `Run`; persisting it is the
//! orchestrator's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTransition {
    Start,
    Succeed,
    Fail { class: String, message: String },
}

impl RunTransition {
    pub fn fail_with(err: &IngestError) -> Self {
        RunTransition::Fail {
            class: err.class().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Run {
    pub id: i64,
    pub source_id: i64,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_found: u64,
    pub items_written: u64,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
}

impl Run {
    pub fn queued(id: i64, source_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source_id,
            status: RunStatus::Queued,
            queued_at: now,
            started_at: None,
            finished_at: None,
            items_found: 0,
            items_written: 0,
            error_class: None,
            error_message: None,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Apply one transition. Counts are carried over untouched, so a failed
    /// run keeps whatever progress it had made.
    pub fn transition(&self, t: RunTransition, now: DateTime<Utc>) -> IngestResult<Run> {
        let mut next = self.clone();
        match (self.status, t) {
            (RunStatus::Queued, RunTransition::Start) => {
                next.status = RunStatus::Running;
                next.started_at = Some(now);
                next.finished_at = None;
                next.error_class = None;
                next.error_message = None;
            }
            (RunStatus::Running, RunTransition::Succeed) => {
                next.status = RunStatus::Success;
                next.finished_at = Some(now);
            }
            (RunStatus::Running, RunTransition::Fail { class, message }) => {
                next.status = RunStatus::Failed;
                next.finished_at = Some(now);
                next.error_class = Some(class);
                next.error_message = Some(message);
            }
            (status, t) => {
                return Err(IngestError::config(format!(
                    "run {} cannot apply {:?} while {}",
                    self.id,
                    t,
                    status.as_str()
                )))
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, 0, 0).unwrap()
    }

    #[test]
    fn happy_path() {
        let run = Run::queued(1, 9, t(1));
        let running = run.transition(RunTransition::Start, t(2)).unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert_eq!(running.started_at, Some(t(2)));
        let done = running.transition(RunTransition::Succeed, t(3)).unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.finished_at, Some(t(3)));
        assert!(!done.is_outstanding());
    }

    #[test]
    fn failure_keeps_counts_and_records_error() {
        let mut running = Run::queued(1, 9, t(1))
            .transition(RunTransition::Start, t(2))
            .unwrap();
        running.items_found = 12;
        running.items_written = 5;
        let err = IngestError::Status {
            url: "https://x.test".into(),
            status: 500,
        };
        let failed = running
            .transition(RunTransition::fail_with(&err), t(3))
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.items_found, 12);
        assert_eq!(failed.items_written, 5);
        assert_eq!(failed.error_class.as_deref(), Some("HttpStatusError"));
        assert!(failed.error_message.unwrap().contains("500"));
    }

    #[test]
    fn start_clears_stale_error_fields() {
        let mut run = Run::queued(1, 9, t(1));
        run.error_class = Some("Old".into());
        run.error_message = Some("old".into());
        let running = run.transition(RunTransition::Start, t(2)).unwrap();
        assert!(running.error_class.is_none());
        assert!(running.error_message.is_none());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let run = Run::queued(1, 9, t(1));
        assert!(run.transition(RunTransition::Succeed, t(2)).is_err());
        let done = run
            .transition(RunTransition::Start, t(2))
            .and_then(|r| r.transition(RunTransition::Succeed, t(3)))
            .unwrap();
        assert!(done.transition(RunTransition::Start, t(4)).is_err());
        assert!(done
            .transition(
                RunTransition::Fail {
                    class: "X".into(),
                    message: "y".into()
                },
                t(4)
            )
            .is_err());
    }
}
