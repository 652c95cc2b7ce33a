// crates/server/src/jobs/state.rs
//! Atomic state tracking for a single background job.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::types::{JobId, JobKind, JobOutput, JobSnapshot, JobStatus};

/// Terminal payload of a job: the output or the error message.
type Outcome = Result<JobOutput, String>;

/// State for a single job.
///
/// The status is an atomic so pollers never block on a running job. The
/// outcome is written before the terminal status is published, so a reader
/// that sees `complete` or `failed` always sees the payload too.
pub struct JobState {
    id: JobId,
    kind: JobKind,
    dedup_key: String,
    created_at: DateTime<Utc>,
    status: AtomicU8,
    outcome: RwLock<Option<(DateTime<Utc>, Outcome)>>,
}

impl JobState {
    pub fn new(id: JobId, kind: JobKind, dedup_key: String) -> Self {
        Self {
            id,
            kind,
            dedup_key,
            created_at: Utc::now(),
            status: AtomicU8::new(JobStatus::Pending as u8),
            outcome: RwLock::new(None),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// `pending -> running`. Returns false if the job had already moved on.
    pub fn set_running(&self) -> bool {
        self.status
            .compare_exchange(
                JobStatus::Pending as u8,
                JobStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record the outcome and move to `complete` or `failed`.
    /// A job that is already terminal keeps its first outcome.
    pub fn finish(&self, outcome: Outcome) -> bool {
        let target = match outcome {
            Ok(_) => JobStatus::Complete,
            Err(_) => JobStatus::Failed,
        };
        let mut slot = match self.outcome.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing job outcome: {e}");
                e.into_inner()
            }
        };
        if self.status().is_terminal() {
            return false;
        }
        *slot = Some((Utc::now(), outcome));
        self.status.store(target as u8, Ordering::Release);
        true
    }

    /// When the job reached a terminal state.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.outcome.read() {
            Ok(g) => g.as_ref().map(|(at, _)| *at),
            Err(e) => {
                tracing::error!("RwLock poisoned reading job outcome: {e}");
                None
            }
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let status = self.status();
        let (finished_at, result, error) = if status.is_terminal() {
            match self.outcome.read() {
                Ok(g) => match g.as_ref() {
                    Some((at, Ok(output))) => (Some(*at), Some(output.clone()), None),
                    Some((at, Err(error))) => (Some(*at), None, Some(error.clone())),
                    None => (None, None, None),
                },
                Err(e) => {
                    tracing::error!("RwLock poisoned reading job outcome: {e}");
                    (None, None, None)
                }
            }
        } else {
            (None, None, None)
        };

        JobSnapshot {
            job_id: self.id,
            kind: self.kind,
            status,
            created_at: self.created_at,
            finished_at,
            result,
            error,
        }
    }
}
