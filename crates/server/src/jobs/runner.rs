// crates/server/src/jobs/runner.rs
//! Central job runner that manages all background jobs.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use ulid::Generator;

use super::state::JobState;
use super::types::{JobId, JobKind, JobOutput, JobSnapshot};

/// Default number of job bodies that may execute at once.
pub const DEFAULT_WORKERS: usize = 4;

/// How long finished jobs stay pollable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Central job runner that manages all background jobs.
///
/// Job bodies are blocking closures. Each one is spawned immediately but
/// waits for a worker permit before it runs, so excess jobs sit in `pending`
/// rather than being dropped. Submissions that share a dedup key with a job
/// that is still pending or running get that job's id back.
pub struct JobRunner {
    jobs: RwLock<HashMap<JobId, Arc<JobState>>>,
    inflight: Arc<Mutex<HashMap<String, JobId>>>,
    permits: Arc<Semaphore>,
    ids: Mutex<Generator>,
    retention: Duration,
}

impl JobRunner {
    pub fn new(workers: usize) -> Self {
        Self::with_retention(workers, DEFAULT_RETENTION)
    }

    pub fn with_retention(workers: usize, retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            ids: Mutex::new(Generator::new()),
            retention,
        }
    }

    fn next_id(&self) -> JobId {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let ulid = ids.generate().unwrap_or_else(|e| {
            tracing::warn!("Monotonic ULID overflow, falling back to random: {e}");
            ulid::Ulid::new()
        });
        JobId::from_ulid(ulid)
    }

    /// Queue `work`, or return the id of the unfinished job already
    /// registered under `dedup_key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_task<F>(&self, kind: JobKind, dedup_key: String, work: F) -> JobId
    where
        F: FnOnce() -> Result<JobOutput, String> + Send + 'static,
    {
        let state = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = inflight.get(&dedup_key).copied() {
                if let Some(job) = self.get_state(existing) {
                    if !job.status().is_terminal() {
                        tracing::debug!(job_id = %existing, key = %dedup_key, "Joined in-flight job");
                        return existing;
                    }
                }
            }

            let id = self.next_id();
            let state = Arc::new(JobState::new(id, kind, dedup_key.clone()));
            match self.jobs.write() {
                Ok(mut jobs) => {
                    jobs.insert(id, Arc::clone(&state));
                }
                Err(e) => {
                    tracing::error!("RwLock poisoned writing jobs map: {e}");
                    e.into_inner().insert(id, Arc::clone(&state));
                }
            }
            inflight.insert(dedup_key, id);
            state
        };

        let id = state.id();
        tracing::info!(job_id = %id, kind = kind.as_str(), key = %state.dedup_key(), "Job submitted");

        let permits = Arc::clone(&self.permits);
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(permit) => {
                    state.set_running();
                    tracing::debug!(job_id = %id, "Job running");
                    let joined = tokio::task::spawn_blocking(work).await;
                    drop(permit);
                    match joined {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_panic() => {
                            Err(format!("job panicked: {}", panic_message(e.into_panic())))
                        }
                        Err(e) => Err(format!("job aborted: {e}")),
                    }
                }
                Err(_) => Err("worker pool is shut down".to_string()),
            };

            match &outcome {
                Ok(_) => tracing::info!(job_id = %id, "Job complete"),
                Err(error) => tracing::warn!(job_id = %id, error = %error, "Job failed"),
            }
            state.finish(outcome);

            let mut inflight = inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight.get(state.dedup_key()) == Some(&id) {
                inflight.remove(state.dedup_key());
            }
        });

        id
    }

    fn get_state(&self, id: JobId) -> Option<Arc<JobState>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(&id).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }

    /// Current status of a job, or `None` for an unknown or pruned id.
    pub fn status(&self, id: JobId) -> Option<JobSnapshot> {
        self.get_state(id).map(|s| s.snapshot())
    }

    /// Pending and running jobs, oldest first.
    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        let mut active: Vec<JobSnapshot> = match self.jobs.read() {
            Ok(jobs) => jobs
                .values()
                .map(|s| s.snapshot())
                .filter(|s| !s.status.is_terminal())
                .collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs: {e}");
                Vec::new()
            }
        };
        active.sort_by_key(|s| s.job_id);
        active
    }

    /// Drop finished jobs older than the retention window. Returns how many
    /// were removed.
    pub fn prune_expired(&self) -> usize {
        let cutoff = match chrono::Duration::from_std(self.retention) {
            Ok(d) => chrono::Utc::now() - d,
            Err(_) => return 0,
        };
        let mut jobs = match self.jobs.write() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs map: {e}");
                e.into_inner()
            }
        };
        let before = jobs.len();
        jobs.retain(|_, state| match state.finished_at() {
            Some(at) => at > cutoff,
            None => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = jobs.len(), "Pruned expired jobs");
        }
        removed
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
