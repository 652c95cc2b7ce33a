// crates/server/src/media/tracker.rs
//! Readiness cache for derived media, driving lazy derivation jobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tomcat_core::{find_source, SettingsStore};

use super::derive::MediaDeriver;
use super::types::{MediaState, MediaStatus, MediaType};
use crate::jobs::{JobId, JobKind, JobOutput, JobParams, JobRunner, JobStatus, MediaOutput, MediaParams};

type Key = (MediaType, String);

/// Shared status map. Job bodies write into it; pollers read it.
#[derive(Clone, Default)]
struct StatusTable(Arc<RwLock<HashMap<Key, MediaStatus>>>);

impl StatusTable {
    fn get(&self, key: &Key) -> Option<MediaStatus> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: Key, status: MediaStatus) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, status);
    }

    /// Record a pending job unless a terminal state landed first.
    fn set_pending(&self, key: Key, job_id: JobId) -> MediaStatus {
        let mut table = self.0.write().unwrap_or_else(PoisonError::into_inner);
        let entry = table
            .entry(key)
            .or_insert_with(|| MediaStatus::pending(job_id));
        if matches!(entry.status, MediaState::Unknown | MediaState::Pending) {
            *entry = MediaStatus::pending(job_id);
        }
        entry.clone()
    }

    fn mark_ready(&self, key: Key, path: PathBuf) {
        self.set(key, MediaStatus::ready(path));
    }

    /// Record a job failure. A pair that is already ready stays ready.
    fn settle_failed(&self, key: Key, error: String) {
        let mut table = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if table.get(&key).is_some_and(|s| s.status == MediaState::Ready) {
            return;
        }
        table.insert(key, MediaStatus::failed(error));
    }

    fn remove_if(&self, key: &Key, pred: impl FnOnce(&MediaStatus) -> bool) -> bool {
        let mut table = self.0.write().unwrap_or_else(PoisonError::into_inner);
        match table.get(key) {
            Some(status) if pred(status) => {
                table.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// Outcome of a bulk processing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessReport {
    /// Jobs queued or joined.
    pub queued: usize,
    /// Pairs already derived.
    pub ready: usize,
    /// Pairs whose last derivation failed.
    pub failed: usize,
    /// Media types skipped because their source root is not configured.
    pub skipped: usize,
}

pub struct MediaTracker {
    table: StatusTable,
    runner: Arc<JobRunner>,
    settings: Arc<SettingsStore>,
    media_dir: PathBuf,
    deriver: Arc<dyn MediaDeriver>,
}

impl MediaTracker {
    pub fn new(
        runner: Arc<JobRunner>,
        settings: Arc<SettingsStore>,
        media_dir: impl Into<PathBuf>,
        deriver: Arc<dyn MediaDeriver>,
    ) -> Self {
        Self {
            table: StatusTable::default(),
            runner,
            settings,
            media_dir: media_dir.into(),
            deriver,
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Where the derived file for this pair lives (or will live).
    pub fn output_path(&self, media_type: MediaType, tomo_name: &str) -> PathBuf {
        self.media_dir.join(tomo_name).join(media_type.file_name())
    }

    /// Current readiness. An unseen pair with no file on disk gets a job
    /// queued and is reported `pending`.
    pub fn status(&self, media_type: MediaType, tomo_name: &str) -> MediaStatus {
        let key = (media_type, tomo_name.to_string());
        match self.table.get(&key) {
            Some(status) if status.status == MediaState::Pending => {
                self.reconcile_pending(key, status)
            }
            Some(status) if status.status != MediaState::Unknown => status,
            _ => {
                if let Some(path) = self.existing_output(media_type, tomo_name) {
                    let status = MediaStatus::ready(path);
                    self.table.set(key, status.clone());
                    return status;
                }
                let job_id = self.ensure_job(media_type, tomo_name);
                self.table.get(&key).unwrap_or_else(|| MediaStatus::pending(job_id))
            }
        }
    }

    /// A pending entry whose job ended without reporting back (panic, prune)
    /// is resolved from the job record.
    fn reconcile_pending(&self, key: Key, status: MediaStatus) -> MediaStatus {
        let Some(job_id) = status.job_id else {
            return status;
        };
        match self.runner.status(job_id) {
            Some(job) if job.status == JobStatus::Failed => {
                let failed = MediaStatus::failed(
                    job.error.unwrap_or_else(|| "derivation failed".to_string()),
                );
                self.table.set(key, failed.clone());
                failed
            }
            Some(_) => self.table.get(&key).unwrap_or(status),
            None => {
                let (media_type, tomo_name) = key;
                self.table
                    .remove_if(&(media_type, tomo_name.clone()), |s| s.job_id == Some(job_id));
                let job_id = self.ensure_job(media_type, &tomo_name);
                MediaStatus::pending(job_id)
            }
        }
    }

    fn existing_output(&self, media_type: MediaType, tomo_name: &str) -> Option<PathBuf> {
        let path = self.output_path(media_type, tomo_name);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            _ => None,
        }
    }

    pub fn mark_ready(&self, media_type: MediaType, tomo_name: &str, path: PathBuf) {
        self.table.mark_ready((media_type, tomo_name.to_string()), path);
    }

    pub fn mark_failed(&self, media_type: MediaType, tomo_name: &str, error: impl Into<String>) {
        self.table.set(
            (media_type, tomo_name.to_string()),
            MediaStatus::failed(error.into()),
        );
    }

    /// Drop the cached entry and the derived file so the next poll derives
    /// afresh.
    pub fn invalidate(&self, media_type: MediaType, tomo_name: &str) {
        self.table
            .remove_if(&(media_type, tomo_name.to_string()), |_| true);
        let path = self.output_path(media_type, tomo_name);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Cannot remove derived media");
            }
        }
    }

    /// Drop a failed entry so the next poll retries. Returns whether anything
    /// was removed.
    pub fn forget(&self, media_type: MediaType, tomo_name: &str) -> bool {
        let removed = self
            .table
            .remove_if(&(media_type, tomo_name.to_string()), |s| {
                s.status == MediaState::Failed
            });
        if removed {
            tracing::info!(media_type = %media_type, tomo = %tomo_name, "Cleared failed media status");
        }
        removed
    }

    /// Queue derivation of every media type whose source root is configured.
    pub fn request_all<'a, I>(&self, tomo_names: I) -> ProcessReport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let paths = self.settings.paths();
        let mut report = ProcessReport::default();
        for tomo_name in tomo_names {
            for media_type in MediaType::ALL {
                if paths.root(media_type.source_kind()).is_none() {
                    report.skipped += 1;
                    continue;
                }
                match self.status(media_type, tomo_name).status {
                    MediaState::Ready => report.ready += 1,
                    MediaState::Failed => report.failed += 1,
                    MediaState::Pending | MediaState::Unknown => report.queued += 1,
                }
            }
        }
        tracing::info!(
            queued = report.queued,
            ready = report.ready,
            skipped = report.skipped,
            failed = report.failed,
            "Bulk media request"
        );
        report
    }

    /// Submit (or join) the derivation job for this pair and record it as
    /// pending. The status lock is not held while submitting.
    ///
    /// A pair that is already ready is never derived again: the job only
    /// reports the existing file.
    pub fn ensure_job(&self, media_type: MediaType, tomo_name: &str) -> JobId {
        let key = JobParams::Media(MediaParams {
            media_type,
            tomo_name: tomo_name.to_string(),
        })
        .dedup_key();

        let pair = (media_type, tomo_name.to_string());
        let ready = match self.table.get(&pair) {
            Some(MediaStatus {
                status: MediaState::Ready,
                path: Some(path),
                ..
            }) => Some(path),
            _ => self.existing_output(media_type, tomo_name),
        };
        if let Some(path) = ready {
            self.table.mark_ready(pair, path.clone());
            return self.runner.submit_task(JobKind::Media, key, move || {
                Ok(JobOutput::Media(MediaOutput { path }))
            });
        }

        let body = DeriveJob {
            table: self.table.clone(),
            settings: Arc::clone(&self.settings),
            deriver: Arc::clone(&self.deriver),
            output: self.output_path(media_type, tomo_name),
            media_type,
            tomo_name: tomo_name.to_string(),
        };
        let job_id = self
            .runner
            .submit_task(JobKind::Media, key, move || body.run());
        self.table
            .set_pending((media_type, tomo_name.to_string()), job_id);
        job_id
    }
}

/// Body of one media derivation job.
struct DeriveJob {
    table: StatusTable,
    settings: Arc<SettingsStore>,
    deriver: Arc<dyn MediaDeriver>,
    output: PathBuf,
    media_type: MediaType,
    tomo_name: String,
}

impl DeriveJob {
    fn run(self) -> Result<JobOutput, String> {
        let key = (self.media_type, self.tomo_name.clone());
        match self.derive() {
            Ok(path) => {
                self.table.mark_ready(key, path.clone());
                Ok(JobOutput::Media(MediaOutput { path }))
            }
            Err(error) => {
                self.table.settle_failed(key, error.clone());
                Err(error)
            }
        }
    }

    fn derive(&self) -> Result<PathBuf, String> {
        // Produced by an earlier job or restored from an archive.
        if std::fs::metadata(&self.output).is_ok_and(|meta| meta.is_file() && meta.len() > 0) {
            return Ok(self.output.clone());
        }

        let kind = self.media_type.source_kind();
        let root = self
            .settings
            .paths()
            .root(kind)
            .ok_or_else(|| format!("no {kind} directory configured"))?;
        let source = find_source(&self.tomo_name, &root, kind).ok_or_else(|| {
            format!("no {kind} file found for {} under {}", self.tomo_name, root.display())
        })?;

        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }

        let result = self
            .deriver
            .derive(self.media_type, &source, &self.output)
            .map_err(|e| e.to_string())
            .and_then(|()| match std::fs::metadata(&self.output) {
                Ok(meta) if meta.len() > 0 => Ok(()),
                Ok(_) => Err(format!("derivation produced an empty {}", self.media_type.file_name())),
                Err(_) => Err(format!("derivation produced no {}", self.media_type.file_name())),
            });

        if let Err(error) = result {
            let _ = std::fs::remove_file(&self.output);
            return Err(error);
        }
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::runner::tests::wait_terminal;
    use crate::media::derive::DeriveError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tomcat_core::SourcePathsUpdate;

    /// Writes fixed bytes, counting calls. Blocks until released when gated.
    struct FakeDeriver {
        calls: AtomicUsize,
        bytes: &'static [u8],
        gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl FakeDeriver {
        fn new(bytes: &'static [u8]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                bytes,
                gate: Mutex::new(None),
            }
        }
    }

    impl MediaDeriver for FakeDeriver {
        fn derive(&self, _: MediaType, _: &Path, output: &Path) -> Result<(), DeriveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(rx) = self.gate.lock().unwrap().take() {
                rx.recv().ok();
            }
            std::fs::write(output, self.bytes).unwrap();
            Ok(())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        runner: Arc<JobRunner>,
        tracker: MediaTracker,
    }

    fn fixture(deriver: Arc<dyn MediaDeriver>) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let tomos = tmp.path().join("tomos");
        std::fs::create_dir_all(&tomos).unwrap();
        std::fs::write(tomos.join("TS_01.mrc"), b"volume").unwrap();

        let settings = Arc::new(SettingsStore::load(tmp.path().join("config.json")).unwrap());
        settings
            .update(SourcePathsUpdate {
                tomogram_path: Some(tomos.display().to_string()),
                ..Default::default()
            })
            .unwrap();
        let runner = Arc::new(JobRunner::new(2));
        let tracker = MediaTracker::new(
            Arc::clone(&runner),
            settings,
            tmp.path().join("media"),
            deriver,
        );
        Fixture {
            _tmp: tmp,
            runner,
            tracker,
        }
    }

    #[tokio::test]
    async fn test_unseen_pair_goes_pending_then_ready() {
        let fx = fixture(Arc::new(FakeDeriver::new(b"jpeg")));

        let first = fx.tracker.status(MediaType::Thumbnail, "TS_01");
        assert_eq!(first.status, MediaState::Pending);
        let job_id = first.job_id.unwrap();

        let (job, _) = wait_terminal(&fx.runner, job_id).await;
        assert_eq!(job.status, JobStatus::Complete);

        let done = fx.tracker.status(MediaType::Thumbnail, "TS_01");
        assert_eq!(done.status, MediaState::Ready);
        let path = done.path.unwrap();
        assert!(path.ends_with("TS_01/thumbnail.jpg"));
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_concurrent_polls_share_one_job() {
        let deriver = Arc::new(FakeDeriver::new(b"jpeg"));
        let (tx, rx) = std::sync::mpsc::channel();
        *deriver.gate.lock().unwrap() = Some(rx);
        let fx = fixture(deriver.clone());

        let a = fx.tracker.status(MediaType::Tomogram, "TS_01");
        let b = fx.tracker.status(MediaType::Tomogram, "TS_01");
        let c = fx.tracker.ensure_job(MediaType::Tomogram, "TS_01");
        assert_eq!(a.job_id, b.job_id);
        assert_eq!(a.job_id, Some(c));

        tx.send(()).unwrap();
        wait_terminal(&fx.runner, c).await;
        assert_eq!(deriver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_file_is_ready_without_job() {
        let deriver = Arc::new(FakeDeriver::new(b"jpeg"));
        let fx = fixture(deriver.clone());
        let out = fx.tracker.output_path(MediaType::Lowmag, "TS_01");
        std::fs::create_dir_all(out.parent().unwrap()).unwrap();
        std::fs::write(&out, b"cached").unwrap();

        let status = fx.tracker.status(MediaType::Lowmag, "TS_01");
        assert_eq!(status.status, MediaState::Ready);
        assert!(status.job_id.is_none());
        assert!(fx.runner.active_jobs().is_empty());
        assert_eq!(deriver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_output_fails_and_is_removed() {
        let fx = fixture(Arc::new(FakeDeriver::new(b"")));
        let job_id = fx.tracker.status(MediaType::Thumbnail, "TS_01").job_id.unwrap();
        let (job, _) = wait_terminal(&fx.runner, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);

        let status = fx.tracker.status(MediaType::Thumbnail, "TS_01");
        assert_eq!(status.status, MediaState::Failed);
        assert!(status.error.unwrap().contains("empty"));
        assert!(!fx.tracker.output_path(MediaType::Thumbnail, "TS_01").exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails_and_forget_retries() {
        let fx = fixture(Arc::new(FakeDeriver::new(b"jpeg")));
        let job_id = fx.tracker.status(MediaType::Thumbnail, "TS_99").job_id.unwrap();
        wait_terminal(&fx.runner, job_id).await;

        let failed = fx.tracker.status(MediaType::Thumbnail, "TS_99");
        assert_eq!(failed.status, MediaState::Failed);
        assert!(failed.error.unwrap().contains("TS_99"));

        assert!(fx.tracker.forget(MediaType::Thumbnail, "TS_99"));
        assert!(!fx.tracker.forget(MediaType::Thumbnail, "TS_99"));
        let retry = fx.tracker.status(MediaType::Thumbnail, "TS_99");
        assert_eq!(retry.status, MediaState::Pending);
        assert_ne!(retry.job_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_panicking_deriver_resolves_to_failed() {
        struct Panics;
        impl MediaDeriver for Panics {
            fn derive(&self, _: MediaType, _: &Path, _: &Path) -> Result<(), DeriveError> {
                panic!("segfault in decoder");
            }
        }
        let fx = fixture(Arc::new(Panics));
        let job_id = fx.tracker.status(MediaType::Tomogram, "TS_01").job_id.unwrap();
        wait_terminal(&fx.runner, job_id).await;

        let status = fx.tracker.status(MediaType::Tomogram, "TS_01");
        assert_eq!(status.status, MediaState::Failed);
        assert!(status.error.unwrap().contains("segfault"));
    }

    #[tokio::test]
    async fn test_ready_pair_is_never_rederived() {
        struct FirstCallOnly(AtomicUsize);
        impl MediaDeriver for FirstCallOnly {
            fn derive(&self, _: MediaType, _: &Path, output: &Path) -> Result<(), DeriveError> {
                if self.0.fetch_add(1, Ordering::SeqCst) > 0 {
                    return Err(DeriveError::Encode {
                        path: output.display().to_string(),
                        message: "decoder gone".into(),
                    });
                }
                std::fs::write(output, b"jpeg").unwrap();
                Ok(())
            }
        }
        let deriver = Arc::new(FirstCallOnly(AtomicUsize::new(0)));
        let fx = fixture(deriver.clone());
        let first = fx.tracker.status(MediaType::Thumbnail, "TS_01").job_id.unwrap();
        wait_terminal(&fx.runner, first).await;
        assert_eq!(fx.tracker.status(MediaType::Thumbnail, "TS_01").status, MediaState::Ready);

        let again = fx.tracker.ensure_job(MediaType::Thumbnail, "TS_01");
        let (job, _) = wait_terminal(&fx.runner, again).await;
        assert_eq!(job.status, JobStatus::Complete);

        let status = fx.tracker.status(MediaType::Thumbnail, "TS_01");
        assert_eq!(status.status, MediaState::Ready);
        let out = fx.tracker.output_path(MediaType::Thumbnail, "TS_01");
        assert_eq!(std::fs::read(out).unwrap(), b"jpeg");
        assert_eq!(deriver.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_job_failure_does_not_replace_ready() {
        let table = StatusTable::default();
        let key = (MediaType::Tomogram, "TS_01".to_string());
        table.mark_ready(key.clone(), "/m/TS_01/tomogram.jpg".into());
        table.settle_failed(key.clone(), "late failure".into());
        assert_eq!(table.get(&key).unwrap().status, MediaState::Ready);

        let other = (MediaType::Tomogram, "TS_02".to_string());
        table.settle_failed(other.clone(), "no source".into());
        assert_eq!(table.get(&other).unwrap().status, MediaState::Failed);
    }

    #[tokio::test]
    async fn test_invalidate_removes_file_and_rederives() {
        let deriver = Arc::new(FakeDeriver::new(b"jpeg"));
        let fx = fixture(deriver.clone());
        let job_id = fx.tracker.status(MediaType::Tomogram, "TS_01").job_id.unwrap();
        wait_terminal(&fx.runner, job_id).await;
        let out = fx.tracker.output_path(MediaType::Tomogram, "TS_01");
        assert!(out.exists());

        fx.tracker.invalidate(MediaType::Tomogram, "TS_01");
        assert!(!out.exists());
        let retry = fx.tracker.status(MediaType::Tomogram, "TS_01");
        assert_eq!(retry.status, MediaState::Pending);
        wait_terminal(&fx.runner, retry.job_id.unwrap()).await;
        assert_eq!(deriver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_marks_override_cached_state() {
        let fx = fixture(Arc::new(FakeDeriver::new(b"jpeg")));
        fx.tracker.mark_failed(MediaType::Lowmag, "TS_05", "decoder crashed");
        let status = fx.tracker.status(MediaType::Lowmag, "TS_05");
        assert_eq!(status.status, MediaState::Failed);
        assert!(fx.runner.active_jobs().is_empty());

        fx.tracker
            .mark_ready(MediaType::Lowmag, "TS_05", "/m/TS_05/lowmag.jpg".into());
        let status = fx.tracker.status(MediaType::Lowmag, "TS_05");
        assert_eq!(status.status, MediaState::Ready);
        assert_eq!(status.path.unwrap(), PathBuf::from("/m/TS_05/lowmag.jpg"));
    }

    #[tokio::test]
    async fn test_request_all_skips_unconfigured_roots() {
        let fx = fixture(Arc::new(FakeDeriver::new(b"jpeg")));
        let report = fx.tracker.request_all(["TS_01"]);
        // Only the tomogram root is configured: thumbnail + tomogram.
        assert_eq!(report.queued, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.ready, 0);

        let job_id = fx.tracker.status(MediaType::Thumbnail, "TS_01").job_id;
        if let Some(job_id) = job_id {
            wait_terminal(&fx.runner, job_id).await;
        }
        let job_id = fx.tracker.status(MediaType::Tomogram, "TS_01").job_id;
        if let Some(job_id) = job_id {
            wait_terminal(&fx.runner, job_id).await;
        }
        let report = fx.tracker.request_all(["TS_01"]);
        assert_eq!(report.ready, 2);
        assert_eq!(report.queued, 0);
    }
}
