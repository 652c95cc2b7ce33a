// crates/server/src/jobs/types.rs
//! Types for the background job system.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tomcat_core::{SearchCandidate, SourceKind};
use ulid::Ulid;

use crate::media::MediaType;

/// Unique, time-ordered identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    pub(crate) fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Search,
    Media,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Media => "media",
        }
    }
}

/// Status of a background job. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Running = 1,
    Complete = 2,
    Failed = 3,
}

impl JobStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Complete,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Parameters of a search job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Session the discovered tomograms are added to, if any.
    #[serde(default)]
    pub session: Option<String>,
    pub search_basename: String,
    /// Roots to walk. Empty means the configured tomogram and tilt-series roots.
    #[serde(default)]
    pub search_root_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaParams {
    pub media_type: MediaType,
    pub tomo_name: String,
}

impl SearchParams {
    /// Key over the session, the normalised basename and the roots actually
    /// walked, in any order.
    pub fn dedup_key(&self, roots: &[(SourceKind, PathBuf)]) -> String {
        let mut roots: Vec<String> = roots
            .iter()
            .map(|(kind, root)| format!("{kind}={}", root.display()))
            .collect();
        roots.sort();
        roots.dedup();
        format!(
            "search:{}:{}:{}",
            self.session.as_deref().unwrap_or(""),
            self.search_basename.trim().to_lowercase(),
            roots.join("|")
        )
    }
}

/// What a job is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Search(SearchParams),
    Media(MediaParams),
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Search(_) => JobKind::Search,
            Self::Media(_) => JobKind::Media,
        }
    }

    /// Submissions with equal keys share one in-flight job.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Search(p) => {
                let roots: Vec<(SourceKind, PathBuf)> = p
                    .search_root_paths
                    .iter()
                    .map(|root| (SourceKind::Tomogram, root.clone()))
                    .collect();
                p.dedup_key(&roots)
            }
            Self::Media(p) => format!("media:{}:{}", p.media_type, p.tomo_name),
        }
    }
}

/// Result payload of a finished search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutput {
    pub candidates: Vec<SearchCandidate>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaOutput {
    pub path: PathBuf,
}

/// Result of a completed job, matching its [`JobParams`] variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Search(SearchOutput),
    Media(MediaOutput),
}

/// Point-in-time view of a job, as returned to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
