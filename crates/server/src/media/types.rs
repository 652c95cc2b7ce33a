// crates/server/src/media/types.rs
//! Media kinds and their readiness states.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tomcat_core::SourceKind;

use crate::jobs::JobId;

/// A derived artifact that can be produced for a tomogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Lowmag,
    Tiltseries,
    Tomogram,
    Thumbnail,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Thumbnail,
        MediaType::Lowmag,
        MediaType::Tiltseries,
        MediaType::Tomogram,
    ];

    /// File name inside `<media_dir>/<tomo_name>/`.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Lowmag => "lowmag.jpg",
            Self::Tiltseries => "tiltseries.gif",
            Self::Tomogram => "tomogram.gif",
            Self::Thumbnail => "thumbnail.jpg",
        }
    }

    /// Which configured root the source data comes from.
    pub fn source_kind(self) -> SourceKind {
        match self {
            Self::Lowmag => SourceKind::Lowmag,
            Self::Tiltseries => SourceKind::Tiltseries,
            Self::Tomogram | Self::Thumbnail => SourceKind::Tomogram,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Lowmag | Self::Thumbnail => "image/jpeg",
            Self::Tiltseries | Self::Tomogram => "image/gif",
        }
    }

    /// Animated previews rather than still images.
    pub fn is_animation(self) -> bool {
        matches!(self, Self::Tiltseries | Self::Tomogram)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lowmag => "lowmag",
            Self::Tiltseries => "tiltseries",
            Self::Tomogram => "tomogram",
            Self::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowmag" => Ok(Self::Lowmag),
            "tiltseries" => Ok(Self::Tiltseries),
            "tomogram" => Ok(Self::Tomogram),
            "thumbnail" => Ok(Self::Thumbnail),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    Unknown,
    Pending,
    Ready,
    Failed,
}

/// Readiness of one `(media_type, tomo_name)` pair, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaStatus {
    pub status: MediaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub last_checked_at: DateTime<Utc>,
}

impl MediaStatus {
    pub fn unknown() -> Self {
        Self::with_state(MediaState::Unknown)
    }

    pub fn pending(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::with_state(MediaState::Pending)
        }
    }

    pub fn ready(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Self::with_state(MediaState::Ready)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_state(MediaState::Failed)
        }
    }

    fn with_state(status: MediaState) -> Self {
        Self {
            status,
            path: None,
            error: None,
            job_id: None,
            last_checked_at: Utc::now(),
        }
    }
}
