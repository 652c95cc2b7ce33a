//! One tomogram's record within a session, and partial updates to it.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CatalogueError, Result};

/// Highest score a user can assign.
pub const MAX_SCORE: u8 = 5;

/// Metadata for one tomogram. `tomo_name` is the key and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub tomo_name: String,
    #[serde(default)]
    pub thickness: Option<f64>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub double_confirmed: bool,
}

impl Entry {
    pub fn new(tomo_name: impl Into<String>) -> Self {
        Self {
            tomo_name: tomo_name.into(),
            thickness: None,
            notes: String::new(),
            score: None,
            delete: false,
            double_confirmed: false,
        }
    }
}

/// A field-partial update keyed by `tomo_name`.
///
/// `None` leaves a field untouched. For the nullable fields an explicit JSON
/// `null` deserializes to `Some(None)` and clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    /// Empty when the name comes from elsewhere (a URL path); validation
    /// rejects it if it is still empty when applied.
    #[serde(default)]
    pub tomo_name: String,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub thickness: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub score: Option<Option<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_confirmed: Option<bool>,
}

/// Distinguishes "absent" from "null" for `Option<Option<T>>` fields.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl EntryUpdate {
    pub fn new(tomo_name: impl Into<String>) -> Self {
        Self {
            tomo_name: tomo_name.into(),
            ..Self::default()
        }
    }

    pub fn thickness(mut self, thickness: Option<f64>) -> Self {
        self.thickness = Some(thickness);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn score(mut self, score: Option<u8>) -> Self {
        self.score = Some(score);
        self
    }

    pub fn delete(mut self, delete: bool) -> Self {
        self.delete = Some(delete);
        self
    }

    pub fn double_confirmed(mut self, double_confirmed: bool) -> Self {
        self.double_confirmed = Some(double_confirmed);
        self
    }

    /// True when the update names no field at all.
    pub fn is_empty(&self) -> bool {
        self.thickness.is_none()
            && self.notes.is_none()
            && self.score.is_none()
            && self.delete.is_none()
            && self.double_confirmed.is_none()
    }

    /// Reject updates that could never be applied. Runs before any mutation.
    pub fn validate(&self) -> Result<()> {
        validate_tomo_name(&self.tomo_name)?;
        if let Some(Some(score)) = self.score {
            if score > MAX_SCORE {
                return Err(CatalogueError::validation(format!(
                    "score for {} must be between 0 and {MAX_SCORE}, got {score}",
                    self.tomo_name
                )));
            }
        }
        if let Some(Some(thickness)) = self.thickness {
            if !thickness.is_finite() {
                return Err(CatalogueError::validation(format!(
                    "thickness for {} must be a finite number",
                    self.tomo_name
                )));
            }
        }
        Ok(())
    }

    /// Apply the named fields to `entry`. Returns whether anything changed.
    pub fn apply_to(&self, entry: &mut Entry) -> bool {
        let before = entry.clone();
        if let Some(thickness) = self.thickness {
            entry.thickness = thickness;
        }
        if let Some(notes) = &self.notes {
            entry.notes.clone_from(notes);
        }
        if let Some(score) = self.score {
            entry.score = score;
        }
        if let Some(delete) = self.delete {
            entry.delete = delete;
        }
        if let Some(double_confirmed) = self.double_confirmed {
            entry.double_confirmed = double_confirmed;
        }
        *entry != before
    }
}

/// Tomogram names are non-blank, single-line, and usable as one path
/// component under the media directory.
pub fn validate_tomo_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CatalogueError::validation("tomo_name must not be empty"));
    }
    if name.contains(['\n', '\r']) {
        return Err(CatalogueError::validation(format!(
            "tomo_name must be a single line: {name:?}"
        )));
    }
    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(CatalogueError::validation(format!(
            "tomo_name must not contain path separators: {name:?}"
        )));
    }
    Ok(())
}
