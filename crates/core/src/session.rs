//! In-memory record store for one session.
//!
//! A [`Session`] is an insertion-ordered `tomo_name -> Entry` mapping. All
//! mutation helpers validate their input before touching any entry, so a
//! rejected call leaves the session exactly as it was.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entry::{validate_tomo_name, Entry, EntryUpdate};
use crate::error::{CatalogueError, Result};

/// Rows per page when the caller does not say.
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    name: String,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

/// Result of adding a single tomogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    Skipped,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Counts from a batch add (search-and-add).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReport {
    pub added: usize,
    pub skipped: usize,
}

/// Outcome of [`Session::apply_bulk`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Rows whose stored values changed.
    pub updated: usize,
    /// Rows present in the session whose values were already up to date.
    pub unchanged: usize,
    /// Names in the batch that are not part of the session.
    pub missing: Vec<String>,
}

/// One page of the (optionally filtered) entry list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub entries: Vec<Entry>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a session from stored rows. Duplicate names are rejected.
    pub fn from_entries(name: impl Into<String>, entries: Vec<Entry>) -> Result<Self> {
        let mut session = Self::new(name);
        for entry in entries {
            validate_tomo_name(&entry.tomo_name)?;
            if session.index.contains_key(&entry.tomo_name) {
                return Err(CatalogueError::validation(format!(
                    "duplicate tomo_name in session {}: {}",
                    session.name, entry.tomo_name
                )));
            }
            session.push(entry);
        }
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, tomo_name: &str) -> Option<&Entry> {
        self.index.get(tomo_name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, tomo_name: &str) -> bool {
        self.index.contains_key(tomo_name)
    }

    pub fn tomo_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.tomo_name.as_str())
    }

    fn push(&mut self, entry: Entry) {
        self.index.insert(entry.tomo_name.clone(), self.entries.len());
        self.entries.push(entry);
    }

    fn get_mut(&mut self, tomo_name: &str) -> Option<&mut Entry> {
        match self.index.get(tomo_name) {
            Some(&i) => Some(&mut self.entries[i]),
            None => None,
        }
    }

    /// Append a blank entry. An existing name is reported as skipped.
    pub fn add_entry(&mut self, tomo_name: &str) -> Result<AddOutcome> {
        validate_tomo_name(tomo_name)?;
        if self.contains(tomo_name) {
            return Ok(AddOutcome::Skipped);
        }
        self.push(Entry::new(tomo_name));
        Ok(AddOutcome::Added)
    }

    /// Append every name not already present, in the given order.
    pub fn add_entries<'a, I>(&mut self, names: I) -> Result<AddReport>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        for name in &names {
            validate_tomo_name(name)?;
        }
        let mut report = AddReport::default();
        for name in names {
            match self.add_entry(name)? {
                AddOutcome::Added => report.added += 1,
                AddOutcome::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    /// Apply `update`, creating the entry first if it does not exist.
    pub fn upsert(&mut self, update: &EntryUpdate) -> Result<UpsertOutcome> {
        update.validate()?;
        if let Some(entry) = self.get_mut(&update.tomo_name) {
            return Ok(if update.apply_to(entry) {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Unchanged
            });
        }
        let mut entry = Entry::new(update.tomo_name.clone());
        update.apply_to(&mut entry);
        self.push(entry);
        Ok(UpsertOutcome::Inserted)
    }

    /// Set the soft-delete marker on an existing entry.
    pub fn mark_for_deletion(&mut self, tomo_name: &str) -> Result<()> {
        let session = self.name.clone();
        let entry = self
            .get_mut(tomo_name)
            .ok_or_else(|| CatalogueError::EntryNotFound {
                session,
                tomo_name: tomo_name.to_string(),
            })?;
        entry.delete = true;
        Ok(())
    }

    /// Apply a batch of partial updates in order.
    ///
    /// Every update is validated before any is applied. Names that are not in
    /// the session are listed in [`BulkReport::missing`] rather than created.
    pub fn apply_bulk(&mut self, updates: &[EntryUpdate]) -> Result<BulkReport> {
        for update in updates {
            update.validate()?;
        }
        let mut report = BulkReport::default();
        for update in updates {
            match self.get_mut(&update.tomo_name) {
                Some(entry) => {
                    if update.apply_to(entry) {
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                None => {
                    if !report.missing.contains(&update.tomo_name) {
                        report.missing.push(update.tomo_name.clone());
                    }
                }
            }
        }
        Ok(report)
    }

    /// Slice of entries whose notes contain `notes_filter` (case-insensitive).
    ///
    /// `page` is 1-based; 0 is treated as 1 and a page past the end is empty.
    /// A `page_size` of 0 falls back to [`DEFAULT_PAGE_SIZE`].
    pub fn get_page(&self, page: usize, page_size: usize, notes_filter: &str) -> Page {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        let needle = notes_filter.to_lowercase();
        let filtered: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| needle.is_empty() || e.notes.to_lowercase().contains(&needle))
            .collect();

        let total_count = filtered.len();
        let total_pages = total_count.div_ceil(page_size);
        let entries = filtered
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        Page {
            entries,
            total_count,
            page,
            page_size,
            total_pages,
        }
    }
}
