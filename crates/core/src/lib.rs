// crates/core/src/lib.rs
pub mod archive;
pub mod atomic;
pub mod codec;
pub mod entry;
pub mod error;
pub mod locator;
pub mod paths;
pub mod session;
pub mod settings;
pub mod store;

pub use archive::{export_archive, import_archive, ImportReport};
pub use entry::{validate_tomo_name, Entry, EntryUpdate, MAX_SCORE};
pub use error::*;
pub use locator::{extract_basename, find_source, search_tomograms, SearchCandidate, SearchError, SourceKind};
pub use paths::DataLayout;
pub use session::{AddOutcome, AddReport, BulkReport, Page, Session, UpsertOutcome, DEFAULT_PAGE_SIZE};
pub use settings::{SettingsStore, SourcePaths, SourcePathsUpdate};
pub use store::{SessionStore, SessionSummary};
