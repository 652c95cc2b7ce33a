// crates/server/src/media/mod.rs
//! Derived media: thumbnails, overviews and animated previews.

pub mod derive;
pub mod tracker;
pub mod types;

pub use derive::{DeriveError, ImageDeriver, MediaDeriver};
pub use tracker::{MediaTracker, ProcessReport};
pub use types::{MediaState, MediaStatus, MediaType};
