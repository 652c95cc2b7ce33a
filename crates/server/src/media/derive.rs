// crates/server/src/media/derive.rs
//! The media derivation seam and the built-in raster deriver.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use thiserror::Error;

use super::types::MediaType;

/// Longest edge of a generated thumbnail.
const THUMBNAIL_SIZE: u32 = 256;
/// Longest edge of a generated low-mag overview.
const LOWMAG_SIZE: u32 = 1024;

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("Cannot derive {media_type} from {path}: unsupported source format")]
    Unsupported { media_type: MediaType, path: String },

    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    Encode { path: String, message: String },
}

/// Produces one derived file from one source file.
///
/// Implementations write `output` directly; the caller removes it again if
/// derivation fails or leaves it empty.
pub trait MediaDeriver: Send + Sync {
    fn derive(&self, media_type: MediaType, source: &Path, output: &Path) -> Result<(), DeriveError>;
}

/// Still images from raster sources (TIFF, PNG, JPEG) via the `image` crate.
/// Volume formats and animations are reported as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDeriver;

impl ImageDeriver {
    fn is_raster(path: &Path) -> bool {
        matches!(
            path.extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .as_deref(),
            Some("tif" | "tiff" | "png" | "jpg" | "jpeg")
        )
    }
}

impl MediaDeriver for ImageDeriver {
    fn derive(&self, media_type: MediaType, source: &Path, output: &Path) -> Result<(), DeriveError> {
        if media_type.is_animation() || !Self::is_raster(source) {
            return Err(DeriveError::Unsupported {
                media_type,
                path: source.display().to_string(),
            });
        }

        let img = image::open(source).map_err(|e| DeriveError::Decode {
            path: source.display().to_string(),
            message: e.to_string(),
        })?;

        let size = match media_type {
            MediaType::Thumbnail => THUMBNAIL_SIZE,
            _ => LOWMAG_SIZE,
        };
        let resized = img.resize(size, size, FilterType::Lanczos3);
        // JPEG has no alpha channel.
        DynamicImage::ImageRgb8(resized.to_rgb8())
            .save_with_format(output, ImageFormat::Jpeg)
            .map_err(|e| DeriveError::Encode {
                path: output.display().to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(
            media_type = %media_type,
            source = %source.display(),
            output = %output.display(),
            "Derived media"
        );
        Ok(())
    }
}
