//! Error taxonomy for the watermarking engine.
//!
//! Per-item errors ([`ItemError`]) are captured into that item's result and
//! never stop sibling items. Batch-level errors ([`BatchError`]) abort before
//! any item is processed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that fail a single batch item.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The source image could not be read or decoded.
    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// The watermark image asset could not be used for this item.
    #[error("watermark image {} unusable for {path}: {message}", .source.asset.display())]
    WatermarkSource {
        path: PathBuf,
        #[source]
        source: WatermarkSourceError,
        message: String,
    },

    /// The output file could not be created or encoded.
    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    /// The requested (or inherited) output format has no encoder.
    #[error("cannot encode {path} as {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// The watermark or resized output would need an oversized buffer.
    #[error("{path}: {source}")]
    TooLarge {
        path: PathBuf,
        #[source]
        source: SizeLimitError,
    },
}

impl ItemError {
    pub fn decode(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn watermark_source(path: impl Into<PathBuf>, source: WatermarkSourceError) -> Self {
        let message = source.message.clone();
        Self::WatermarkSource {
            path: path.into(),
            source,
            message,
        }
    }

    pub fn too_large(path: impl Into<PathBuf>, source: SizeLimitError) -> Self {
        Self::TooLarge {
            path: path.into(),
            source,
        }
    }

    /// Path of the source image the error belongs to.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Decode { path, .. }
            | Self::WatermarkSource { path, .. }
            | Self::Write { path, .. }
            | Self::UnsupportedFormat { path, .. }
            | Self::TooLarge { path, .. } => path,
        }
    }
}

/// Unreadable or undecodable watermark image asset.
#[derive(Debug, Clone, Error)]
#[error("watermark image {}: {message}", .asset.display())]
pub struct WatermarkSourceError {
    pub asset: PathBuf,
    pub message: String,
}

impl WatermarkSourceError {
    pub fn new(asset: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            message: message.into(),
        }
    }
}

/// A raster the engine refuses to allocate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{what} of {width}x{height} pixels exceeds the limit of {limit} pixels")]
pub struct SizeLimitError {
    pub what: &'static str,
    pub width: u64,
    pub height: u64,
    pub limit: u64,
}

impl SizeLimitError {
    /// `Err` when a `width` x `height` raster holds more than `limit` pixels.
    pub fn check(what: &'static str, width: u64, height: u64, limit: u64) -> Result<(), Self> {
        if width.saturating_mul(height) > limit {
            return Err(Self {
                what,
                width,
                height,
                limit,
            });
        }
        Ok(())
    }
}

/// Why a watermark could not be drawn on a photo.
#[derive(Debug, Clone, Error)]
pub enum OverlayError {
    #[error(transparent)]
    Source(#[from] WatermarkSourceError),

    #[error(transparent)]
    TooLarge(#[from] SizeLimitError),
}

/// A malformed [`WatermarkConfig`](crate::WatermarkConfig) field.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid watermark config field `{field}`: {message}")]
pub struct ConfigValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// A saved template that this build cannot load faithfully.
#[derive(Debug, Clone, Error)]
#[error("incompatible template {}: {message}", .path.display())]
pub struct TemplateSchemaError {
    pub path: PathBuf,
    pub message: String,
}

/// Errors from the template store.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Schema(#[from] TemplateSchemaError),

    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template `{0}` is built in and cannot be modified")]
    ReadOnly(String),

    #[error("template I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that abort a batch before any item starts.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch config rejected: {0}")]
    Config(#[source] ConfigValidationError),

    #[error("config override for item {index} rejected: {source}")]
    ItemConfig {
        index: usize,
        #[source]
        source: ConfigValidationError,
    },

    #[error("cannot prepare output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_error_names_file() {
        let err = ItemError::decode("/photos/a.jpg", "invalid JPEG marker");
        assert_eq!(
            err.to_string(),
            "failed to decode /photos/a.jpg: invalid JPEG marker"
        );
        assert_eq!(err.path(), &PathBuf::from("/photos/a.jpg"));
    }

    #[test]
    fn test_watermark_source_error_carries_both_paths() {
        let src = WatermarkSourceError::new("/assets/logo.png", "file not found");
        let err = ItemError::watermark_source("/photos/b.jpg", src);
        let text = err.to_string();
        assert!(text.contains("/assets/logo.png"));
        assert!(text.contains("/photos/b.jpg"));
        assert!(text.contains("file not found"));
    }

    #[test]
    fn test_config_error_names_field() {
        let err = ConfigValidationError::new("text.opacity", "must be 0-100, got 140");
        assert_eq!(
            err.to_string(),
            "invalid watermark config field `text.opacity`: must be 0-100, got 140"
        );
    }

    #[test]
    fn test_size_limit_check() {
        assert!(SizeLimitError::check("overlay", 100, 100, 10_000).is_ok());
        let err = SizeLimitError::check("overlay", u64::MAX, 2, 10_000).unwrap_err();
        assert_eq!(err.width, u64::MAX);

        let item = ItemError::too_large("/photos/c.jpg", SizeLimitError::check("overlay", 200, 100, 10_000).unwrap_err());
        assert_eq!(item.path(), &PathBuf::from("/photos/c.jpg"));
        assert_eq!(
            item.to_string(),
            "/photos/c.jpg: overlay of 200x100 pixels exceeds the limit of 10000 pixels"
        );
    }
}
