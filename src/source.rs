//! Decoded source photos.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use image::{ColorType, DynamicImage, ImageFormat, ImageReader, Limits};
use tracing::debug;

use crate::date;
use crate::error::ItemError;

/// Largest allocation a single decode may make unless overridden.
pub const DEFAULT_DECODE_LIMIT: u64 = 1 << 30;

/// A decoded photo plus the metadata the engine needs from it.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub pixels: DynamicImage,
    pub width: u32,
    pub height: u32,
    pub color: ColorType,
    pub format: Option<ImageFormat>,
    pub path: PathBuf,
    pub captured: Option<NaiveDateTime>,
    pub modified: NaiveDateTime,
}

impl SourceImage {
    /// Decode `path`, refusing any decode that would allocate more than
    /// `decode_limit` bytes.
    pub fn open(path: &Path, decode_limit: u64) -> Result<Self, ItemError> {
        let metadata = std::fs::metadata(path).map_err(|e| ItemError::decode(path, e))?;
        let modified = metadata
            .modified()
            .map(|t| DateTime::<Local>::from(t).naive_local())
            .unwrap_or_else(|_| Local::now().naive_local());

        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| ItemError::decode(path, e))?;
        let (pixels, format) = decode_limited(reader, decode_limit).map_err(|e| ItemError::decode(path, e))?;
        let captured = date::capture_timestamp_from_path(path);

        debug!(
            path = %path.display(),
            width = pixels.width(),
            height = pixels.height(),
            captured = ?captured,
            "decoded source"
        );
        Ok(Self::from_parts(path, pixels, format, captured, modified))
    }

    /// Decode an in-memory photo; `modified` stands in for the file time.
    pub fn from_bytes(
        data: &[u8],
        label: &Path,
        decode_limit: u64,
        modified: NaiveDateTime,
    ) -> Result<Self, ItemError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ItemError::decode(label, e))?;
        let (pixels, format) = decode_limited(reader, decode_limit).map_err(|e| ItemError::decode(label, e))?;
        let captured = date::capture_timestamp_from_bytes(data);
        Ok(Self::from_parts(label, pixels, format, captured, modified))
    }

    pub fn from_parts(
        path: impl Into<PathBuf>,
        pixels: DynamicImage,
        format: Option<ImageFormat>,
        captured: Option<NaiveDateTime>,
        modified: NaiveDateTime,
    ) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            color: pixels.color(),
            pixels,
            format,
            path: path.into(),
            captured,
            modified,
        }
    }

    /// File name without extension, used for `{name}` substitution.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Re-read dimensions after the pixel buffer was replaced.
    pub(crate) fn sync_dimensions(&mut self) {
        self.width = self.pixels.width();
        self.height = self.pixels.height();
    }
}

fn decode_limited<R>(
    mut reader: ImageReader<R>,
    decode_limit: u64,
) -> Result<(DynamicImage, Option<ImageFormat>), image::ImageError>
where
    R: std::io::BufRead + std::io::Seek,
{
    let format = reader.format();
    let mut limits = Limits::default();
    limits.max_alloc = Some(decode_limit);
    reader.limits(limits);
    Ok((reader.decode()?, format))
}
