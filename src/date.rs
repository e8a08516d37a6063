//! Date Resolver.
//!
//! Produces the display date for a photo: the embedded EXIF capture time when
//! present and well formed, otherwise the file modification time.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;

use chrono::NaiveDateTime;
use exif::{In, Tag, Value};
use tracing::debug;

use crate::source::SourceImage;

/// Layout of EXIF `DateTime*` fields.
pub const EXIF_TIMESTAMP_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats a photo's capture (or modification) time with a strftime pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateResolver {
    pattern: String,
}

impl DateResolver {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Display date for `source`. Never fails.
    pub fn resolve(&self, source: &SourceImage) -> String {
        self.format(source.captured.unwrap_or(source.modified))
    }

    /// Format `at` with the configured pattern, falling back to
    /// [`DEFAULT_DATE_FORMAT`] if the pattern cannot be rendered.
    pub fn format(&self, at: NaiveDateTime) -> String {
        let mut out = String::new();
        if write!(out, "{}", at.format(&self.pattern)).is_err() {
            debug!(pattern = %self.pattern, "unusable date pattern, using default");
            out.clear();
            let _ = write!(out, "{}", at.format(DEFAULT_DATE_FORMAT));
        }
        out
    }
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

/// Parse an EXIF timestamp such as `2023:05:01 10:00:00`.
///
/// Placeholder values like `0000:00:00 00:00:00` are not valid dates and
/// yield `None`.
pub fn parse_capture_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(trimmed, EXIF_TIMESTAMP_FORMAT).ok()
}

/// Capture timestamp from any container kamadak-exif understands (JPEG,
/// TIFF, PNG, WebP, HEIF). `DateTimeOriginal` wins over `DateTime`.
pub fn capture_timestamp<R: BufRead + Seek>(reader: &mut R) -> Option<NaiveDateTime> {
    let exif = match exif::Reader::new().read_from_container(reader) {
        Ok(exif) => exif,
        Err(err) => {
            debug!(error = %err, "no usable exif block");
            return None;
        }
    };
    [Tag::DateTimeOriginal, Tag::DateTime].into_iter().find_map(|tag| {
        let field = exif.get_field(tag, In::PRIMARY)?;
        match &field.value {
            Value::Ascii(parts) => parts
                .first()
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .and_then(parse_capture_timestamp),
            _ => None,
        }
    })
}

pub fn capture_timestamp_from_bytes(data: &[u8]) -> Option<NaiveDateTime> {
    capture_timestamp(&mut std::io::Cursor::new(data))
}

pub fn capture_timestamp_from_path(path: &Path) -> Option<NaiveDateTime> {
    let file = File::open(path).ok()?;
    capture_timestamp(&mut BufReader::new(file))
}
