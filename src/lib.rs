pub mod compositor;
pub mod config;
pub mod date;
pub mod error;
pub mod export;
pub mod font;
pub mod geometry;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod template;
pub mod watermark;

pub use config::{
    Anchor, Color, ImageConfig, MissingAssetPolicy, PlacementConfig, ShadowConfig, StrokeConfig, TextConfig,
    WatermarkConfig, WatermarkMode,
};
pub use error::{
    BatchError, ConfigValidationError, ItemError, OverlayError, SizeLimitError, TemplateError, TemplateSchemaError,
    WatermarkSourceError,
};
pub use export::{ExportOptions, NamingRule, OutputFormat, OverwritePolicy, ResizeRule};
pub use font::{BuiltinFontResolver, FontResolver, FontSet, SharedFontResolver};
#[cfg(not(target_arch = "wasm32"))]
pub use font::SystemFontResolver;
pub use pipeline::{
    BatchItem, BatchPipeline, BatchReport, BatchSummary, CancelToken, ItemOutcome, ItemResult, NoProgress,
    ProgressSink, SkipReason,
};
pub use source::SourceImage;
pub use template::{Template, TemplateStore, TEMPLATE_SCHEMA_VERSION};
pub use watermark::PreparedWatermark;

use std::io::Cursor;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use wasm_bindgen::prelude::*;

/// Watermark one in-memory photo.
///
/// `logo_bytes` is only read in image mode. `fallback_date` (`YYYY-MM-DD`,
/// optional) stands in for the file time when the photo has no EXIF capture
/// date. Output keeps the input format when it can be encoded, else PNG.
#[wasm_bindgen]
pub fn watermark_image(
    image_bytes: &[u8],
    logo_bytes: &[u8],
    config_json: &str,
    fallback_date: &str,
    quality: u8,
) -> Result<Vec<u8>, JsValue> {
    let config = parse_config(config_json)?;
    let prepared = PreparedWatermark::prepare_from_bytes(&config, logo_bytes);
    match (prepared.image_error(), config.missing_asset) {
        (Some(OverlayError::Source(err)), MissingAssetPolicy::Fail) => {
            return Err(js_error(format!("Error loading watermark image: {err}")));
        }
        (Some(OverlayError::TooLarge(err)), _) => {
            return Err(js_error(format!("Error preparing watermark image: {err}")));
        }
        _ => {}
    }

    let modified = parse_fallback_date(fallback_date)?;
    let mut source = SourceImage::from_bytes(image_bytes, Path::new("image"), source::DEFAULT_DECODE_LIMIT, modified)
        .map_err(|e| js_error(format!("Error decoding image: {e}")))?;

    match prepared.apply(&mut source, &BuiltinFontResolver) {
        Ok(_) => {}
        Err(OverlayError::Source(_)) if config.missing_asset == MissingAssetPolicy::SkipWatermark => {}
        Err(err) => return Err(js_error(format!("Error applying watermark: {err}"))),
    }

    let format = source
        .format
        .and_then(OutputFormat::from_image_format)
        .unwrap_or(OutputFormat::Png);
    let mut out = Cursor::new(Vec::new());
    export::encode(&source.pixels, format, quality.clamp(1, 100), &mut out)
        .map_err(|e| js_error(format!("Error encoding image: {e}")))?;
    Ok(out.into_inner())
}

/// Validate a config JSON document, naming the offending field on failure.
#[wasm_bindgen]
pub fn validate_config(config_json: &str) -> Result<(), JsValue> {
    parse_config(config_json).map(|_| ())
}

fn parse_config(config_json: &str) -> Result<WatermarkConfig, JsValue> {
    let config =
        WatermarkConfig::from_json(config_json).map_err(|e| js_error(format!("Invalid config JSON: {e}")))?;
    config.validate().map_err(|e| js_error(e.to_string()))?;
    Ok(config)
}

fn parse_fallback_date(raw: &str) -> Result<NaiveDateTime, JsValue> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Utc::now().naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| js_error(format!("fallback date must be YYYY-MM-DD, got `{raw}`")))
}

fn js_error(message: String) -> JsValue {
    JsValue::from_str(&message)
}
