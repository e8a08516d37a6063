//! Watermark configuration.
//!
//! A [`WatermarkConfig`] is an immutable value shared by every item of a
//! batch run. Opacities are stored as percentages (0-100) so templates stay
//! human-editable; the engine reads them through the normalized accessors.

use std::fmt;
use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;

pub const MAX_FONT_SIZE: f32 = 1000.0;
pub const MAX_EFFECT_WIDTH: u32 = 64;
pub const MAX_IMAGE_SCALE: f32 = 100.0;
/// Largest shadow displacement on either axis, in pixels.
pub const MAX_SHADOW_OFFSET: i32 = MAX_EFFECT_WIDTH as i32 * 16;

/// RGB color, serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255)
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0)
    }

    /// Parse `#RGB` or `#RRGGBB`.
    pub fn parse_hex(hex: &str) -> Result<Self, String> {
        let digits = hex
            .strip_prefix('#')
            .ok_or_else(|| format!("color must start with '#', got {hex:?}"))?;
        if !digits.is_ascii() {
            return Err(format!("invalid hex color {hex:?}"));
        }
        let channel = |s: &str| {
            u8::from_str_radix(s, 16).map_err(|_| format!("invalid hex color {hex:?}"))
        };
        match digits.len() {
            3 => Ok(Self::new(
                channel(&digits[0..1])? * 17,
                channel(&digits[1..2])? * 17,
                channel(&digits[2..3])? * 17,
            )),
            6 => Ok(Self::new(
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            )),
            n => Err(format!("color must be #RGB or #RRGGBB, got {n} digits")),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_hex(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkMode {
    #[default]
    Text,
    Image,
}

/// Where the overlay lands: nine presets or an explicit top-left offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
    Custom { x: i32, y: i32 },
}

impl Anchor {
    pub const PRESETS: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::CenterLeft,
        Anchor::Center,
        Anchor::CenterRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];
}

/// What to do when the watermark image asset cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingAssetPolicy {
    /// The item fails with a watermark-source error.
    #[default]
    Fail,
    /// The item is exported without a watermark.
    SkipWatermark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextConfig {
    /// Text to draw. `{date}` and `{name}` are substituted per image.
    pub content: String,
    pub font_family: String,
    /// Font size in pixels.
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub color: Color,
    pub opacity: u8,
    /// chrono strftime pattern used for `{date}`.
    pub date_format: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            content: "{date}".to_string(),
            font_family: "Arial".to_string(),
            font_size: 32.0,
            bold: false,
            italic: false,
            color: Color::white(),
            opacity: 80,
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

impl TextConfig {
    pub fn alpha(&self) -> f32 {
        percent_to_unit(self.opacity)
    }

    pub fn references_date(&self) -> bool {
        self.content.contains("{date}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub path: PathBuf,
    /// Scale factor applied to the decoded asset.
    pub scale: f32,
    pub opacity: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            scale: 1.0,
            opacity: 80,
        }
    }
}

impl ImageConfig {
    pub fn alpha(&self) -> f32 {
        percent_to_unit(self.opacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrokeConfig {
    pub enabled: bool,
    pub color: Color,
    pub width: u32,
    pub opacity: u8,
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Color::black(),
            width: 1,
            opacity: 100,
        }
    }
}

impl StrokeConfig {
    pub fn alpha(&self) -> f32 {
        percent_to_unit(self.opacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShadowConfig {
    pub enabled: bool,
    pub color: Color,
    pub offset_x: i32,
    pub offset_y: i32,
    /// Blur radius in pixels; 0 draws a flat shadow.
    pub blur: u32,
    pub opacity: u8,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Color::black(),
            offset_x: 2,
            offset_y: 2,
            blur: 0,
            opacity: 60,
        }
    }
}

impl ShadowConfig {
    pub fn alpha(&self) -> f32 {
        percent_to_unit(self.opacity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    pub anchor: Anchor,
    pub margin_x: i32,
    pub margin_y: i32,
    /// Degrees, counter-clockwise.
    pub rotation: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            anchor: Anchor::BottomRight,
            margin_x: 10,
            margin_y: 10,
            rotation: 0.0,
        }
    }
}

impl PlacementConfig {
    /// Rotation normalized to `[0, 360)`.
    pub fn rotation(&self) -> f32 {
        normalize_rotation(self.rotation)
    }
}

/// Complete watermark configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    pub mode: WatermarkMode,
    pub text: TextConfig,
    pub image: ImageConfig,
    pub stroke: StrokeConfig,
    pub shadow: ShadowConfig,
    pub placement: PlacementConfig,
    pub missing_asset: MissingAssetPolicy,
}

impl WatermarkConfig {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            mode: WatermarkMode::Text,
            text: TextConfig {
                content: content.into(),
                ..TextConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: WatermarkMode::Image,
            image: ImageConfig {
                path: path.into(),
                ..ImageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check every field the engine relies on.
    ///
    /// Only fields of the active mode are checked, except placement which
    /// applies to both.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        match self.mode {
            WatermarkMode::Text => self.validate_text()?,
            WatermarkMode::Image => self.validate_image()?,
        }

        if !self.placement.rotation.is_finite() {
            return Err(ConfigValidationError::new(
                "placement.rotation",
                "must be a finite number of degrees",
            ));
        }
        Ok(())
    }

    fn validate_text(&self) -> Result<(), ConfigValidationError> {
        let text = &self.text;
        if text.content.trim().is_empty() {
            return Err(ConfigValidationError::new(
                "text.content",
                "must not be empty",
            ));
        }
        if !text.font_size.is_finite() || text.font_size <= 0.0 || text.font_size > MAX_FONT_SIZE {
            return Err(ConfigValidationError::new(
                "text.font_size",
                format!("must be in (0, {MAX_FONT_SIZE}], got {}", text.font_size),
            ));
        }
        check_percent("text.opacity", text.opacity)?;
        if text.references_date() {
            check_date_format(&text.date_format)?;
        }

        if self.stroke.enabled {
            check_percent("stroke.opacity", self.stroke.opacity)?;
            if self.stroke.width > MAX_EFFECT_WIDTH {
                return Err(ConfigValidationError::new(
                    "stroke.width",
                    format!("must be at most {MAX_EFFECT_WIDTH}, got {}", self.stroke.width),
                ));
            }
        }
        if self.shadow.enabled {
            check_percent("shadow.opacity", self.shadow.opacity)?;
            if self.shadow.blur > MAX_EFFECT_WIDTH {
                return Err(ConfigValidationError::new(
                    "shadow.blur",
                    format!("must be at most {MAX_EFFECT_WIDTH}, got {}", self.shadow.blur),
                ));
            }
            check_offset("shadow.offset_x", self.shadow.offset_x)?;
            check_offset("shadow.offset_y", self.shadow.offset_y)?;
        }
        Ok(())
    }

    fn validate_image(&self) -> Result<(), ConfigValidationError> {
        let image = &self.image;
        if image.path.as_os_str().is_empty() {
            return Err(ConfigValidationError::new(
                "image.path",
                "is required in image mode",
            ));
        }
        if !image.scale.is_finite() || image.scale <= 0.0 || image.scale > MAX_IMAGE_SCALE {
            return Err(ConfigValidationError::new(
                "image.scale",
                format!("must be in (0, {MAX_IMAGE_SCALE}], got {}", image.scale),
            ));
        }
        check_percent("image.opacity", image.opacity)
    }
}

fn check_percent(field: &'static str, value: u8) -> Result<(), ConfigValidationError> {
    if value > 100 {
        return Err(ConfigValidationError::new(
            field,
            format!("must be 0-100, got {value}"),
        ));
    }
    Ok(())
}

fn check_offset(field: &'static str, value: i32) -> Result<(), ConfigValidationError> {
    if value.unsigned_abs() > MAX_SHADOW_OFFSET.unsigned_abs() {
        return Err(ConfigValidationError::new(
            field,
            format!("must be within ±{MAX_SHADOW_OFFSET}, got {value}"),
        ));
    }
    Ok(())
}

fn check_date_format(pattern: &str) -> Result<(), ConfigValidationError> {
    if pattern.is_empty() {
        return Err(ConfigValidationError::new(
            "text.date_format",
            "must not be empty",
        ));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigValidationError::new(
            "text.date_format",
            format!("invalid date pattern {pattern:?}"),
        ));
    }
    Ok(())
}

fn percent_to_unit(value: u8) -> f32 {
    f32::from(value.min(100)) / 100.0
}

/// Normalize degrees to `[0, 360)`.
pub fn normalize_rotation(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let r = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(Color::parse_hex("#FF0000").unwrap(), Color::new(255, 0, 0));
        assert_eq!(Color::parse_hex("#abc").unwrap(), Color::new(170, 187, 204));
        assert!(Color::parse_hex("FF0000").is_err());
        assert!(Color::parse_hex("#FF00").is_err());
        assert!(Color::parse_hex("#GGGGGG").is_err());
    }

    #[test]
    fn test_color_serializes_as_hex() {
        let json = serde_json::to_string(&Color::new(1, 2, 255)).unwrap();
        assert_eq!(json, "\"#0102FF\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::new(1, 2, 255));
    }

    #[test]
    fn test_anchor_serde_names() {
        let json = serde_json::to_string(&Anchor::BottomRight).unwrap();
        assert_eq!(json, "\"bottom_right\"");
        let custom: Anchor = serde_json::from_str(r#"{"custom":{"x":5,"y":-3}}"#).unwrap();
        assert_eq!(custom, Anchor::Custom { x: 5, y: -3 });
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(WatermarkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_names_offending_field() {
        let mut config = WatermarkConfig::text("hello");
        config.text.opacity = 101;
        assert_eq!(config.validate().unwrap_err().field, "text.opacity");

        let mut config = WatermarkConfig::text("  ");
        config.text.opacity = 50;
        assert_eq!(config.validate().unwrap_err().field, "text.content");

        let config = WatermarkConfig::image("");
        assert_eq!(config.validate().unwrap_err().field, "image.path");

        let mut config = WatermarkConfig::image("logo.png");
        config.image.scale = 0.0;
        assert_eq!(config.validate().unwrap_err().field, "image.scale");

        let mut config = WatermarkConfig::text("x");
        config.stroke.enabled = true;
        config.stroke.width = 500;
        assert_eq!(config.validate().unwrap_err().field, "stroke.width");

        let mut config = WatermarkConfig::text("x");
        config.placement.rotation = f32::NAN;
        assert_eq!(config.validate().unwrap_err().field, "placement.rotation");
    }

    #[test]
    fn test_shadow_offsets_are_bounded() {
        let mut config = WatermarkConfig::text("x");
        config.shadow.enabled = true;
        config.shadow.offset_x = i32::MAX;
        assert_eq!(config.validate().unwrap_err().field, "shadow.offset_x");

        config.shadow.offset_x = -MAX_SHADOW_OFFSET;
        config.shadow.offset_y = i32::MIN;
        assert_eq!(config.validate().unwrap_err().field, "shadow.offset_y");

        config.shadow.offset_y = MAX_SHADOW_OFFSET;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_date_pattern_rejected_only_when_used() {
        let mut config = WatermarkConfig::text("{date}");
        config.text.date_format = "%Y-%!".to_string();
        assert_eq!(config.validate().unwrap_err().field, "text.date_format");

        config.text.content = "static".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_opacity_normalized() {
        let mut text = TextConfig::default();
        text.opacity = 50;
        assert!((text.alpha() - 0.5).abs() < f32::EPSILON);
        text.opacity = 100;
        assert_eq!(text.alpha(), 1.0);
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0.0), 0.0);
        assert_eq!(normalize_rotation(360.0), 0.0);
        assert_eq!(normalize_rotation(-90.0), 270.0);
        assert_eq!(normalize_rotation(725.0), 5.0);
        assert_eq!(normalize_rotation(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"mode":"text","glow":{"enabled":true}}"#;
        assert!(WatermarkConfig::from_json(json).is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = WatermarkConfig::from_json(r#"{"mode":"image","image":{"path":"a.png"}}"#)
            .unwrap();
        assert_eq!(config.mode, WatermarkMode::Image);
        assert_eq!(config.image.scale, 1.0);
        assert_eq!(config.placement, PlacementConfig::default());
    }
}
