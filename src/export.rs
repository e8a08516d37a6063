//! Output stage: naming, resizing, encoding and the overwrite policy.

use std::borrow::Cow;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::debug;

use crate::compositor::BlendPixel;
use crate::error::{ConfigValidationError, ItemError, SizeLimitError};
use crate::source::SourceImage;

/// Folder created under the output directory when `create_subfolder` is set.
pub const SUBFOLDER_NAME: &str = "watermarked_images";

pub const DEFAULT_QUALITY: u8 = 100;

/// Largest image written after resizing, in pixels (1 GiB as RGBA).
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 28;

/// Largest `ResizeRule::Percent` accepted.
pub const MAX_RESIZE_PERCENT: f32 = 1000.0;

/// Numbered names tried before `RenameWithSuffix` gives up.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Bmp,
    Tiff,
    WebP,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Bmp,
        OutputFormat::Tiff,
        OutputFormat::WebP,
    ];

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Bmp => Some(Self::Bmp),
            ImageFormat::Tiff => Some(Self::Tiff),
            ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tiff => ImageFormat::Tiff,
            Self::WebP => ImageFormat::WebP,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        }
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::WebP => "webp",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "bmp" => Ok(Self::Bmp),
            "tif" | "tiff" => Ok(Self::Tiff),
            "webp" => Ok(Self::WebP),
            other => Err(format!("unknown output format `{other}` (jpeg, png, bmp, tiff, webp)")),
        }
    }
}

/// Parse a JPEG quality in 1-100.
pub fn parse_quality(s: &str) -> Result<u8, String> {
    let q: u8 = s
        .trim()
        .parse()
        .map_err(|_| format!("quality must be a number from 1 to 100, got `{s}`"))?;
    if !(1..=100).contains(&q) {
        return Err(format!("quality must be between 1 and 100, got {q}"));
    }
    Ok(q)
}

/// Post-watermark rescale applied on export.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ResizeRule {
    #[default]
    Original,
    /// Downscale so the longer edge is at most this many pixels.
    LongEdge(u32),
    Percent(f32),
    Width(u32),
    Height(u32),
}

impl ResizeRule {
    /// Target dimensions for a `width` x `height` image, or `None` when the
    /// rule leaves it unchanged.
    pub fn target(&self, width: u32, height: u32) -> Option<(u64, u64)> {
        let (w, h) = (f64::from(width), f64::from(height));
        let (new_w, new_h) = match *self {
            Self::Original => return None,
            Self::LongEdge(max) => {
                let long = width.max(height);
                if long <= max {
                    return None;
                }
                let scale = f64::from(max) / f64::from(long);
                (w * scale, h * scale)
            }
            Self::Percent(p) => {
                let scale = f64::from(p) / 100.0;
                (w * scale, h * scale)
            }
            Self::Width(target) => (f64::from(target), h * f64::from(target) / w),
            Self::Height(target) => (w * f64::from(target) / h, f64::from(target)),
        };
        let size = ((new_w.floor() as u64).max(1), (new_h.floor() as u64).max(1));
        (size != (u64::from(width), u64::from(height))).then_some(size)
    }

    /// Resize `image`, refusing targets above [`MAX_OUTPUT_PIXELS`].
    pub fn apply<'a>(&self, image: &'a DynamicImage) -> Result<Cow<'a, DynamicImage>, SizeLimitError> {
        match self.target(image.width(), image.height()) {
            Some((w, h)) => {
                SizeLimitError::check("resized output", w, h, MAX_OUTPUT_PIXELS)?;
                Ok(Cow::Owned(image.resize_exact(w as u32, h as u32, FilterType::Lanczos3)))
            }
            None => Ok(Cow::Borrowed(image)),
        }
    }
}

/// How output file names are derived from the source name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamingRule {
    #[default]
    Original,
    Prefix(String),
    Suffix(String),
    /// Tokens: `{name}`, `{index}` (1-based, 3 digits), `{date}` (YYYYMMDD),
    /// `{time}` (HHMMSS), `{year}`, `{month}`, `{day}`.
    Pattern(String),
}

impl NamingRule {
    /// Output stem for the source stem `name`, the item's 1-based `index`
    /// and the export time `now`.
    pub fn stem(&self, name: &str, index: usize, now: NaiveDateTime) -> String {
        let stem = match self {
            Self::Original => name.to_string(),
            Self::Prefix(prefix) => format!("{prefix}{name}"),
            Self::Suffix(suffix) => format!("{name}{suffix}"),
            Self::Pattern(pattern) => expand_tokens(pattern, |token| {
                let value = match token {
                    "name" => name.to_string(),
                    "index" => format!("{index:03}"),
                    "date" => now.format("%Y%m%d").to_string(),
                    "time" => now.format("%H%M%S").to_string(),
                    "year" => now.format("%Y").to_string(),
                    "month" => now.format("%m").to_string(),
                    "day" => now.format("%d").to_string(),
                    _ => return None,
                };
                Some(value)
            }),
        };
        sanitize_file_name(&stem)
    }
}

/// Replace each `{token}` in `pattern` that `lookup` knows. Substituted
/// values are not scanned again; unknown tokens are kept verbatim.
pub fn expand_tokens(pattern: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let found = tail
            .find('}')
            .and_then(|close| lookup(&tail[1..close]).map(|value| (close, value)));
        match found {
            Some((close, value)) => {
                out.push_str(&value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace characters that are not allowed in file names with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// What to do when the output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Leave the existing file alone and report the item as skipped.
    #[default]
    Skip,
    Overwrite,
    /// Write `name (1).ext`, `name (2).ext`, ... instead.
    RenameWithSuffix,
}

impl FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            "rename" => Ok(Self::RenameWithSuffix),
            other => Err(format!("unknown overwrite policy `{other}` (skip, overwrite, rename)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    /// `None` keeps the source format.
    pub format: Option<OutputFormat>,
    pub resize: ResizeRule,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub overwrite: OverwritePolicy,
    pub naming: NamingRule,
    pub create_subfolder: bool,
}

impl ExportOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: None,
            resize: ResizeRule::Original,
            quality: DEFAULT_QUALITY,
            overwrite: OverwritePolicy::default(),
            naming: NamingRule::Original,
            create_subfolder: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigValidationError::new(
                "export.quality",
                format!("must be between 1 and 100, got {}", self.quality),
            ));
        }
        let resize_ok = match self.resize {
            ResizeRule::Original => true,
            ResizeRule::Percent(p) => p.is_finite() && p > 0.0 && p <= MAX_RESIZE_PERCENT,
            ResizeRule::LongEdge(v) | ResizeRule::Width(v) | ResizeRule::Height(v) => v > 0,
        };
        if !resize_ok {
            return Err(ConfigValidationError::new(
                "export.resize",
                format!(
                    "{:?} must be a positive size (percent at most {MAX_RESIZE_PERCENT})",
                    self.resize
                ),
            ));
        }
        if let NamingRule::Pattern(pattern) = &self.naming {
            if pattern.trim().is_empty() {
                return Err(ConfigValidationError::new("export.naming", "pattern is empty"));
            }
        }
        Ok(())
    }

    /// Directory outputs are written to.
    pub fn target_dir(&self) -> PathBuf {
        if self.create_subfolder {
            self.output_dir.join(SUBFOLDER_NAME)
        } else {
            self.output_dir.clone()
        }
    }

    /// Output name for the source at `source_path`, before overwrite handling.
    pub fn plan(&self, source_path: &Path, index: usize, now: NaiveDateTime) -> OutputPlan {
        let name = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = match self.format {
            Some(format) => format.extension().to_string(),
            None => source_path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| OutputFormat::Png.extension().to_string()),
        };
        OutputPlan {
            dir: self.target_dir(),
            stem: self.naming.stem(&name, index, now),
            extension,
        }
    }

    /// Encoder for `source`: the explicit format, else the source's own.
    pub fn output_format(&self, source: &SourceImage) -> Result<OutputFormat, ItemError> {
        if let Some(format) = self.format {
            return Ok(format);
        }
        let detected = source.format.or_else(|| ImageFormat::from_path(&source.path).ok());
        detected
            .and_then(OutputFormat::from_image_format)
            .ok_or_else(|| ItemError::UnsupportedFormat {
                path: source.path.clone(),
                format: detected.map_or_else(|| "unknown".to_string(), |f| format!("{f:?}")),
            })
    }
}

/// Planned output location, prior to overwrite handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub dir: PathBuf,
    pub stem: String,
    pub extension: String,
}

impl OutputPlan {
    pub fn path(&self) -> PathBuf {
        self.numbered(0)
    }

    fn numbered(&self, n: u32) -> PathBuf {
        let name = match (n, self.extension.is_empty()) {
            (0, true) => self.stem.clone(),
            (0, false) => format!("{}.{}", self.stem, self.extension),
            (n, true) => format!("{} ({n})", self.stem),
            (n, false) => format!("{} ({n}).{}", self.stem, self.extension),
        };
        self.dir.join(name)
    }

    /// Open the destination file according to `policy`.
    ///
    /// `Skip` and `RenameWithSuffix` create files with create-new semantics,
    /// so two workers can never claim the same path.
    pub fn claim(&self, policy: OverwritePolicy) -> io::Result<Claim> {
        match policy {
            OverwritePolicy::Overwrite => {
                let path = self.path();
                Ok(Claim::Open(File::create(&path)?, path))
            }
            OverwritePolicy::Skip => {
                let path = self.path();
                match create_new(&path) {
                    Ok(file) => Ok(Claim::Open(file, path)),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(Claim::Exists(path)),
                    Err(e) => Err(e),
                }
            }
            OverwritePolicy::RenameWithSuffix => {
                for n in 0..MAX_RENAME_ATTEMPTS {
                    let path = self.numbered(n);
                    match create_new(&path) {
                        Ok(file) => return Ok(Claim::Open(file, path)),
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                        Err(e) => return Err(e),
                    }
                }
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("no free name for {} after {MAX_RENAME_ATTEMPTS} attempts", self.path().display()),
                ))
            }
        }
    }
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Result of claiming a destination.
#[derive(Debug)]
pub enum Claim {
    Open(File, PathBuf),
    /// The file exists and the policy says to leave it.
    Exists(PathBuf),
}

/// Result of exporting one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(PathBuf),
    Exists(PathBuf),
}

/// Resize, encode and write `image`, the watermarked version of `source`.
pub fn export(
    image: &DynamicImage,
    source: &SourceImage,
    plan: &OutputPlan,
    options: &ExportOptions,
) -> Result<ExportOutcome, ItemError> {
    let format = options.output_format(source)?;
    let resized = options
        .resize
        .apply(image)
        .map_err(|e| ItemError::too_large(&source.path, e))?;

    let (file, path) = match plan.claim(options.overwrite) {
        Ok(Claim::Open(file, path)) => (file, path),
        Ok(Claim::Exists(path)) => return Ok(ExportOutcome::Exists(path)),
        Err(e) => return Err(ItemError::write(plan.path(), e)),
    };

    let mut writer = BufWriter::new(file);
    let written = encode(&resized, format, options.quality, &mut writer)
        .and_then(|()| writer.flush().map_err(image::ImageError::IoError));
    if let Err(err) = written {
        drop(writer);
        if let Err(rm) = fs::remove_file(&path) {
            debug!(path = %path.display(), error = %rm, "could not remove partial output");
        }
        return Err(ItemError::write(&path, err));
    }

    debug!(
        path = %path.display(),
        %format,
        width = resized.width(),
        height = resized.height(),
        "wrote output"
    );
    Ok(ExportOutcome::Written(path))
}

/// Encode `image` as `format` into `writer`.
pub fn encode<W: Write + io::Seek>(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    writer: &mut W,
) -> image::ImageResult<()> {
    match format {
        OutputFormat::Jpeg => {
            let rgb = flatten_onto_white(image);
            rgb.write_with_encoder(JpegEncoder::new_with_quality(writer, quality))
        }
        _ => encodable(image, format).write_to(writer, format.image_format()),
    }
}

/// Composite any transparency onto white; JPEG has no alpha channel.
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let mut out = Rgb([255, 255, 255]);
        out.blend_over(*rgba.get_pixel(x, y));
        out
    })
}

/// Convert to a pixel layout the target encoder accepts.
fn encodable(image: &DynamicImage, format: OutputFormat) -> Cow<'_, DynamicImage> {
    let color = image.color();
    let accepted = match format {
        OutputFormat::Jpeg => matches!(color, ColorType::Rgb8 | ColorType::L8),
        OutputFormat::Png | OutputFormat::Tiff => !matches!(color, ColorType::Rgb32F | ColorType::Rgba32F),
        OutputFormat::Bmp => matches!(color, ColorType::Rgb8 | ColorType::Rgba8 | ColorType::L8 | ColorType::La8),
        OutputFormat::WebP => matches!(color, ColorType::Rgb8 | ColorType::Rgba8),
    };
    if accepted {
        Cow::Borrowed(image)
    } else if color.has_alpha() && format.supports_alpha() {
        Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8()))
    } else {
        Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{Rgba, RgbaImage};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 2)
            .unwrap()
            .and_hms_opt(14, 30, 22)
            .unwrap()
    }

    fn source(path: &str, format: Option<ImageFormat>) -> SourceImage {
        SourceImage::from_parts(path, DynamicImage::new_rgb8(8, 4), format, None, now())
    }

    #[test]
    fn test_naming_rules() {
        assert_eq!(NamingRule::Original.stem("IMG_1", 1, now()), "IMG_1");
        assert_eq!(NamingRule::Prefix("wm_".into()).stem("IMG_1", 1, now()), "wm_IMG_1");
        assert_eq!(NamingRule::Suffix("_wm".into()).stem("IMG_1", 1, now()), "IMG_1_wm");
        let pattern = NamingRule::Pattern("{name}_{index}_{date}_{time}".into());
        assert_eq!(pattern.stem("IMG_1", 7, now()), "IMG_1_007_20241002_143022");
        let parts = NamingRule::Pattern("{year}/{month}-{day}".into());
        assert_eq!(parts.stem("x", 1, now()), "2024_10-02");
        // a source name that looks like a token stays as it is
        assert_eq!(pattern.stem("{index}", 7, now()), "{index}_007_20241002_143022");
    }

    #[test]
    fn test_expand_tokens() {
        let lookup = |token: &str| (token == "a").then(|| "{a}".to_string());
        assert_eq!(expand_tokens("{a}-{a}", lookup), "{a}-{a}");
        assert_eq!(expand_tokens("x{b}{{a}", lookup), "x{b}{{a}");
        assert_eq!(expand_tokens("{a", lookup), "{a");
        assert_eq!(expand_tokens("no tokens", lookup), "no tokens");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_file_name("plain name"), "plain name");
    }

    #[test]
    fn test_plan_keeps_source_extension_without_format() {
        let options = ExportOptions::new("/out");
        let plan = options.plan(Path::new("/in/Photo.JPEG"), 1, now());
        assert_eq!(plan.path(), PathBuf::from("/out/Photo.JPEG"));

        let mut options = ExportOptions::new("/out");
        options.format = Some(OutputFormat::Png);
        options.create_subfolder = true;
        let plan = options.plan(Path::new("/in/Photo.JPEG"), 1, now());
        assert_eq!(plan.path(), PathBuf::from("/out/watermarked_images/Photo.png"));
    }

    #[test]
    fn test_resize_rules() {
        assert_eq!(ResizeRule::Original.target(400, 300), None);
        assert_eq!(ResizeRule::LongEdge(200).target(400, 300), Some((200, 150)));
        assert_eq!(ResizeRule::LongEdge(200).target(300, 400), Some((150, 200)));
        // never upscales
        assert_eq!(ResizeRule::LongEdge(1000).target(400, 300), None);
        assert_eq!(ResizeRule::Percent(50.0).target(401, 300), Some((200, 150)));
        assert_eq!(ResizeRule::Width(100).target(400, 300), Some((100, 75)));
        assert_eq!(ResizeRule::Height(30).target(400, 300), Some((40, 30)));
        assert_eq!(ResizeRule::Percent(0.01).target(40, 30), Some((1, 1)));
    }

    #[test]
    fn test_output_format_resolution() {
        let options = ExportOptions::new("/out");
        assert_eq!(options.output_format(&source("a.png", Some(ImageFormat::Png))).unwrap(), OutputFormat::Png);
        assert_eq!(options.output_format(&source("a.tif", None)).unwrap(), OutputFormat::Tiff);
        let err = options.output_format(&source("a.gif", Some(ImageFormat::Gif))).unwrap_err();
        assert!(matches!(err, ItemError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let mut options = ExportOptions::new("/out");
        assert!(options.validate().is_ok());
        options.quality = 0;
        assert_eq!(options.validate().unwrap_err().field, "export.quality");
        options.quality = 90;
        options.resize = ResizeRule::Percent(-5.0);
        assert_eq!(options.validate().unwrap_err().field, "export.resize");
        options.resize = ResizeRule::Percent(1e9);
        assert_eq!(options.validate().unwrap_err().field, "export.resize");
        options.resize = ResizeRule::Percent(MAX_RESIZE_PERCENT);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_oversized_resize_fails_the_item_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ExportOptions::new(dir.path());
        options.resize = ResizeRule::Width(u32::MAX);
        let src = source("tall.png", Some(ImageFormat::Png));
        let plan = options.plan(&src.path, 1, now());

        let err = export(&src.pixels, &src, &plan, &options).unwrap_err();
        match &err {
            ItemError::TooLarge { path, source } => {
                assert_eq!(path, &src.path);
                assert_eq!(source.limit, MAX_OUTPUT_PIXELS);
            }
            other => panic!("expected size limit, got {other:?}"),
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_parse_quality() {
        assert_eq!(parse_quality("85"), Ok(85));
        assert!(parse_quality("0").is_err());
        assert!(parse_quality("101").is_err());
        assert!(parse_quality("high").is_err());
    }

    #[test]
    fn test_rename_policy_claims_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let plan = OutputPlan {
            dir: dir.path().to_path_buf(),
            stem: "shot".into(),
            extension: "jpg".into(),
        };
        let mut paths = Vec::new();
        for _ in 0..3 {
            match plan.claim(OverwritePolicy::RenameWithSuffix).unwrap() {
                Claim::Open(_, path) => paths.push(path),
                Claim::Exists(path) => panic!("rename never reports existing: {path:?}"),
            }
        }
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["shot.jpg", "shot (1).jpg", "shot (2).jpg"]);
    }

    #[test]
    fn test_skip_policy_leaves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("shot.png");
        fs::write(&existing, b"keep me").unwrap();
        let plan = OutputPlan {
            dir: dir.path().to_path_buf(),
            stem: "shot".into(),
            extension: "png".into(),
        };
        assert!(matches!(plan.claim(OverwritePolicy::Skip).unwrap(), Claim::Exists(_)));
        assert_eq!(fs::read(&existing).unwrap(), b"keep me");
    }

    #[test]
    fn test_export_writes_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ExportOptions::new(dir.path());
        options.overwrite = OverwritePolicy::Overwrite;
        options.resize = ResizeRule::Width(4);
        let src = source("/in/a.png", Some(ImageFormat::Png));
        let plan = options.plan(&src.path, 1, now());

        let first = export(&src.pixels, &src, &plan, &options).unwrap();
        let second = export(&src.pixels, &src, &plan, &options).unwrap();
        assert_eq!(first, second);
        let ExportOutcome::Written(path) = second else {
            panic!("expected a written file");
        };
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 2));
    }

    #[test]
    fn test_jpeg_flattens_transparency_onto_white() {
        let clear = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));
        assert!(flatten_onto_white(&clear).pixels().all(|p| p.0 == [255, 255, 255]));

        let mut bytes = std::io::Cursor::new(Vec::new());
        encode(&clear, OutputFormat::Jpeg, 90, &mut bytes).unwrap();
        let decoded = image::load_from_memory(bytes.get_ref()).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c > 250)));
    }

    #[test]
    fn test_every_format_encodes_rgba() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 128])));
        for format in OutputFormat::ALL {
            let mut bytes = std::io::Cursor::new(Vec::new());
            encode(&img, format, 80, &mut bytes).unwrap();
            assert!(!bytes.get_ref().is_empty(), "{format} produced no bytes");
        }
    }
}
