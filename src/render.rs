//! Overlay rendering.
//!
//! Produces a standalone RGBA [`OverlayLayer`] for a text or image watermark.
//! Text layers are built from one glyph coverage mask and an ordered list of
//! draw passes (shadow, stroke, fill), so the compositor never needs to know
//! which effects were used.

use std::collections::VecDeque;
use std::path::Path;

use ab_glyph::{point, Font, FontArc, GlyphId, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::compositor::BlendPixel;
use crate::config::{Color, ImageConfig, WatermarkConfig};
use crate::error::{SizeLimitError, WatermarkSourceError};
use crate::font::{FontRequest, FontResolver};
use crate::geometry::Size;

/// Transparent border kept around text layers on top of the effect extents.
pub const LAYER_PADDING: u32 = 4;

/// Largest overlay layer rendered, in pixels (256 MiB as RGBA).
pub const MAX_OVERLAY_PIXELS: u64 = 1 << 26;

/// Visual bounds of the watermark content inside its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A rendered watermark ready for placement.
///
/// `content` is what the geometry resolver positions; the rest of the layer
/// is stroke/shadow spill and transparent padding.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayer {
    pub pixels: RgbaImage,
    pub content: ContentBox,
}

impl OverlayLayer {
    /// A layer covering exactly `pixels`.
    pub fn from_image(pixels: RgbaImage) -> Self {
        let content = ContentBox {
            x: 0,
            y: 0,
            width: pixels.width(),
            height: pixels.height(),
        };
        Self { pixels, content }
    }

    /// A 1x1 fully transparent layer, used when there is nothing to draw.
    pub fn empty() -> Self {
        Self::from_image(RgbaImage::new(1, 1))
    }

    pub fn size(&self) -> Size {
        Size::new(self.pixels.width(), self.pixels.height())
    }

    pub fn content_size(&self) -> Size {
        Size::new(self.content.width, self.content.height)
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|p| p[3] == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Shadow,
    Stroke,
    Fill,
}

/// One layer of the text effect stack: a coverage mask drawn at a position
/// in layer coordinates with a single color and opacity.
#[derive(Debug, Clone)]
pub struct DrawPass {
    pub kind: PassKind,
    pub mask: GrayImage,
    pub x: u32,
    pub y: u32,
    pub color: Color,
    pub opacity: f32,
}

impl DrawPass {
    fn draw(&self, layer: &mut RgbaImage) {
        let (lw, lh) = layer.dimensions();
        for (mx, my, coverage) in self.mask.enumerate_pixels() {
            if coverage[0] == 0 {
                continue;
            }
            let (x, y) = (self.x + mx, self.y + my);
            if x >= lw || y >= lh {
                continue;
            }
            let alpha = f32::from(coverage[0]) * self.opacity;
            let src = Rgba([
                self.color.r,
                self.color.g,
                self.color.b,
                alpha.round().clamp(0.0, 255.0) as u8,
            ]);
            layer.get_pixel_mut(x, y).blend_over(src);
        }
    }
}

/// Render a text watermark.
///
/// An unknown family degrades through the resolver, and text that draws no
/// pixels yields [`OverlayLayer::empty`]. Fails only when the layer would
/// exceed [`MAX_OVERLAY_PIXELS`].
pub fn render_text(
    config: &WatermarkConfig,
    text: &str,
    fonts: &dyn FontResolver,
) -> Result<OverlayLayer, SizeLimitError> {
    let request = FontRequest {
        family: config.text.font_family.clone(),
        bold: config.text.bold,
        italic: config.text.italic,
    };
    let face = fonts.resolve(&request);
    let Some(font) = face.font() else {
        warn!("no font available, text watermark left out");
        return Ok(OverlayLayer::empty());
    };

    let Some(mut mask) = glyph_mask(&font, text, config.text.font_size)? else {
        debug!(text, "text watermark draws no pixels");
        return Ok(OverlayLayer::empty());
    };
    // the bundled face has no bold variant
    if face.is_builtin() && config.text.bold {
        mask = dilate(&mask, synthetic_bold(config.text.font_size));
    }

    let stroke = stroke_width(config);
    let (dx, dy) = shadow_offset(config);
    let pad = padding(config);

    let (mw, mh) = mask.dimensions();
    let width = u64::from(mw) + 2 * u64::from(pad) + u64::from(dx.unsigned_abs());
    let height = u64::from(mh) + 2 * u64::from(pad) + u64::from(dy.unsigned_abs());
    SizeLimitError::check("text overlay", width, height, MAX_OVERLAY_PIXELS)?;

    let passes = plan_passes(&mask, config);
    let mut layer = RgbaImage::new(width as u32, height as u32);
    for pass in &passes {
        pass.draw(&mut layer);
    }
    debug!(
        width,
        height,
        passes = passes.len(),
        stroke,
        "rendered text overlay"
    );

    Ok(OverlayLayer {
        pixels: layer,
        content: ContentBox {
            x: pad + neg_part(dx),
            y: pad + neg_part(dy),
            width: mw,
            height: mh,
        },
    })
}

fn synthetic_bold(font_size: f32) -> u32 {
    ((font_size / 24.0).round() as u32).max(1)
}

/// Build the ordered draw passes over `mask` for `config`.
///
/// Order is shadow, stroke, fill; disabled effects are left out. Positions
/// are in the coordinates of the padded layer built by [`render_text`].
pub fn plan_passes(mask: &GrayImage, config: &WatermarkConfig) -> Vec<DrawPass> {
    let stroke = stroke_width(config);
    let (dx, dy) = shadow_offset(config);
    let pad = padding(config);
    let glyph_x = pad + neg_part(dx);
    let glyph_y = pad + neg_part(dy);

    let outline = (stroke > 0).then(|| dilate(mask, stroke));
    let mut passes = Vec::with_capacity(3);

    if config.shadow.enabled {
        let silhouette = outline.clone().unwrap_or_else(|| mask.clone());
        let x = offset(glyph_x - stroke, dx);
        let y = offset(glyph_y - stroke, dy);
        let blur = config.shadow.blur;
        let (mask, x, y) = if blur > 0 {
            let (mw, mh) = mask.dimensions();
            let mut canvas =
                GrayImage::new(mw + 2 * pad + dx.unsigned_abs(), mh + 2 * pad + dy.unsigned_abs());
            imageops::replace(&mut canvas, &silhouette, i64::from(x), i64::from(y));
            (imageops::blur(&canvas, blur as f32 / 2.0), 0, 0)
        } else {
            (silhouette, x, y)
        };
        passes.push(DrawPass {
            kind: PassKind::Shadow,
            mask,
            x,
            y,
            color: config.shadow.color,
            opacity: config.shadow.alpha(),
        });
    }

    if let Some(outline) = outline {
        passes.push(DrawPass {
            kind: PassKind::Stroke,
            mask: outline,
            x: glyph_x - stroke,
            y: glyph_y - stroke,
            color: config.stroke.color,
            opacity: config.stroke.alpha(),
        });
    }

    passes.push(DrawPass {
        kind: PassKind::Fill,
        mask: mask.clone(),
        x: glyph_x,
        y: glyph_y,
        color: config.text.color,
        opacity: config.text.alpha(),
    });
    passes
}

fn stroke_width(config: &WatermarkConfig) -> u32 {
    if config.stroke.enabled {
        config.stroke.width
    } else {
        0
    }
}

fn shadow_offset(config: &WatermarkConfig) -> (i32, i32) {
    if config.shadow.enabled {
        (config.shadow.offset_x, config.shadow.offset_y)
    } else {
        (0, 0)
    }
}

fn padding(config: &WatermarkConfig) -> u32 {
    let blur = if config.shadow.enabled {
        config.shadow.blur
    } else {
        0
    };
    LAYER_PADDING + stroke_width(config) + 2 * blur
}

fn neg_part(v: i32) -> u32 {
    if v < 0 {
        v.unsigned_abs()
    } else {
        0
    }
}

fn offset(base: u32, delta: i32) -> u32 {
    (i64::from(base) + i64::from(delta)).max(0) as u32
}

/// Coverage mask of `text`, cropped to the drawn pixels. `None` when
/// nothing is drawn.
pub fn glyph_mask(font: &FontArc, text: &str, font_size: f32) -> Result<Option<GrayImage>, SizeLimitError> {
    let scale = PxScale::from(font_size);
    let scaled = font.as_scaled(scale);

    let mut caret = 0.0f32;
    let mut previous: Option<GlyphId> = None;
    let mut outlines = Vec::new();
    for c in text.chars().filter(|c| !c.is_control()) {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(scale, point(caret, scaled.ascent()));
        caret += scaled.h_advance(id);
        previous = Some(id);
        if let Some(outlined) = font.outline_glyph(glyph) {
            outlines.push(outlined);
        }
    }

    let Some(first) = outlines.first() else {
        return Ok(None);
    };
    let mut bounds = first.px_bounds();
    for outlined in &outlines[1..] {
        let b = outlined.px_bounds();
        bounds.min.x = bounds.min.x.min(b.min.x);
        bounds.min.y = bounds.min.y.min(b.min.y);
        bounds.max.x = bounds.max.x.max(b.max.x);
        bounds.max.y = bounds.max.y.max(b.max.y);
    }
    let width = (bounds.max.x - bounds.min.x).ceil() as u64;
    let height = (bounds.max.y - bounds.min.y).ceil() as u64;
    if width == 0 || height == 0 {
        return Ok(None);
    }
    SizeLimitError::check("text", width, height, MAX_OVERLAY_PIXELS)?;
    let (width, height) = (width as u32, height as u32);

    let mut mask = GrayImage::new(width, height);
    for outlined in &outlines {
        let b = outlined.px_bounds();
        let ox = (b.min.x - bounds.min.x) as u32;
        let oy = (b.min.y - bounds.min.y) as u32;
        outlined.draw(|x, y, coverage| {
            let (px, py) = (ox + x, oy + y);
            if px < width && py < height {
                let v = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
                let pixel = mask.get_pixel_mut(px, py);
                pixel[0] = pixel[0].max(v);
            }
        });
    }
    Ok(trim(mask))
}

fn trim(mask: GrayImage) -> Option<GrayImage> {
    let (w, h) = mask.dimensions();
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0, 0);
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] > 0 {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x > max_x || min_y > max_y {
        return None;
    }
    if (min_x, min_y, max_x + 1, max_y + 1) == (0, 0, w, h) {
        return Some(mask);
    }
    Some(imageops::crop_imm(&mask, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image())
}

/// Grow `mask` by a disc of `radius` pixels. The result is `2 * radius`
/// larger on each axis so nothing is clipped.
pub fn dilate(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let (w, h) = mask.dimensions();
    let r = radius as usize;
    let out_w = w as usize + 2 * r;
    let mut out = GrayImage::new(w + 2 * radius, h + 2 * radius);
    let raw: &mut [u8] = &mut out;

    // half-width of the disc at each vertical distance
    let spans: Vec<usize> = (0..=r)
        .map(|d| (((r * r - d * d) as f64).sqrt().floor()) as usize)
        .collect();

    let mut by_span: Vec<Option<Vec<u8>>> = vec![None; r + 1];
    for sy in 0..h as usize {
        let row = &mask.as_raw()[sy * w as usize..(sy + 1) * w as usize];
        by_span.iter_mut().for_each(|slot| *slot = None);

        for dy in -(r as i64)..=(r as i64) {
            let span = spans[dy.unsigned_abs() as usize];
            let maxed = by_span[span].get_or_insert_with(|| sliding_max(row, span));
            let oy = (sy as i64 + r as i64 - dy) as usize;
            let out_row = &mut raw[oy * out_w..(oy + 1) * out_w];
            // maxed[o] is centered on source column o - span
            for (o, &v) in maxed.iter().enumerate() {
                let ox = o + r - span;
                if v > out_row[ox] {
                    out_row[ox] = v;
                }
            }
        }
    }
    out
}

/// `out[o] = max(src[o - 2 * radius ..= o])`, zero outside `src`.
/// Output is `2 * radius` longer than the input.
fn sliding_max(src: &[u8], radius: usize) -> Vec<u8> {
    let span = 2 * radius;
    let mut out = vec![0u8; src.len() + span];
    let mut window: VecDeque<usize> = VecDeque::new();
    for (o, slot) in out.iter_mut().enumerate() {
        if o < src.len() {
            while window.back().is_some_and(|&b| src[b] <= src[o]) {
                window.pop_back();
            }
            window.push_back(o);
        }
        while window.front().is_some_and(|&f| f + span < o) {
            window.pop_front();
        }
        *slot = window.front().map_or(0, |&f| src[f]);
    }
    out
}

/// Load a watermark image asset, synthesizing full alpha when absent.
pub fn load_asset(path: &Path) -> Result<RgbaImage, WatermarkSourceError> {
    let image = image::open(path).map_err(|e| WatermarkSourceError::new(path, e.to_string()))?;
    Ok(image.into_rgba8())
}

/// Decode a watermark image asset from memory.
pub fn load_asset_from_bytes(data: &[u8], label: &Path) -> Result<RgbaImage, WatermarkSourceError> {
    if data.is_empty() {
        return Err(WatermarkSourceError::new(label, "no image data"));
    }
    let image =
        image::load_from_memory(data).map_err(|e| WatermarkSourceError::new(label, e.to_string()))?;
    Ok(image.into_rgba8())
}

/// Scale an asset by the configured factor and apply its opacity.
pub fn render_image(asset: &RgbaImage, config: &ImageConfig) -> Result<OverlayLayer, SizeLimitError> {
    let (w, h) = asset.dimensions();
    let scale = f64::from(config.scale);
    let new_w = ((f64::from(w) * scale).round() as u64).max(1);
    let new_h = ((f64::from(h) * scale).round() as u64).max(1);
    SizeLimitError::check("image overlay", new_w, new_h, MAX_OVERLAY_PIXELS)?;
    let (new_w, new_h) = (new_w as u32, new_h as u32);

    let mut pixels = if (new_w, new_h) == (w, h) {
        asset.clone()
    } else {
        imageops::resize(asset, new_w, new_h, FilterType::Lanczos3)
    };

    let alpha = config.alpha();
    if alpha < 1.0 {
        for pixel in pixels.pixels_mut() {
            pixel[3] = (f32::from(pixel[3]) * alpha).round() as u8;
        }
    }
    debug!(from_w = w, from_h = h, new_w, new_h, "prepared image overlay");
    Ok(OverlayLayer::from_image(pixels))
}
