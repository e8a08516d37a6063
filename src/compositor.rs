//! Overlay compositing.
//!
//! Blends an [`OverlayLayer`] onto a decoded photo with the straight-alpha
//! "over" operator. Only the region the overlay covers is visited; the photo
//! is blended in place and never copied unless its pixel layout has to be
//! widened to 8-bit RGB(A) first.

use std::borrow::Cow;

use image::imageops;
use image::{DynamicImage, ImageBuffer, Pixel, Rgb, Rgba, RgbaImage};
use tracing::trace;

use crate::config::normalize_rotation;
use crate::geometry::Placement;
use crate::render::OverlayLayer;

/// Destination pixels the overlay can be blended onto.
pub trait BlendPixel: Pixel<Subpixel = u8> {
    /// `self = src over self`, straight alpha.
    fn blend_over(&mut self, src: Rgba<u8>);
}

impl BlendPixel for Rgba<u8> {
    fn blend_over(&mut self, src: Rgba<u8>) {
        let sa = src[3];
        if sa == 0 {
            return;
        }
        if sa == 255 {
            *self = src;
            return;
        }
        let sa = f32::from(sa) / 255.0;
        let da = f32::from(self[3]) / 255.0;
        let out_a = sa + da * (1.0 - sa);
        for c in 0..3 {
            let v = (f32::from(src[c]) * sa + f32::from(self[c]) * da * (1.0 - sa)) / out_a;
            self[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        self[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

impl BlendPixel for Rgb<u8> {
    fn blend_over(&mut self, src: Rgba<u8>) {
        let sa = src[3];
        if sa == 0 {
            return;
        }
        if sa == 255 {
            *self = Rgb([src[0], src[1], src[2]]);
            return;
        }
        let a = f32::from(sa) / 255.0;
        for c in 0..3 {
            let v = f32::from(src[c]) * a + f32::from(self[c]) * (1.0 - a);
            self[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Composite `overlay` onto `canvas` at `placement`.
///
/// The placement positions the unrotated content box; a rotated overlay
/// turns about the content center, which stays where the unrotated content
/// center would be. Anything falling outside the canvas is clipped.
///
/// RGB8 canvases stay opaque RGB8 and RGBA8 canvases keep their alpha. Any
/// other layout is widened once to whichever of the two matches its alpha.
pub fn composite(canvas: &mut DynamicImage, overlay: &OverlayLayer, placement: &Placement) {
    let (pixels, x, y) = positioned(overlay, placement);
    trace!(x, y, w = pixels.width(), h = pixels.height(), "compositing overlay");

    match canvas {
        DynamicImage::ImageRgb8(buf) => blend_region(buf, &pixels, x, y),
        DynamicImage::ImageRgba8(buf) => blend_region(buf, &pixels, x, y),
        other => {
            if other.color().has_alpha() {
                let mut buf = other.to_rgba8();
                blend_region(&mut buf, &pixels, x, y);
                *other = DynamicImage::ImageRgba8(buf);
            } else {
                let mut buf = other.to_rgb8();
                blend_region(&mut buf, &pixels, x, y);
                *other = DynamicImage::ImageRgb8(buf);
            }
        }
    }
}

/// Final layer pixels and their top-left on the canvas.
fn positioned<'a>(overlay: &'a OverlayLayer, placement: &Placement) -> (Cow<'a, RgbaImage>, i64, i64) {
    let content = overlay.content;
    if !placement.is_rotated() {
        return (
            Cow::Borrowed(&overlay.pixels),
            placement.x - i64::from(content.x),
            placement.y - i64::from(content.y),
        );
    }

    let rotated = rotate_layer(&overlay.pixels, placement.rotation);
    let (lw, lh) = overlay.pixels.dimensions();
    let (rw, rh) = rotated.dimensions();

    // content center, in layer coordinates, then mapped into the rotated buffer
    let cx = f64::from(content.x) + f64::from(content.width) / 2.0;
    let cy = f64::from(content.y) + f64::from(content.height) / 2.0;
    let (rx, ry) = rotate_point(
        cx - f64::from(lw) / 2.0,
        cy - f64::from(lh) / 2.0,
        f64::from(placement.rotation),
    );
    let rx = rx + f64::from(rw) / 2.0;
    let ry = ry + f64::from(rh) / 2.0;

    let target_x = placement.x as f64 + f64::from(content.width) / 2.0;
    let target_y = placement.y as f64 + f64::from(content.height) / 2.0;
    (
        Cow::Owned(rotated),
        (target_x - rx).round() as i64,
        (target_y - ry).round() as i64,
    )
}

/// Rotate `(x, y)` counter-clockwise on screen (y down) by `degrees`.
fn rotate_point(x: f64, y: f64, degrees: f64) -> (f64, f64) {
    let (s, c) = degrees.to_radians().sin_cos();
    (x * c + y * s, -x * s + y * c)
}

/// Rotate a layer counter-clockwise by `degrees`, expanding the buffer so
/// no corner is cut. Right angles are exact; other angles are resampled
/// bilinearly on premultiplied color so transparent pixels do not bleed.
pub fn rotate_layer(src: &RgbaImage, degrees: f32) -> RgbaImage {
    let degrees = normalize_rotation(degrees);
    if degrees == 0.0 {
        return src.clone();
    }
    if degrees == 90.0 {
        return imageops::rotate270(src);
    }
    if degrees == 180.0 {
        return imageops::rotate180(src);
    }
    if degrees == 270.0 {
        return imageops::rotate90(src);
    }

    let (w, h) = (f64::from(src.width()), f64::from(src.height()));
    let (s, c) = f64::from(degrees).to_radians().sin_cos();
    let out_w = ((w * c.abs() + h * s.abs()) - 1e-6).ceil().max(1.0);
    let out_h = ((w * s.abs() + h * c.abs()) - 1e-6).ceil().max(1.0);
    let mut out = RgbaImage::new(out_w as u32, out_h as u32);

    let (src_cx, src_cy) = (w / 2.0, h / 2.0);
    let (dst_cx, dst_cy) = (out_w / 2.0, out_h / 2.0);
    for (dx, dy, pixel) in out.enumerate_pixels_mut() {
        let px = f64::from(dx) + 0.5 - dst_cx;
        let py = f64::from(dy) + 0.5 - dst_cy;
        // inverse of rotate_point
        let sx = px * c - py * s + src_cx - 0.5;
        let sy = px * s + py * c + src_cy - 0.5;
        *pixel = sample_bilinear(src, sx, sy);
    }
    out
}

fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 4];
    for (ox, oy, weight) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        if weight <= 0.0 {
            continue;
        }
        let (sx, sy) = (x0 + ox, y0 + oy);
        if sx < 0 || sy < 0 || sx >= i64::from(src.width()) || sy >= i64::from(src.height()) {
            continue;
        }
        let p = src.get_pixel(sx as u32, sy as u32);
        let a = f64::from(p[3]) / 255.0;
        acc[0] += f64::from(p[0]) * a * weight;
        acc[1] += f64::from(p[1]) * a * weight;
        acc[2] += f64::from(p[2]) * a * weight;
        acc[3] += a * weight;
    }

    let alpha = acc[3];
    if alpha < 0.5 / 255.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |v: f64| (v / alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(acc[0]),
        channel(acc[1]),
        channel(acc[2]),
        (alpha * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn blend_region<P: BlendPixel>(canvas: &mut ImageBuffer<P, Vec<u8>>, layer: &RgbaImage, ox: i64, oy: i64) {
    let (cw, ch) = canvas.dimensions();
    let (lw, lh) = layer.dimensions();
    let x0 = ox.max(0);
    let y0 = oy.max(0);
    let x1 = (ox + i64::from(lw)).min(i64::from(cw));
    let y1 = (oy + i64::from(lh)).min(i64::from(ch));
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    for y in y0..y1 {
        for x in x0..x1 {
            let src = *layer.get_pixel((x - ox) as u32, (y - oy) as u32);
            canvas.get_pixel_mut(x as u32, y as u32).blend_over(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ContentBox;
    use image::{GrayImage, Luma, RgbImage};

    fn solid_layer(w: u32, h: u32, color: [u8; 4]) -> OverlayLayer {
        OverlayLayer::from_image(RgbaImage::from_pixel(w, h, Rgba(color)))
    }

    fn gray_canvas(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([100, 100, 100])))
    }

    #[test]
    fn test_opaque_overlay_pixel_replaces_canvas() {
        let mut canvas = gray_canvas(10, 10);
        composite(&mut canvas, &solid_layer(2, 2, [255, 0, 0, 255]), &Placement::new(3, 4, 0.0));
        let rgb = canvas.as_rgb8().unwrap();
        assert_eq!(rgb.get_pixel(3, 4).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(4, 5).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(5, 5).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(2, 4).0, [100, 100, 100]);
    }

    #[test]
    fn test_transparent_overlay_leaves_canvas_untouched() {
        let mut canvas = gray_canvas(8, 8);
        let before = canvas.clone();
        composite(&mut canvas, &solid_layer(8, 8, [255, 255, 255, 0]), &Placement::new(0, 0, 0.0));
        assert_eq!(canvas, before);
    }

    #[test]
    fn test_partial_alpha_blends() {
        let mut px = Rgb([0u8, 0, 0]);
        px.blend_over(Rgba([255, 255, 255, 51]));
        assert_eq!(px.0, [51, 51, 51]);

        let mut px = Rgba([0u8, 0, 0, 0]);
        px.blend_over(Rgba([200, 100, 50, 128]));
        assert_eq!(px.0, [200, 100, 50, 128]);
    }

    #[test]
    fn test_rgba_canvas_keeps_alpha_under_overlay() {
        let mut canvas = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        composite(&mut canvas, &solid_layer(1, 1, [10, 20, 30, 255]), &Placement::new(1, 1, 0.0));
        let rgba = canvas.as_rgba8().unwrap();
        assert_eq!(rgba.get_pixel(1, 1).0, [10, 20, 30, 255]);
        assert_eq!(rgba.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_clips_at_every_edge() {
        let mut canvas = gray_canvas(4, 4);
        let layer = solid_layer(3, 3, [0, 0, 0, 255]);
        composite(&mut canvas, &layer, &Placement::new(-2, -2, 0.0));
        composite(&mut canvas, &layer, &Placement::new(3, 3, 0.0));
        let rgb = canvas.as_rgb8().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(3, 3).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 1).0, [100, 100, 100]);

        // entirely outside
        let before = canvas.clone();
        composite(&mut canvas, &layer, &Placement::new(100, -100, 0.0));
        composite(&mut canvas, &layer, &Placement::new(i64::from(i32::MIN), 0, 30.0));
        assert_eq!(canvas, before);
    }

    #[test]
    fn test_content_box_is_what_gets_placed() {
        let mut pixels = RgbaImage::new(6, 6);
        pixels.put_pixel(2, 3, Rgba([0, 255, 0, 255]));
        let layer = OverlayLayer {
            pixels,
            content: ContentBox {
                x: 2,
                y: 3,
                width: 1,
                height: 1,
            },
        };
        let mut canvas = gray_canvas(10, 10);
        composite(&mut canvas, &layer, &Placement::new(7, 1, 0.0));
        assert_eq!(canvas.as_rgb8().unwrap().get_pixel(7, 1).0, [0, 255, 0]);
    }

    #[test]
    fn test_full_turn_equals_no_rotation() {
        let layer = solid_layer(5, 3, [9, 8, 7, 200]);
        let mut a = gray_canvas(12, 12);
        let mut b = gray_canvas(12, 12);
        composite(&mut a, &layer, &Placement::new(2, 2, 0.0));
        composite(&mut b, &layer, &Placement::new(2, 2, 360.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_right_angle_rotation_is_counter_clockwise() {
        // marker in the top-right corner ends up top-left after a CCW quarter turn
        let mut src = RgbaImage::new(3, 2);
        src.put_pixel(2, 0, Rgba([255, 0, 0, 255]));
        let out = rotate_layer(&src, 90.0);
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);

        let back = rotate_layer(&rotate_layer(&src, 90.0), -90.0);
        assert_eq!(back, src);
    }

    #[test]
    fn test_arbitrary_rotation_expands_buffer() {
        let src = RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255]));
        let out = rotate_layer(&src, 45.0);
        // 20 * cos45 + 10 * sin45 = 21.2
        assert_eq!(out.dimensions(), (22, 22));
        assert_eq!(out.get_pixel(11, 11)[3], 255);
        assert_eq!(out.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_rotated_overlay_keeps_its_center() {
        let layer = solid_layer(10, 2, [0, 0, 0, 255]);
        let mut canvas = gray_canvas(40, 40);
        // unrotated content center would be (20, 20)
        composite(&mut canvas, &layer, &Placement::new(15, 19, 90.0));
        let rgb = canvas.as_rgb8().unwrap();
        assert_eq!(rgb.get_pixel(20, 16).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(19, 23).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(24, 20).0, [100, 100, 100]);
    }

    #[test]
    fn test_other_layouts_are_widened() {
        let mut canvas = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([50])));
        composite(&mut canvas, &solid_layer(1, 1, [255, 0, 0, 255]), &Placement::new(0, 0, 0.0));
        let rgb = canvas.as_rgb8().expect("widened to rgb8");
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(2, 2).0, [50, 50, 50]);
    }
}
