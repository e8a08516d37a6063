//! Placement geometry.
//!
//! Turns an [`Anchor`] plus margins and rotation into the top-left offset of
//! the overlay's content box. Offsets are not clamped: an overlay larger than
//! the canvas, or a custom coordinate past the edge, yields negative or
//! out-of-range offsets and the compositor clips.

use crate::config::{normalize_rotation, Anchor};

/// Width and height of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Resolved top-left offset of the unrotated overlay content, plus the
/// counter-clockwise rotation the compositor applies about its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub rotation: f32,
}

impl Placement {
    pub fn new(x: i64, y: i64, rotation: f32) -> Self {
        Self {
            x,
            y,
            rotation: normalize_rotation(rotation),
        }
    }

    pub fn is_rotated(&self) -> bool {
        self.rotation != 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Start,
    Middle,
    End,
}

/// Offset along one axis so the overlay's matching edge sits `margin` pixels
/// inside the canvas edge. Centered axes ignore the margin.
fn axis_offset(align: Align, canvas: u32, overlay: u32, margin: i32) -> i64 {
    let canvas = i64::from(canvas);
    let overlay = i64::from(overlay);
    let margin = i64::from(margin);
    match align {
        Align::Start => margin,
        Align::Middle => (canvas - overlay).div_euclid(2),
        Align::End => canvas - overlay - margin,
    }
}

/// Resolve where an overlay of `overlay` size lands on a `canvas`.
pub fn resolve(
    canvas: Size,
    overlay: Size,
    anchor: Anchor,
    margin_x: i32,
    margin_y: i32,
    rotation_deg: f32,
) -> Placement {
    let (horizontal, vertical) = match anchor {
        Anchor::TopLeft => (Align::Start, Align::Start),
        Anchor::TopCenter => (Align::Middle, Align::Start),
        Anchor::TopRight => (Align::End, Align::Start),
        Anchor::CenterLeft => (Align::Start, Align::Middle),
        Anchor::Center => (Align::Middle, Align::Middle),
        Anchor::CenterRight => (Align::End, Align::Middle),
        Anchor::BottomLeft => (Align::Start, Align::End),
        Anchor::BottomCenter => (Align::Middle, Align::End),
        Anchor::BottomRight => (Align::End, Align::End),
        Anchor::Custom { x, y } => {
            return Placement::new(i64::from(x), i64::from(y), rotation_deg);
        }
    };

    Placement::new(
        axis_offset(horizontal, canvas.width, overlay.width, margin_x),
        axis_offset(vertical, canvas.height, overlay.height, margin_y),
        rotation_deg,
    )
}
