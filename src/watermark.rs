//! Per-image watermarking: render the overlay, resolve where it goes,
//! composite it onto the photo.

use std::borrow::Cow;
use std::path::Path;

use tracing::debug;

use crate::compositor;
use crate::config::{WatermarkConfig, WatermarkMode};
use crate::date::DateResolver;
use crate::error::{OverlayError, WatermarkSourceError};
use crate::export::expand_tokens;
use crate::font::FontResolver;
use crate::geometry::{self, Placement, Size};
use crate::render::{self, OverlayLayer};
use crate::source::SourceImage;

/// A config made ready to stamp onto many photos.
///
/// Image-mode assets are decoded, scaled and faded once here; text layers
/// depend on each photo's date and name and are rendered per photo.
#[derive(Debug, Clone)]
pub struct PreparedWatermark {
    config: WatermarkConfig,
    dates: DateResolver,
    image: Option<Result<OverlayLayer, OverlayError>>,
}

impl PreparedWatermark {
    /// Prepare `config`, loading an image-mode asset from its path.
    pub fn prepare(config: &WatermarkConfig) -> Self {
        let image = match config.mode {
            WatermarkMode::Text => None,
            WatermarkMode::Image => Some(
                render::load_asset(&config.image.path)
                    .map_err(OverlayError::from)
                    .and_then(|asset| render::render_image(&asset, &config.image).map_err(OverlayError::from)),
            ),
        };
        Self::with_image(config, image)
    }

    /// Prepare `config` with the image-mode asset supplied as bytes.
    pub fn prepare_from_bytes(config: &WatermarkConfig, asset: &[u8]) -> Self {
        let image = match config.mode {
            WatermarkMode::Text => None,
            WatermarkMode::Image => {
                let label = if config.image.path.as_os_str().is_empty() {
                    Path::new("<memory>")
                } else {
                    config.image.path.as_path()
                };
                Some(
                    render::load_asset_from_bytes(asset, label)
                        .map_err(OverlayError::from)
                        .and_then(|asset| render::render_image(&asset, &config.image).map_err(OverlayError::from)),
                )
            }
        };
        Self::with_image(config, image)
    }

    fn with_image(config: &WatermarkConfig, image: Option<Result<OverlayLayer, OverlayError>>) -> Self {
        if let Some(Err(err)) = &image {
            debug!(error = %err, "watermark asset unusable");
        }
        Self {
            config: config.clone(),
            dates: DateResolver::new(config.text.date_format.clone()),
            image,
        }
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Why an image-mode watermark cannot be drawn at all, if so.
    pub fn image_error(&self) -> Option<&OverlayError> {
        match &self.image {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    /// The asset error for an image-mode watermark, if its asset is unusable.
    pub fn asset_error(&self) -> Option<&WatermarkSourceError> {
        match self.image_error() {
            Some(OverlayError::Source(err)) => Some(err),
            _ => None,
        }
    }

    /// Text to draw for `source`, with `{date}` and `{name}` substituted.
    /// The date is only resolved when the text uses it.
    pub fn text_for(&self, source: &SourceImage) -> String {
        expand_tokens(&self.config.text.content, |token| match token {
            "name" => Some(source.stem()),
            "date" => Some(self.dates.resolve(source)),
            _ => None,
        })
    }

    /// Render the overlay layer for `source`.
    pub fn overlay_for(
        &self,
        source: &SourceImage,
        fonts: &dyn FontResolver,
    ) -> Result<Cow<'_, OverlayLayer>, OverlayError> {
        match &self.image {
            Some(Ok(layer)) => Ok(Cow::Borrowed(layer)),
            Some(Err(err)) => Err(err.clone()),
            None => {
                let text = self.text_for(source);
                Ok(Cow::Owned(render::render_text(&self.config, &text, fonts)?))
            }
        }
    }

    /// Where the overlay for a `canvas`-sized photo lands.
    pub fn placement(&self, canvas: Size, overlay: &OverlayLayer) -> Placement {
        let p = &self.config.placement;
        geometry::resolve(
            canvas,
            overlay.content_size(),
            p.anchor,
            p.margin_x,
            p.margin_y,
            p.rotation(),
        )
    }

    /// Stamp the watermark onto `source` in place.
    pub fn apply(&self, source: &mut SourceImage, fonts: &dyn FontResolver) -> Result<Placement, OverlayError> {
        let overlay = self.overlay_for(source, fonts)?;
        let placement = self.placement(Size::new(source.width, source.height), &overlay);
        compositor::composite(&mut source.pixels, &overlay, &placement);
        source.sync_dimensions();
        debug!(
            path = %source.path.display(),
            x = placement.x,
            y = placement.y,
            rotation = placement.rotation,
            "watermark applied"
        );
        Ok(placement)
    }
}
