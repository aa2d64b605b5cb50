//! Sizing of canvas-backed text planes
//!
//! A text plane is a rectangle whose texture is an off-screen canvas holding
//! the rendered string. The canvas is sized to the measured text plus a fixed
//! padding and the rectangle follows the canvas at `plane_scale` pixels per
//! world unit.

use crate::backend::FontSpec;
use crate::config::TextConfig;
use crate::error::SceneError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextLayout {
    /// Canvas width in pixels
    pub canvas_width: u32,
    /// Canvas height in pixels
    pub canvas_height: u32,
    /// Rectangle width in world units
    pub plane_width: f32,
    /// Rectangle height in world units
    pub plane_height: f32,
}

impl TextLayout {
    /// Lay out a string whose advance width is `text_width` pixels.
    ///
    /// Canvas dimensions are truncated the way an HTML canvas truncates
    /// fractional sizes; the text height is approximated by the font size.
    /// Canvases with a side above `max_canvas_px` are refused.
    pub fn compute(
        text_width: f32,
        font_size: f32,
        config: &TextConfig,
    ) -> Result<Self, SceneError> {
        let padding = config.padding.max(0.0);
        let canvas_width = (text_width.max(0.0) + padding * 2.0) as u32;
        let canvas_height = (font_size.max(0.0) + padding * 2.0) as u32;
        if canvas_width > config.max_canvas_px || canvas_height > config.max_canvas_px {
            return Err(SceneError::TextTooLarge {
                width: canvas_width,
                height: canvas_height,
                limit: config.max_canvas_px,
            });
        }
        let scale = if config.plane_scale > 0.0 {
            config.plane_scale
        } else {
            1.0
        };

        Ok(Self {
            canvas_width,
            canvas_height,
            plane_width: canvas_width as f32 / scale,
            plane_height: canvas_height as f32 / scale,
        })
    }

    /// True when switching to `other` requires a new canvas and geometry
    pub fn differs_in_size(&self, other: &TextLayout) -> bool {
        self.canvas_width != other.canvas_width || self.canvas_height != other.canvas_height
    }
}

/// Font used for a text plane with the given size
pub fn font_for(size: f32, config: &TextConfig) -> FontSpec {
    FontSpec {
        family: config.font_family.clone(),
        weight: config.font_weight.clone(),
        size,
    }
}
