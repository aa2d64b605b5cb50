//! Text rasterization on an off-screen 2D canvas

use stagehook_core::headless::MonospaceText;
use stagehook_core::{Bitmap, Color, FontSpec, TextRasterizer};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};

pub struct CanvasRasterizer {
    canvas: HtmlCanvasElement,
    context: CanvasRenderingContext2d,
}

impl CanvasRasterizer {
    pub fn new() -> Result<Self, JsValue> {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| JsValue::from_str("no document"))?;
        let canvas = document
            .create_element("canvas")?
            .dyn_into::<HtmlCanvasElement>()?;
        let context = canvas
            .get_context("2d")?
            .ok_or_else(|| JsValue::from_str("2d context unavailable"))?
            .dyn_into::<CanvasRenderingContext2d>()?;

        Ok(Self { canvas, context })
    }
}

impl TextRasterizer for CanvasRasterizer {
    fn measure(&self, text: &str, font: &FontSpec) -> f32 {
        self.context.set_font(&font.css());
        self.context
            .measure_text(text)
            .map(|metrics| metrics.width() as f32)
            .unwrap_or(0.0)
    }

    fn rasterize(
        &self,
        text: &str,
        font: &FontSpec,
        color: Color,
        width: u32,
        height: u32,
    ) -> Bitmap {
        if width == 0 || height == 0 {
            return Bitmap::blank(width, height);
        }

        // Resizing the canvas resets the context state, font included
        self.canvas.set_width(width);
        self.canvas.set_height(height);
        let (w, h) = (width as f64, height as f64);
        self.context.clear_rect(0.0, 0.0, w, h);
        self.context.set_font(&font.css());
        self.context.set_fill_style_str(&color.to_css());
        self.context.set_text_align("center");
        self.context.set_text_baseline("middle");
        if let Err(err) = self.context.fill_text(text, w / 2.0, h / 2.0) {
            tracing::warn!("fillText failed: {:?}", err);
        }

        match self.context.get_image_data(0.0, 0.0, w, h) {
            Ok(data) => Bitmap {
                width,
                height,
                pixels: data.data().0,
            },
            Err(err) => {
                tracing::warn!("getImageData failed: {:?}", err);
                Bitmap::blank(width, height)
            }
        }
    }
}

/// Canvas text when a document is available, fixed metrics otherwise
pub fn rasterizer() -> Box<dyn TextRasterizer> {
    match CanvasRasterizer::new() {
        Ok(canvas) => Box::new(canvas),
        Err(err) => {
            tracing::warn!("Canvas text unavailable, using fixed metrics: {:?}", err);
            Box::new(MonospaceText::default())
        }
    }
}
