//! Stagehook Web - Browser entry point for the stagehook scene
//!
//! Exposes [`StageHook`] to JavaScript. A LiveView hook creates one on
//! `mounted`, forwards server events into it, and receives load and bone
//! reports through the registered `pushEvent` callback.

mod app;
mod canvas_text;
mod hook;

pub use hook::StageHook;

use wasm_bindgen::prelude::*;

/// Entry point for WASM module
#[wasm_bindgen(start)]
pub fn main() {
    // Set panic hook for better error messages
    console_error_panic_hook::set_once();

    // Initialize logging with filtering to reduce wgpu noise
    tracing_wasm::set_as_global_default_with_config(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::WARN)
            .build()
    );
}
