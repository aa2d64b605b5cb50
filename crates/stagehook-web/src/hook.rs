//! JavaScript surface of the hook

use serde_json::Value;
use std::cell::Cell;
use wasm_bindgen::prelude::*;

use stagehook_core::SceneConfig;
use stagehook_scene::{HookMessage, PendingHookMessages, PendingOutbound};

use crate::app::{self, PushEventCallback};

/// Queues and callback shared by every hook instance on the page.
///
/// winit allows a single event loop per page, so the Bevy app is started by
/// the first mount and kept alive; later hooks reuse it.
#[derive(Default)]
struct Runtime {
    inbound: PendingHookMessages,
    outbound: PendingOutbound,
    push_event: PushEventCallback,
    started: Cell<bool>,
    /// Hook currently attached to the scene, 0 for none
    active: Cell<u64>,
    next_hook: Cell<u64>,
}

thread_local! {
    static RUNTIME: Runtime = Runtime::default();
}

/// Bridge between a LiveView hook and the scene.
///
/// The hook forwards every `handleEvent` to [`StageHook::handle_event`] and
/// registers its `pushEvent` through [`StageHook::on_push_event`].
#[wasm_bindgen]
pub struct StageHook {
    id: u64,
    mounted: bool,
}

#[wasm_bindgen]
impl StageHook {
    #[wasm_bindgen(constructor)]
    pub fn new() -> StageHook {
        let id = RUNTIME.with(|runtime| {
            let id = runtime.next_hook.get() + 1;
            runtime.next_hook.set(id);
            id
        });
        StageHook { id, mounted: false }
    }

    /// Attach the scene, starting the renderer on `canvas_selector` the
    /// first time any hook mounts.
    ///
    /// `config` is an optional JSON document with the same layout as the
    /// TOML configuration. Later mounts keep rendering into the first canvas;
    /// the page moves that element into the new hook.
    pub fn mount(&mut self, canvas_selector: String, config: Option<String>) -> Result<(), JsValue> {
        if self.mounted {
            return Err(JsValue::from_str("already mounted"));
        }

        let config = match config.as_deref() {
            Some(json) if !json.trim().is_empty() => SceneConfig::from_json_str(json)
                .map_err(|err| JsValue::from_str(&format!("invalid config: {err}")))?,
            _ => SceneConfig::default(),
        };

        RUNTIME.with(|runtime| {
            runtime.active.set(self.id);
            runtime.inbound.push(HookMessage::Mount(config));
            if runtime.started.replace(true) {
                tracing::debug!(canvas = %canvas_selector, "Reusing running renderer");
                return;
            }
            tracing::info!(canvas = %canvas_selector, "Starting renderer");
            app::run(
                canvas_selector,
                runtime.inbound.clone(),
                runtime.outbound.clone(),
                runtime.push_event.clone(),
            );
        });
        self.mounted = true;
        Ok(())
    }

    /// Queue an event received from the server
    pub fn handle_event(&self, name: String, payload: JsValue) -> Result<(), JsValue> {
        let payload = payload_to_value(&payload)?;
        RUNTIME.with(|runtime| {
            if runtime.active.get() == self.id {
                runtime.inbound.push(HookMessage::Event { name, payload });
            } else {
                tracing::debug!(event = %name, "Dropping event for detached hook");
            }
        });
        Ok(())
    }

    /// Register the function outbound events are pushed through
    pub fn on_push_event(&self, callback: js_sys::Function) {
        RUNTIME.with(|runtime| *runtime.push_event.0.borrow_mut() = Some(callback));
    }

    /// Tear the scene down; the renderer stays up for the next hook
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        RUNTIME.with(|runtime| {
            // A newer hook may already have taken over the scene
            if runtime.active.get() != self.id {
                return;
            }
            runtime.active.set(0);
            runtime.inbound.push(HookMessage::Unmount);
            // Reports from the old scene must not reach a destroyed hook
            runtime.outbound.take();
            *runtime.push_event.0.borrow_mut() = None;
        });
    }
}

impl Default for StageHook {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_to_value(payload: &JsValue) -> Result<Value, JsValue> {
    if payload.is_undefined() || payload.is_null() {
        return Ok(Value::Null);
    }
    let text: String = js_sys::JSON::stringify(payload)?.into();
    serde_json::from_str(&text).map_err(|err| JsValue::from_str(&format!("payload is not JSON: {err}")))
}
