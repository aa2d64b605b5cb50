//! Bevy application setup

use bevy::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

use stagehook_core::Viewport;
use stagehook_scene::{HostViewport, PendingHookMessages, PendingOutbound, StagehookScenePlugin};

use crate::canvas_text;

/// `pushEvent` callback registered by the hook, if any
#[derive(Clone, Default)]
pub struct PushEventCallback(pub Rc<RefCell<Option<js_sys::Function>>>);

/// Build and start the app rendering into `canvas`.
///
/// Called once per page; the scene inside is mounted and unmounted through
/// the inbound queue.
pub fn run(
    canvas: String,
    inbound: PendingHookMessages,
    outbound: PendingOutbound,
    push_event: PushEventCallback,
) {
    App::new()
        .insert_resource(ClearColor(Color::BLACK))
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "stagehook".to_string(),
                        canvas: Some(canvas),
                        // The scene owns the canvas size; setSize drives it
                        fit_canvas_to_parent: false,
                        prevent_default_event_handling: false,
                        ..default()
                    }),
                    ..default()
                })
                .set(AssetPlugin {
                    // Paths from the server are relative to the page origin
                    file_path: "".to_string(),
                    // Don't look for .meta files - servers don't have them
                    meta_check: bevy::asset::AssetMetaCheck::Never,
                    ..default()
                }),
        )
        .insert_resource(inbound)
        .insert_resource(outbound)
        .insert_resource(HostViewport(host_viewport()))
        .insert_non_send_resource(push_event)
        .add_plugins(StagehookScenePlugin {
            rasterizer: canvas_text::rasterizer,
        })
        .add_systems(PreUpdate, sync_host_viewport)
        .add_systems(PostUpdate, forward_outbound)
        .run();
}

/// Current size of the browser window
fn host_viewport() -> Viewport {
    #[cfg(target_arch = "wasm32")]
    {
        if let Some(window) = web_sys::window() {
            let width = window
                .inner_width()
                .ok()
                .and_then(|value| value.as_f64())
                .unwrap_or(0.0);
            let height = window
                .inner_height()
                .ok()
                .and_then(|value| value.as_f64())
                .unwrap_or(0.0);
            if width > 0.0 && height > 0.0 {
                return Viewport::new(width as u32, height as u32);
            }
        }
    }

    HostViewport::default().0
}

fn sync_host_viewport(mut host: ResMut<HostViewport>) {
    let current = host_viewport();
    if host.0 != current {
        host.0 = current;
    }
}

/// Push queued outbound events through the hook's callback
fn forward_outbound(outbound: Res<PendingOutbound>, push_event: NonSend<PushEventCallback>) {
    let events = outbound.take();
    if events.is_empty() {
        return;
    }

    let callback = push_event.0.borrow();
    let Some(callback) = callback.as_ref() else {
        tracing::debug!(dropped = events.len(), "No pushEvent callback registered");
        return;
    };

    for event in events {
        let payload = match js_sys::JSON::parse(&event.payload().to_string()) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!("Failed to convert payload for {}: {:?}", event.event_name(), err);
                continue;
            }
        };
        let name = wasm_bindgen::JsValue::from_str(event.event_name());
        if let Err(err) = callback.call2(&wasm_bindgen::JsValue::NULL, &name, &payload) {
            tracing::warn!("pushEvent callback failed: {:?}", err);
        }
    }
}
