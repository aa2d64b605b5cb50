//! Stagehook Scene - Bevy backend for the stagehook scene context
//!
//! The context lives in the world as a non-send resource and is driven by a
//! single exclusive system each frame: inbound events are dispatched, the
//! resulting ops are applied to the world, finished asset loads are handed
//! back, avatars are stepped and outbound events are queued for the page.
//!
//! One app serves every hook on the page. Hooks attach and detach by
//! queueing [`HookMessage::Mount`] and [`HookMessage::Unmount`]; the app and
//! its event loop keep running in between.

pub mod apply;
pub mod backend;
pub mod bridge;
pub mod loading;
pub mod vrm;

use bevy::prelude::*;
use tracing::{debug, info, warn};

use stagehook_core::{SceneConfig, SceneContext, TextRasterizer};

pub use backend::{BevyBackend, ObjectId, SceneOp};
pub use bridge::{HookMessage, HostViewport, PendingHookMessages, PendingOutbound};

/// The scene context, stored as a non-send resource
pub struct StageContext(pub SceneContext<BevyBackend>);

/// Inbound events seen by the frame driver
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: u64,
    pub rejected: u64,
}

/// Plugin that owns a scene context and drives it every frame.
///
/// The context starts unmounted; nothing is drawn until a
/// [`HookMessage::Mount`] arrives.
pub struct StagehookScenePlugin {
    /// Builds the text rasterizer; called once when the plugin is added
    pub rasterizer: fn() -> Box<dyn TextRasterizer>,
}

impl Plugin for StagehookScenePlugin {
    fn build(&self, app: &mut App) {
        let context = SceneContext::new(
            BevyBackend::new((self.rasterizer)()),
            SceneConfig::default(),
        );

        app.init_resource::<PendingHookMessages>()
            .init_resource::<PendingOutbound>()
            .init_resource::<HostViewport>()
            .init_resource::<DispatchStats>()
            .init_resource::<apply::SceneSlots>()
            .init_resource::<loading::PendingLoads>()
            .insert_non_send_resource(StageContext(context))
            .add_systems(Update, drive_scene);
    }
}

/// Apply whatever the context recorded since the last flush
fn flush(world: &mut World, ctx: &mut SceneContext<BevyBackend>) {
    let ops = ctx.backend_mut().take_ops();
    if !ops.is_empty() {
        apply::apply_ops(world, ops);
    }
}

fn teardown(world: &mut World, ctx: &mut SceneContext<BevyBackend>) {
    ctx.unmount();
    flush(world, ctx);
    apply::clear_stage(world);
    // In-flight loads belong to the old scene
    *world.resource_mut::<loading::PendingLoads>() = loading::PendingLoads::default();
}

fn handle_message(world: &mut World, ctx: &mut SceneContext<BevyBackend>, message: HookMessage) {
    match message {
        HookMessage::Mount(config) => {
            if ctx.is_mounted() {
                teardown(world, ctx);
            }
            match ctx.remount(config) {
                Ok(()) => info!("Scene mounted by host"),
                Err(err) => warn!(error = %err, "Scene mounted without an initial size"),
            }
            flush(world, ctx);
        }
        HookMessage::Event { name, payload } => {
            let outcome = ctx.handle_event(&name, payload);
            let mut stats = world.resource_mut::<DispatchStats>();
            match outcome {
                Ok(()) => stats.handled += 1,
                Err(err) => {
                    stats.rejected += 1;
                    debug!(event = %name, error = %err, "Inbound event rejected");
                }
            }
        }
        HookMessage::Unmount => {
            if ctx.is_mounted() {
                teardown(world, ctx);
                info!("Scene torn down by host");
            }
        }
    }
}

fn drive_scene(world: &mut World) {
    let Some(mut stage) = world.remove_non_send_resource::<StageContext>() else {
        return;
    };
    let ctx = &mut stage.0;

    let host = world.resource::<HostViewport>().0;
    ctx.backend_mut().set_host_viewport(host);

    let messages = world.resource::<PendingHookMessages>().take();
    for message in messages {
        handle_message(world, ctx, message);
    }
    flush(world, ctx);

    loading::poll_loads(world, ctx);
    flush(world, ctx);

    apply::retry_deferred(world);

    if ctx.is_mounted() {
        let dt = world.resource::<Time>().delta_secs();
        ctx.tick(dt);
        flush(world, ctx);
    }

    let events = ctx.drain_events();
    world.resource::<PendingOutbound>().extend(events);
    world.insert_non_send_resource(stage);
}
