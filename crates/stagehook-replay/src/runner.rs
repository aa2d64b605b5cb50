//! Drives a headless scene through a script

use tracing::{debug, info};

use stagehook_core::headless::PendingRequest;
use stagehook_core::{
    HeadlessScene, LoadError, LoadKind, OutboundEvent, SceneConfig, SceneContext, SceneError,
    Viewport,
};

use crate::catalog::AssetCatalog;
use crate::script::ScriptLine;

/// Counters reported at the end of a replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub rejected: usize,
    pub frames: u64,
    pub loads: usize,
}

pub struct Replay {
    ctx: SceneContext<HeadlessScene>,
    catalog: AssetCatalog,
    summary: ReplaySummary,
}

impl Replay {
    pub fn new(config: SceneConfig, catalog: AssetCatalog) -> Result<Self, SceneError> {
        let host = Viewport::new(config.viewport.width, config.viewport.height);
        let mut ctx = SceneContext::new(HeadlessScene::new(host), config);
        ctx.mount()?;
        Ok(Self {
            ctx,
            catalog,
            summary: ReplaySummary::default(),
        })
    }

    pub fn context(&self) -> &SceneContext<HeadlessScene> {
        &self.ctx
    }

    pub fn summary(&self) -> &ReplaySummary {
        &self.summary
    }

    /// Run one script line and return the events it produced
    pub fn run_line(&mut self, line: ScriptLine) -> Vec<OutboundEvent> {
        match line {
            ScriptLine::Event { event, payload } => {
                self.summary.events += 1;
                if self.ctx.handle_event(&event, payload).is_err() {
                    self.summary.rejected += 1;
                }
            }
            ScriptLine::Frames { frames, dt } => {
                for _ in 0..frames {
                    self.ctx.tick(dt);
                }
                self.summary.frames += u64::from(frames);
            }
        }

        self.resolve_loads();
        self.ctx.drain_events()
    }

    /// Answer every pending load from the catalog, including loads that
    /// were queued behind the ones just answered
    fn resolve_loads(&mut self) {
        loop {
            let requests = self.ctx.backend_mut().take_requests();
            if requests.is_empty() {
                break;
            }
            for request in requests {
                self.summary.loads += 1;
                self.resolve(request);
            }
        }
    }

    fn resolve(&mut self, request: PendingRequest) {
        debug!(path = %request.path, ticket = request.ticket.0, "Resolving load");
        let missing = || LoadError::Fetch {
            path: request.path.clone(),
            reason: "not in asset catalog".to_string(),
        };

        match request.kind {
            LoadKind::Avatar => {
                let result = match self.catalog.avatar(&request.path).cloned() {
                    Some(spec) => {
                        if let Some(size) = spec.size_bytes {
                            self.ctx.on_load_progress(request.ticket, size / 2, Some(size));
                            self.ctx.on_load_progress(request.ticket, size, Some(size));
                        }
                        let bones: Vec<&str> = spec.bones.iter().map(String::as_str).collect();
                        let expressions: Vec<&str> =
                            spec.expressions.iter().map(String::as_str).collect();
                        Ok(self
                            .ctx
                            .backend_mut()
                            .fabricate_avatar(&bones, &expressions, spec.rigged))
                    }
                    None => Err(missing()),
                };
                self.ctx.on_avatar_loaded(request.ticket, result);
            }
            LoadKind::Texture => {
                let result = match self.catalog.texture(&request.path).copied() {
                    Some(spec) => Ok(self
                        .ctx
                        .backend_mut()
                        .fabricate_texture(spec.width, spec.height)),
                    None => Err(missing()),
                };
                self.ctx.on_texture_loaded(request.ticket, result);
            }
        }
    }

    /// Log what the registry holds and tear the scene down
    pub fn finish(mut self) -> ReplaySummary {
        let registry = self.ctx.registry();
        for name in registry.names() {
            if let Some(entry) = registry.get(&name) {
                info!(name = %name, kind = ?entry.kind(), "Registry entry");
            }
        }
        info!(
            entries = registry.len(),
            avatars = self.ctx.frame_steps().len(),
            frames = self.summary.frames,
            "Replay finished"
        );
        self.ctx.unmount();
        self.summary
    }
}
