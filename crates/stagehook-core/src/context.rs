//! Scene context: the registry and everything that mutates it
//!
//! One [`SceneContext`] exists per mounted hook. It owns the backend, the
//! named registry, the frame-step list and the load guard, and is the only
//! thing the dispatcher and the render loop share.

use glam::Vec3;
use tracing::{debug, info, warn};

use crate::backend::{
    AvatarAsset, AvatarResult, CameraDesc, LightDesc, LoadTicket, MaterialDesc, MaterialKind,
    SceneBackend, Shape, TextPlaneDesc, TextureResult, Transform, Viewport,
};
use crate::color::Color;
use crate::command::{AxisUpdate, LoadReport, OutboundEvent, TransformField};
use crate::config::SceneConfig;
use crate::error::SceneError;
use crate::frame::FrameSteps;
use crate::loads::{Admission, LoadGuard, LoadKind, LoadRequest};
use crate::registry::{AvatarRig, Entry, ObjectKind, Registry, SceneObject, TextContent};
use crate::text::{font_for, TextLayout};

/// Message sent back when a loaded model has no skeleton
pub const NOT_AN_AVATAR: &str = "not a VRM";

pub struct SceneContext<B: SceneBackend> {
    backend: B,
    config: SceneConfig,
    registry: Registry<B::Handle>,
    frame: FrameSteps<B::Handle>,
    loads: LoadGuard,
    camera: CameraDesc,
    viewport: Viewport,
    outbox: Vec<OutboundEvent>,
    mounted: bool,
}

impl<B: SceneBackend> SceneContext<B> {
    pub fn new(backend: B, config: SceneConfig) -> Self {
        let viewport = Viewport::new(config.viewport.width, config.viewport.height);
        let camera = camera_for(&config, viewport);
        let loads = LoadGuard::new(config.loads.policy);

        Self {
            backend,
            config,
            registry: Registry::new(),
            frame: FrameSteps::new(),
            loads,
            camera,
            viewport,
            outbox: Vec::new(),
            mounted: false,
        }
    }

    /// Create the scene: lights, camera and the initial output size
    pub fn mount(&mut self) -> Result<(), SceneError> {
        if self.mounted {
            return Ok(());
        }

        let lighting = &self.config.lighting;
        let lights = [
            LightDesc::Ambient {
                color: lighting.ambient_color,
                intensity: lighting.ambient_intensity,
            },
            LightDesc::Directional {
                color: lighting.directional_color,
                intensity: lighting.directional_intensity,
                position: Vec3::from_array(lighting.directional_position),
            },
        ];
        for light in &lights {
            self.backend.add_light(light);
        }

        let (width, height) = (self.config.viewport.width, self.config.viewport.height);
        self.resize(Some(width), Some(height))?;
        self.mounted = true;

        info!(width, height, "Scene mounted");
        Ok(())
    }

    /// Mount again with a new configuration, tearing down any current scene
    pub fn remount(&mut self, config: SceneConfig) -> Result<(), SceneError> {
        if self.mounted {
            self.unmount();
        }
        self.loads.set_policy(config.loads.policy);
        self.config = config;
        self.mount()
    }

    /// Release every entry and forget running loads
    pub fn unmount(&mut self) {
        let entries = self.registry.drain();
        let released = entries.len();
        for (_, entry) in entries {
            self.backend.release(entry.handle());
        }
        self.frame.clear();
        self.loads.clear();
        self.mounted = false;

        info!(released, "Scene unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry<B::Handle> {
        &self.registry
    }

    pub fn frame_steps(&self) -> &FrameSteps<B::Handle> {
        &self.frame
    }

    pub fn loads(&self) -> &LoadGuard {
        &self.loads
    }

    pub fn camera(&self) -> &CameraDesc {
        &self.camera
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Take every event queued for the server
    pub fn drain_events(&mut self) -> Vec<OutboundEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Registry name of the raw asset kept next to avatar `name`
    pub fn raw_asset_name(&self, name: &str) -> String {
        format!("{}{}", name, self.config.avatar.raw_suffix)
    }

    fn emit(&mut self, event: OutboundEvent) {
        debug!(event = event.event_name(), "Queued outbound event");
        self.outbox.push(event);
    }

    /// Insert `entry` under `name`, releasing whatever held the name before
    fn replace_entry(&mut self, name: &str, entry: Entry<B::Handle>) {
        if let Some(previous) = self.registry.insert(name, entry) {
            debug!(name, kind = ?previous.kind(), "Replacing existing entry");
            self.release_entry(name, previous);
        }
    }

    fn release_entry(&mut self, name: &str, entry: Entry<B::Handle>) {
        let handle = entry.handle();
        if entry.is_avatar() {
            self.frame.remove(handle);
            // The raw name may since have been taken by an unrelated object
            let raw = self.raw_asset_name(name);
            if let Some(Entry::Asset { .. }) = self.registry.get(&raw) {
                if let Some(raw_entry) = self.registry.remove(&raw) {
                    self.backend.release(raw_entry.handle());
                }
            }
        }
        self.backend.release(handle);
    }

    fn spawn_primitive(&mut self, name: &str, shape: Shape, material: MaterialDesc) {
        let handle = self.backend.spawn_mesh(&shape, &material);
        self.backend.attach(handle);
        self.replace_entry(
            name,
            Entry::Object(SceneObject {
                handle,
                kind: ObjectKind::Primitive {
                    shape,
                    material: material.kind,
                },
                transform: Transform::default(),
            }),
        );
        debug!(name, ?shape, "Added primitive");
    }

    /// Box with an unlit flat material
    pub fn add_cube(&mut self, name: &str, width: f32, height: f32, depth: f32, color: Color) {
        self.spawn_primitive(
            name,
            Shape::Box {
                width,
                height,
                depth,
            },
            MaterialDesc {
                kind: MaterialKind::Basic,
                color,
            },
        );
    }

    /// Double sided lit plane
    pub fn add_plane(&mut self, name: &str, width: f32, height: f32, color: Color) {
        self.spawn_primitive(
            name,
            Shape::Plane { width, height },
            MaterialDesc {
                kind: MaterialKind::Standard,
                color,
            },
        );
    }

    pub fn set_transform(
        &mut self,
        name: &str,
        field: TransformField,
        axes: AxisUpdate,
    ) -> Result<(), SceneError> {
        let entry = self
            .registry
            .get_mut(name)
            .ok_or_else(|| SceneError::NotFound(name.to_string()))?;
        let object = entry
            .as_object_mut()
            .ok_or_else(|| SceneError::NotTransformable(name.to_string()))?;

        match field {
            TransformField::Position => axes.apply_to(&mut object.transform.position),
            TransformField::Rotation => axes.apply_to(&mut object.transform.rotation),
        }
        self.backend.set_transform(object.handle, &object.transform);
        Ok(())
    }

    pub fn set_bone_rotation(
        &mut self,
        name: &str,
        bone: &str,
        axes: AxisUpdate,
    ) -> Result<(), SceneError> {
        let entry = self
            .registry
            .get_mut(name)
            .ok_or_else(|| SceneError::NotFound(name.to_string()))?;
        let bone_not_found = || SceneError::BoneNotFound {
            name: name.to_string(),
            bone: bone.to_string(),
        };

        let object = entry.as_object_mut().ok_or_else(bone_not_found)?;
        let handle = object.handle;
        let ObjectKind::Avatar(rig) = &mut object.kind else {
            return Err(bone_not_found());
        };
        let info = rig.bone_mut(bone).ok_or_else(bone_not_found)?;

        axes.apply_to(&mut info.rotation);
        self.backend.set_bone_rotation(handle, bone, info.rotation);
        Ok(())
    }

    /// Emit one `get_bone` per bone in hierarchy order; returns how many
    pub fn list_bones(&mut self, name: &str) -> Result<usize, SceneError> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| SceneError::NotFound(name.to_string()))?;

        let bones: Vec<String> = match entry.as_object().map(|object| &object.kind) {
            Some(ObjectKind::Avatar(rig)) => rig.bones.iter().map(|b| b.name.clone()).collect(),
            _ => Vec::new(),
        };
        let count = bones.len();
        for bone in bones {
            self.emit(OutboundEvent::GetBone { name: bone });
        }
        Ok(count)
    }

    pub fn set_expression(&mut self, name: &str, key: &str, value: f32) -> Result<(), SceneError> {
        let entry = self
            .registry
            .get_mut(name)
            .ok_or_else(|| SceneError::NotFound(name.to_string()))?;
        let object = entry
            .as_object_mut()
            .ok_or_else(|| SceneError::NotAnAvatar(name.to_string()))?;
        let ObjectKind::Avatar(rig) = &mut object.kind else {
            return Err(SceneError::NotAnAvatar(name.to_string()));
        };

        rig.expressions.insert(key.to_string(), value);
        self.backend.set_expression(object.handle, key, value);
        Ok(())
    }

    fn begin_load(&mut self, name: &str, request: LoadRequest) -> Result<(), SceneError> {
        match self.loads.admit(name, request.clone()) {
            Admission::Start(ticket) => {
                debug!(name, path = %request.path, ticket = ticket.0, "Starting load");
                self.start_request(ticket, &request);
                Ok(())
            }
            Admission::Queued => {
                debug!(name, path = %request.path, "Load queued behind running load");
                Ok(())
            }
            Admission::Rejected => Err(SceneError::LoadInFlight(name.to_string())),
        }
    }

    fn start_request(&mut self, ticket: LoadTicket, request: &LoadRequest) {
        match request.kind {
            LoadKind::Avatar => self.backend.request_avatar(ticket, &request.path),
            LoadKind::Texture => self.backend.request_texture(ticket, &request.path),
        }
    }

    /// Begin loading a rigged avatar; completion arrives via [`Self::on_avatar_loaded`]
    pub fn load_avatar(&mut self, name: &str, path: &str) -> Result<(), SceneError> {
        self.begin_load(name, LoadRequest::avatar(path))
    }

    /// Begin loading a texture; completion arrives via [`Self::on_texture_loaded`]
    pub fn load_texture(&mut self, name: &str, path: &str) -> Result<(), SceneError> {
        self.begin_load(name, LoadRequest::texture(path))
    }

    pub fn on_avatar_loaded(&mut self, ticket: LoadTicket, result: AvatarResult<B::Handle>) {
        let Some(done) = self.loads.complete(ticket) else {
            debug!(ticket = ticket.0, "Ignoring stale avatar load");
            if let Ok(asset) = result {
                self.backend.release(asset.root);
                self.backend.release(asset.source);
            }
            return;
        };
        let name = done.name;

        match result {
            Ok(asset) if asset.rigged => self.install_avatar(&name, asset),
            Ok(asset) => {
                warn!(name = %name, path = %done.request.path, "Loaded model has no skeleton");
                self.backend.release(asset.root);
                self.backend.release(asset.source);
                self.emit(OutboundEvent::LoadModel(LoadReport::rejected(
                    &name,
                    NOT_AN_AVATAR,
                )));
            }
            Err(err) => {
                warn!(name = %name, error = %err, "Avatar load failed");
                self.emit(OutboundEvent::LoadModel(LoadReport::failed(&name, err)));
            }
        }

        if let Some((next_ticket, request)) = done.next {
            debug!(name = %name, path = %request.path, "Starting queued load");
            self.start_request(next_ticket, &request);
        }
    }

    fn install_avatar(&mut self, name: &str, asset: AvatarAsset<B::Handle>) {
        let transform = Transform {
            position: Vec3::ZERO,
            rotation: Vec3::new(0.0, self.config.avatar.facing_yaw, 0.0),
        };
        self.backend.set_transform(asset.root, &transform);
        self.backend.attach(asset.root);

        let mut rig = AvatarRig::new(asset.bones, &asset.expressions);
        for (key, value) in &self.config.avatar.initial_expressions {
            self.backend.set_expression(asset.root, key, *value);
            rig.expressions.insert(key.clone(), *value);
        }
        let bone_count = rig.bones.len();

        self.replace_entry(
            name,
            Entry::Object(SceneObject {
                handle: asset.root,
                kind: ObjectKind::Avatar(rig),
                transform,
            }),
        );
        let raw = self.raw_asset_name(name);
        self.replace_entry(
            &raw,
            Entry::Asset {
                handle: asset.source,
            },
        );
        self.frame.push(name, asset.root);

        info!(name, bones = bone_count, "Avatar loaded");
        self.emit(OutboundEvent::LoadModel(LoadReport::completion(name)));
    }

    pub fn on_texture_loaded(&mut self, ticket: LoadTicket, result: TextureResult<B::Handle>) {
        let Some(done) = self.loads.complete(ticket) else {
            debug!(ticket = ticket.0, "Ignoring stale texture load");
            if let Ok(texture) = result {
                self.backend.release(texture.material);
            }
            return;
        };
        let name = done.name;

        match result {
            Ok(texture) => {
                self.replace_entry(
                    &name,
                    Entry::Material {
                        handle: texture.material,
                        width: texture.width,
                        height: texture.height,
                    },
                );
                info!(name = %name, width = texture.width, height = texture.height, "Texture loaded");
                self.emit(OutboundEvent::LoadTexture(LoadReport::completion(&name)));
            }
            Err(err) => {
                warn!(name = %name, error = %err, "Texture load failed");
                self.emit(OutboundEvent::LoadTexture(LoadReport::failed(&name, err)));
            }
        }

        if let Some((next_ticket, request)) = done.next {
            debug!(name = %name, path = %request.path, "Starting queued load");
            self.start_request(next_ticket, &request);
        }
    }

    /// Progress is informational only
    pub fn on_load_progress(&self, ticket: LoadTicket, loaded: u64, total: Option<u64>) {
        let name = self.loads.name_of(ticket).unwrap_or("<stale>");
        match total {
            Some(total) if total > 0 => {
                let percent = loaded as f64 / total as f64 * 100.0;
                debug!(name, loaded, total, "Loading {:.0}%", percent);
            }
            _ => debug!(name, loaded, "Loading"),
        }
    }

    pub fn apply_texture(&mut self, target: &str, texture: &str) -> Result<(), SceneError> {
        let material = match self.registry.get(texture) {
            Some(Entry::Material { handle, .. }) => *handle,
            _ => return Err(SceneError::NotATexture(texture.to_string())),
        };

        let entry = self
            .registry
            .get_mut(target)
            .ok_or_else(|| SceneError::NotFound(target.to_string()))?;
        let object = entry
            .as_object_mut()
            .ok_or_else(|| SceneError::NotTextureCapable(target.to_string()))?;

        let converted = match &object.kind {
            ObjectKind::Primitive { material: kind, .. } if kind.accepts_texture() => None,
            // The canvas texture is gone; what remains is a plain plane
            ObjectKind::TextPlane { layout, .. } => Some(ObjectKind::Primitive {
                shape: Shape::Plane {
                    width: layout.plane_width,
                    height: layout.plane_height,
                },
                material: MaterialKind::Basic,
            }),
            _ => return Err(SceneError::NotTextureCapable(target.to_string())),
        };
        if let Some(kind) = converted {
            object.kind = kind;
        }

        self.backend.apply_texture(object.handle, material);
        debug!(target, texture, "Applied texture");
        Ok(())
    }

    fn text_desc(
        &self,
        text: &str,
        font_size: f32,
        color: Color,
    ) -> Result<TextPlaneDesc, SceneError> {
        let font = font_for(font_size, &self.config.text);
        let width = self.backend.measure_text(text, &font);
        let layout = TextLayout::compute(width, font_size, &self.config.text)?;
        Ok(TextPlaneDesc {
            text: text.to_string(),
            font,
            color,
            layout,
        })
    }

    pub fn create_text_plane(
        &mut self,
        name: &str,
        text: &str,
        font_size: f32,
        color: Color,
    ) -> Result<(), SceneError> {
        let desc = self.text_desc(text, font_size, color)?;
        let handle = self.backend.spawn_text_plane(&desc);
        self.backend.attach(handle);

        debug!(
            name,
            width = desc.layout.canvas_width,
            height = desc.layout.canvas_height,
            "Added text plane"
        );
        self.replace_entry(
            name,
            Entry::Object(SceneObject {
                handle,
                kind: ObjectKind::TextPlane {
                    layout: desc.layout,
                    content: TextContent {
                        text: desc.text,
                        font_size,
                        color,
                    },
                },
                transform: Transform::default(),
            }),
        );
        Ok(())
    }

    pub fn update_text_plane(
        &mut self,
        name: &str,
        text: &str,
        font_size: f32,
        color: Color,
    ) -> Result<(), SceneError> {
        let handle = match self.registry.get(name) {
            None => return Err(SceneError::NotFound(name.to_string())),
            Some(Entry::Object(SceneObject {
                handle,
                kind: ObjectKind::TextPlane { .. },
                ..
            })) => *handle,
            Some(_) => return Err(SceneError::NotATextPlane(name.to_string())),
        };
        let desc = self.text_desc(text, font_size, color)?;

        let Some(object) = self.registry.get_mut(name).and_then(Entry::as_object_mut) else {
            return Err(SceneError::NotATextPlane(name.to_string()));
        };
        let ObjectKind::TextPlane { layout, content } = &mut object.kind else {
            return Err(SceneError::NotATextPlane(name.to_string()));
        };

        let resized = layout.differs_in_size(&desc.layout);
        *layout = desc.layout;
        *content = TextContent {
            text: desc.text.clone(),
            font_size,
            color,
        };
        self.backend.update_text_plane(handle, &desc, resized);

        debug!(name, resized, "Updated text plane");
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), SceneError> {
        let entry = self
            .registry
            .remove(name)
            .ok_or_else(|| SceneError::NotFound(name.to_string()))?;
        debug!(name, kind = ?entry.kind(), "Removing entry");
        self.release_entry(name, entry);
        Ok(())
    }

    /// Resize the output; missing dimensions come from the host viewport
    pub fn resize(&mut self, width: Option<u32>, height: Option<u32>) -> Result<(), SceneError> {
        let host = self.backend.host_viewport();
        let viewport = Viewport::new(width.unwrap_or(host.width), height.unwrap_or(host.height));
        if viewport.width == 0 || viewport.height == 0 {
            return Err(SceneError::InvalidViewport {
                width: viewport.width,
                height: viewport.height,
            });
        }

        self.camera = camera_for(&self.config, viewport);
        self.viewport = viewport;
        self.backend.resize(viewport, &self.camera);

        debug!(width = viewport.width, height = viewport.height, "Resized");
        Ok(())
    }

    /// One render tick: step every avatar, then draw
    pub fn tick(&mut self, dt: f32) {
        for handle in self.frame.handles() {
            self.backend.step_avatar(handle, dt);
        }
        self.backend.render(&self.camera);
    }
}

fn camera_for(config: &SceneConfig, viewport: Viewport) -> CameraDesc {
    CameraDesc {
        fov_degrees: config.camera.fov_degrees,
        aspect: viewport.aspect(),
        near: config.camera.near,
        far: config.camera.far,
        position: Vec3::from_array(config.camera.position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::LoadStatus;
    use crate::config::LoadPolicy;
    use crate::error::LoadError;
    use crate::headless::{HeadlessScene, NodeKind};
    use crate::registry::EntryKind;

    fn mounted() -> SceneContext<HeadlessScene> {
        let mut ctx = SceneContext::new(HeadlessScene::default(), SceneConfig::default());
        ctx.mount().unwrap();
        ctx
    }

    fn load_rigged(ctx: &mut SceneContext<HeadlessScene>, name: &str) {
        ctx.load_avatar(name, "avatar.vrm").unwrap();
        let request = ctx.backend_mut().take_requests().remove(0);
        let asset = ctx
            .backend_mut()
            .fabricate_avatar(&["hips", "spine", "head"], &["aa", "blink", "happy"], true);
        ctx.on_avatar_loaded(request.ticket, Ok(asset));
    }

    fn load_texture(ctx: &mut SceneContext<HeadlessScene>, name: &str) {
        ctx.load_texture(name, "wood.png").unwrap();
        let request = ctx.backend_mut().take_requests().remove(0);
        let texture = ctx.backend_mut().fabricate_texture(64, 32);
        ctx.on_texture_loaded(request.ticket, Ok(texture));
    }

    #[test]
    fn test_mount_sets_up_scene() {
        let ctx = mounted();
        assert_eq!(ctx.backend().lights().len(), 2);
        assert_eq!(ctx.viewport(), Viewport::new(1000, 800));
        assert!((ctx.camera().aspect - 1.25).abs() < 1e-6);
        assert_eq!(ctx.camera().position, Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(ctx.backend().viewport(), Some(Viewport::new(1000, 800)));
    }

    #[test]
    fn test_create_twice_releases_first() {
        let mut ctx = mounted();
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        let first = ctx.registry().get("box").unwrap().handle();

        ctx.add_plane("box", 2.0, 2.0, Color::BLACK);
        let second = ctx.registry().get("box").unwrap().handle();

        assert_ne!(first, second);
        assert!(ctx.backend().was_released(first));
        assert!(ctx.backend().is_attached(second));
        assert_eq!(ctx.registry().len(), 1);
        assert_eq!(ctx.backend().attached_count(), 1);
    }

    #[test]
    fn test_partial_axis_update() {
        let mut ctx = mounted();
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        ctx.set_transform(
            "box",
            TransformField::Position,
            AxisUpdate::new(Some(1.0), Some(2.0), Some(3.0)),
        )
        .unwrap();
        ctx.set_transform(
            "box",
            TransformField::Position,
            AxisUpdate::new(None, Some(-4.0), None),
        )
        .unwrap();

        let handle = ctx.registry().get("box").unwrap().handle();
        let node = ctx.backend().node(handle).unwrap();
        assert_eq!(node.transform.position, Vec3::new(1.0, -4.0, 3.0));
        assert_eq!(node.transform.rotation, Vec3::ZERO);
    }

    #[test]
    fn test_transform_missing_and_material() {
        let mut ctx = mounted();
        let err = ctx
            .set_transform("ghost", TransformField::Rotation, AxisUpdate::default())
            .unwrap_err();
        assert_eq!(err, SceneError::NotFound("ghost".to_string()));

        load_texture(&mut ctx, "wood");
        let err = ctx
            .set_transform("wood", TransformField::Rotation, AxisUpdate::new(Some(1.0), None, None))
            .unwrap_err();
        assert_eq!(err, SceneError::NotTransformable("wood".to_string()));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut ctx = mounted();
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        let err = ctx.remove("ghost").unwrap_err();
        assert_eq!(err, SceneError::NotFound("ghost".to_string()));
        assert_eq!(ctx.registry().names(), vec!["box".to_string()]);
        assert!(ctx.backend().released().is_empty());
    }

    #[test]
    fn test_load_rigged_avatar() {
        let mut ctx = mounted();
        load_rigged(&mut ctx, "vrm");

        let entry = ctx.registry().get("vrm").unwrap();
        assert_eq!(entry.kind(), EntryKind::Avatar);
        assert_eq!(
            ctx.registry().get("vrm_gltf").map(|e| e.kind()),
            Some(EntryKind::Asset)
        );
        assert_eq!(ctx.frame_steps().count_named("vrm"), 1);

        let root = entry.handle();
        assert!(ctx.backend().is_attached(root));
        assert_eq!(ctx.backend().expression(root, "aa"), Some(1.0));
        assert_eq!(ctx.backend().expression(root, "blink"), Some(1.0));
        assert_eq!(ctx.backend().expression(root, "happy"), Some(0.0));
        let yaw = ctx.backend().node(root).unwrap().transform.rotation.y;
        assert!((yaw - std::f32::consts::PI).abs() < 1e-6);

        assert_eq!(
            ctx.drain_events(),
            vec![OutboundEvent::LoadModel(LoadReport::completion("vrm"))]
        );
    }

    #[test]
    fn test_load_unrigged_model() {
        let mut ctx = mounted();
        ctx.load_avatar("vrm", "box.glb").unwrap();
        let request = ctx.backend_mut().take_requests().remove(0);
        let asset = ctx.backend_mut().fabricate_avatar(&[], &[], false);
        let (root, source) = (asset.root, asset.source);
        ctx.on_avatar_loaded(request.ticket, Ok(asset));

        assert!(ctx.registry().is_empty());
        assert!(ctx.frame_steps().is_empty());
        assert!(ctx.backend().was_released(root));
        assert!(ctx.backend().was_released(source));

        let events = ctx.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            OutboundEvent::LoadModel(report) => {
                assert_eq!(report.status, LoadStatus::Error);
                assert_eq!(report.name, "vrm");
                assert_eq!(report.message.as_deref(), Some(NOT_AN_AVATAR));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_load_failure_reports_error() {
        let mut ctx = mounted();
        ctx.load_avatar("vrm", "missing.vrm").unwrap();
        let request = ctx.backend_mut().take_requests().remove(0);
        ctx.on_avatar_loaded(
            request.ticket,
            Err(LoadError::Fetch {
                path: "missing.vrm".to_string(),
                reason: "404".to_string(),
            }),
        );

        assert!(ctx.registry().is_empty());
        let events = ctx.drain_events();
        assert!(matches!(&events[0], OutboundEvent::LoadModel(report)
            if report.status == LoadStatus::Error && report.error.as_deref().is_some_and(|e| e.contains("404"))));
    }

    #[test]
    fn test_bones_and_expressions() {
        let mut ctx = mounted();
        load_rigged(&mut ctx, "vrm");
        ctx.drain_events();

        assert_eq!(ctx.list_bones("vrm").unwrap(), 3);
        let names: Vec<_> = ctx
            .drain_events()
            .into_iter()
            .map(|event| match event {
                OutboundEvent::GetBone { name } => name,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["hips", "spine", "head"]);

        ctx.set_bone_rotation("vrm", "head", AxisUpdate::new(None, Some(0.5), None))
            .unwrap();
        let root = ctx.registry().get("vrm").unwrap().handle();
        assert_eq!(
            ctx.backend().bone_rotation(root, "head"),
            Some(Vec3::new(0.0, 0.5, 0.0))
        );

        let err = ctx
            .set_bone_rotation("vrm", "tail", AxisUpdate::new(Some(1.0), None, None))
            .unwrap_err();
        assert!(matches!(err, SceneError::BoneNotFound { ref bone, .. } if bone == "tail"));

        ctx.set_expression("vrm", "happy", 0.75).unwrap();
        assert_eq!(ctx.backend().expression(root, "happy"), Some(0.75));
    }

    #[test]
    fn test_bones_on_primitives() {
        let mut ctx = mounted();
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        assert_eq!(ctx.list_bones("box").unwrap(), 0);
        assert!(ctx.drain_events().is_empty());

        let err = ctx
            .set_bone_rotation("box", "hips", AxisUpdate::new(Some(1.0), None, None))
            .unwrap_err();
        assert!(matches!(err, SceneError::BoneNotFound { .. }));

        let err = ctx.set_expression("box", "aa", 1.0).unwrap_err();
        assert_eq!(err, SceneError::NotAnAvatar("box".to_string()));
        let err = ctx.set_expression("ghost", "aa", 1.0).unwrap_err();
        assert_eq!(err, SceneError::NotFound("ghost".to_string()));
    }

    #[test]
    fn test_remove_avatar_cleans_up() {
        let mut ctx = mounted();
        load_rigged(&mut ctx, "vrm");
        let root = ctx.registry().get("vrm").unwrap().handle();
        let source = ctx.registry().get("vrm_gltf").unwrap().handle();

        ctx.remove("vrm").unwrap();
        assert!(ctx.registry().is_empty());
        assert!(ctx.frame_steps().is_empty());
        assert!(ctx.backend().was_released(root));
        assert!(ctx.backend().was_released(source));
    }

    #[test]
    fn test_remove_avatar_spares_object_under_raw_name() {
        let mut ctx = mounted();
        load_rigged(&mut ctx, "vrm");
        let source = ctx.registry().get("vrm_gltf").unwrap().handle();

        ctx.add_cube("vrm_gltf", 1.0, 1.0, 1.0, Color::WHITE);
        assert!(ctx.backend().was_released(source));
        let cube = ctx.registry().get("vrm_gltf").unwrap().handle();

        ctx.remove("vrm").unwrap();
        assert_eq!(ctx.registry().names(), vec!["vrm_gltf".to_string()]);
        assert!(!ctx.backend().was_released(cube));
        assert!(ctx.backend().is_attached(cube));
    }

    #[test]
    fn test_apply_texture() {
        let mut ctx = mounted();
        load_texture(&mut ctx, "wood");
        ctx.add_plane("floor", 4.0, 4.0, Color::WHITE);

        ctx.apply_texture("floor", "wood").unwrap();
        let floor = ctx.registry().get("floor").unwrap().handle();
        let wood = ctx.registry().get("wood").unwrap().handle();
        assert_eq!(ctx.backend().texture_of(floor), Some(wood));
    }

    #[test]
    fn test_apply_texture_noops() {
        let mut ctx = mounted();
        ctx.add_plane("floor", 4.0, 4.0, Color::WHITE);
        let floor = ctx.registry().get("floor").unwrap().handle();

        let err = ctx.apply_texture("floor", "nothing").unwrap_err();
        assert_eq!(err, SceneError::NotATexture("nothing".to_string()));

        // Only material entries count as textures
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        let err = ctx.apply_texture("floor", "box").unwrap_err();
        assert_eq!(err, SceneError::NotATexture("box".to_string()));
        assert_eq!(ctx.backend().texture_of(floor), None);

        load_texture(&mut ctx, "wood");
        load_rigged(&mut ctx, "vrm");
        let err = ctx.apply_texture("vrm", "wood").unwrap_err();
        assert_eq!(err, SceneError::NotTextureCapable("vrm".to_string()));
        let err = ctx.apply_texture("ghost", "wood").unwrap_err();
        assert_eq!(err, SceneError::NotFound("ghost".to_string()));
    }

    #[test]
    fn test_text_plane_resize() {
        let mut ctx = mounted();
        ctx.create_text_plane("label", "Hi", 80.0, Color::WHITE).unwrap();
        let handle = ctx.registry().get("label").unwrap().handle();
        match &ctx.backend().node(handle).unwrap().kind {
            NodeKind::TextPlane { desc, canvas, .. } => {
                assert_eq!(desc.layout.canvas_width, 136);
                assert_eq!(desc.layout.canvas_height, 120);
                assert_eq!(canvas.width, 136);
                assert_eq!(desc.font.css(), "Bold 80px Arial");
            }
            other => panic!("unexpected node {:?}", other),
        }

        ctx.update_text_plane("label", "Hello there", 80.0, Color::WHITE)
            .unwrap();
        assert_eq!(ctx.registry().len(), 1);
        assert_eq!(ctx.registry().get("label").unwrap().handle(), handle);
        match &ctx.backend().node(handle).unwrap().kind {
            NodeKind::TextPlane {
                desc,
                canvas,
                redraws,
                geometry_rebuilds,
                ..
            } => {
                assert_eq!(desc.layout.canvas_width, 568);
                assert!((desc.layout.plane_width - 5.68).abs() < 1e-5);
                assert_eq!(canvas.width, 568);
                assert_eq!(*redraws, 2);
                assert_eq!(*geometry_rebuilds, 1);
            }
            other => panic!("unexpected node {:?}", other),
        }

        // Same size redraws without rebuilding geometry
        ctx.update_text_plane("label", "Hello world", 80.0, Color::BLACK)
            .unwrap();
        match &ctx.backend().node(handle).unwrap().kind {
            NodeKind::TextPlane {
                redraws,
                geometry_rebuilds,
                ..
            } => {
                assert_eq!(*redraws, 3);
                assert_eq!(*geometry_rebuilds, 1);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_text_update_requires_text_plane() {
        let mut ctx = mounted();
        let err = ctx
            .update_text_plane("label", "Hi", 80.0, Color::WHITE)
            .unwrap_err();
        assert_eq!(err, SceneError::NotFound("label".to_string()));

        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        let err = ctx
            .update_text_plane("box", "Hi", 80.0, Color::WHITE)
            .unwrap_err();
        assert_eq!(err, SceneError::NotATextPlane("box".to_string()));

        // A text plane that received an external texture is a plain plane
        ctx.create_text_plane("label", "Hi", 80.0, Color::WHITE).unwrap();
        load_texture(&mut ctx, "wood");
        ctx.apply_texture("label", "wood").unwrap();
        assert_eq!(
            ctx.registry().get("label").map(|e| e.kind()),
            Some(EntryKind::Primitive)
        );
        let err = ctx
            .update_text_plane("label", "Hey", 80.0, Color::WHITE)
            .unwrap_err();
        assert_eq!(err, SceneError::NotATextPlane("label".to_string()));
    }

    #[test]
    fn test_serialized_loads_keep_final() {
        let mut ctx = mounted();
        ctx.load_avatar("vrm", "a.vrm").unwrap();
        ctx.load_avatar("vrm", "b.vrm").unwrap();
        ctx.load_avatar("vrm", "c.vrm").unwrap();

        let first = ctx.backend_mut().take_requests();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].path, "a.vrm");
        let asset_a = ctx.backend_mut().fabricate_avatar(&["hips"], &[], true);
        let root_a = asset_a.root;
        ctx.on_avatar_loaded(first[0].ticket, Ok(asset_a));

        let second = ctx.backend_mut().take_requests();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].path, "c.vrm");
        let asset_c = ctx.backend_mut().fabricate_avatar(&["hips"], &[], true);
        let (root_c, source_c) = (asset_c.root, asset_c.source);
        ctx.on_avatar_loaded(second[0].ticket, Ok(asset_c));

        assert_eq!(ctx.registry().get("vrm").unwrap().handle(), root_c);
        assert_eq!(ctx.registry().get("vrm_gltf").unwrap().handle(), source_c);
        assert!(ctx.backend().was_released(root_a));
        assert_eq!(ctx.frame_steps().len(), 1);
        assert!(ctx.loads().is_empty());
        // Two sources and two roots allocated, one of each released
        assert_eq!(ctx.backend().live_count(), 2);
    }

    #[test]
    fn test_reject_policy_refuses_second_load() {
        let mut config = SceneConfig::default();
        config.loads.policy = LoadPolicy::Reject;
        let mut ctx = SceneContext::new(HeadlessScene::default(), config);
        ctx.mount().unwrap();

        ctx.load_texture("wood", "a.png").unwrap();
        let err = ctx.load_texture("wood", "b.png").unwrap_err();
        assert_eq!(err, SceneError::LoadInFlight("wood".to_string()));
        assert_eq!(ctx.backend().pending_requests().len(), 1);
    }

    #[test]
    fn test_texture_failure_is_reported() {
        let mut ctx = mounted();
        ctx.load_texture("wood", "wood.png").unwrap();
        let request = ctx.backend_mut().take_requests().remove(0);
        ctx.on_texture_loaded(
            request.ticket,
            Err(LoadError::Decode {
                path: "wood.png".to_string(),
                reason: "bad header".to_string(),
            }),
        );

        assert!(!ctx.registry().contains("wood"));
        let events = ctx.drain_events();
        assert!(matches!(&events[0], OutboundEvent::LoadTexture(report)
            if report.status == LoadStatus::Error && report.name == "wood"));
    }

    #[test]
    fn test_stale_completion_is_released() {
        let mut ctx = mounted();
        ctx.load_avatar("vrm", "a.vrm").unwrap();
        let request = ctx.backend_mut().take_requests().remove(0);
        ctx.unmount();

        let asset = ctx.backend_mut().fabricate_avatar(&["hips"], &[], true);
        let root = asset.root;
        ctx.on_avatar_loaded(request.ticket, Ok(asset));
        assert!(ctx.registry().is_empty());
        assert!(ctx.backend().was_released(root));
        assert!(ctx.drain_events().is_empty());
    }

    #[test]
    fn test_resize() {
        let mut ctx = mounted();
        ctx.backend_mut().set_host_viewport(Viewport::new(1920, 1080));
        ctx.resize(None, None).unwrap();
        assert_eq!(ctx.viewport(), Viewport::new(1920, 1080));
        assert!((ctx.camera().aspect - 1920.0 / 1080.0).abs() < 1e-6);

        ctx.resize(Some(800), None).unwrap();
        assert_eq!(ctx.viewport(), Viewport::new(800, 1080));

        let err = ctx.resize(Some(0), Some(600)).unwrap_err();
        assert_eq!(err, SceneError::InvalidViewport { width: 0, height: 600 });
        assert_eq!(ctx.viewport(), Viewport::new(800, 1080));
    }

    #[test]
    fn test_tick_steps_avatars_and_renders() {
        let mut ctx = mounted();
        load_rigged(&mut ctx, "vrm");
        let root = ctx.registry().get("vrm").unwrap().handle();

        ctx.tick(1.0 / 60.0);
        ctx.tick(1.0 / 60.0);
        assert_eq!(ctx.backend().avatar_steps(root), 2);
        assert_eq!(ctx.backend().frames_rendered(), 2);
    }

    #[test]
    fn test_unmount_releases_everything() {
        let mut ctx = mounted();
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        ctx.create_text_plane("label", "Hi", 40.0, Color::WHITE).unwrap();
        load_rigged(&mut ctx, "vrm");

        ctx.unmount();
        assert!(!ctx.is_mounted());
        assert!(ctx.registry().is_empty());
        assert!(ctx.frame_steps().is_empty());
        assert_eq!(ctx.backend().live_count(), 0);
    }

    #[test]
    fn test_remount_applies_new_config() {
        let mut ctx = mounted();
        ctx.add_cube("box", 1.0, 1.0, 1.0, Color::WHITE);
        let cube = ctx.registry().get("box").unwrap().handle();

        let mut config = SceneConfig::default();
        config.viewport.width = 640;
        config.viewport.height = 480;
        config.loads.policy = LoadPolicy::Reject;
        ctx.remount(config).unwrap();

        assert!(ctx.is_mounted());
        assert!(ctx.backend().was_released(cube));
        assert!(ctx.registry().is_empty());
        assert_eq!(ctx.viewport(), Viewport::new(640, 480));
        assert_eq!(ctx.loads().policy(), LoadPolicy::Reject);
    }
}
