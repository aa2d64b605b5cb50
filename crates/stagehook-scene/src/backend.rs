//! Recording backend
//!
//! The scene context runs outside Bevy's ECS borrow rules, so the backend
//! does not touch the world directly. Every call is recorded as a
//! [`SceneOp`] and the frame driver applies the batch with exclusive world
//! access right after the context is done with it.

use std::collections::BTreeMap;
use std::fmt;

use bevy::math::Vec3;
use stagehook_core::{
    Bitmap, CameraDesc, FontSpec, LightDesc, LoadTicket, MaterialDesc, SceneBackend, Shape,
    TextPlaneDesc, TextRasterizer, Transform, Viewport,
};

/// Handle the context uses for anything this backend created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// Rasterized text ready to become an image
#[derive(Debug, Clone, PartialEq)]
pub struct TextSurface {
    pub bitmap: Bitmap,
    pub plane_width: f32,
    pub plane_height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneOp {
    AddLight(LightDesc),
    SpawnMesh {
        id: ObjectId,
        shape: Shape,
        material: MaterialDesc,
    },
    SpawnTextPlane {
        id: ObjectId,
        surface: TextSurface,
    },
    UpdateTextPlane {
        id: ObjectId,
        surface: TextSurface,
        resized: bool,
    },
    Attach(ObjectId),
    SetTransform {
        id: ObjectId,
        transform: Transform,
    },
    SetBoneRotation {
        id: ObjectId,
        bone: String,
        rotation: Vec3,
    },
    /// Expression values accumulated since the avatar's last step
    SetExpressions {
        id: ObjectId,
        values: BTreeMap<String, f32>,
    },
    LoadAvatar {
        ticket: LoadTicket,
        path: String,
    },
    LoadTexture {
        ticket: LoadTicket,
        path: String,
    },
    ApplyTexture {
        target: ObjectId,
        material: ObjectId,
    },
    Release(ObjectId),
    Resize {
        viewport: Viewport,
        camera: CameraDesc,
    },
}

impl SceneOp {
    /// Object the op targets, if any
    pub fn target(&self) -> Option<ObjectId> {
        match self {
            SceneOp::SpawnMesh { id, .. }
            | SceneOp::SpawnTextPlane { id, .. }
            | SceneOp::UpdateTextPlane { id, .. }
            | SceneOp::SetTransform { id, .. }
            | SceneOp::SetBoneRotation { id, .. }
            | SceneOp::SetExpressions { id, .. } => Some(*id),
            SceneOp::Attach(id) | SceneOp::Release(id) => Some(*id),
            SceneOp::ApplyTexture { target, .. } => Some(*target),
            SceneOp::AddLight(_)
            | SceneOp::LoadAvatar { .. }
            | SceneOp::LoadTexture { .. }
            | SceneOp::Resize { .. } => None,
        }
    }
}

pub struct BevyBackend {
    next_id: u64,
    ops: Vec<SceneOp>,
    expressions: BTreeMap<ObjectId, BTreeMap<String, f32>>,
    host: Viewport,
    frames: u64,
    text: Box<dyn TextRasterizer>,
}

impl BevyBackend {
    pub fn new(text: Box<dyn TextRasterizer>) -> Self {
        Self {
            next_id: 1,
            ops: Vec::new(),
            expressions: BTreeMap::new(),
            host: Viewport::new(1280, 720),
            frames: 0,
            text,
        }
    }

    /// Allocate an id for something the driver created, e.g. a loaded asset
    pub fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Take the ops recorded since the last call
    pub fn take_ops(&mut self) -> Vec<SceneOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn has_pending_ops(&self) -> bool {
        !self.ops.is_empty()
    }

    pub fn set_host_viewport(&mut self, host: Viewport) {
        self.host = host;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn surface(&self, desc: &TextPlaneDesc) -> TextSurface {
        let layout = desc.layout;
        TextSurface {
            bitmap: self.text.rasterize(
                &desc.text,
                &desc.font,
                desc.color,
                layout.canvas_width,
                layout.canvas_height,
            ),
            plane_width: layout.plane_width,
            plane_height: layout.plane_height,
        }
    }
}

impl SceneBackend for BevyBackend {
    type Handle = ObjectId;

    fn add_light(&mut self, light: &LightDesc) {
        self.ops.push(SceneOp::AddLight(*light));
    }

    fn spawn_mesh(&mut self, shape: &Shape, material: &MaterialDesc) -> ObjectId {
        let id = self.allocate();
        self.ops.push(SceneOp::SpawnMesh {
            id,
            shape: *shape,
            material: *material,
        });
        id
    }

    fn spawn_text_plane(&mut self, desc: &TextPlaneDesc) -> ObjectId {
        let id = self.allocate();
        let surface = self.surface(desc);
        self.ops.push(SceneOp::SpawnTextPlane { id, surface });
        id
    }

    fn update_text_plane(&mut self, handle: ObjectId, desc: &TextPlaneDesc, resized: bool) {
        let surface = self.surface(desc);
        self.ops.push(SceneOp::UpdateTextPlane {
            id: handle,
            surface,
            resized,
        });
    }

    fn attach(&mut self, handle: ObjectId) {
        self.ops.push(SceneOp::Attach(handle));
    }

    fn set_transform(&mut self, handle: ObjectId, transform: &Transform) {
        self.ops.push(SceneOp::SetTransform {
            id: handle,
            transform: *transform,
        });
    }

    fn set_bone_rotation(&mut self, handle: ObjectId, bone: &str, rotation: Vec3) {
        self.ops.push(SceneOp::SetBoneRotation {
            id: handle,
            bone: bone.to_string(),
            rotation,
        });
    }

    fn set_expression(&mut self, handle: ObjectId, key: &str, value: f32) {
        // Takes effect on the avatar's next step
        self.expressions
            .entry(handle)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn apply_texture(&mut self, target: ObjectId, material: ObjectId) {
        self.ops.push(SceneOp::ApplyTexture { target, material });
    }

    fn request_avatar(&mut self, ticket: LoadTicket, path: &str) {
        self.ops.push(SceneOp::LoadAvatar {
            ticket,
            path: path.to_string(),
        });
    }

    fn request_texture(&mut self, ticket: LoadTicket, path: &str) {
        self.ops.push(SceneOp::LoadTexture {
            ticket,
            path: path.to_string(),
        });
    }

    fn release(&mut self, handle: ObjectId) {
        self.expressions.remove(&handle);
        self.ops.push(SceneOp::Release(handle));
    }

    fn step_avatar(&mut self, handle: ObjectId, _dt: f32) {
        if let Some(values) = self.expressions.remove(&handle) {
            self.ops.push(SceneOp::SetExpressions { id: handle, values });
        }
    }

    fn render(&mut self, _camera: &CameraDesc) {
        // Bevy draws every frame on its own
        self.frames += 1;
    }

    fn resize(&mut self, viewport: Viewport, camera: &CameraDesc) {
        self.ops.push(SceneOp::Resize {
            viewport,
            camera: *camera,
        });
    }

    fn host_viewport(&self) -> Viewport {
        self.host
    }

    fn measure_text(&self, text: &str, font: &FontSpec) -> f32 {
        self.text.measure(text, font)
    }
}
