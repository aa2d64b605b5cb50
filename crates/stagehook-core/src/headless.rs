//! In-memory scene backend
//!
//! Retains a mirror of everything a real renderer would be asked to do, so
//! the registry can be exercised without a GPU: unit tests, the replay tool,
//! and server-side dry runs all drive this backend.

use glam::Vec3;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::backend::{
    AvatarAsset, BoneInfo, Bitmap, CameraDesc, FontSpec, LightDesc, LoadTicket, MaterialDesc,
    SceneBackend, Shape, TextPlaneDesc, TextRasterizer, TextureAsset, Transform, Viewport,
};
use crate::color::Color;
use crate::loads::LoadKind;

/// Handle of a headless node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Mesh {
        shape: Shape,
        material: MaterialDesc,
        texture: Option<NodeId>,
    },
    TextPlane {
        desc: TextPlaneDesc,
        canvas: Bitmap,
        texture: Option<NodeId>,
        redraws: u32,
        geometry_rebuilds: u32,
    },
    AvatarRoot {
        bones: Vec<BoneInfo>,
        expressions: BTreeMap<String, f32>,
        steps: u32,
    },
    Material {
        width: u32,
        height: u32,
    },
    Asset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub attached: bool,
    pub transform: Transform,
}

/// A load the registry asked for and nobody answered yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub ticket: LoadTicket,
    pub kind: LoadKind,
    pub path: String,
}

/// Fixed-advance text metrics
#[derive(Debug, Clone, Copy)]
pub struct MonospaceText {
    /// Advance per character as a fraction of the font size
    pub advance: f32,
}

impl Default for MonospaceText {
    fn default() -> Self {
        Self { advance: 0.6 }
    }
}

impl TextRasterizer for MonospaceText {
    fn measure(&self, text: &str, font: &FontSpec) -> f32 {
        text.chars().count() as f32 * font.size * self.advance
    }

    fn rasterize(
        &self,
        text: &str,
        font: &FontSpec,
        color: Color,
        width: u32,
        height: u32,
    ) -> Bitmap {
        let mut bitmap = Bitmap::blank(width, height);

        // Solid ink box where the glyphs would sit, centered like the canvas draw
        let ink_width = (self.measure(text, font) as u32).min(width);
        let ink_height = (font.size as u32).min(height);
        let left = (width - ink_width) / 2;
        let top = (height - ink_height) / 2;
        for y in top..top + ink_height {
            for x in left..left + ink_width {
                let offset = ((y * width + x) * 4) as usize;
                bitmap.pixels[offset] = color.r;
                bitmap.pixels[offset + 1] = color.g;
                bitmap.pixels[offset + 2] = color.b;
                bitmap.pixels[offset + 3] = 0xff;
            }
        }
        bitmap
    }
}

#[derive(Debug)]
pub struct HeadlessScene {
    next_id: u64,
    nodes: HashMap<NodeId, Node>,
    released: Vec<NodeId>,
    lights: Vec<LightDesc>,
    requests: Vec<PendingRequest>,
    host: Viewport,
    viewport: Option<Viewport>,
    camera: Option<CameraDesc>,
    frames: u64,
    text: MonospaceText,
}

impl Default for HeadlessScene {
    fn default() -> Self {
        Self::new(Viewport::new(1280, 720))
    }
}

impl HeadlessScene {
    /// `host` plays the role of the page's window size
    pub fn new(host: Viewport) -> Self {
        Self {
            next_id: 1,
            nodes: HashMap::new(),
            released: Vec::new(),
            lights: Vec::new(),
            requests: Vec::new(),
            host,
            viewport: None,
            camera: None,
            frames: 0,
            text: MonospaceText::default(),
        }
    }

    pub fn with_text_metrics(mut self, text: MonospaceText) -> Self {
        self.text = text;
        self
    }

    fn allocate(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                attached: false,
                transform: Transform::default(),
            },
        );
        id
    }

    /// Produce a decoded avatar the way a loader would, detached
    pub fn fabricate_avatar(
        &mut self,
        bones: &[&str],
        expressions: &[&str],
        rigged: bool,
    ) -> AvatarAsset<NodeId> {
        let bones: Vec<BoneInfo> = bones
            .iter()
            .map(|name| BoneInfo {
                name: name.to_string(),
                rotation: Vec3::ZERO,
            })
            .collect();
        let expressions: Vec<String> = expressions.iter().map(|key| key.to_string()).collect();

        let source = self.allocate(NodeKind::Asset);
        let root = self.allocate(NodeKind::AvatarRoot {
            bones: bones.clone(),
            expressions: expressions.iter().map(|key| (key.clone(), 0.0)).collect(),
            steps: 0,
        });

        AvatarAsset {
            root,
            source,
            rigged,
            bones,
            expressions,
        }
    }

    /// Produce a decoded texture material the way a loader would
    pub fn fabricate_texture(&mut self, width: u32, height: u32) -> TextureAsset<NodeId> {
        let material = self.allocate(NodeKind::Material { width, height });
        TextureAsset {
            material,
            width,
            height,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|node| node.attached).unwrap_or(false)
    }

    pub fn was_released(&self, id: NodeId) -> bool {
        self.released.contains(&id)
    }

    pub fn released(&self) -> &[NodeId] {
        &self.released
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn attached_count(&self) -> usize {
        self.nodes.values().filter(|node| node.attached).count()
    }

    pub fn lights(&self) -> &[LightDesc] {
        &self.lights
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn camera(&self) -> Option<&CameraDesc> {
        self.camera.as_ref()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn set_host_viewport(&mut self, host: Viewport) {
        self.host = host;
    }

    pub fn pending_requests(&self) -> &[PendingRequest] {
        &self.requests
    }

    pub fn take_requests(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Texture currently mapped onto a mesh or text plane
    pub fn texture_of(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::Mesh { texture, .. } | NodeKind::TextPlane { texture, .. } => *texture,
            _ => None,
        }
    }

    pub fn expression(&self, id: NodeId, key: &str) -> Option<f32> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::AvatarRoot { expressions, .. } => expressions.get(key).copied(),
            _ => None,
        }
    }

    pub fn bone_rotation(&self, id: NodeId, bone: &str) -> Option<Vec3> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::AvatarRoot { bones, .. } => bones
                .iter()
                .find(|info| info.name == bone)
                .map(|info| info.rotation),
            _ => None,
        }
    }

    pub fn avatar_steps(&self, id: NodeId) -> u32 {
        match self.nodes.get(&id).map(|node| &node.kind) {
            Some(NodeKind::AvatarRoot { steps, .. }) => *steps,
            _ => 0,
        }
    }
}

impl SceneBackend for HeadlessScene {
    type Handle = NodeId;

    fn add_light(&mut self, light: &LightDesc) {
        self.lights.push(*light);
    }

    fn spawn_mesh(&mut self, shape: &Shape, material: &MaterialDesc) -> NodeId {
        self.allocate(NodeKind::Mesh {
            shape: *shape,
            material: *material,
            texture: None,
        })
    }

    fn spawn_text_plane(&mut self, desc: &TextPlaneDesc) -> NodeId {
        let canvas = self.text.rasterize(
            &desc.text,
            &desc.font,
            desc.color,
            desc.layout.canvas_width,
            desc.layout.canvas_height,
        );
        self.allocate(NodeKind::TextPlane {
            desc: desc.clone(),
            canvas,
            texture: None,
            redraws: 1,
            geometry_rebuilds: 0,
        })
    }

    fn update_text_plane(&mut self, handle: NodeId, desc: &TextPlaneDesc, resized: bool) {
        let bitmap = self.text.rasterize(
            &desc.text,
            &desc.font,
            desc.color,
            desc.layout.canvas_width,
            desc.layout.canvas_height,
        );
        if let Some(Node {
            kind:
                NodeKind::TextPlane {
                    desc: current,
                    canvas,
                    redraws,
                    geometry_rebuilds,
                    ..
                },
            ..
        }) = self.nodes.get_mut(&handle)
        {
            *current = desc.clone();
            *canvas = bitmap;
            *redraws += 1;
            if resized {
                *geometry_rebuilds += 1;
            }
        }
    }

    fn attach(&mut self, handle: NodeId) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.attached = true;
        }
    }

    fn set_transform(&mut self, handle: NodeId, transform: &Transform) {
        if let Some(node) = self.nodes.get_mut(&handle) {
            node.transform = *transform;
        }
    }

    fn set_bone_rotation(&mut self, handle: NodeId, bone: &str, rotation: Vec3) {
        if let Some(Node {
            kind: NodeKind::AvatarRoot { bones, .. },
            ..
        }) = self.nodes.get_mut(&handle)
        {
            if let Some(info) = bones.iter_mut().find(|info| info.name == bone) {
                info.rotation = rotation;
            }
        }
    }

    fn set_expression(&mut self, handle: NodeId, key: &str, value: f32) {
        if let Some(Node {
            kind: NodeKind::AvatarRoot { expressions, .. },
            ..
        }) = self.nodes.get_mut(&handle)
        {
            expressions.insert(key.to_string(), value);
        }
    }

    fn apply_texture(&mut self, target: NodeId, material: NodeId) {
        if let Some(node) = self.nodes.get_mut(&target) {
            match &mut node.kind {
                NodeKind::Mesh { texture, .. } | NodeKind::TextPlane { texture, .. } => {
                    *texture = Some(material);
                }
                _ => {}
            }
        }
    }

    fn request_avatar(&mut self, ticket: LoadTicket, path: &str) {
        self.requests.push(PendingRequest {
            ticket,
            kind: LoadKind::Avatar,
            path: path.to_string(),
        });
    }

    fn request_texture(&mut self, ticket: LoadTicket, path: &str) {
        self.requests.push(PendingRequest {
            ticket,
            kind: LoadKind::Texture,
            path: path.to_string(),
        });
    }

    fn release(&mut self, handle: NodeId) {
        if self.nodes.remove(&handle).is_some() {
            self.released.push(handle);
        }
    }

    fn step_avatar(&mut self, handle: NodeId, _dt: f32) {
        if let Some(Node {
            kind: NodeKind::AvatarRoot { steps, .. },
            ..
        }) = self.nodes.get_mut(&handle)
        {
            *steps += 1;
        }
    }

    fn render(&mut self, camera: &CameraDesc) {
        self.camera = Some(*camera);
        self.frames += 1;
    }

    fn resize(&mut self, viewport: Viewport, camera: &CameraDesc) {
        self.viewport = Some(viewport);
        self.camera = Some(*camera);
    }

    fn host_viewport(&self) -> Viewport {
        self.host
    }

    fn measure_text(&self, text: &str, font: &FontSpec) -> f32 {
        self.text.measure(text, font)
    }
}
