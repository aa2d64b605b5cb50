//! Capability interface to the rendering library
//!
//! The registry never builds meshes, decodes assets or rasterizes anything
//! itself. Everything that touches the renderer goes through
//! [`SceneBackend`], whose handles are opaque to the rest of the crate.

use glam::Vec3;
use std::fmt::Debug;
use std::hash::Hash;

use crate::color::Color;
use crate::error::LoadError;
use crate::text::TextLayout;

/// Output surface size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Perspective camera parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraDesc {
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightDesc {
    Ambient {
        color: Color,
        intensity: f32,
    },
    Directional {
        color: Color,
        intensity: f32,
        position: Vec3,
    },
}

/// Position plus Euler XYZ rotation in radians
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Primitive geometry, sizes in world units
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Box { width: f32, height: f32, depth: f32 },
    Plane { width: f32, height: f32 },
}

/// Surface model of a primitive's material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// Unlit flat color
    Basic,
    /// Lit, double sided
    Standard,
}

impl MaterialKind {
    /// Both surface models accept an image map
    pub fn accepts_texture(self) -> bool {
        matches!(self, MaterialKind::Basic | MaterialKind::Standard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialDesc {
    pub kind: MaterialKind,
    pub color: Color,
}

/// Everything a backend needs to draw a text plane
#[derive(Debug, Clone, PartialEq)]
pub struct TextPlaneDesc {
    pub text: String,
    pub font: FontSpec,
    pub color: Color,
    pub layout: TextLayout,
}

/// Font request understood by [`TextRasterizer`]
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub weight: String,
    pub size: f32,
}

impl FontSpec {
    /// CSS shorthand, e.g. `Bold 80px Arial`
    pub fn css(&self) -> String {
        format!("{} {}px {}", self.weight, self.size, self.family)
    }
}

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }
}

/// Off-screen text drawing
pub trait TextRasterizer {
    /// Advance width of `text` in pixels
    fn measure(&self, text: &str, font: &FontSpec) -> f32;

    /// Draw `text` centered on a transparent `width` x `height` canvas
    fn rasterize(&self, text: &str, font: &FontSpec, color: Color, width: u32, height: u32)
        -> Bitmap;
}

/// Correlates an asynchronous load with its completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadTicket(pub u64);

/// A named bone and its rest rotation
#[derive(Debug, Clone, PartialEq)]
pub struct BoneInfo {
    pub name: String,
    pub rotation: Vec3,
}

/// A decoded avatar, loaded but not yet attached to the scene
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarAsset<H> {
    /// Root of the avatar's node hierarchy
    pub root: H,
    /// The raw decoded asset the root was instantiated from
    pub source: H,
    /// False when the asset is not a VRM avatar
    pub rigged: bool,
    /// Bones in hierarchy order
    pub bones: Vec<BoneInfo>,
    /// Expression names the avatar defines
    pub expressions: Vec<String>,
}

/// A decoded image wrapped in a reusable unlit material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureAsset<H> {
    pub material: H,
    pub width: u32,
    pub height: u32,
}

pub type AvatarResult<H> = Result<AvatarAsset<H>, LoadError>;
pub type TextureResult<H> = Result<TextureAsset<H>, LoadError>;

/// Operations the registry needs from the scene graph and renderer.
///
/// Spawned objects start detached; [`attach`](SceneBackend::attach) adds
/// them to the scene. [`release`](SceneBackend::release) detaches if needed
/// and frees every GPU-side resource the handle owns.
pub trait SceneBackend {
    type Handle: Copy + Eq + Hash + Debug;

    fn add_light(&mut self, light: &LightDesc);

    fn spawn_mesh(&mut self, shape: &Shape, material: &MaterialDesc) -> Self::Handle;

    fn spawn_text_plane(&mut self, desc: &TextPlaneDesc) -> Self::Handle;

    /// Redraw a text plane; `resized` is set when the canvas dimensions changed
    fn update_text_plane(&mut self, handle: Self::Handle, desc: &TextPlaneDesc, resized: bool);

    fn attach(&mut self, handle: Self::Handle);

    fn set_transform(&mut self, handle: Self::Handle, transform: &Transform);

    fn set_bone_rotation(&mut self, handle: Self::Handle, bone: &str, rotation: Vec3);

    fn set_expression(&mut self, handle: Self::Handle, key: &str, value: f32);

    /// Copy the image map of `material` onto the material of `target`
    fn apply_texture(&mut self, target: Self::Handle, material: Self::Handle);

    fn request_avatar(&mut self, ticket: LoadTicket, path: &str);

    fn request_texture(&mut self, ticket: LoadTicket, path: &str);

    fn release(&mut self, handle: Self::Handle);

    /// Advance animation and expression state of one avatar
    fn step_avatar(&mut self, handle: Self::Handle, dt: f32);

    fn render(&mut self, camera: &CameraDesc);

    fn resize(&mut self, viewport: Viewport, camera: &CameraDesc);

    /// Current size of the host page's viewport
    fn host_viewport(&self) -> Viewport;

    fn measure_text(&self, text: &str, font: &FontSpec) -> f32;
}
