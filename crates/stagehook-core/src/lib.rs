//! Stagehook Core - Event-driven control of a retained 3D scene
//!
//! This crate holds everything that does not depend on a renderer:
//! - Command decoding for the inbound event bus and outbound event payloads
//! - The named object registry and the scene context that mutates it
//! - Per-name load guards and the avatar frame-step list
//! - Text plane layout, colors and configuration
//! - A headless backend for tests and offline replays

pub mod backend;
pub mod color;
pub mod command;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod headless;
pub mod loads;
pub mod registry;
pub mod text;

pub use backend::{
    AvatarAsset, AvatarResult, Bitmap, BoneInfo, CameraDesc, FontSpec, LightDesc, LoadTicket,
    MaterialDesc, MaterialKind, SceneBackend, Shape, TextPlaneDesc, TextRasterizer, TextureAsset,
    TextureResult, Transform, Viewport,
};
pub use color::Color;
pub use command::{AxisUpdate, Command, LoadReport, LoadStatus, OutboundEvent, TransformField};
pub use config::{load_config, LoadPolicy, SceneConfig};
pub use context::SceneContext;
pub use error::{ColorError, CommandError, DispatchError, LoadError, SceneError};
pub use headless::{HeadlessScene, NodeId};
pub use loads::LoadKind;
pub use registry::{Entry, EntryKind};
pub use text::TextLayout;
