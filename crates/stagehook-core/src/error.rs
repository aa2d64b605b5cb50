//! Error types shared by the registry, dispatcher and loaders

use thiserror::Error;

/// Soft failures of registry operations.
///
/// None of these are fatal: the operation that produced one left the
/// registry and the scene untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("object '{0}' has no transform")]
    NotTransformable(String),
    #[error("bone '{bone}' not found on model '{name}'")]
    BoneNotFound { name: String, bone: String },
    #[error("object '{0}' is not an avatar")]
    NotAnAvatar(String),
    #[error("object '{0}' is not a valid text plane")]
    NotATextPlane(String),
    #[error("material of object '{0}' does not support texture maps")]
    NotTextureCapable(String),
    #[error("no loaded texture material named '{0}'")]
    NotATexture(String),
    #[error("a load for '{0}' is already in flight")]
    LoadInFlight(String),
    #[error("text canvas {width}x{height} exceeds {limit}px")]
    TextTooLarge { width: u32, height: u32, limit: u32 },
    #[error("invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
}

/// Errors raised while decoding an inbound event at the boundary
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("malformed payload for '{event}': {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Asset load failures reported by a backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("failed to fetch '{path}': {reason}")]
    Fetch { path: String, reason: String },
    #[error("failed to decode '{path}': {reason}")]
    Decode { path: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    #[error("invalid color '{0}'")]
    Invalid(String),
}

/// Why an inbound event had no effect
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("event '{0}' arrived while no scene is mounted")]
    NotMounted(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}
