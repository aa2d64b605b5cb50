//! Command dispatcher
//!
//! Routes a decoded [`Command`] to the matching context operation. Soft
//! errors are logged here and handed back so callers can inspect them; none
//! of them interrupt the event stream.

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::SceneBackend;
use crate::command::{Command, TransformField};
use crate::context::SceneContext;
use crate::error::{DispatchError, SceneError};

impl<B: SceneBackend> SceneContext<B> {
    /// Apply one decoded command
    pub fn apply(&mut self, command: Command) -> Result<(), SceneError> {
        match command {
            Command::AddCube {
                name,
                x,
                y,
                z,
                color,
            } => {
                self.add_cube(&name, x, y, z, color);
                Ok(())
            }
            Command::AddPlane { name, x, y, color } => {
                self.add_plane(&name, x, y, color);
                Ok(())
            }
            Command::Position(payload) => {
                self.set_transform(&payload.name, TransformField::Position, payload.axes)
            }
            Command::Rotation(payload) => {
                self.set_transform(&payload.name, TransformField::Rotation, payload.axes)
            }
            Command::LoadModel { name, path } => self.load_avatar(&name, &path),
            Command::GetBone { name } => self.list_bones(&name).map(|_| ()),
            Command::RotationBone {
                name,
                bone_name,
                axes,
            } => self.set_bone_rotation(&name, &bone_name, axes),
            Command::SetBlendShape { name, key, value } => self.set_expression(&name, &key, value),
            Command::LoadTexture { name, path } => self.load_texture(&name, &path),
            Command::SetTexture {
                obj_name,
                texture_name,
            } => self.apply_texture(&obj_name, &texture_name),
            Command::AddTextPlane {
                name,
                text,
                font_size,
                color,
            } => self.create_text_plane(&name, &text, font_size, color),
            Command::SetTextPlaneText {
                name,
                text,
                font_size,
                color,
            } => self.update_text_plane(&name, &text, font_size, color),
            Command::RemoveObject { name } => self.remove(&name),
            Command::SetSize { width, height } => self.resize(width, height),
        }
    }

    /// Decode and apply an event from the bus, logging anything that went wrong
    pub fn handle_event(&mut self, event: &str, payload: Value) -> Result<(), DispatchError> {
        if !self.is_mounted() {
            debug!(event, "Dropping event for unmounted scene");
            return Err(DispatchError::NotMounted(event.to_string()));
        }

        let command = Command::decode(event, payload).inspect_err(|err| {
            warn!(event, error = %err, "Rejected inbound event");
        })?;

        debug!(event, "Dispatching");
        self.apply(command).map_err(|err| {
            warn!(event, error = %err, "Command had no effect");
            DispatchError::from(err)
        })
    }
}
