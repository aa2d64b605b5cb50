//! Inbound commands and outbound events exchanged with the event bus
//!
//! The bus delivers an event name plus a JSON payload. Both are validated
//! here, once, and turned into a [`Command`]; nothing downstream ever sees
//! an undecoded payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::color::Color;
use crate::error::CommandError;

/// Per-axis update where `None` keeps the current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct AxisUpdate {
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub z: Option<f32>,
}

impl AxisUpdate {
    pub fn new(x: Option<f32>, y: Option<f32>, z: Option<f32>) -> Self {
        Self { x, y, z }
    }

    /// Overwrite only the axes that carry a value
    pub fn apply_to(&self, target: &mut glam::Vec3) {
        if let Some(x) = self.x {
            target.x = x;
        }
        if let Some(y) = self.y {
            target.y = y;
        }
        if let Some(z) = self.z {
            target.z = z;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }
}

/// Which transform field a `position` / `rotation` event targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformField {
    Position,
    Rotation,
}

/// Payload shared by `position` and `rotation`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformPayload {
    pub name: String,
    #[serde(flatten)]
    pub axes: AxisUpdate,
}

/// Every event the hook understands
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Command {
    #[serde(rename = "addCube")]
    AddCube {
        name: String,
        x: f32,
        y: f32,
        z: f32,
        #[serde(default)]
        color: Color,
    },
    #[serde(rename = "addPlane")]
    AddPlane {
        name: String,
        x: f32,
        y: f32,
        #[serde(default)]
        color: Color,
    },
    #[serde(rename = "position")]
    Position(TransformPayload),
    #[serde(rename = "rotation")]
    Rotation(TransformPayload),
    #[serde(rename = "loadModel")]
    LoadModel { name: String, path: String },
    #[serde(rename = "getBone")]
    GetBone { name: String },
    #[serde(rename = "rotationBone")]
    RotationBone {
        name: String,
        bone_name: String,
        #[serde(flatten)]
        axes: AxisUpdate,
    },
    #[serde(rename = "setBlendShape")]
    SetBlendShape { name: String, key: String, value: f32 },
    #[serde(rename = "loadTexture")]
    LoadTexture { name: String, path: String },
    #[serde(rename = "setTexture")]
    SetTexture {
        obj_name: String,
        texture_name: String,
    },
    #[serde(rename = "addTextPlane")]
    AddTextPlane {
        name: String,
        #[serde(rename = "textContent")]
        text: String,
        #[serde(rename = "fontSize")]
        font_size: f32,
        #[serde(rename = "textColor", default)]
        color: Color,
    },
    #[serde(rename = "setTextPlaneText")]
    SetTextPlaneText {
        name: String,
        #[serde(rename = "newTextContent")]
        text: String,
        #[serde(rename = "fontSize")]
        font_size: f32,
        #[serde(rename = "textColor", default)]
        color: Color,
    },
    #[serde(rename = "removeObject")]
    RemoveObject { name: String },
    #[serde(rename = "setSize")]
    SetSize {
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
    },
}

impl Command {
    /// Inbound event names, in the order the hook registers them
    pub const EVENTS: &'static [&'static str] = &[
        "addCube",
        "addPlane",
        "rotation",
        "position",
        "loadModel",
        "getBone",
        "rotationBone",
        "setBlendShape",
        "loadTexture",
        "setTexture",
        "addTextPlane",
        "setTextPlaneText",
        "removeObject",
        "setSize",
    ];

    /// Decode an event name and its payload
    pub fn decode(event: &str, payload: Value) -> Result<Self, CommandError> {
        if !Self::EVENTS.contains(&event) {
            return Err(CommandError::UnknownEvent(event.to_string()));
        }

        // setSize is pushed without a payload
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let mut envelope = serde_json::Map::new();
        envelope.insert("event".to_string(), Value::String(event.to_string()));
        envelope.insert("payload".to_string(), payload);

        serde_json::from_value(Value::Object(envelope)).map_err(|source| CommandError::Malformed {
            event: event.to_string(),
            source,
        })
    }

    /// Decode a JSON string payload
    pub fn decode_str(event: &str, payload: &str) -> Result<Self, CommandError> {
        let value = if payload.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(payload).map_err(|source| CommandError::Malformed {
                event: event.to_string(),
                source,
            })?
        };
        Self::decode(event, value)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Command::AddCube { .. } => "addCube",
            Command::AddPlane { .. } => "addPlane",
            Command::Position(_) => "position",
            Command::Rotation(_) => "rotation",
            Command::LoadModel { .. } => "loadModel",
            Command::GetBone { .. } => "getBone",
            Command::RotationBone { .. } => "rotationBone",
            Command::SetBlendShape { .. } => "setBlendShape",
            Command::LoadTexture { .. } => "loadTexture",
            Command::SetTexture { .. } => "setTexture",
            Command::AddTextPlane { .. } => "addTextPlane",
            Command::SetTextPlaneText { .. } => "setTextPlaneText",
            Command::RemoveObject { .. } => "removeObject",
            Command::SetSize { .. } => "setSize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Completion,
    Error,
}

/// Payload of `load_model` and `load_texture`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub status: LoadStatus,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadReport {
    pub fn completion(name: &str) -> Self {
        Self {
            status: LoadStatus::Completion,
            name: name.to_string(),
            message: None,
            error: None,
        }
    }

    /// Asset loaded but is unusable
    pub fn rejected(name: &str, message: &str) -> Self {
        Self {
            status: LoadStatus::Error,
            name: name.to_string(),
            message: Some(message.to_string()),
            error: None,
        }
    }

    /// Asset could not be loaded at all
    pub fn failed(name: &str, error: impl ToString) -> Self {
        Self {
            status: LoadStatus::Error,
            name: name.to_string(),
            message: None,
            error: Some(error.to_string()),
        }
    }
}

/// Events pushed back to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundEvent {
    #[serde(rename = "load_model")]
    LoadModel(LoadReport),
    #[serde(rename = "load_texture")]
    LoadTexture(LoadReport),
    #[serde(rename = "get_bone")]
    GetBone { name: String },
}

impl OutboundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundEvent::LoadModel(_) => "load_model",
            OutboundEvent::LoadTexture(_) => "load_texture",
            OutboundEvent::GetBone { .. } => "get_bone",
        }
    }

    /// The payload object alone, as handed to `pushEvent`
    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::LoadModel(report) | OutboundEvent::LoadTexture(report) => {
                serde_json::to_value(report).unwrap_or_default()
            }
            OutboundEvent::GetBone { name } => {
                let mut map = serde_json::Map::new();
                map.insert("name".to_string(), Value::String(name.clone()));
                Value::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_add_cube() {
        let cmd = Command::decode(
            "addCube",
            json!({"name": "box", "x": 1, "y": 2.5, "z": 3, "color": "#00ff00"}),
        )
        .unwrap();

        assert_eq!(
            cmd,
            Command::AddCube {
                name: "box".to_string(),
                x: 1.0,
                y: 2.5,
                z: 3.0,
                color: Color::rgb(0, 255, 0),
            }
        );
        assert_eq!(cmd.event_name(), "addCube");
    }

    #[test]
    fn test_decode_partial_position() {
        let cmd = Command::decode("position", json!({"name": "box", "x": 1.5, "y": null})).unwrap();
        match cmd {
            Command::Position(payload) => {
                assert_eq!(payload.name, "box");
                assert_eq!(payload.axes, AxisUpdate::new(Some(1.5), None, None));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_decode_hook_field_names() {
        let cmd = Command::decode(
            "addTextPlane",
            json!({"name": "label", "textContent": "Hi", "fontSize": 80, "textColor": "white"}),
        )
        .unwrap();
        assert!(matches!(cmd, Command::AddTextPlane { ref text, font_size, .. } if text == "Hi" && font_size == 80.0));

        let cmd = Command::decode(
            "rotationBone",
            json!({"name": "vrm", "bone_name": "J_Bip_C_Head", "y": 0.5}),
        )
        .unwrap();
        assert!(matches!(cmd, Command::RotationBone { ref bone_name, axes, .. }
            if bone_name == "J_Bip_C_Head" && axes == AxisUpdate::new(None, Some(0.5), None)));

        let cmd = Command::decode(
            "setTexture",
            json!({"obj_name": "plane", "texture_name": "wood"}),
        )
        .unwrap();
        assert!(matches!(cmd, Command::SetTexture { .. }));
    }

    #[test]
    fn test_decode_set_size_without_payload() {
        let cmd = Command::decode("setSize", Value::Null).unwrap();
        assert_eq!(cmd, Command::SetSize { width: None, height: None });

        let cmd = Command::decode_str("setSize", r#"{"width": 640, "height": 480}"#).unwrap();
        assert_eq!(cmd, Command::SetSize { width: Some(640), height: Some(480) });
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let err = Command::decode("addCube", json!({"name": "box", "x": "wide"})).unwrap_err();
        assert!(matches!(err, CommandError::Malformed { ref event, .. } if event == "addCube"));

        let err = Command::decode("removeObject", json!({})).unwrap_err();
        assert!(matches!(err, CommandError::Malformed { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let err = Command::decode("explode", json!({})).unwrap_err();
        assert!(matches!(err, CommandError::UnknownEvent(ref name) if name == "explode"));
    }

    #[test]
    fn test_outbound_payloads() {
        let done = OutboundEvent::LoadModel(LoadReport::completion("vrm"));
        assert_eq!(done.event_name(), "load_model");
        assert_eq!(done.payload(), json!({"status": "completion", "name": "vrm"}));

        let not_vrm = OutboundEvent::LoadModel(LoadReport::rejected("vrm", "not a VRM"));
        assert_eq!(
            not_vrm.payload(),
            json!({"status": "error", "name": "vrm", "message": "not a VRM"})
        );

        let bone = OutboundEvent::GetBone { name: "hips".to_string() };
        assert_eq!(bone.payload(), json!({"name": "hips"}));
    }
}
