//! Configuration loading and defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::color::Color;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub viewport: ViewportConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub lighting: LightingConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
    #[serde(default)]
    pub loads: LoadsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportConfig {
    /// Initial output surface width in pixels
    #[serde(default = "default_width")]
    pub width: u32,
    /// Initial output surface height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_width() -> u32 {
    1000
}

fn default_height() -> u32 {
    800
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    #[serde(default = "default_fov")]
    pub fov_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    #[serde(default = "default_camera_position")]
    pub position: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: default_fov(),
            near: default_near(),
            far: default_far(),
            position: default_camera_position(),
        }
    }
}

fn default_fov() -> f32 {
    75.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    1000.0
}

fn default_camera_position() -> [f32; 3] {
    [0.0, 0.0, 5.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingConfig {
    #[serde(default = "default_light_color")]
    pub ambient_color: Color,
    #[serde(default = "default_ambient_intensity")]
    pub ambient_intensity: f32,
    #[serde(default = "default_light_color")]
    pub directional_color: Color,
    #[serde(default = "default_directional_intensity")]
    pub directional_intensity: f32,
    #[serde(default = "default_directional_position")]
    pub directional_position: [f32; 3],
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            ambient_color: default_light_color(),
            ambient_intensity: default_ambient_intensity(),
            directional_color: default_light_color(),
            directional_intensity: default_directional_intensity(),
            directional_position: default_directional_position(),
        }
    }
}

fn default_light_color() -> Color {
    Color::WHITE
}

fn default_ambient_intensity() -> f32 {
    1.0
}

fn default_directional_intensity() -> f32 {
    1.5
}

fn default_directional_position() -> [f32; 3] {
    [0.0, 10.0, 5.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_weight")]
    pub font_weight: String,
    /// Blank border around the text, in canvas pixels
    #[serde(default = "default_padding")]
    pub padding: f32,
    /// Canvas pixels per world unit
    #[serde(default = "default_plane_scale")]
    pub plane_scale: f32,
    /// Largest canvas side accepted for a text plane, in pixels
    #[serde(default = "default_max_canvas_px")]
    pub max_canvas_px: u32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_weight: default_font_weight(),
            padding: default_padding(),
            plane_scale: default_plane_scale(),
            max_canvas_px: default_max_canvas_px(),
        }
    }
}

fn default_font_family() -> String {
    "Arial".to_string()
}

fn default_font_weight() -> String {
    "Bold".to_string()
}

fn default_padding() -> f32 {
    20.0
}

fn default_plane_scale() -> f32 {
    100.0
}

fn default_max_canvas_px() -> u32 {
    4096
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Yaw applied to every freshly loaded avatar so it faces the camera
    #[serde(default = "default_facing_yaw")]
    pub facing_yaw: f32,
    /// Suffix of the parallel raw-asset registry entry
    #[serde(default = "default_raw_suffix")]
    pub raw_suffix: String,
    /// Expression values applied right after load
    #[serde(default = "default_initial_expressions")]
    pub initial_expressions: BTreeMap<String, f32>,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            facing_yaw: default_facing_yaw(),
            raw_suffix: default_raw_suffix(),
            initial_expressions: default_initial_expressions(),
        }
    }
}

fn default_facing_yaw() -> f32 {
    std::f32::consts::PI
}

fn default_raw_suffix() -> String {
    "_gltf".to_string()
}

fn default_initial_expressions() -> BTreeMap<String, f32> {
    BTreeMap::from([("aa".to_string(), 1.0), ("blink".to_string(), 1.0)])
}

/// What to do with a load request for a name whose previous load is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Queue the request and start it once the running load completes
    #[default]
    Serialize,
    /// Drop the request
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadsConfig {
    #[serde(default)]
    pub policy: LoadPolicy,
}

impl SceneConfig {
    /// Parse a TOML document; missing sections fall back to defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parse a JSON document, as handed over by the browser hook
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<SceneConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config = SceneConfig::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(SceneConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_hook() {
        let config = SceneConfig::default();
        assert_eq!(config.viewport.width, 1000);
        assert_eq!(config.viewport.height, 800);
        assert_eq!(config.camera.fov_degrees, 75.0);
        assert_eq!(config.camera.position, [0.0, 0.0, 5.0]);
        assert_eq!(config.text.padding, 20.0);
        assert_eq!(config.text.plane_scale, 100.0);
        assert_eq!(config.avatar.raw_suffix, "_gltf");
        assert_eq!(config.avatar.initial_expressions.get("blink"), Some(&1.0));
        assert_eq!(config.loads.policy, LoadPolicy::Serialize);
    }

    #[test]
    fn test_partial_toml() {
        let config = SceneConfig::from_toml_str(
            r##"
            [viewport]
            width = 640

            [lighting]
            ambient_color = "#404040"

            [loads]
            policy = "reject"
            "##,
        )
        .unwrap();

        assert_eq!(config.viewport.width, 640);
        assert_eq!(config.viewport.height, 800);
        assert_eq!(config.lighting.ambient_color, Color::from_hex(0x404040));
        assert_eq!(config.loads.policy, LoadPolicy::Reject);
        assert_eq!(config.text, TextConfig::default());
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SceneConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stagehook.toml");
        std::fs::write(&path, "[text]\nfont_family = \"Helvetica\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.text.font_family, "Helvetica");
        assert_eq!(config.text.font_weight, "Bold");
    }

    #[test]
    fn test_json_config() {
        let config = SceneConfig::from_json_str(r#"{"camera": {"fov_degrees": 60}}"#).unwrap();
        assert_eq!(config.camera.fov_degrees, 60.0);
        assert_eq!(config.camera.far, 1000.0);
    }
}
