//! Asset catalog: what each path resolves to during a replay

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AvatarSpec {
    #[serde(default)]
    pub bones: Vec<String>,
    #[serde(default)]
    pub expressions: Vec<String>,
    #[serde(default = "default_rigged")]
    pub rigged: bool,
    /// Reported as load progress
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

fn default_rigged() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TextureSpec {
    pub width: u32,
    pub height: u32,
}

/// Paths known to the replay; anything else fails to load
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssetCatalog {
    #[serde(default)]
    pub avatars: HashMap<String, AvatarSpec>,
    #[serde(default)]
    pub textures: HashMap<String, TextureSpec>,
}

impl AssetCatalog {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn avatar(&self, path: &str) -> Option<&AvatarSpec> {
        self.avatars.get(path)
    }

    pub fn texture(&self, path: &str) -> Option<&TextureSpec> {
        self.textures.get(path)
    }
}

/// Load the catalog; no path means an empty catalog
pub fn load_catalog(path: Option<&Path>) -> Result<AssetCatalog> {
    let Some(path) = path else {
        return Ok(AssetCatalog::default());
    };

    let content = std::fs::read_to_string(path)?;
    let catalog = AssetCatalog::from_toml_str(&content)?;
    info!(
        path = %path.display(),
        avatars = catalog.avatars.len(),
        textures = catalog.textures.len(),
        "Loaded asset catalog"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_catalog() {
        let catalog = AssetCatalog::from_toml_str(
            r#"
            [avatars."/models/alice.vrm"]
            bones = ["hips", "spine", "head"]
            expressions = ["aa", "blink"]

            [avatars."/models/crate.glb"]
            rigged = false

            [textures."/textures/wood.png"]
            width = 256
            height = 128
            "#,
        )
        .unwrap();

        let alice = catalog.avatar("/models/alice.vrm").unwrap();
        assert!(alice.rigged);
        assert_eq!(alice.bones.len(), 3);
        assert!(!catalog.avatar("/models/crate.glb").unwrap().rigged);
        assert_eq!(
            catalog.texture("/textures/wood.png"),
            Some(&TextureSpec {
                width: 256,
                height: 128
            })
        );
        assert!(catalog.texture("/textures/stone.png").is_none());
    }

    #[test]
    fn test_load_catalog_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("assets.toml");
        std::fs::write(&path, "[textures.\"a.png\"]\nwidth = 2\nheight = 2\n").unwrap();

        let catalog = load_catalog(Some(&path)).unwrap();
        assert_eq!(catalog.textures.len(), 1);
        assert_eq!(load_catalog(None).unwrap(), AssetCatalog::default());
    }
}
