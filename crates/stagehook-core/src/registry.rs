//! Named object registry
//!
//! Maps the names the server uses to tagged entries wrapping backend
//! handles. The entry kind is resolved once at lookup time; operations
//! match on it instead of probing the handle.

use glam::Vec3;
use std::collections::{BTreeMap, HashMap};

use crate::backend::{BoneInfo, MaterialKind, Shape, Transform};
use crate::color::Color;
use crate::text::TextLayout;

/// Skeleton and expression state of a loaded avatar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvatarRig {
    /// Bones in hierarchy order with their current rotation
    pub bones: Vec<BoneInfo>,
    /// Current expression values
    pub expressions: BTreeMap<String, f32>,
}

impl AvatarRig {
    pub fn new(bones: Vec<BoneInfo>, expressions: &[String]) -> Self {
        Self {
            bones,
            expressions: expressions.iter().map(|key| (key.clone(), 0.0)).collect(),
        }
    }

    pub fn bone_mut(&mut self, name: &str) -> Option<&mut BoneInfo> {
        self.bones.iter_mut().find(|bone| bone.name == name)
    }

    pub fn bone_rotation(&self, name: &str) -> Option<Vec3> {
        self.bones
            .iter()
            .find(|bone| bone.name == name)
            .map(|bone| bone.rotation)
    }
}

/// Text currently drawn on a text plane
#[derive(Debug, Clone, PartialEq)]
pub struct TextContent {
    pub text: String,
    pub font_size: f32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Primitive {
        shape: Shape,
        material: MaterialKind,
    },
    TextPlane {
        layout: TextLayout,
        content: TextContent,
    },
    Avatar(AvatarRig),
}

/// Something placed in the scene
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject<H> {
    pub handle: H,
    pub kind: ObjectKind,
    pub transform: Transform,
}

/// A registry entry
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<H> {
    Object(SceneObject<H>),
    /// A loaded texture wrapped in a reusable material
    Material { handle: H, width: u32, height: u32 },
    /// Raw decoded asset kept next to an avatar
    Asset { handle: H },
}

/// Coarse entry kind, handy for logs and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Primitive,
    TextPlane,
    Avatar,
    Material,
    Asset,
}

impl<H: Copy> Entry<H> {
    pub fn handle(&self) -> H {
        match self {
            Entry::Object(object) => object.handle,
            Entry::Material { handle, .. } | Entry::Asset { handle } => *handle,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Object(object) => match object.kind {
                ObjectKind::Primitive { .. } => EntryKind::Primitive,
                ObjectKind::TextPlane { .. } => EntryKind::TextPlane,
                ObjectKind::Avatar(_) => EntryKind::Avatar,
            },
            Entry::Material { .. } => EntryKind::Material,
            Entry::Asset { .. } => EntryKind::Asset,
        }
    }

    pub fn as_object(&self) -> Option<&SceneObject<H>> {
        match self {
            Entry::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut SceneObject<H>> {
        match self {
            Entry::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn is_avatar(&self) -> bool {
        self.kind() == EntryKind::Avatar
    }
}

/// The name to entry mapping
#[derive(Debug, Clone)]
pub struct Registry<H> {
    entries: HashMap<String, Entry<H>>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H: Copy> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Entry<H>> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entry<H>> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Insert an entry, handing back whatever it replaced
    pub fn insert(&mut self, name: &str, entry: Entry<H>) -> Option<Entry<H>> {
        self.entries.insert(name.to_string(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry<H>> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every entry, in name order
    pub fn drain(&mut self) -> Vec<(String, Entry<H>)> {
        let mut drained: Vec<(String, Entry<H>)> = self.entries.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(handle: u32) -> Entry<u32> {
        Entry::Object(SceneObject {
            handle,
            kind: ObjectKind::Primitive {
                shape: Shape::Box {
                    width: 1.0,
                    height: 1.0,
                    depth: 1.0,
                },
                material: MaterialKind::Basic,
            },
            transform: Transform::default(),
        })
    }

    #[test]
    fn test_insert_returns_previous() {
        let mut registry = Registry::new();
        assert!(registry.insert("box", cube(1)).is_none());

        let previous = registry.insert("box", cube(2)).unwrap();
        assert_eq!(previous.handle(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("box").unwrap().handle(), 2);
    }

    #[test]
    fn test_entry_kinds() {
        let material: Entry<u32> = Entry::Material {
            handle: 7,
            width: 4,
            height: 4,
        };
        assert_eq!(cube(1).kind(), EntryKind::Primitive);
        assert_eq!(material.kind(), EntryKind::Material);
        assert!(material.as_object().is_none());
        assert_eq!(Entry::Asset { handle: 3u32 }.kind(), EntryKind::Asset);
    }

    #[test]
    fn test_rig_bones() {
        let mut rig = AvatarRig::new(
            vec![BoneInfo {
                name: "hips".to_string(),
                rotation: Vec3::ZERO,
            }],
            &["aa".to_string()],
        );
        rig.bone_mut("hips").unwrap().rotation.x = 0.5;
        assert_eq!(rig.bone_rotation("hips"), Some(Vec3::new(0.5, 0.0, 0.0)));
        assert!(rig.bone_mut("neck").is_none());
        assert_eq!(rig.expressions.get("aa"), Some(&0.0));
    }

    #[test]
    fn test_drain_sorted() {
        let mut registry = Registry::new();
        registry.insert("b", cube(2));
        registry.insert("a", cube(1));
        let drained = registry.drain();
        assert_eq!(drained[0].0, "a");
        assert_eq!(drained[1].0, "b");
        assert!(registry.is_empty());
    }
}
