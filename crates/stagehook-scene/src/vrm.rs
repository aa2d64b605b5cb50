//! VRM expression tables
//!
//! A VRM model is a glTF file with a root extension naming its expressions
//! (`aa`, `blink`, `happy`, ...) and the morph targets each one drives. Both
//! the 1.0 layout (`VRMC_vrm`) and the 0.x layout (`VRM`) are read; 0.x
//! preset names are translated to their 1.0 equivalents so commands use a
//! single vocabulary.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const VRM1_EXTENSION: &str = "VRMC_vrm";
pub const VRM0_EXTENSION: &str = "VRM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrmVersion {
    V0,
    V1,
}

/// A glTF node as far as expression binding cares
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub name: String,
    /// Index of the mesh the node instances
    pub mesh: Option<usize>,
}

/// One morph target driven by an expression
#[derive(Debug, Clone, PartialEq)]
pub struct MorphBind {
    /// Name of the node carrying the morph weights
    pub node: String,
    pub index: usize,
    /// Weight at full expression strength, 0..=1
    pub weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionTable {
    binds: BTreeMap<String, Vec<MorphBind>>,
}

impl ExpressionTable {
    pub fn names(&self) -> Vec<String> {
        self.binds.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.binds.contains_key(name)
    }

    pub fn binds(&self, name: &str) -> &[MorphBind] {
        self.binds.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Morph weight of every bound target for the given expression values.
    ///
    /// Contributions to the same target add up and are clamped to 0..=1;
    /// targets no active expression touches come out as 0.
    pub fn weights(&self, values: &BTreeMap<String, f32>) -> BTreeMap<(String, usize), f32> {
        let mut weights = BTreeMap::new();
        for (name, binds) in &self.binds {
            let value = values.get(name).copied().unwrap_or(0.0);
            for bind in binds {
                let weight = weights.entry((bind.node.clone(), bind.index)).or_insert(0.0);
                *weight += value * bind.weight;
            }
        }
        for weight in weights.values_mut() {
            *weight = weight.clamp(0.0, 1.0);
        }
        weights
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VrmInfo {
    pub version: VrmVersion,
    pub expressions: ExpressionTable,
}

#[derive(Deserialize)]
struct Vrm1 {
    #[serde(default)]
    expressions: Vrm1Expressions,
}

#[derive(Deserialize, Default)]
struct Vrm1Expressions {
    #[serde(default)]
    preset: BTreeMap<String, Vrm1Expression>,
    #[serde(default)]
    custom: BTreeMap<String, Vrm1Expression>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Vrm1Expression {
    #[serde(default)]
    morph_target_binds: Vec<Vrm1Bind>,
}

#[derive(Deserialize)]
struct Vrm1Bind {
    node: usize,
    index: usize,
    weight: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Vrm0 {
    #[serde(default)]
    blend_shape_master: Vrm0Master,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Vrm0Master {
    #[serde(default)]
    blend_shape_groups: Vec<Vrm0Group>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Vrm0Group {
    #[serde(default)]
    name: String,
    #[serde(default)]
    preset_name: String,
    #[serde(default)]
    binds: Vec<Vrm0Bind>,
}

#[derive(Deserialize)]
struct Vrm0Bind {
    mesh: usize,
    index: usize,
    /// 0..=100 in this version
    weight: f32,
}

/// 1.0 name of a 0.x preset
fn vrm0_preset(preset: &str) -> Option<&'static str> {
    Some(match preset {
        "neutral" => "neutral",
        "a" => "aa",
        "i" => "ih",
        "u" => "ou",
        "e" => "ee",
        "o" => "oh",
        "blink" => "blink",
        "blink_l" => "blinkLeft",
        "blink_r" => "blinkRight",
        "joy" => "happy",
        "angry" => "angry",
        "sorrow" => "sad",
        "fun" => "relaxed",
        "surprised" => "surprised",
        "lookup" => "lookUp",
        "lookdown" => "lookDown",
        "lookleft" => "lookLeft",
        "lookright" => "lookRight",
        _ => return None,
    })
}

fn node_name(nodes: &[NodeRef], index: usize) -> Option<String> {
    nodes.get(index).map(|node| node.name.clone())
}

fn read_vrm1(value: &Value, nodes: &[NodeRef]) -> Result<ExpressionTable, serde_json::Error> {
    let vrm = Vrm1::deserialize(value)?;
    let mut table = ExpressionTable::default();
    let all = vrm.expressions.preset.into_iter().chain(vrm.expressions.custom);
    for (name, expression) in all {
        let binds = expression
            .morph_target_binds
            .into_iter()
            .filter_map(|bind| {
                Some(MorphBind {
                    node: node_name(nodes, bind.node)?,
                    index: bind.index,
                    weight: bind.weight.clamp(0.0, 1.0),
                })
            })
            .collect();
        table.binds.insert(name, binds);
    }
    Ok(table)
}

fn read_vrm0(value: &Value, nodes: &[NodeRef]) -> Result<ExpressionTable, serde_json::Error> {
    let vrm = Vrm0::deserialize(value)?;
    let mut table = ExpressionTable::default();
    for group in vrm.blend_shape_master.blend_shape_groups {
        let name = match vrm0_preset(&group.preset_name.to_lowercase()) {
            Some(preset) => preset.to_string(),
            None if !group.name.is_empty() => group.name,
            None => continue,
        };
        let mut binds = Vec::new();
        for bind in group.binds {
            // A 0.x bind names a mesh; every node instancing it is driven
            for node in nodes.iter().filter(|node| node.mesh == Some(bind.mesh)) {
                binds.push(MorphBind {
                    node: node.name.clone(),
                    index: bind.index,
                    weight: (bind.weight / 100.0).clamp(0.0, 1.0),
                });
            }
        }
        table.binds.entry(name).or_default().extend(binds);
    }
    Ok(table)
}

/// Read the VRM extension from a glTF document's root extensions.
///
/// Returns `None` for plain glTF files.
pub fn read_vrm(
    extensions: Option<&Map<String, Value>>,
    nodes: &[NodeRef],
) -> Result<Option<VrmInfo>, serde_json::Error> {
    let Some(extensions) = extensions else {
        return Ok(None);
    };

    if let Some(value) = extensions.get(VRM1_EXTENSION) {
        return Ok(Some(VrmInfo {
            version: VrmVersion::V1,
            expressions: read_vrm1(value, nodes)?,
        }));
    }
    if let Some(value) = extensions.get(VRM0_EXTENSION) {
        return Ok(Some(VrmInfo {
            version: VrmVersion::V0,
            expressions: read_vrm0(value, nodes)?,
        }));
    }
    Ok(None)
}
