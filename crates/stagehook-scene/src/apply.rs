//! Applying recorded scene ops to the Bevy world

use bevy::asset::RenderAssetUsages;
use bevy::gltf::Gltf;
use bevy::prelude::*;
use bevy::mesh::morph::MorphWeights;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use bevy::window::PrimaryWindow;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use stagehook_core::{
    Bitmap, CameraDesc, Color as StageColor, LightDesc, MaterialDesc, MaterialKind, Shape,
    Transform as StageTransform, Viewport,
};

use crate::backend::{ObjectId, SceneOp, TextSurface};
use crate::loading;
use crate::vrm::ExpressionTable;

/// Bevy ambient brightness per unit of configured ambient intensity
pub const AMBIENT_BRIGHTNESS_PER_UNIT: f32 = 400.0;
/// Directional illuminance (lux) per unit of configured directional intensity
pub const DIRECTIONAL_LUX_PER_UNIT: f32 = 4000.0;
/// Frames an op may wait for its avatar's scene to spawn
const MAX_DEFER_FRAMES: u32 = 600;

/// Marker linking an entity to the object id the context knows it by
#[derive(Component, Debug, Clone, Copy)]
pub struct StageObject(pub ObjectId);

/// Marker for the scene camera
#[derive(Component)]
pub struct StageCamera;

/// Marker for lights added at mount
#[derive(Component)]
pub struct StageLight;

/// What an object id resolves to on the Bevy side
#[derive(Debug)]
pub enum Slot {
    /// A spawned entity and the material it owns, if any
    Entity {
        entity: Entity,
        material: Option<Handle<StandardMaterial>>,
    },
    /// A loaded texture wrapped in a standalone material
    Material(Handle<StandardMaterial>),
    /// A decoded glTF kept alive next to its avatar
    Gltf(Handle<Gltf>),
}

/// Expression binds of an avatar and the values last set on it
#[derive(Debug, Default)]
struct AvatarExpressions {
    table: ExpressionTable,
    values: BTreeMap<String, f32>,
}

#[derive(Resource, Default)]
pub struct SceneSlots {
    slots: HashMap<ObjectId, Slot>,
    expressions: HashMap<ObjectId, AvatarExpressions>,
    deferred: Vec<(SceneOp, u32)>,
}

impl SceneSlots {
    pub fn insert(&mut self, id: ObjectId, slot: Slot) {
        self.slots.insert(id, slot);
    }

    pub fn set_expression_table(&mut self, id: ObjectId, table: ExpressionTable) {
        self.expressions.insert(
            id,
            AvatarExpressions {
                table,
                values: BTreeMap::new(),
            },
        );
    }

    /// Merge `values` into the avatar's expression state and return the
    /// morph weight of every target its expressions bind
    fn update_expressions(
        &mut self,
        id: ObjectId,
        values: &BTreeMap<String, f32>,
    ) -> BTreeMap<(String, usize), f32> {
        let Some(state) = self.expressions.get_mut(&id) else {
            return BTreeMap::new();
        };
        for (name, value) in values {
            if state.table.contains(name) {
                state.values.insert(name.clone(), *value);
            } else {
                debug!(%id, expression = %name, "Avatar has no such expression");
            }
        }
        state.table.weights(&state.values)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn entity(&self, id: ObjectId) -> Option<Entity> {
        match self.slots.get(&id)? {
            Slot::Entity { entity, .. } => Some(*entity),
            _ => None,
        }
    }

    fn material(&self, id: ObjectId) -> Option<Handle<StandardMaterial>> {
        match self.slots.get(&id)? {
            Slot::Entity { material, .. } => material.clone(),
            Slot::Material(material) => Some(material.clone()),
            Slot::Gltf(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

enum Outcome {
    Applied,
    /// Target exists but its scene has not spawned yet
    Defer,
}

pub fn bevy_color(color: StageColor) -> Color {
    Color::srgb_u8(color.r, color.g, color.b)
}

/// Euler XYZ in radians to a quaternion
pub fn euler_to_quat(rotation: Vec3) -> Quat {
    Quat::from_euler(EulerRot::XYZ, rotation.x, rotation.y, rotation.z)
}

pub fn to_bevy_transform(transform: &StageTransform) -> Transform {
    Transform {
        translation: transform.position,
        rotation: euler_to_quat(transform.rotation),
        ..default()
    }
}

pub fn bitmap_to_image(bitmap: &Bitmap) -> Image {
    Image::new(
        Extent3d {
            width: bitmap.width.max(1),
            height: bitmap.height.max(1),
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        if bitmap.width == 0 || bitmap.height == 0 {
            vec![0; 4]
        } else {
            bitmap.pixels.clone()
        },
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::default(),
    )
}

fn shape_mesh(shape: &Shape) -> Mesh {
    match *shape {
        Shape::Box {
            width,
            height,
            depth,
        } => Mesh::from(Cuboid::new(width, height, depth)),
        Shape::Plane { width, height } => Mesh::from(Rectangle::new(width, height)),
    }
}

fn primitive_material(shape: &Shape, material: &MaterialDesc) -> StandardMaterial {
    let double_sided = matches!(shape, Shape::Plane { .. });
    StandardMaterial {
        base_color: bevy_color(material.color),
        unlit: material.kind == MaterialKind::Basic,
        double_sided,
        cull_mode: if double_sided {
            None
        } else {
            Some(bevy::render::render_resource::Face::Back)
        },
        ..default()
    }
}

fn text_material(image: Handle<Image>) -> StandardMaterial {
    StandardMaterial {
        base_color_texture: Some(image),
        unlit: true,
        alpha_mode: AlphaMode::Blend,
        double_sided: true,
        cull_mode: None,
        ..default()
    }
}

/// Apply a batch of ops in order
pub fn apply_ops(world: &mut World, ops: Vec<SceneOp>) {
    for op in ops {
        apply_or_defer(world, op, 0);
    }
}

/// Give deferred ops another chance; call once per frame
pub fn retry_deferred(world: &mut World) {
    let deferred = std::mem::take(&mut world.resource_mut::<SceneSlots>().deferred);
    for (op, attempts) in deferred {
        if attempts >= MAX_DEFER_FRAMES {
            warn!(target_id = ?op.target(), "Dropping op whose scene never spawned");
            continue;
        }
        apply_or_defer(world, op, attempts + 1);
    }
}

fn apply_or_defer(world: &mut World, op: SceneOp, attempts: u32) {
    if let Outcome::Defer = apply_op(world, &op) {
        world
            .resource_mut::<SceneSlots>()
            .deferred
            .push((op, attempts));
    }
}

fn apply_op(world: &mut World, op: &SceneOp) -> Outcome {
    match op {
        SceneOp::AddLight(light) => add_light(world, light),
        SceneOp::SpawnMesh {
            id,
            shape,
            material,
        } => {
            let mesh = world.resource_mut::<Assets<Mesh>>().add(shape_mesh(shape));
            let material = world
                .resource_mut::<Assets<StandardMaterial>>()
                .add(primitive_material(shape, material));
            spawn_object(world, *id, mesh, material);
        }
        SceneOp::SpawnTextPlane { id, surface } => {
            let image = world
                .resource_mut::<Assets<Image>>()
                .add(bitmap_to_image(&surface.bitmap));
            let mesh = world
                .resource_mut::<Assets<Mesh>>()
                .add(Rectangle::new(surface.plane_width, surface.plane_height));
            let material = world
                .resource_mut::<Assets<StandardMaterial>>()
                .add(text_material(image));
            spawn_object(world, *id, mesh, material);
        }
        SceneOp::UpdateTextPlane {
            id,
            surface,
            resized,
        } => update_text_plane(world, *id, surface, *resized),
        SceneOp::Attach(id) => {
            if let Some(entity) = world.resource::<SceneSlots>().entity(*id) {
                if let Ok(mut entity) = world.get_entity_mut(entity) {
                    entity.insert(Visibility::Inherited);
                }
            }
        }
        SceneOp::SetTransform { id, transform } => {
            if let Some(entity) = world.resource::<SceneSlots>().entity(*id) {
                if let Some(mut current) = world.get_mut::<Transform>(entity) {
                    *current = to_bevy_transform(transform);
                }
            }
        }
        SceneOp::SetBoneRotation { id, bone, rotation } => {
            return set_bone_rotation(world, *id, bone, *rotation);
        }
        SceneOp::SetExpressions { id, values } => return set_expressions(world, *id, values),
        SceneOp::LoadAvatar { ticket, path } => loading::start_avatar(world, *ticket, path),
        SceneOp::LoadTexture { ticket, path } => loading::start_texture(world, *ticket, path),
        SceneOp::ApplyTexture { target, material } => apply_texture(world, *target, *material),
        SceneOp::Release(id) => release(world, *id),
        SceneOp::Resize { viewport, camera } => resize(world, *viewport, camera),
    }
    Outcome::Applied
}

fn add_light(world: &mut World, light: &LightDesc) {
    match *light {
        LightDesc::Ambient { color, intensity } => {
            world.insert_resource(AmbientLight {
                color: bevy_color(color),
                brightness: intensity * AMBIENT_BRIGHTNESS_PER_UNIT,
                ..default()
            });
        }
        LightDesc::Directional {
            color,
            intensity,
            position,
        } => {
            world.spawn((
                DirectionalLight {
                    color: bevy_color(color),
                    illuminance: intensity * DIRECTIONAL_LUX_PER_UNIT,
                    ..default()
                },
                Transform::from_translation(position).looking_at(Vec3::ZERO, Vec3::Y),
                StageLight,
            ));
        }
    }
}

fn spawn_object(
    world: &mut World,
    id: ObjectId,
    mesh: Handle<Mesh>,
    material: Handle<StandardMaterial>,
) {
    let entity = world
        .spawn((
            Mesh3d(mesh),
            MeshMaterial3d(material.clone()),
            Transform::default(),
            Visibility::Hidden,
            StageObject(id),
        ))
        .id();
    world.resource_mut::<SceneSlots>().insert(
        id,
        Slot::Entity {
            entity,
            material: Some(material),
        },
    );
}

fn update_text_plane(world: &mut World, id: ObjectId, surface: &TextSurface, resized: bool) {
    let (entity, material) = match world.resource::<SceneSlots>().get(id) {
        Some(Slot::Entity {
            entity,
            material: Some(material),
        }) => (*entity, material.clone()),
        _ => {
            warn!(%id, "Text update for unknown object");
            return;
        }
    };

    let image = world
        .resource_mut::<Assets<Image>>()
        .add(bitmap_to_image(&surface.bitmap));
    if let Some(material) = world
        .resource_mut::<Assets<StandardMaterial>>()
        .get_mut(&material)
    {
        material.base_color_texture = Some(image);
    }

    if resized {
        let mesh = world
            .resource_mut::<Assets<Mesh>>()
            .add(Rectangle::new(surface.plane_width, surface.plane_height));
        if let Ok(mut entity) = world.get_entity_mut(entity) {
            entity.insert(Mesh3d(mesh));
        }
    }
}

/// Depth-first search below `root` for an entity with the given name
fn find_named_descendant(world: &World, root: Entity, name: &str) -> Option<Entity> {
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        if entity != root && world.get::<Name>(entity).is_some_and(|n| n.as_str() == name) {
            return Some(entity);
        }
        if let Some(children) = world.get::<Children>(entity) {
            stack.extend(children.iter());
        }
    }
    None
}

fn scene_spawned(world: &World, root: Entity) -> bool {
    world.get::<Children>(root).is_some_and(|children| !children.is_empty())
}

fn set_bone_rotation(world: &mut World, id: ObjectId, bone: &str, rotation: Vec3) -> Outcome {
    let Some(root) = world.resource::<SceneSlots>().entity(id) else {
        return Outcome::Applied;
    };
    if !scene_spawned(world, root) {
        return Outcome::Defer;
    }

    match find_named_descendant(world, root, bone) {
        Some(entity) => {
            if let Some(mut transform) = world.get_mut::<Transform>(entity) {
                transform.rotation = euler_to_quat(rotation);
            }
        }
        None => warn!(%id, bone, "Bone entity not found in spawned scene"),
    }
    Outcome::Applied
}

fn set_expressions(world: &mut World, id: ObjectId, values: &BTreeMap<String, f32>) -> Outcome {
    let Some(root) = world.resource::<SceneSlots>().entity(id) else {
        return Outcome::Applied;
    };
    if !scene_spawned(world, root) {
        return Outcome::Defer;
    }

    let weights = world
        .resource_mut::<SceneSlots>()
        .update_expressions(id, values);
    for ((node, index), value) in weights {
        let Some(entity) = find_named_descendant(world, root, &node) else {
            warn!(%id, node, "Expression node not found in spawned scene");
            continue;
        };
        // Primitives copy their weights from the node entity each frame
        if let Some(mut morphs) = world.get_mut::<MorphWeights>(entity) {
            if let Some(weight) = morphs.weights_mut().get_mut(index) {
                *weight = value;
            }
        }
    }
    Outcome::Applied
}

fn apply_texture(world: &mut World, target: ObjectId, material: ObjectId) {
    let slots = world.resource::<SceneSlots>();
    let (Some(target_material), Some(source_material)) =
        (slots.material(target), slots.material(material))
    else {
        warn!(%target, %material, "Texture or target material missing");
        return;
    };

    let mut materials = world.resource_mut::<Assets<StandardMaterial>>();
    let image = materials
        .get(&source_material)
        .and_then(|source| source.base_color_texture.clone());
    if let Some(target) = materials.get_mut(&target_material) {
        target.base_color_texture = image;
    }
}

fn release(world: &mut World, id: ObjectId) {
    let mut slots = world.resource_mut::<SceneSlots>();
    slots.deferred.retain(|(op, _)| op.target() != Some(id));
    slots.expressions.remove(&id);
    let Some(slot) = slots.slots.remove(&id) else {
        return;
    };

    // Dropping the strong handles lets the asset server free the assets
    if let Slot::Entity { entity, .. } = slot {
        if world.get_entity(entity).is_ok() {
            world.despawn(entity);
        }
    }
}

fn resize(world: &mut World, viewport: Viewport, camera: &CameraDesc) {
    let mut windows = world.query_filtered::<&mut Window, With<PrimaryWindow>>();
    if let Ok(mut window) = windows.single_mut(world) {
        window
            .resolution
            .set(viewport.width as f32, viewport.height as f32);
    }

    let projection = Projection::Perspective(PerspectiveProjection {
        fov: camera.fov_degrees.to_radians(),
        aspect_ratio: camera.aspect,
        near: camera.near,
        far: camera.far,
        ..default()
    });
    let transform = Transform::from_translation(camera.position);

    let mut cameras = world.query_filtered::<Entity, With<StageCamera>>();
    let existing = cameras.iter(world).next();
    match existing {
        Some(entity) => {
            if let Ok(mut entity) = world.get_entity_mut(entity) {
                entity.insert((projection, transform));
            }
        }
        None => {
            world.spawn((Camera3d::default(), projection, transform, StageCamera));
        }
    }
}

/// Despawn the camera and lights added at mount
pub fn clear_stage(world: &mut World) {
    let mut query = world.query_filtered::<Entity, Or<(With<StageCamera>, With<StageLight>)>>();
    let entities: Vec<Entity> = query.iter(world).collect();
    for entity in entities {
        world.despawn(entity);
    }
    world.remove_resource::<AmbientLight>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euler_order_matches_xyz() {
        let rotation = Vec3::new(0.3, -0.2, 1.1);
        let expected =
            Quat::from_rotation_x(0.3) * Quat::from_rotation_y(-0.2) * Quat::from_rotation_z(1.1);
        assert!(euler_to_quat(rotation).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_bitmap_to_image_size() {
        let image = bitmap_to_image(&Bitmap::blank(136, 120));
        assert_eq!(image.width(), 136);
        assert_eq!(image.height(), 120);

        let empty = bitmap_to_image(&Bitmap::blank(0, 0));
        assert_eq!(empty.width(), 1);
    }

    #[test]
    fn test_primitive_materials() {
        let basic = primitive_material(
            &Shape::Box {
                width: 1.0,
                height: 1.0,
                depth: 1.0,
            },
            &MaterialDesc {
                kind: MaterialKind::Basic,
                color: StageColor::rgb(255, 0, 0),
            },
        );
        assert!(basic.unlit);
        assert!(!basic.double_sided);

        let plane = primitive_material(
            &Shape::Plane {
                width: 1.0,
                height: 1.0,
            },
            &MaterialDesc {
                kind: MaterialKind::Standard,
                color: StageColor::WHITE,
            },
        );
        assert!(!plane.unlit);
        assert!(plane.double_sided);
        assert!(plane.cull_mode.is_none());
    }

    #[test]
    fn test_release_purges_deferred_ops() {
        let mut world = World::new();
        world.init_resource::<SceneSlots>();
        let id = ObjectId(7);
        world.resource_mut::<SceneSlots>().deferred.push((
            SceneOp::SetBoneRotation {
                id,
                bone: "head".to_string(),
                rotation: Vec3::ZERO,
            },
            3,
        ));

        release(&mut world, id);
        assert_eq!(world.resource::<SceneSlots>().deferred_len(), 0);
    }

    #[test]
    fn test_expressions_drive_bound_morph_targets() {
        use crate::vrm::{read_vrm, NodeRef};

        let extensions = serde_json::json!({
            "VRMC_vrm": {"expressions": {"preset": {
                "aa": {"morphTargetBinds": [{"node": 0, "index": 0, "weight": 1.0}]},
                "blink": {"morphTargetBinds": [{"node": 0, "index": 2, "weight": 0.5}]}
            }}}
        });
        let nodes = [NodeRef {
            name: "Face".to_string(),
            mesh: Some(0),
        }];
        let table = read_vrm(extensions.as_object(), &nodes)
            .unwrap()
            .unwrap()
            .expressions;

        let mut world = World::new();
        world.init_resource::<SceneSlots>();
        let root = world.spawn(Transform::default()).id();
        let face = world
            .spawn((
                Name::new("Face"),
                MorphWeights::new(vec![0.0; 3], None).unwrap(),
                ChildOf(root),
            ))
            .id();
        let id = ObjectId(3);
        let mut slots = world.resource_mut::<SceneSlots>();
        slots.insert(
            id,
            Slot::Entity {
                entity: root,
                material: None,
            },
        );
        slots.set_expression_table(id, table);

        let op = |values: &[(&str, f32)]| SceneOp::SetExpressions {
            id,
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        apply_ops(&mut world, vec![op(&[("aa", 1.0), ("blink", 1.0), ("angry", 1.0)])]);
        assert_eq!(world.get::<MorphWeights>(face).unwrap().weights(), &[1.0, 0.0, 0.5]);

        // Later updates keep the values they do not mention
        apply_ops(&mut world, vec![op(&[("aa", 0.0)])]);
        assert_eq!(world.get::<MorphWeights>(face).unwrap().weights(), &[0.0, 0.0, 0.5]);
    }
}
