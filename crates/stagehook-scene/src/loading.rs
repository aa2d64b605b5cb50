//! Asset loads started by the context and polled once per frame

use bevy::asset::{LoadState, RecursiveDependencyLoadState, UntypedAssetId};
use bevy::gltf::{Gltf, GltfLoaderSettings, GltfNode, GltfSkin};
use bevy::prelude::*;
use tracing::{debug, info};

use stagehook_core::{
    AvatarAsset, BoneInfo, LoadError, LoadTicket, SceneContext, TextureAsset,
};

use crate::apply::{SceneSlots, Slot, StageObject};
use crate::backend::BevyBackend;
use crate::vrm::{self, ExpressionTable, NodeRef};

struct PendingLoad<A: Asset> {
    ticket: LoadTicket,
    path: String,
    handle: Handle<A>,
}

/// Loads handed to the asset server and not finished yet
#[derive(Resource, Default)]
pub struct PendingLoads {
    avatars: Vec<PendingLoad<Gltf>>,
    textures: Vec<PendingLoad<Image>>,
}

impl PendingLoads {
    pub fn len(&self) -> usize {
        self.avatars.len() + self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Poll {
    Pending,
    Ready,
    Failed(LoadError),
}

fn poll(server: &AssetServer, id: UntypedAssetId, path: &str) -> Poll {
    if let Some(LoadState::Failed(err)) = server.get_load_state(id) {
        return Poll::Failed(LoadError::Fetch {
            path: path.to_string(),
            reason: err.to_string(),
        });
    }
    if server.is_loaded_with_dependencies(id) {
        return Poll::Ready;
    }
    if let Some(RecursiveDependencyLoadState::Failed(err)) =
        server.get_recursive_dependency_load_state(id)
    {
        return Poll::Failed(LoadError::Decode {
            path: path.to_string(),
            reason: err.to_string(),
        });
    }
    Poll::Pending
}

pub fn start_avatar(world: &mut World, ticket: LoadTicket, path: &str) {
    // The source document carries the VRM extension
    let handle = world.resource::<AssetServer>().load_with_settings::<Gltf, GltfLoaderSettings>(
        path.to_string(),
        |settings: &mut GltfLoaderSettings| settings.include_source = true,
    );
    info!(path, ticket = ticket.0, "Loading avatar");
    world.resource_mut::<PendingLoads>().avatars.push(PendingLoad {
        ticket,
        path: path.to_string(),
        handle,
    });
}

pub fn start_texture(world: &mut World, ticket: LoadTicket, path: &str) {
    let handle = world.resource::<AssetServer>().load::<Image>(path.to_string());
    info!(path, ticket = ticket.0, "Loading texture");
    world.resource_mut::<PendingLoads>().textures.push(PendingLoad {
        ticket,
        path: path.to_string(),
        handle,
    });
}

/// Skeleton, expressions and scene of a decoded glTF
struct AvatarParts {
    scene: Handle<Scene>,
    rigged: bool,
    bones: Vec<BoneInfo>,
    expressions: ExpressionTable,
}

fn describe_avatar(world: &World, handle: &Handle<Gltf>, path: &str) -> Result<AvatarParts, LoadError> {
    let decode_error = |reason: &str| LoadError::Decode {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let gltf = world
        .resource::<Assets<Gltf>>()
        .get(handle)
        .ok_or_else(|| decode_error("asset missing after load"))?;
    let scene = gltf
        .default_scene
        .clone()
        .or_else(|| gltf.scenes.first().cloned())
        .ok_or_else(|| decode_error("no scenes"))?;

    // Joint order of the skins is the hierarchy order bones are reported in
    let skins = world.resource::<Assets<GltfSkin>>();
    let nodes = world.resource::<Assets<GltfNode>>();
    let mut bones: Vec<BoneInfo> = Vec::new();
    for skin in gltf.skins.iter().filter_map(|skin| skins.get(skin)) {
        for node in skin.joints.iter().filter_map(|joint| nodes.get(joint)) {
            if bones.iter().any(|bone| bone.name == node.name) {
                continue;
            }
            let (x, y, z) = node.transform.rotation.to_euler(EulerRot::XYZ);
            bones.push(BoneInfo {
                name: node.name.clone(),
                rotation: Vec3::new(x, y, z),
            });
        }
    }

    // Node order is the index space VRM binds refer to
    let node_refs: Vec<NodeRef> = gltf
        .nodes
        .iter()
        .map(|handle| {
            let node = nodes.get(handle);
            NodeRef {
                name: node.map(|node| node.name.clone()).unwrap_or_default(),
                mesh: node
                    .and_then(|node| node.mesh.as_ref())
                    .and_then(|mesh| gltf.meshes.iter().position(|candidate| candidate == mesh)),
            }
        })
        .collect();
    let extensions = gltf.source.as_ref().and_then(|source| source.extensions());
    let vrm = vrm::read_vrm(extensions, &node_refs)
        .map_err(|err| decode_error(&format!("invalid VRM extension: {err}")))?;
    if vrm.is_none() {
        debug!(path, "glTF carries no VRM extension");
    }

    Ok(AvatarParts {
        scene,
        rigged: vrm.is_some(),
        bones,
        expressions: vrm.map(|vrm| vrm.expressions).unwrap_or_default(),
    })
}

/// Hand finished loads to the context
pub fn poll_loads(world: &mut World, ctx: &mut SceneContext<BevyBackend>) {
    let mut pending = std::mem::take(&mut *world.resource_mut::<PendingLoads>());

    let mut still_loading = Vec::new();
    for load in pending.avatars.drain(..) {
        let status = poll(
            world.resource::<AssetServer>(),
            load.handle.id().untyped(),
            &load.path,
        );
        match status {
            Poll::Pending => still_loading.push(load),
            Poll::Failed(err) => ctx.on_avatar_loaded(load.ticket, Err(err)),
            Poll::Ready => {
                let result = describe_avatar(world, &load.handle, &load.path)
                    .map(|parts| instantiate_avatar(world, ctx.backend_mut(), load.handle, parts));
                ctx.on_avatar_loaded(load.ticket, result);
            }
        }
    }
    pending.avatars = still_loading;

    let mut still_loading = Vec::new();
    for load in pending.textures.drain(..) {
        let status = poll(
            world.resource::<AssetServer>(),
            load.handle.id().untyped(),
            &load.path,
        );
        match status {
            Poll::Pending => still_loading.push(load),
            Poll::Failed(err) => ctx.on_texture_loaded(load.ticket, Err(err)),
            Poll::Ready => {
                let result = wrap_texture(world, ctx.backend_mut(), load.handle, &load.path);
                ctx.on_texture_loaded(load.ticket, result);
            }
        }
    }
    pending.textures = still_loading;

    if !pending.is_empty() {
        debug!(loads = pending.len(), "Loads still in flight");
    }
    let mut current = world.resource_mut::<PendingLoads>();
    current.avatars.append(&mut pending.avatars);
    current.textures.append(&mut pending.textures);
}

/// Spawn the avatar's scene hidden and register its ids
fn instantiate_avatar(
    world: &mut World,
    backend: &mut BevyBackend,
    handle: Handle<Gltf>,
    parts: AvatarParts,
) -> AvatarAsset<crate::backend::ObjectId> {
    let root = backend.allocate();
    let source = backend.allocate();

    let entity = world
        .spawn((
            SceneRoot(parts.scene),
            Transform::default(),
            Visibility::Hidden,
            StageObject(root),
        ))
        .id();

    let mut slots = world.resource_mut::<SceneSlots>();
    slots.insert(
        root,
        Slot::Entity {
            entity,
            material: None,
        },
    );
    slots.insert(source, Slot::Gltf(handle));
    let expressions = parts.expressions.names();
    slots.set_expression_table(root, parts.expressions);

    AvatarAsset {
        root,
        source,
        rigged: parts.rigged,
        bones: parts.bones,
        expressions,
    }
}

/// Wrap a loaded image in an unlit material
fn wrap_texture(
    world: &mut World,
    backend: &mut BevyBackend,
    handle: Handle<Image>,
    path: &str,
) -> Result<TextureAsset<crate::backend::ObjectId>, LoadError> {
    let (width, height) = world
        .resource::<Assets<Image>>()
        .get(&handle)
        .map(|image| (image.width(), image.height()))
        .ok_or_else(|| LoadError::Decode {
            path: path.to_string(),
            reason: "image missing after load".to_string(),
        })?;

    let material = world
        .resource_mut::<Assets<StandardMaterial>>()
        .add(StandardMaterial {
            base_color_texture: Some(handle),
            unlit: true,
            ..default()
        });
    let id = backend.allocate();
    world
        .resource_mut::<SceneSlots>()
        .insert(id, Slot::Material(material));

    Ok(TextureAsset {
        material: id,
        width,
        height,
    })
}
