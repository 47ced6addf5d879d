//! Instanced drawing of renderables that share a mesh and material.

use crate::assets::material::Material;
use crate::assets::mesh::MeshDescription;
use crate::assets::shader::ShaderDescription;
use crate::cache::shader::variant_hash;
use crate::cache::{BufferHandle, BufferKind, Caches, ShaderHandle, VboHandle};
use crate::driver::{BufferUsage, GpuDriver, VertexArrayId, VertexAttributeBinding, float_format};
use crate::release::ResourceId;
use crate::scene::{EntityId, Renderable, RenderableDescription};
use glamx::Mat4;
use itertools::Itertools;
use more_asserts::debug_assert_le;
use slotmap::{SlotMap, new_key_type};
use static_assertions::const_assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_utils::debug_panic;
use tracing::{trace, warn};
use wgpu::VertexFormat;

new_key_type! { pub struct GroupKey; }

/// Floats packed per instance: color, world matrix and normal matrix.
pub const UNIT_FLOATS: usize = 4 + 16 + 16;
const UNIT_BYTES: u32 = (UNIT_FLOATS * size_of::<f32>()) as u32;
const COLOR_OFFSET: usize = 0;
const MODEL_OFFSET: usize = 4;
const NORMAL_OFFSET: usize = 20;

const_assert_eq!(UNIT_FLOATS, 36);
const_assert_eq!(NORMAL_OFFSET + 16, UNIT_FLOATS);

pub const INSTANCE_COLOR: &str = "i_color";
pub const INSTANCE_MODEL: &str = "i_model";
pub const INSTANCE_NORMAL: &str = "i_normal";

fn normal_matrix(world: &Mat4) -> Mat4 {
    if world.determinant().abs() <= f32::EPSILON {
        return Mat4::IDENTITY;
    }
    world.inverse().transpose()
}

/// All instances of one [`RenderableDescription`], drawn with a single call.
pub struct RenderableGroup {
    description: Arc<RenderableDescription>,
    instances: Vec<(EntityId, Arc<dyn Renderable>)>,
    material: Option<Arc<Material>>,
    vbo: Option<VboHandle>,
    elements: Option<BufferHandle>,
    shader: Option<ShaderHandle>,
    depth_shader: Option<ShaderHandle>,
    defines: Vec<String>,
    defines_hash: u64,
    /// Mesh and material the defines were collected from. Both keep their defines for life.
    defines_source: Option<(ResourceId, ResourceId)>,
    vaos: HashMap<u64, VertexArrayId>,
    instance_buffer: Option<BufferHandle>,
    transfer: Vec<f32>,
    needs_resize: bool,
    count: usize,
    drawable: bool,
    last_render_number: Option<u64>,
}

impl std::fmt::Debug for RenderableGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderableGroup")
            .field("description", &self.description.id())
            .field("instances", &self.instances.len())
            .field("count", &self.count)
            .field("shader", &self.shader)
            .finish_non_exhaustive()
    }
}

impl RenderableGroup {
    pub fn new(description: Arc<RenderableDescription>) -> Self {
        Self {
            description,
            instances: Vec::new(),
            material: None,
            vbo: None,
            elements: None,
            shader: None,
            depth_shader: None,
            defines: Vec::new(),
            defines_hash: 0,
            defines_source: None,
            vaos: HashMap::new(),
            instance_buffer: None,
            transfer: Vec::new(),
            needs_resize: true,
            count: 0,
            drawable: false,
            last_render_number: None,
        }
    }

    pub fn description(&self) -> &Arc<RenderableDescription> {
        &self.description
    }

    /// Adds an instance. Returns `false` if it is already part of the group.
    pub fn add(&mut self, id: EntityId, renderable: Arc<dyn Renderable>) -> bool {
        if self.instances.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        self.instances.push((id, renderable));
        self.needs_resize = true;
        true
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some((index, _)) = self.instances.iter().find_position(|(e, _)| *e == id) else {
            return false;
        };
        self.instances.remove(index);
        self.needs_resize = true;
        true
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances packed by the last update.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn instance_data(&self) -> &[f32] {
        &self.transfer[..self.count * UNIT_FLOATS]
    }

    pub fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    pub fn shader(&self) -> Option<ShaderHandle> {
        self.shader
    }

    pub fn vbo(&self) -> Option<VboHandle> {
        self.vbo
    }

    pub fn is_drawable(&self) -> bool {
        self.drawable
    }

    pub fn last_render_number(&self) -> Option<u64> {
        self.last_render_number
    }

    /// Mesh and material defines the current shader variant was built with.
    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    /// Brings GPU state and instance data up to date for `render_number`.
    ///
    /// Runs at most once per render number. Returns whether the group has anything to draw.
    #[profiling::function]
    pub fn update(
        &mut self,
        driver: &mut dyn GpuDriver,
        caches: &mut Caches,
        render_number: u64,
    ) -> bool {
        if self.last_render_number == Some(render_number) {
            return self.drawable;
        }
        self.last_render_number = Some(render_number);
        self.drawable = false;

        let mesh = self.description.mesh();
        let material = self.description.material();

        let (vbo, _) = caches.vbos.get_or_create(driver, &mut caches.buffers, &mesh);
        let Some(elements) = caches.vbos.get(vbo).map(|v| v.elements) else {
            return false;
        };
        if self.vbo != Some(vbo) || self.elements != elements {
            self.clear_vaos(driver);
            self.vbo = Some(vbo);
            self.elements = elements;
        }
        if !caches.vbos.get(vbo).is_some_and(|v| v.is_ready()) {
            return false;
        }

        let source = (mesh.id(), material.id());
        if self.defines_source != Some(source) || self.shader.is_none() {
            self.resolve_shader(driver, caches, &mesh, material);
            self.defines_source = Some(source);
        }
        if self.shader.is_none() {
            return false;
        }

        if self.needs_resize {
            self.transfer.resize(self.instances.len() * UNIT_FLOATS, 0.0);
            self.needs_resize = false;
        }

        self.count = 0;
        for (_, instance) in &self.instances {
            if !instance.render_enabled() {
                continue;
            }
            let base = self.count * UNIT_FLOATS;
            let unit = &mut self.transfer[base..base + UNIT_FLOATS];
            let world = instance.world_matrix();
            unit[COLOR_OFFSET..MODEL_OFFSET].copy_from_slice(&instance.color().to_array());
            unit[MODEL_OFFSET..NORMAL_OFFSET].copy_from_slice(&world.to_cols_array());
            unit[NORMAL_OFFSET..].copy_from_slice(&normal_matrix(&world).to_cols_array());
            self.count += 1;
        }

        debug_assert_le!(self.count * UNIT_FLOATS, self.transfer.len());
        if self.count > 0 {
            let buffer = *self
                .instance_buffer
                .get_or_insert_with(|| caches.buffers.create(driver, BufferKind::Instance));
            let packed = &self.transfer[..self.count * UNIT_FLOATS];
            caches
                .buffers
                .upload(driver, buffer, bytemuck::cast_slice(packed), BufferUsage::Stream);
        }

        self.drawable = self.count > 0;
        self.drawable
    }

    /// Picks the shader variant for the mesh and material defines, recompiling only when the
    /// variant changed. A failed recompile keeps the previous program.
    fn resolve_shader(
        &mut self,
        driver: &mut dyn GpuDriver,
        caches: &mut Caches,
        mesh: &MeshDescription,
        material: Arc<Material>,
    ) {
        let defines: Vec<String> = mesh
            .defines()
            .chain(material.defines().iter().cloned())
            .collect();
        let defines_hash = variant_hash(material.shader().name(), &defines);
        let material_changed = self.material.as_ref().map(|m| m.id()) != Some(material.id());
        if !material_changed && defines_hash == self.defines_hash && self.shader.is_some() {
            return;
        }

        let previous = self.shader;
        let shader = match previous {
            None => Some(caches.shaders.setup(driver, material.shader(), &defines)),
            Some(_) => caches.shaders.recompile(driver, material.shader(), &defines, previous),
        };

        if shader != previous
            && let Some(old) = previous.and_then(|h| caches.shaders.get(h))
            && let Some(vao) = self.vaos.remove(&old.attribute_hash())
        {
            driver.delete_vertex_array(vao);
        }

        self.shader = shader;
        self.depth_shader = None;
        self.defines = defines;
        self.defines_hash = defines_hash;
        self.material = Some(material);
    }

    /// The depth-only variant used by shadow passes, resolved once per define set.
    pub fn depth_shader(
        &mut self,
        driver: &mut dyn GpuDriver,
        caches: &mut Caches,
        depth: &ShaderDescription,
    ) -> Option<ShaderHandle> {
        if self.depth_shader.is_none() {
            self.depth_shader = caches
                .shaders
                .recompile(driver, depth, &self.defines, None);
        }
        self.depth_shader
    }

    /// The vertex array binding this group's buffers to the inputs of `shader`.
    ///
    /// Created on first use and cached per attribute hash, so programs with identical inputs
    /// share one.
    pub fn vao(
        &mut self,
        driver: &mut dyn GpuDriver,
        caches: &Caches,
        shader: ShaderHandle,
    ) -> Option<VertexArrayId> {
        let shader = caches.shaders.get(shader)?;
        if let Some(&vao) = self.vaos.get(&shader.attribute_hash()) {
            return Some(vao);
        }

        let vbo = caches.vbos.get(self.vbo?)?;
        let vertices = caches.buffers.get(vbo.vertices)?.id;
        let instances = caches.buffers.get(self.instance_buffer?)?.id;
        let vertex_stride = (vbo.layout.stride() * size_of::<f32>()) as u32;

        let vao = driver.create_vertex_array();
        for attribute in shader.attributes() {
            let columns = |offset: usize| {
                (0..4).map(move |column| VertexAttributeBinding {
                    location: attribute.location + column,
                    format: VertexFormat::Float32x4,
                    stride: UNIT_BYTES,
                    offset: ((offset + column as usize * 4) * size_of::<f32>()) as u32,
                    divisor: 1,
                })
            };

            match attribute.name.as_str() {
                INSTANCE_COLOR => driver.vertex_attribute(
                    vao,
                    instances,
                    &VertexAttributeBinding {
                        location: attribute.location,
                        format: VertexFormat::Float32x4,
                        stride: UNIT_BYTES,
                        offset: (COLOR_OFFSET * size_of::<f32>()) as u32,
                        divisor: 1,
                    },
                ),
                INSTANCE_MODEL => {
                    for binding in columns(MODEL_OFFSET) {
                        driver.vertex_attribute(vao, instances, &binding);
                    }
                }
                INSTANCE_NORMAL => {
                    for binding in columns(NORMAL_OFFSET) {
                        driver.vertex_attribute(vao, instances, &binding);
                    }
                }
                name => {
                    let Some((offset, components)) = vbo.layout.find(name) else {
                        trace!("Mesh provides no {name:?} for shader {:?}", shader.name());
                        continue;
                    };
                    let Some(format) = float_format(components) else {
                        warn!("Vertex attribute {name:?} has {components} components");
                        continue;
                    };
                    let binding = VertexAttributeBinding {
                        location: attribute.location,
                        format,
                        stride: vertex_stride,
                        offset: (offset * size_of::<f32>()) as u32,
                        divisor: 0,
                    };
                    driver.vertex_attribute(vao, vertices, &binding);
                }
            }
        }

        if let Some(elements) = vbo.elements.and_then(|e| caches.buffers.get(e)) {
            driver.element_buffer(vao, elements.id);
        }

        self.vaos.insert(shader.attribute_hash(), vao);
        Some(vao)
    }

    fn clear_vaos(&mut self, driver: &mut dyn GpuDriver) {
        for (_, vao) in self.vaos.drain() {
            driver.delete_vertex_array(vao);
        }
    }

    /// Frees the GPU objects owned by this group. The VBO and shaders are shared and stay.
    pub fn destroy(mut self, driver: &mut dyn GpuDriver, caches: &mut Caches) {
        self.clear_vaos(driver);
        if let Some(buffer) = self.instance_buffer.take() {
            caches.buffers.destroy(driver, buffer);
        }
    }
}

/// Groups by description, plus which group each entity belongs to.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: SlotMap<GroupKey, RenderableGroup>,
    by_description: HashMap<ResourceId, GroupKey>,
    by_entity: HashMap<EntityId, GroupKey>,
}

impl GroupRegistry {
    /// Adds a renderable to the group of its description, creating the group if needed.
    pub fn add(&mut self, id: EntityId, renderable: Arc<dyn Renderable>) -> GroupKey {
        if let Some(&key) = self.by_entity.get(&id) {
            return key;
        }

        let description = renderable.description();
        let key = match self.by_description.get(&description.id()) {
            Some(&key) => key,
            None => {
                trace!("Creating group for {}", description.id());
                let key = self.groups.insert(RenderableGroup::new(description.clone()));
                self.by_description.insert(description.id(), key);
                key
            }
        };

        match self.groups.get_mut(key) {
            Some(group) => {
                group.add(id, renderable);
            }
            None => debug_panic!("Group registry points at a removed group"),
        }
        self.by_entity.insert(id, key);
        key
    }

    /// Removes an entity from its group. An emptied group is unregistered and returned so the
    /// caller can free its GPU objects.
    pub fn remove(&mut self, id: EntityId) -> Option<RenderableGroup> {
        let key = self.by_entity.remove(&id)?;
        let Some(group) = self.groups.get_mut(key) else {
            debug_panic!("Group registry points at a removed group");
            return None;
        };
        group.remove(id);
        if !group.is_empty() {
            return None;
        }

        let group = self.groups.remove(key)?;
        self.by_description.remove(&group.description.id());
        Some(group)
    }

    pub fn get(&self, key: GroupKey) -> Option<&RenderableGroup> {
        self.groups.get(key)
    }

    pub fn get_mut(&mut self, key: GroupKey) -> Option<&mut RenderableGroup> {
        self.groups.get_mut(key)
    }

    pub fn group_of(&self, id: EntityId) -> Option<GroupKey> {
        self.by_entity.get(&id).copied()
    }

    pub fn key_of(&self, description: ResourceId) -> Option<GroupKey> {
        self.by_description.get(&description).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GroupKey, &RenderableGroup)> {
        self.groups.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (GroupKey, &mut RenderableGroup)> {
        self.groups.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = GroupKey> + '_ {
        self.groups.keys()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = RenderableGroup> + '_ {
        self.by_description.clear();
        self.by_entity.clear();
        self.groups.drain().map(|(_, group)| group)
    }
}
