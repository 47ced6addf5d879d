use crate::driver::ElementType;
use crate::release::{Release, ReleaseHook, ResourceId};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use wgpu::{FrontFace, PrimitiveTopology};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub name: String,
    pub components: u8,
}

/// The vertex format of a mesh: named float attributes, interleaved in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new<'a>(attributes: impl IntoIterator<Item = (&'a str, u8)>) -> Self {
        let attributes = attributes
            .into_iter()
            .map(|(name, components)| VertexAttribute {
                name: name.to_string(),
                components,
            })
            .collect();
        Self { attributes }
    }

    pub fn position() -> Self {
        Self::new([("position", 3)])
    }

    pub fn position_normal() -> Self {
        Self::new([("position", 3), ("normal", 3)])
    }

    pub fn position_normal_uv() -> Self {
        Self::new([("position", 3), ("normal", 3), ("uv", 2)])
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Floats per vertex.
    pub fn stride(&self) -> usize {
        self.attributes.iter().map(|a| a.components as usize).sum()
    }

    /// Offset in floats and component count of the attribute called `name`.
    pub fn find(&self, name: &str) -> Option<(usize, u8)> {
        let mut offset = 0;
        for attribute in &self.attributes {
            if attribute.name == name {
                return Some((offset, attribute.components));
            }
            offset += attribute.components as usize;
        }
        None
    }

    /// One `HAS_<NAME>` define per attribute, so shaders can adapt to the inputs present.
    pub fn defines(&self) -> impl Iterator<Item = String> + '_ {
        self.attributes
            .iter()
            .map(|a| format!("HAS_{}", a.name.to_ascii_uppercase()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Indices {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    pub fn element_type(&self) -> ElementType {
        match self {
            Indices::U8(_) => ElementType::U8,
            Indices::U16(_) => ElementType::U16,
            Indices::U32(_) => ElementType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Indices::U8(i) => i.len(),
            Indices::U16(i) => i.len(),
            Indices::U32(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Indices::U8(i) => i,
            Indices::U16(i) => bytemuck::cast_slice(i),
            Indices::U32(i) => bytemuck::cast_slice(i),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<f32>,
    pub indices: Option<Indices>,
}

/// CPU-side geometry. Shared between the scene and the renderer through an `Arc`.
///
/// Every edit bumps the update counter, which is the only thing the renderer compares to
/// decide whether the GPU copy is stale.
#[derive(Debug)]
pub struct MeshDescription {
    id: ResourceId,
    layout: VertexLayout,
    topology: PrimitiveTopology,
    front_face: FrontFace,
    data: RwLock<MeshData>,
    updates: AtomicU64,
    hook: ReleaseHook,
}

impl MeshDescription {
    pub fn new(layout: VertexLayout, vertices: Vec<f32>, indices: Option<Indices>) -> Self {
        let id = ResourceId::new();
        Self {
            id,
            layout,
            topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            data: RwLock::new(MeshData { vertices, indices }),
            updates: AtomicU64::new(0),
            hook: ReleaseHook::new(Release::Mesh(id)),
        }
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn front_face(&self) -> FrontFace {
        self.front_face
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }

    /// Read access to the vertex and index data. The update counter read while holding the
    /// guard matches the data.
    pub fn read(&self) -> RwLockReadGuard<'_, MeshData> {
        self.data.read()
    }

    /// Edits the data and marks the mesh as changed.
    pub fn edit<R>(&self, f: impl FnOnce(&mut MeshData) -> R) -> R {
        let mut data = self.data.write();
        let result = f(&mut data);
        self.updates.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Marks the mesh as changed without touching the data.
    pub fn mark_updated(&self) {
        let _data = self.data.write();
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    pub fn defines(&self) -> impl Iterator<Item = String> + '_ {
        self.layout.defines()
    }

    pub(crate) fn release_hook(&self) -> &ReleaseHook {
        &self.hook
    }
}
