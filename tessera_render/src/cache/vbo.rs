use crate::assets::mesh::{MeshDescription, VertexLayout};
use crate::cache::buffer::{BufferHandle, BufferKind, BufferManager};
use crate::driver::{BufferUsage, DrawCall, ElementType, GpuDriver};
use crate::error::{ResourceError, VertexDataLengthErr};
use crate::release::{ReleaseSender, ResourceId};
use slotmap::{SlotMap, new_key_type};
use snafu::ensure;
use std::collections::HashMap;
use tracing::{trace, warn};
use wgpu::{FrontFace, PrimitiveTopology};

new_key_type! { pub struct VboHandle; }

/// GPU copy of one mesh: a vertex buffer and an optional element buffer.
#[derive(Debug)]
pub struct Vbo {
    pub vertices: BufferHandle,
    pub elements: Option<BufferHandle>,
    pub layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub vertex_count: u32,
    pub element_count: u32,
    pub element_type: Option<ElementType>,
    /// Update counter of the mesh data currently on the GPU.
    pub updates: u64,
}

impl Vbo {
    pub fn is_ready(&self) -> bool {
        self.vertex_count > 0
    }

    pub fn draw_call(&self, instances: u32) -> DrawCall {
        match self.element_type {
            Some(elements) => DrawCall {
                topology: self.topology,
                count: self.element_count,
                elements: Some(elements),
                instances,
            },
            None => DrawCall {
                topology: self.topology,
                count: self.vertex_count,
                elements: None,
                instances,
            },
        }
    }
}

#[derive(Debug)]
pub struct VboManager {
    vbos: SlotMap<VboHandle, Vbo>,
    by_mesh: HashMap<ResourceId, VboHandle>,
    release: ReleaseSender,
    uploads: u64,
}

impl VboManager {
    pub fn new(release: ReleaseSender) -> Self {
        Self {
            vbos: SlotMap::with_key(),
            by_mesh: HashMap::new(),
            release,
            uploads: 0,
        }
    }

    /// Resolves the GPU copy of `mesh`, creating or re-uploading it when needed.
    ///
    /// The flag is `true` when this call uploaded data. The first upload uses static usage,
    /// every later one dynamic usage since the mesh has proven to change.
    #[profiling::function]
    pub fn get_or_create(
        &mut self,
        driver: &mut dyn GpuDriver,
        buffers: &mut BufferManager,
        mesh: &MeshDescription,
    ) -> (VboHandle, bool) {
        if let Some(&handle) = self.by_mesh.get(&mesh.id())
            && let Some(vbo) = self.vbos.get_mut(handle)
        {
            if vbo.updates == mesh.updates() {
                return (handle, false);
            }

            trace!("Re-uploading mesh {} (update {})", mesh.id(), mesh.updates());
            if let Err(e) = upload(driver, buffers, vbo, mesh, BufferUsage::Dynamic) {
                warn!("Mesh {} cannot be drawn: {e}", mesh.id());
            }
            self.uploads += 1;
            return (handle, true);
        }

        let mut vbo = Vbo {
            vertices: buffers.create(driver, BufferKind::Vertex),
            elements: None,
            layout: mesh.layout().clone(),
            topology: mesh.topology(),
            front_face: mesh.front_face(),
            vertex_count: 0,
            element_count: 0,
            element_type: None,
            updates: 0,
        };
        if let Err(e) = upload(driver, buffers, &mut vbo, mesh, BufferUsage::Static) {
            warn!("Mesh {} cannot be drawn: {e}", mesh.id());
        }
        self.uploads += 1;

        mesh.release_hook().attach(&self.release);
        let handle = self.vbos.insert(vbo);
        self.by_mesh.insert(mesh.id(), handle);
        trace!("Created VBO for mesh {}", mesh.id());

        (handle, true)
    }

    pub fn get(&self, handle: VboHandle) -> Option<&Vbo> {
        self.vbos.get(handle)
    }

    pub fn handle_of(&self, mesh: ResourceId) -> Option<VboHandle> {
        self.by_mesh.get(&mesh).copied()
    }

    /// Frees the GPU copy of a mesh. Unknown ids are ignored.
    pub fn release(
        &mut self,
        driver: &mut dyn GpuDriver,
        buffers: &mut BufferManager,
        mesh: ResourceId,
    ) {
        let Some(handle) = self.by_mesh.remove(&mesh) else {
            return;
        };
        self.destroy(driver, buffers, handle);
        trace!("Released VBO of mesh {mesh}");
    }

    fn destroy(&mut self, driver: &mut dyn GpuDriver, buffers: &mut BufferManager, handle: VboHandle) {
        let Some(vbo) = self.vbos.remove(handle) else {
            return;
        };
        buffers.destroy(driver, vbo.vertices);
        if let Some(elements) = vbo.elements {
            buffers.destroy(driver, elements);
        }
    }

    pub fn live(&self) -> usize {
        self.vbos.len()
    }

    /// Number of full mesh uploads since creation.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn clear(&mut self, driver: &mut dyn GpuDriver, buffers: &mut BufferManager) {
        let handles: Vec<VboHandle> = self.vbos.keys().collect();
        for handle in handles {
            self.destroy(driver, buffers, handle);
        }
        self.by_mesh.clear();
    }
}

fn upload(
    driver: &mut dyn GpuDriver,
    buffers: &mut BufferManager,
    vbo: &mut Vbo,
    mesh: &MeshDescription,
    usage: BufferUsage,
) -> Result<(), ResourceError> {
    let data = mesh.read();
    vbo.updates = mesh.updates();
    vbo.vertex_count = 0;
    vbo.element_count = 0;
    vbo.element_type = None;

    let stride = vbo.layout.stride();
    ensure!(
        stride > 0 && data.vertices.len().is_multiple_of(stride),
        VertexDataLengthErr {
            len: data.vertices.len(),
            stride,
        }
    );

    buffers.upload(driver, vbo.vertices, bytemuck::cast_slice(&data.vertices), usage);
    vbo.vertex_count = (data.vertices.len() / stride) as u32;

    match &data.indices {
        Some(indices) => {
            let elements = *vbo
                .elements
                .get_or_insert_with(|| buffers.create(driver, BufferKind::Element));
            buffers.upload(driver, elements, indices.as_bytes(), usage);
            vbo.element_count = indices.len() as u32;
            vbo.element_type = Some(indices.element_type());
        }
        None => {
            if let Some(elements) = vbo.elements.take() {
                buffers.destroy(driver, elements);
            }
        }
    }

    Ok(())
}
