//! GPU-side copies of CPU descriptions.
//!
//! Each manager keys its objects by the resource id of the description they were built
//! from and compares update counters to decide when to upload again. Contents are never
//! diffed.

pub mod buffer;
pub mod shader;
pub mod texture;
pub mod vbo;

pub use buffer::{BufferHandle, BufferKind, BufferManager};
pub use shader::{Shader, ShaderHandle, ShaderManager};
pub use texture::{TextureHandle, TextureManager};
pub use vbo::{Vbo, VboHandle, VboManager};

use crate::driver::GpuDriver;
use crate::release::{Release, ReleaseSender};
use tracing::trace;

/// All resource managers of one render context.
#[derive(Debug)]
pub struct Caches {
    pub buffers: BufferManager,
    pub vbos: VboManager,
    pub shaders: ShaderManager,
    pub textures: TextureManager,
}

impl Caches {
    pub fn new(driver: &mut dyn GpuDriver, release: ReleaseSender) -> Self {
        Self {
            buffers: BufferManager::default(),
            vbos: VboManager::new(release.clone()),
            shaders: ShaderManager::new(release.clone()),
            textures: TextureManager::new(driver, release),
        }
    }

    /// Deletes the GPU objects built from a dropped description.
    pub fn release(&mut self, driver: &mut dyn GpuDriver, release: Release) {
        trace!("Processing {release:?}");
        match release {
            Release::Mesh(id) => self.vbos.release(driver, &mut self.buffers, id),
            Release::Texture(id) => self.textures.release(driver, id),
            Release::Shader(id) => self.shaders.release(driver, id),
        }
    }

    /// Deletes everything the managers still hold.
    pub fn clear(&mut self, driver: &mut dyn GpuDriver) {
        self.shaders.clear(driver);
        self.vbos.clear(driver, &mut self.buffers);
        self.textures.clear(driver);
        self.buffers.clear(driver);
    }
}
