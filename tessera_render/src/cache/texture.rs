use crate::assets::texture::{TextureBinding, TextureDescription};
use crate::driver::{
    GpuDriver, SamplerState, TextureId, TextureKind, TextureStorage, UniformType,
};
use crate::release::{ReleaseSender, ResourceId};
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use tracing::{trace, warn};
use wgpu::TextureFormat;

new_key_type! { pub struct TextureHandle; }

const WHITE: [u8; 4] = [255, 255, 255, 255];
const MAGENTA: [u8; 4] = [255, 0, 255, 255];

#[derive(Debug)]
pub struct GpuTexture {
    pub id: TextureId,
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// Update counter of the pixels on the GPU. Render targets stay at 0.
    pub updates: u64,
}

/// Uploaded textures, render targets and the per-context fallback textures.
#[derive(Debug)]
pub struct TextureManager {
    textures: SlotMap<TextureHandle, GpuTexture>,
    by_desc: HashMap<ResourceId, TextureHandle>,
    /// Update counter a warning was last logged for, per description.
    warned: HashMap<ResourceId, u64>,
    white: TextureHandle,
    magenta: TextureHandle,
    /// Blank textures for sampler types a plain 2D texture cannot serve, made on first use.
    blanks: HashMap<UniformType, TextureHandle>,
    release: ReleaseSender,
    uploads: u64,
}

impl TextureManager {
    pub fn new(driver: &mut dyn GpuDriver, release: ReleaseSender) -> Self {
        let mut textures = SlotMap::with_key();
        let white = textures.insert(solid(driver, WHITE));
        let magenta = textures.insert(solid(driver, MAGENTA));

        Self {
            textures,
            by_desc: HashMap::new(),
            warned: HashMap::new(),
            white,
            magenta,
            blanks: HashMap::new(),
            release,
            uploads: 0,
        }
    }

    /// Sampled when a material slot holds no texture.
    pub fn white(&self) -> TextureHandle {
        self.white
    }

    /// Sampled in place of textures whose data cannot be uploaded.
    pub fn magenta(&self) -> TextureHandle {
        self.magenta
    }

    /// A texture any sampler of type `ty` can read from when nothing else is bound to it.
    pub fn fallback(&mut self, driver: &mut dyn GpuDriver, ty: UniformType) -> TextureHandle {
        let (kind, format) = match ty {
            UniformType::SamplerCube => (TextureKind::Cube, TextureFormat::Rgba8Unorm),
            UniformType::Sampler2DShadow => (TextureKind::D2, TextureFormat::Depth32Float),
            UniformType::SamplerCubeShadow => (TextureKind::Cube, TextureFormat::Depth32Float),
            _ => return self.white,
        };
        if let Some(&handle) = self.blanks.get(&ty) {
            return handle;
        }

        let handle = self.create_target(driver, kind, format, 1);
        self.blanks.insert(ty, handle);
        handle
    }

    /// Resolves the GPU copy of `desc`, uploading it when it is new or stale.
    #[profiling::function]
    pub fn get_or_create(
        &mut self,
        driver: &mut dyn GpuDriver,
        desc: &TextureDescription,
    ) -> TextureHandle {
        let updates = desc.updates();
        if let Some(&handle) = self.by_desc.get(&desc.id())
            && self.textures.get(handle).is_some_and(|t| t.updates == updates)
        {
            return handle;
        }

        if let Err(e) = desc.validate() {
            if self.warned.insert(desc.id(), updates) != Some(updates) {
                warn!("Texture {} falls back to magenta: {e}", desc.id());
            }
            desc.release_hook().attach(&self.release);
            return self.magenta;
        }

        let handle = match self.by_desc.get(&desc.id()) {
            Some(&handle) => handle,
            None => {
                let id = driver.create_texture(TextureKind::D2);
                let handle = self.textures.insert(GpuTexture {
                    id,
                    kind: TextureKind::D2,
                    format: desc.format(),
                    width: 0,
                    height: 0,
                    updates: 0,
                });
                desc.release_hook().attach(&self.release);
                self.by_desc.insert(desc.id(), handle);
                trace!("Created texture for {}", desc.id());
                handle
            }
        };

        let Some(texture) = self.textures.get_mut(handle) else {
            return self.magenta;
        };
        let data = desc.read();
        driver.texture_data(texture.id, texture.format, data.width, data.height, &data.pixels);
        texture.width = data.width;
        texture.height = data.height;
        texture.updates = updates;
        self.warned.remove(&desc.id());
        self.uploads += 1;

        handle
    }

    /// The texture and sampler state a material slot samples from.
    pub fn resolve(
        &mut self,
        driver: &mut dyn GpuDriver,
        binding: Option<&TextureBinding>,
    ) -> (TextureHandle, SamplerState) {
        match binding {
            Some(binding) => (
                self.get_or_create(driver, &binding.texture),
                binding.sampler,
            ),
            None => (self.white, SamplerState::default()),
        }
    }

    /// Binds a texture to `unit`, applying `sampler` every time since other slots may share
    /// the same texture with different wrap and filter modes.
    pub fn bind(
        &self,
        driver: &mut dyn GpuDriver,
        unit: u32,
        handle: TextureHandle,
        sampler: &SamplerState,
    ) -> bool {
        let Some(texture) = self.textures.get(handle) else {
            return false;
        };
        driver.bind_texture(unit, texture.id, texture.kind);
        driver.sampler_state(texture.id, texture.kind, sampler);
        true
    }

    /// Allocates an empty square texture to render into.
    pub fn create_target(
        &mut self,
        driver: &mut dyn GpuDriver,
        kind: TextureKind,
        format: TextureFormat,
        size: u32,
    ) -> TextureHandle {
        let id = driver.create_texture(kind);
        driver.texture_storage(
            id,
            &TextureStorage {
                kind,
                format,
                width: size,
                height: size,
            },
        );
        trace!("Created {kind:?} render target {} ({size}px, {format:?})", id.0);
        self.textures.insert(GpuTexture {
            id,
            kind,
            format,
            width: size,
            height: size,
            updates: 0,
        })
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&GpuTexture> {
        self.textures.get(handle)
    }

    pub fn handle_of(&self, desc: ResourceId) -> Option<TextureHandle> {
        self.by_desc.get(&desc).copied()
    }

    /// Frees the GPU copy of a description. Unknown ids are ignored.
    pub fn release(&mut self, driver: &mut dyn GpuDriver, desc: ResourceId) {
        self.warned.remove(&desc);
        if let Some(handle) = self.by_desc.remove(&desc) {
            self.destroy(driver, handle);
            trace!("Released texture {desc}");
        }
    }

    /// Deletes a texture. The fallback textures live as long as the manager.
    pub fn destroy(&mut self, driver: &mut dyn GpuDriver, handle: TextureHandle) {
        if handle == self.white
            || handle == self.magenta
            || self.blanks.values().any(|&blank| blank == handle)
        {
            return;
        }
        if let Some(texture) = self.textures.remove(handle) {
            driver.delete_texture(texture.id);
        }
    }

    /// Live textures, fallbacks and render targets included.
    pub fn live(&self) -> usize {
        self.textures.len()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Deletes every texture, the fallbacks included. The manager is unusable afterwards.
    pub fn clear(&mut self, driver: &mut dyn GpuDriver) {
        for (_, texture) in self.textures.drain() {
            driver.delete_texture(texture.id);
        }
        self.by_desc.clear();
        self.blanks.clear();
        self.warned.clear();
    }
}

fn solid(driver: &mut dyn GpuDriver, color: [u8; 4]) -> GpuTexture {
    let id = driver.create_texture(TextureKind::D2);
    let format = TextureFormat::Rgba8Unorm;
    driver.texture_data(id, format, 1, 1, &color);
    GpuTexture {
        id,
        kind: TextureKind::D2,
        format,
        width: 1,
        height: 1,
        updates: 0,
    }
}
