use crate::driver::SamplerState;
use crate::error::{ResourceError, TextureDataLengthErr, UnsupportedTextureFormatErr};
use crate::release::{Release, ReleaseHook, ResourceId};
use parking_lot::{RwLock, RwLockReadGuard};
use snafu::{OptionExt, ensure};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use wgpu::TextureFormat;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Bytes per pixel for formats that can be uploaded from tightly packed rows.
pub fn pixel_size(format: TextureFormat) -> Option<usize> {
    if format.is_compressed() || format.is_depth_stencil_format() {
        return None;
    }
    format.block_copy_size(None).map(|size| size as usize)
}

/// CPU-side image. Same update counter rules as a mesh.
#[derive(Debug)]
pub struct TextureDescription {
    id: ResourceId,
    format: TextureFormat,
    data: RwLock<TextureData>,
    updates: AtomicU64,
    hook: ReleaseHook,
}

impl TextureDescription {
    pub fn new(format: TextureFormat, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        let id = ResourceId::new();
        Self {
            id,
            format,
            data: RwLock::new(TextureData {
                width,
                height,
                pixels,
            }),
            updates: AtomicU64::new(0),
            hook: ReleaseHook::new(Release::Texture(id)),
        }
    }

    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(TextureFormat::Rgba8Unorm, width, height, pixels)
    }

    pub fn solid(color: [u8; 4]) -> Self {
        Self::rgba8(1, 1, color.to_vec())
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TextureData> {
        self.data.read()
    }

    pub fn edit<R>(&self, f: impl FnOnce(&mut TextureData) -> R) -> R {
        let mut data = self.data.write();
        let result = f(&mut data);
        self.updates.fetch_add(1, Ordering::AcqRel);
        result
    }

    pub fn mark_updated(&self) {
        let _data = self.data.write();
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    /// Checks that the pixel data matches the format and dimensions.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let format = self.format;
        let pixel = pixel_size(format).context(UnsupportedTextureFormatErr { format })?;
        let data = self.data.read();
        let expected = data.width as usize * data.height as usize * pixel;
        ensure!(
            expected > 0 && data.pixels.len() == expected,
            TextureDataLengthErr {
                expected,
                actual: data.pixels.len(),
            }
        );
        Ok(())
    }

    pub(crate) fn release_hook(&self) -> &ReleaseHook {
        &self.hook
    }
}

/// A texture slot of a material: the image and how it is sampled.
#[derive(Debug, Clone)]
pub struct TextureBinding {
    pub texture: Arc<TextureDescription>,
    pub sampler: SamplerState,
}

impl TextureBinding {
    pub fn new(texture: Arc<TextureDescription>) -> Self {
        Self {
            texture,
            sampler: SamplerState::default(),
        }
    }

    pub fn with_sampler(mut self, sampler: SamplerState) -> Self {
        self.sampler = sampler;
        self
    }
}
