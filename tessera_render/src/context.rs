use crate::builtin::Builtin;
use crate::cache::{BufferHandle, BufferKind, Caches};
use crate::config::RenderConfig;
use crate::driver::{BufferUsage, GpuDriver};
use crate::group::GroupRegistry;
use crate::lighting::LIGHTS_BLOCK_SIZE;
use crate::lighting::shadow::ShadowResources;
use crate::release::ReleaseSender;
use crate::scene::{Camera, EntityId, Light};
use crate::sky::SkyResources;
use crate::stats::FrameCounters;
use crate::step::stages::CameraBlock;
use std::sync::Arc;

/// Everything a pipeline stage can touch: the driver, all GPU caches and the registered
/// scene capabilities.
pub struct RenderContext {
    pub driver: Box<dyn GpuDriver>,
    pub caches: Caches,
    pub groups: GroupRegistry,
    pub cameras: Vec<(EntityId, Arc<dyn Camera>)>,
    pub lights: Vec<(EntityId, Arc<dyn Light>)>,
    pub config: RenderConfig,
    pub builtin: Builtin,
    pub camera_block: BufferHandle,
    pub lights_block: BufferHandle,
    pub shadows: ShadowResources,
    pub sky: SkyResources,
    pub counters: FrameCounters,
}

impl RenderContext {
    pub fn new(mut driver: Box<dyn GpuDriver>, config: RenderConfig, release: ReleaseSender) -> Self {
        let mut caches = Caches::new(driver.as_mut(), release);
        let camera_block = caches.buffers.create_sized(
            driver.as_mut(),
            BufferKind::Uniform,
            size_of::<CameraBlock>(),
            BufferUsage::Dynamic,
        );
        let lights_block = caches.buffers.create_sized(
            driver.as_mut(),
            BufferKind::Uniform,
            LIGHTS_BLOCK_SIZE,
            BufferUsage::Dynamic,
        );

        Self {
            driver,
            caches,
            groups: GroupRegistry::default(),
            cameras: Vec::new(),
            lights: Vec::new(),
            config: config.clamped(),
            builtin: Builtin::new(),
            camera_block,
            lights_block,
            shadows: ShadowResources::default(),
            sky: SkyResources::default(),
            counters: FrameCounters::default(),
        }
    }

    /// Frees every GPU object the context and its caches still hold.
    pub(crate) fn destroy(&mut self) {
        let driver = self.driver.as_mut();
        for group in self.groups.drain() {
            group.destroy(driver, &mut self.caches);
        }
        self.shadows.destroy(driver, &mut self.caches);
        self.sky.destroy(driver, &mut self.caches);
        self.caches.buffers.destroy(driver, self.camera_block);
        self.caches.buffers.destroy(driver, self.lights_block);
        self.caches.clear(driver);
    }
}
