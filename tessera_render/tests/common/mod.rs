#![allow(dead_code)]

use glamx::{Mat4, Vec3, Vec4};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_render::assets::{Material, MeshDescription, ShaderDescription, VertexLayout};
use tessera_render::builtin::STANDARD_SHADER;
use tessera_render::driver::recording::{DriverLog, RecordingDriver};
use tessera_render::scene::{ClearMode, RenderableDescription};
use tessera_render::{
    Camera, Entity, EntityId, Light, LightParams, Render, RenderConfig, Renderable,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config without the sky capture so the only draws are the ones a test sets up.
pub fn quiet_config() -> RenderConfig {
    RenderConfig::builder().skybox_capture(false).build()
}

pub fn renderer(config: RenderConfig) -> (Render, DriverLog) {
    init_tracing();
    let (driver, log) = RecordingDriver::new();
    (Render::new(Box::new(driver), config), log)
}

pub fn triangle() -> Arc<MeshDescription> {
    #[rustfmt::skip]
    let vertices = vec![
        0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
    ];
    Arc::new(MeshDescription::new(
        VertexLayout::position_normal(),
        vertices,
        None,
    ))
}

pub fn standard_shader() -> Arc<ShaderDescription> {
    Arc::new(ShaderDescription::new("standard", STANDARD_SHADER))
}

pub fn lit_description() -> Arc<RenderableDescription> {
    let material = Arc::new(Material::new(standard_shader()));
    Arc::new(RenderableDescription::new(triangle(), material))
}

pub struct TestCamera {
    pub id: EntityId,
    pub order: i32,
    pub cull_mask: u32,
    pub world: Mat4,
}

impl TestCamera {
    pub fn new(id: u64) -> Arc<Self> {
        Self::with_mask(id, u32::MAX)
    }

    pub fn with_mask(id: u64, cull_mask: u32) -> Arc<Self> {
        Arc::new(Self {
            id: EntityId(id),
            order: 0,
            cull_mask,
            world: Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)),
        })
    }
}

impl Entity for TestCamera {
    fn id(&self) -> EntityId {
        self.id
    }

    fn as_camera(self: Arc<Self>) -> Option<Arc<dyn Camera>> {
        Some(self)
    }
}

impl Camera for TestCamera {
    fn order(&self) -> i32 {
        self.order
    }

    fn cull_mask(&self) -> u32 {
        self.cull_mask
    }

    fn world_matrix(&self) -> Mat4 {
        self.world
    }

    fn clear(&self) -> ClearMode {
        ClearMode::Color(Vec4::new(0.1, 0.1, 0.1, 1.0))
    }
}

pub struct TestLight {
    pub id: EntityId,
    pub params: LightParams,
    pub world: Mat4,
}

impl TestLight {
    pub fn new(id: u64, params: LightParams) -> Arc<Self> {
        Arc::new(Self {
            id: EntityId(id),
            params,
            world: Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)),
        })
    }
}

impl Entity for TestLight {
    fn id(&self) -> EntityId {
        self.id
    }

    fn as_light(self: Arc<Self>) -> Option<Arc<dyn Light>> {
        Some(self)
    }
}

impl Light for TestLight {
    fn params(&self) -> LightParams {
        self.params
    }

    fn world_matrix(&self) -> Mat4 {
        self.world
    }
}

pub struct TestInstance {
    pub id: EntityId,
    pub description: Arc<RenderableDescription>,
    pub world: Mutex<Mat4>,
    pub enabled: AtomicBool,
}

impl TestInstance {
    pub fn new(id: u64, description: &Arc<RenderableDescription>) -> Arc<Self> {
        Arc::new(Self {
            id: EntityId(id),
            description: description.clone(),
            world: Mutex::new(Mat4::from_translation(Vec3::X * id as f32)),
            enabled: AtomicBool::new(true),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

impl Entity for TestInstance {
    fn id(&self) -> EntityId {
        self.id
    }

    fn as_renderable(self: Arc<Self>) -> Option<Arc<dyn Renderable>> {
        Some(self)
    }
}

impl Renderable for TestInstance {
    fn description(&self) -> Arc<RenderableDescription> {
        self.description.clone()
    }

    fn world_matrix(&self) -> Mat4 {
        *self.world.lock()
    }

    fn render_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
