//! The procedural sky, captured into a cube map whenever the sun moves.

use crate::builtin::{FACE_VIEW_PROJECTION, SKY_VIEW_PROJECTION, SKYBOX_SAMPLER, SUN_DIRECTION};
use crate::cache::{Caches, Shader, TextureHandle, VboHandle};
use crate::context::RenderContext;
use crate::driver::{
    CubeFace, FramebufferId, GpuDriver, Rect, RenderState, SamplerState, TextureKind,
    UniformValue, VertexArrayId, VertexAttributeBinding, float_format,
};
use crate::scene::{Light, LightKind};
use crate::step::Step;
use glamx::{Mat4, Vec3, Vec4};
use std::collections::HashMap;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;
use tracing::{debug, instrument, trace};
use wgpu::{CompareFunction, TextureFormat};

const NO_DEFINES: [&str; 0] = [];

#[derive(Debug, Default)]
pub struct SkyResources {
    cube: Option<TextureHandle>,
    framebuffer: Option<FramebufferId>,
    last_direction: Option<Vec3>,
    /// Vertex arrays of the cube mesh per shader attribute hash.
    vaos: HashMap<u64, VertexArrayId>,
}

impl SkyResources {
    /// The captured sky, if one was rendered yet.
    pub fn cube(&self) -> Option<TextureHandle> {
        self.cube
    }

    pub fn last_direction(&self) -> Option<Vec3> {
        self.last_direction
    }

    fn vao(
        &mut self,
        driver: &mut dyn GpuDriver,
        caches: &Caches,
        vbo: VboHandle,
        shader: &Shader,
    ) -> Option<VertexArrayId> {
        if let Some(&vao) = self.vaos.get(&shader.attribute_hash()) {
            return Some(vao);
        }

        let vbo = caches.vbos.get(vbo)?;
        let vertices = caches.buffers.get(vbo.vertices)?.id;
        let stride = (vbo.layout.stride() * size_of::<f32>()) as u32;

        let vao = driver.create_vertex_array();
        for attribute in shader.attributes() {
            let Some((offset, components)) = vbo.layout.find(&attribute.name) else {
                continue;
            };
            let Some(format) = float_format(components) else {
                continue;
            };
            let binding = VertexAttributeBinding {
                location: attribute.location,
                format,
                stride,
                offset: (offset * size_of::<f32>()) as u32,
                divisor: 0,
            };
            driver.vertex_attribute(vao, vertices, &binding);
        }
        if let Some(elements) = vbo.elements.and_then(|e| caches.buffers.get(e)) {
            driver.element_buffer(vao, elements.id);
        }

        self.vaos.insert(shader.attribute_hash(), vao);
        Some(vao)
    }

    pub fn destroy(&mut self, driver: &mut dyn GpuDriver, caches: &mut Caches) {
        for (_, vao) in self.vaos.drain() {
            driver.delete_vertex_array(vao);
        }
        if let Some(cube) = self.cube.take() {
            caches.textures.destroy(driver, cube);
        }
        if let Some(framebuffer) = self.framebuffer.take() {
            driver.delete_framebuffer(framebuffer);
        }
        self.last_direction = None;
    }
}

/// Direction of the first directional light, or straight down without one.
pub fn sun_direction(lights: &[Arc<dyn Light>]) -> Vec3 {
    lights
        .iter()
        .find(|light| light.params().kind == LightKind::Directional)
        .map_or(Vec3::NEG_Y, |light| light.direction())
}

fn sky_state(depth_compare: Option<CompareFunction>) -> RenderState {
    RenderState {
        depth_compare,
        depth_write: false,
        cull: None,
        ..RenderState::default()
    }
}

/// Renders the sky into the six faces of the cube map. Does nothing while the sun stays within
/// the configured epsilon of the last captured direction.
#[instrument(skip_all)]
pub fn capture(ctx: &mut RenderContext, step: &Step) -> bool {
    let direction = sun_direction(&step.lights);
    let epsilon = ctx.config.sky_direction_epsilon;
    if ctx
        .sky
        .last_direction
        .is_some_and(|last| last.distance(direction) <= epsilon)
    {
        return false;
    }

    let RenderContext {
        driver,
        caches,
        builtin,
        config,
        sky,
        counters,
        ..
    } = ctx;
    let driver = driver.as_mut();

    let (vbo, _) = caches
        .vbos
        .get_or_create(driver, &mut caches.buffers, &builtin.cube);
    let Some(call) = caches.vbos.get(vbo).map(|v| v.draw_call(1)) else {
        return false;
    };
    let shader = caches.shaders.setup(driver, &builtin.sky_capture, NO_DEFINES);
    let Some(vao) = caches
        .shaders
        .get(shader)
        .and_then(|shader| sky.vao(driver, caches, vbo, shader))
    else {
        return false;
    };

    let size = config.skybox_capture_size;
    let cube = *sky.cube.get_or_insert_with(|| {
        caches
            .textures
            .create_target(driver, TextureKind::Cube, TextureFormat::Rgba8Unorm, size)
    });
    let Some(color) = caches.textures.get(cube).map(|t| t.id) else {
        return false;
    };
    let framebuffer = *sky
        .framebuffer
        .get_or_insert_with(|| driver.create_framebuffer());
    let Some(program) = caches.shaders.get_mut(shader) else {
        return false;
    };

    driver.bind_framebuffer(Some(framebuffer));
    driver.viewport(Rect::square(size));
    driver.scissor(None);
    driver.render_state(&sky_state(None));
    driver.use_program(program.program());
    program.set(driver, SUN_DIRECTION, Some(&UniformValue::Vec3(direction)));
    driver.bind_vertex_array(Some(vao));

    let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, 0.1, 10.0);
    for face in CubeFace::ALL {
        driver.attach_color(framebuffer, color, Some(face));
        driver.clear(Some(Vec4::ZERO), false);
        let view_projection = projection * face.view_matrix(Vec3::ZERO);
        program.set(driver, FACE_VIEW_PROJECTION, Some(&view_projection.into()));
        driver.draw(&call);
    }

    driver.bind_vertex_array(None);
    driver.bind_framebuffer(None);
    sky.last_direction = Some(direction);
    counters.skybox_captures += 1;
    debug!("Captured sky for sun direction {direction}");
    true
}

/// Draws the captured sky behind everything of the current camera. Without a capture this is
/// a no-op.
pub fn draw_background(ctx: &mut RenderContext, step: &Step) -> bool {
    let RenderContext {
        driver,
        caches,
        builtin,
        sky,
        counters,
        ..
    } = ctx;
    let driver = driver.as_mut();

    let Some(cube) = sky.cube else {
        trace!("No sky captured, keeping the cleared background");
        return false;
    };
    let Some(vbo) = caches.vbos.handle_of(builtin.cube.id()) else {
        return false;
    };
    let Some(call) = caches.vbos.get(vbo).map(|v| v.draw_call(1)) else {
        return false;
    };
    let shader = caches.shaders.setup(driver, &builtin.skybox, NO_DEFINES);
    let Some(vao) = caches
        .shaders
        .get(shader)
        .and_then(|shader| sky.vao(driver, caches, vbo, shader))
    else {
        return false;
    };
    let Some(program) = caches.shaders.get_mut(shader) else {
        return false;
    };

    let mut view = step.view;
    view.w_axis = Vec4::W;
    let view_projection = step.projection * view;

    driver.use_program(program.program());
    driver.render_state(&sky_state(Some(CompareFunction::LessEqual)));
    program.set(driver, SKY_VIEW_PROJECTION, Some(&view_projection.into()));
    if caches
        .textures
        .bind(driver, 0, cube, &SamplerState::CLAMP_LINEAR)
    {
        program.bind_sampler(driver, SKYBOX_SAMPLER, 0);
    }
    driver.bind_vertex_array(Some(vao));
    driver.draw(&call);
    driver.bind_vertex_array(None);
    counters.record_draw(1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::driver::recording::{DriverCall, RecordingDriver};
    use crate::release::ReleaseQueue;
    use crate::scene::LightParams;

    struct Sun(Mat4);

    impl Light for Sun {
        fn params(&self) -> LightParams {
            LightParams::directional()
        }

        fn world_matrix(&self) -> Mat4 {
            self.0
        }
    }

    #[test]
    fn sun_defaults_to_straight_down() {
        assert_eq!(sun_direction(&[]), Vec3::NEG_Y);
        let sun: Arc<dyn Light> = Arc::new(Sun(Mat4::IDENTITY));
        assert_eq!(sun_direction(&[sun]), Vec3::NEG_Z);
    }

    #[test]
    fn capture_runs_only_when_the_sun_moves() {
        let (driver, log) = RecordingDriver::new();
        let queue = ReleaseQueue::new();
        let mut ctx = RenderContext::new(Box::new(driver), RenderConfig::default(), queue.sender());
        let mut step = Step::default();

        step.begin_frame(1, (8, 8), vec![Arc::new(Sun(Mat4::IDENTITY)) as Arc<dyn Light>]);
        assert!(capture(&mut ctx, &step));
        assert!(!capture(&mut ctx, &step));

        let moved = Mat4::from_rotation_y(0.5);
        step.begin_frame(2, (8, 8), vec![Arc::new(Sun(moved)) as Arc<dyn Light>]);
        assert!(capture(&mut ctx, &step));

        assert_eq!(ctx.counters.skybox_captures, 2);
        let log = log.lock();
        assert_eq!(
            log.count(|c| matches!(c, DriverCall::AttachColor { face: Some(_), .. })),
            12
        );
        assert_eq!(log.count(|c| matches!(c, DriverCall::CreateFramebuffer(_))), 1);
    }

    #[test]
    fn background_needs_a_capture() {
        let (driver, log) = RecordingDriver::new();
        let queue = ReleaseQueue::new();
        let mut ctx = RenderContext::new(Box::new(driver), RenderConfig::default(), queue.sender());
        let step = Step::default();

        assert!(!draw_background(&mut ctx, &step));
        assert!(log.lock().draws().is_empty());

        capture(&mut ctx, &step);
        assert!(draw_background(&mut ctx, &step));
        assert_eq!(ctx.counters.draw_calls, 1);
    }
}
