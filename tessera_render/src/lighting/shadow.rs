use crate::builtin::{LIGHT_VIEW_PROJECTION, LIGHTS_BINDING, shadow_cube_sampler, shadow_map_sampler};
use crate::cache::{Caches, TextureHandle, TextureManager};
use crate::context::RenderContext;
use crate::driver::{
    CubeFace, FramebufferId, GpuDriver, Rect, RenderState, SamplerState, TextureKind,
    UniformValue,
};
use crate::lighting::{
    LIGHT_COUNT_OFFSET, LightBlockEntry, MAX_LIGHTS, MAX_SHADOWED_LIGHTS, ShadowState, focus_of,
    shadow_views,
};
use crate::scene::{Camera, LightKind};
use crate::step::{SamplerBinding, Stage, Step};
use glamx::Mat4;
use tracing::{instrument, trace, warn};
use wgpu::TextureFormat;

/// Depth targets of the shadowed lights and the framebuffer every depth pass renders through.
#[derive(Debug, Default)]
pub struct ShadowResources {
    framebuffer: Option<FramebufferId>,
    maps: [Option<TextureHandle>; MAX_SHADOWED_LIGHTS],
    cubes: [Option<TextureHandle>; MAX_SHADOWED_LIGHTS],
    /// State and block matrix per light of the current frame, in light order.
    states: Vec<(ShadowState, Mat4)>,
    rendered_frame: Option<u64>,
    warned_overflow: bool,
}

impl ShadowResources {
    pub fn states(&self) -> impl Iterator<Item = ShadowState> + '_ {
        self.states.iter().map(|(state, _)| *state)
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    /// The depth texture of `slot`, allocated on first use.
    fn target(
        &mut self,
        driver: &mut dyn GpuDriver,
        textures: &mut TextureManager,
        slot: usize,
        cube: bool,
        size: u32,
    ) -> TextureHandle {
        let (targets, kind) = match cube {
            true => (&mut self.cubes, TextureKind::Cube),
            false => (&mut self.maps, TextureKind::D2),
        };
        *targets[slot].get_or_insert_with(|| {
            textures.create_target(driver, kind, TextureFormat::Depth32Float, size)
        })
    }

    pub fn destroy(&mut self, driver: &mut dyn GpuDriver, caches: &mut Caches) {
        for target in self.maps.iter_mut().chain(self.cubes.iter_mut()) {
            if let Some(texture) = target.take() {
                caches.textures.destroy(driver, texture);
            }
        }
        if let Some(framebuffer) = self.framebuffer.take() {
            driver.delete_framebuffer(framebuffer);
        }
        self.states.clear();
    }
}

/// Renders shadow maps once per frame and fills the `Lights` block for every camera.
///
/// The maps are shared by all cameras, so directional volumes are centered on the cameras
/// together and grow with the distance between them.
pub fn prepare_lights() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            if ctx.shadows.rendered_frame != Some(step.frame) {
                render_shadows(ctx, step);
                ctx.shadows.rendered_frame = Some(step.frame);
            }
            upload_lights(ctx, step);
            next(ctx, step);
        })
    })
}

#[instrument(skip_all)]
fn render_shadows(ctx: &mut RenderContext, step: &mut Step) {
    ctx.shadows.states.clear();
    let mut slot = 0;
    let focus = focus_of(
        ctx.cameras
            .iter()
            .map(|(_, camera)| camera.world_matrix().w_axis.truncate()),
    )
    .unwrap_or((step.camera_position, 0.0));

    for light in &step.lights {
        let params = light.params();
        if !ctx.config.shadows || !params.casts_shadows {
            ctx.shadows.states.push((ShadowState::NoShadow, Mat4::IDENTITY));
            continue;
        }
        if slot >= ctx.config.shadowed_lights {
            trace!("Light over the shadow bound renders unshadowed");
            ctx.shadows.states.push((ShadowState::NoShadow, Mat4::IDENTITY));
            continue;
        }

        let views = shadow_views(
            &params,
            light.position(),
            light.direction(),
            focus,
            &ctx.config,
        );
        let cube = params.kind == LightKind::Point;
        let size = ctx.config.shadow_map_size;
        let target = ctx.shadows.target(
            ctx.driver.as_mut(),
            &mut ctx.caches.textures,
            slot,
            cube,
            size,
        );

        trace!("Rendering {:?} shadow into slot {slot}", params.kind);
        let index = ctx.shadows.states.len();
        ctx.shadows
            .states
            .push((ShadowState::DepthPass, views.block_matrix));
        for (face, view_projection) in views.passes {
            depth_pass(ctx, step.render_number, target, face, view_projection);
        }

        let name = match cube {
            true => shadow_cube_sampler(slot),
            false => shadow_map_sampler(slot),
        };
        step.samplers.insert(
            name,
            SamplerBinding {
                texture: target,
                sampler: SamplerState::CLAMP_LINEAR,
            },
        );
        ctx.shadows.states[index].0 = ShadowState::Bound { slot, cube };
        slot += 1;
    }

    ctx.driver.bind_framebuffer(None);
}

/// Renders every shadow caster into one depth target, or one face of it.
#[profiling::function]
fn depth_pass(
    ctx: &mut RenderContext,
    render_number: u64,
    target: TextureHandle,
    face: Option<CubeFace>,
    view_projection: Mat4,
) {
    let RenderContext {
        driver,
        caches,
        groups,
        builtin,
        config,
        shadows,
        counters,
        ..
    } = ctx;
    let driver = driver.as_mut();

    let Some(depth) = caches.textures.get(target).map(|t| t.id) else {
        return;
    };
    let framebuffer = *shadows
        .framebuffer
        .get_or_insert_with(|| driver.create_framebuffer());

    driver.bind_framebuffer(Some(framebuffer));
    driver.attach_depth(framebuffer, depth, face);
    driver.viewport(Rect::square(config.shadow_map_size));
    driver.scissor(None);
    driver.clear(None, true);
    driver.render_state(&RenderState::depth_only());

    let view_projection = UniformValue::Mat4(view_projection);
    for (_, group) in groups.iter_mut() {
        if !group.description().casts_shadows() {
            continue;
        }
        if !group.update(driver, caches, render_number) {
            continue;
        }
        let Some(shader) = group.depth_shader(driver, caches, &builtin.depth) else {
            continue;
        };
        let Some(vao) = group.vao(driver, caches, shader) else {
            continue;
        };
        let count = group.count();
        let Some(call) = group
            .vbo()
            .and_then(|vbo| caches.vbos.get(vbo))
            .map(|vbo| vbo.draw_call(count as u32))
        else {
            continue;
        };
        let Some(program) = caches.shaders.get_mut(shader) else {
            continue;
        };

        driver.use_program(program.program());
        program.set(driver, LIGHT_VIEW_PROJECTION, Some(&view_projection));
        driver.bind_vertex_array(Some(vao));
        driver.draw(&call);
        driver.bind_vertex_array(None);
        counters.record_draw(count);
    }

    counters.shadow_passes += 1;
}

/// Writes the lights of the frame into the `Lights` block and binds it.
fn upload_lights(ctx: &mut RenderContext, step: &Step) {
    if step.lights.len() > MAX_LIGHTS && !ctx.shadows.warned_overflow {
        warn!(
            "{} lights registered, only the first {MAX_LIGHTS} are shaded",
            step.lights.len()
        );
        ctx.shadows.warned_overflow = true;
    }

    let entries: Vec<LightBlockEntry> = step
        .lights
        .iter()
        .take(MAX_LIGHTS)
        .enumerate()
        .map(|(i, light)| {
            let (state, matrix) = ctx
                .shadows
                .states
                .get(i)
                .copied()
                .unwrap_or((ShadowState::NoShadow, Mat4::IDENTITY));
            LightBlockEntry::new(light.as_ref(), &light.params(), state, matrix)
        })
        .collect();
    let count = entries.len() as u32;

    let driver = ctx.driver.as_mut();
    let buffers = &mut ctx.caches.buffers;
    if !entries.is_empty() {
        buffers.upload_range(driver, ctx.lights_block, 0, bytemuck::cast_slice(&entries));
    }
    buffers.upload_range(
        driver,
        ctx.lights_block,
        LIGHT_COUNT_OFFSET,
        bytemuck::bytes_of(&count),
    );
    buffers.bind_base(driver, ctx.lights_block, LIGHTS_BINDING);
}
