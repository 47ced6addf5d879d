//! The stages of the standard frame.

use crate::builtin::{CAMERA_BINDING, CAMERA_BLOCK, LIGHTS_BINDING, LIGHTS_BLOCK};
use crate::context::RenderContext;
use crate::driver::{SamplerState, UniformType};
use crate::group::GroupKey;
use crate::lighting::shadow::prepare_lights;
use crate::scene::{Camera, ClearMode};
use crate::sky;
use crate::step::{QueueEntry, Stage, Step};
use bytemuck::{Pod, Zeroable};
use glamx::{Mat4, Vec4};
use static_assertions::const_assert_eq;
use std::sync::Arc;
use tracing::{instrument, trace, trace_span, warn};

const NO_DEFINES: [&str; 0] = [];

/// Layout of the `Camera` uniform block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraBlock {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub position: Vec4,
}

const_assert_eq!(size_of::<CameraBlock>(), 208);

/// Every stage of a frame, outermost first.
pub fn standard_pipeline() -> Vec<Stage> {
    vec![
        skybox_capture(),
        each_camera(),
        prepare_camera(),
        prepare_lights(),
        clear_camera(),
        render(),
    ]
}

/// Runs once before the first frame.
pub fn init_pipeline() -> Vec<Stage> {
    vec![warm_up()]
}

/// Compiles the builtin shaders so a broken build fails before anything is drawn.
pub fn warm_up() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            let driver = ctx.driver.as_mut();
            let builtin = &ctx.builtin;
            for shader in [
                &builtin.standard,
                &builtin.depth,
                &builtin.skybox,
                &builtin.sky_capture,
            ] {
                ctx.caches.shaders.setup(driver, shader, NO_DEFINES);
            }
            next(ctx, step);
        })
    })
}

/// Re-renders the sky cube when the sun moved.
pub fn skybox_capture() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            if ctx.config.skybox_capture {
                sky::capture(ctx, step);
            }
            next(ctx, step);
        })
    })
}

/// Runs the rest of the chain once per camera, in ascending camera order.
pub fn each_camera() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            let mut cameras: Vec<Arc<dyn Camera>> =
                ctx.cameras.iter().map(|(_, camera)| camera.clone()).collect();
            cameras.sort_by_key(|camera| camera.order());

            for camera in cameras {
                step.render_number += 1;
                let _span = trace_span!("camera", render_number = step.render_number).entered();
                step.camera = Some(camera);
                next(ctx, step);
            }
            step.camera = None;
        })
    })
}

pub fn prepare_camera() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            if prepare(ctx, step) {
                next(ctx, step);
            }
        })
    })
}

pub fn clear_camera() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            clear(ctx, step);
            next(ctx, step);
            ctx.driver.scissor(None);
        })
    })
}

/// Draws the queues of the current camera in ascending key order.
pub fn render() -> Stage {
    Box::new(|_, mut next| {
        Box::new(move |ctx, step| {
            draw_queues(ctx, step);
            next(ctx, step);
        })
    })
}

/// Uploads the camera block, culls groups against the camera and buckets the drawable ones.
/// Returns `false` when the camera covers no pixels.
#[instrument(skip_all)]
fn prepare(ctx: &mut RenderContext, step: &mut Step) -> bool {
    let Some(camera) = step.camera.clone() else {
        return false;
    };
    let viewport = camera.viewport().to_pixels(step.viewport_size);
    if viewport.width == 0 || viewport.height == 0 {
        trace!("Skipping camera with an empty viewport");
        return false;
    }

    let world = camera.world_matrix();
    step.viewport = viewport;
    step.view = world.inverse();
    step.projection = camera.projection().matrix(viewport.aspect());
    step.camera_position = world.w_axis.truncate();

    let block = CameraBlock {
        view: step.view,
        projection: step.projection,
        view_projection: step.view_projection(),
        position: step.camera_position.extend(1.0),
    };
    let driver = ctx.driver.as_mut();
    ctx.caches
        .buffers
        .upload_range(driver, ctx.camera_block, 0, bytemuck::bytes_of(&block));
    ctx.caches
        .buffers
        .bind_base(driver, ctx.camera_block, CAMERA_BINDING);

    step.clear_queues();
    let mask = camera.cull_mask();
    for (key, group) in ctx.groups.iter_mut() {
        let description = group.description().clone();
        if description.cull_mask() & mask == 0 {
            continue;
        }
        if !group.update(driver, &mut ctx.caches, step.render_number) {
            continue;
        }
        step.queues
            .entry(description.queue())
            .or_default()
            .push(QueueEntry {
                group: key,
                order: description.order(),
            });
    }
    for queue in step.queues.values_mut() {
        queue.sort_by_key(|entry| entry.order);
    }

    true
}

fn clear(ctx: &mut RenderContext, step: &Step) {
    let Some(camera) = &step.camera else {
        return;
    };

    let driver = ctx.driver.as_mut();
    driver.bind_framebuffer(None);
    driver.viewport(step.viewport);
    driver.scissor(Some(step.viewport));

    match camera.clear() {
        ClearMode::Skybox => {
            driver.clear(Some(Vec4::W), true);
            sky::draw_background(ctx, step);
        }
        ClearMode::Color(color) => driver.clear(Some(color), true),
        ClearMode::Depth => driver.clear(None, true),
        ClearMode::Nothing => {}
    }
}

#[instrument(skip_all)]
fn draw_queues(ctx: &mut RenderContext, step: &Step) {
    for (queue, key) in step.queued() {
        if !draw_group(ctx, step, key) {
            trace!("Group in queue {queue} was not drawn");
        }
    }
}

/// Issues the instanced draw of one group with its material applied.
#[profiling::function]
fn draw_group(ctx: &mut RenderContext, step: &Step, key: GroupKey) -> bool {
    let driver = ctx.driver.as_mut();
    let Some(group) = ctx.groups.get_mut(key) else {
        return false;
    };
    let (Some(handle), Some(material)) = (group.shader(), group.material().cloned()) else {
        return false;
    };
    let count = group.count();
    let Some(vao) = group.vao(driver, &ctx.caches, handle) else {
        warn!("No vertex array for {:?}", group);
        return false;
    };
    let Some(vbo) = group.vbo().and_then(|vbo| ctx.caches.vbos.get(vbo)) else {
        return false;
    };
    let call = vbo.draw_call(count as u32);
    let mut state = *material.state();
    state.front_face = vbo.front_face;

    let Some(shader) = ctx.caches.shaders.get_mut(handle) else {
        return false;
    };
    driver.use_program(shader.program());
    driver.render_state(&state);
    shader.bind_block(driver, CAMERA_BLOCK, CAMERA_BINDING);
    shader.bind_block(driver, LIGHTS_BLOCK, LIGHTS_BINDING);

    for (name, value) in &step.props {
        shader.set(driver, name, Some(value));
    }
    for (name, value) in material.props().iter() {
        shader.set(driver, name, value.as_ref());
    }

    let textures = &mut ctx.caches.textures;
    let slots = material.textures();
    let unbound: Vec<(String, UniformType)> = shader
        .samplers()
        .filter(|(name, _)| !slots.contains_key(*name) && !step.samplers.contains_key(*name))
        .map(|(name, ty)| (name.to_string(), ty))
        .collect();

    let mut unit = 0;
    for (name, binding) in slots.iter() {
        if !shader.has_sampler(name) {
            continue;
        }
        let (texture, sampler) = textures.resolve(driver, binding.as_ref());
        if textures.bind(driver, unit, texture, &sampler) {
            shader.bind_sampler(driver, name, unit);
            unit += 1;
        }
    }
    for (name, binding) in &step.samplers {
        if !shader.has_sampler(name) {
            continue;
        }
        if textures.bind(driver, unit, binding.texture, &binding.sampler) {
            shader.bind_sampler(driver, name, unit);
            unit += 1;
        }
    }
    drop(slots);
    // one unit per sampler, fallbacks included
    for (name, ty) in &unbound {
        let texture = textures.fallback(driver, *ty);
        if textures.bind(driver, unit, texture, &SamplerState::default()) {
            shader.bind_sampler(driver, name, unit);
            unit += 1;
        }
    }

    driver.bind_vertex_array(Some(vao));
    driver.draw(&call);
    driver.bind_vertex_array(None);
    ctx.counters.record_draw(count);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::material::Material;
    use crate::assets::mesh::{MeshDescription, VertexLayout};
    use crate::config::RenderConfig;
    use crate::driver::recording::{DriverCall, RecordingDriver};
    use crate::driver::{Rect, UniformValue};
    use crate::release::ReleaseQueue;
    use crate::scene::{EntityId, Renderable, RenderableDescription, queue};
    use crate::step::pipeline;

    struct Fixed(Mat4);

    impl Camera for Fixed {
        fn world_matrix(&self) -> Mat4 {
            self.0
        }

        fn clear(&self) -> ClearMode {
            ClearMode::Color(Vec4::ZERO)
        }
    }

    struct Instance(Arc<RenderableDescription>);

    impl Renderable for Instance {
        fn description(&self) -> Arc<RenderableDescription> {
            self.0.clone()
        }

        fn world_matrix(&self) -> Mat4 {
            Mat4::IDENTITY
        }
    }

    fn context() -> (RenderContext, crate::driver::recording::DriverLog, ReleaseQueue) {
        let (driver, log) = RecordingDriver::new();
        let queue = ReleaseQueue::new();
        let config = RenderConfig::builder().skybox_capture(false).build();
        let ctx = RenderContext::new(Box::new(driver), config, queue.sender());
        (ctx, log, queue)
    }

    fn description(ctx: &RenderContext, queue_key: i32, order: i32) -> Arc<RenderableDescription> {
        let mesh = Arc::new(MeshDescription::new(
            VertexLayout::position_normal(),
            vec![0.0; 18],
            None,
        ));
        let material = Arc::new(Material::new(ctx.builtin.standard.clone()));
        Arc::new(
            RenderableDescription::new(mesh, material)
                .with_queue(queue_key)
                .with_order(order),
        )
    }

    #[test]
    fn prepare_buckets_groups_by_queue_and_order() {
        let (mut ctx, _log, _queue) = context();
        let late = description(&ctx, queue::GEOMETRY, 5);
        let early = description(&ctx, queue::GEOMETRY, -1);
        let overlay = description(&ctx, queue::OVERLAY, 0);
        for (i, desc) in [&late, &early, &overlay].into_iter().enumerate() {
            ctx.groups
                .add(EntityId(i as u64), Arc::new(Instance(desc.clone())));
        }

        let mut step = Step::default();
        step.begin_frame(1, (64, 64), Vec::new());
        step.camera = Some(Arc::new(Fixed(Mat4::IDENTITY)));
        step.render_number = 1;
        assert!(prepare(&mut ctx, &mut step));

        let orders: Vec<i32> = step.queues[&queue::GEOMETRY]
            .iter()
            .map(|entry| entry.order)
            .collect();
        assert_eq!(orders, vec![-1, 5]);
        let keys: Vec<i32> = step.queued().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![queue::GEOMETRY, queue::GEOMETRY, queue::OVERLAY]);
        assert_eq!(step.viewport, Rect::new(0, 0, 64, 64));
    }

    #[test]
    fn zero_sized_viewport_skips_the_camera() {
        let (mut ctx, log, _queue) = context();
        ctx.cameras
            .push((EntityId(1), Arc::new(Fixed(Mat4::IDENTITY))));
        let mut frame = pipeline(&mut ctx, standard_pipeline());
        let mut step = Step::default();
        step.begin_frame(1, (0, 0), Vec::new());
        frame(&mut ctx, &mut step);

        assert!(log.lock().draws().is_empty());
        assert_eq!(log.lock().count(|c| matches!(c, DriverCall::Clear { .. })), 0);
    }

    #[test]
    fn global_props_reach_every_program() {
        let (mut ctx, log, _queue) = context();
        let desc = description(&ctx, queue::GEOMETRY, 0);
        ctx.groups.add(EntityId(7), Arc::new(Instance(desc)));
        ctx.cameras
            .push((EntityId(1), Arc::new(Fixed(Mat4::IDENTITY))));

        let mut frame = pipeline(&mut ctx, standard_pipeline());
        let mut step = Step::default();
        step.props
            .insert("u_ambient".to_string(), UniformValue::Float(0.25));
        step.begin_frame(1, (32, 32), Vec::new());
        frame(&mut ctx, &mut step);

        assert_eq!(
            log.lock().uniform_writes("u_ambient"),
            vec![UniformValue::Float(0.25)]
        );
        assert_eq!(ctx.counters.draw_calls, 1);
    }

    #[test]
    fn unset_samplers_get_units_of_their_own() {
        let (mut ctx, log, _queue) = context();
        let desc = description(&ctx, queue::GEOMETRY, 0);
        ctx.groups.add(EntityId(7), Arc::new(Instance(desc)));
        ctx.cameras
            .push((EntityId(1), Arc::new(Fixed(Mat4::IDENTITY))));

        let mut frame = pipeline(&mut ctx, standard_pipeline());
        let mut step = Step::default();
        step.begin_frame(1, (32, 32), Vec::new());
        frame(&mut ctx, &mut step);

        let log = log.lock();
        let names = std::iter::once("u_albedo".to_string()).chain((0..4).flat_map(|i| {
            [format!("u_shadow_maps[{i}]"), format!("u_shadow_cubes[{i}]")]
        }));
        let mut units: Vec<i32> = names
            .flat_map(|name| log.uniform_writes(&name))
            .map(|value| match value {
                UniformValue::Int(unit) => unit,
                other => panic!("sampler written as {other:?}"),
            })
            .collect();
        units.sort();
        assert_eq!(units, (0..9).collect::<Vec<_>>());

        let white = ctx.caches.textures.get(ctx.caches.textures.white()).map(|t| t.id);
        assert!(log.calls().any(|c| matches!(
            c,
            DriverCall::BindTexture { unit: 0, texture, .. } if Some(*texture) == white
        )));
        assert_eq!(
            log.count(|c| matches!(
                c,
                DriverCall::BindTexture {
                    kind: crate::driver::TextureKind::Cube,
                    ..
                }
            )),
            4
        );
    }
}
