//! The per-frame pipeline.
//!
//! A frame is a chain of stages. Each stage wraps the rest of the chain: it can prepare state,
//! call the next stage any number of times (once per camera, for example) and clean up after
//! it. All stages share one [`Step`] which lives as long as the renderer.

pub mod stages;

use crate::cache::TextureHandle;
use crate::context::RenderContext;
use crate::driver::{Rect, SamplerState, UniformValue};
use crate::group::GroupKey;
use crate::scene::{Camera, Light};
use glamx::{Mat4, Vec3};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type StepFn = Box<dyn FnMut(&mut RenderContext, &mut Step)>;

/// Builds a stage around the rest of the chain. Runs once, when the pipeline is assembled.
pub type Stage = Box<dyn FnOnce(&mut RenderContext, StepFn) -> StepFn>;

/// Composes `stages` so the first one is the outermost.
pub fn pipeline(ctx: &mut RenderContext, stages: Vec<Stage>) -> StepFn {
    let terminal: StepFn = Box::new(|_, _| {});
    stages
        .into_iter()
        .rev()
        .fold(terminal, |next, stage| stage(ctx, next))
}

/// A group queued for drawing and the order it sorts by inside its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub group: GroupKey,
    pub order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerBinding {
    pub texture: TextureHandle,
    pub sampler: SamplerState,
}

pub struct Step {
    pub frame: u64,
    pub camera: Option<Arc<dyn Camera>>,
    pub lights: Vec<Arc<dyn Light>>,
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    /// Pixel rect of the current camera.
    pub viewport: Rect,
    /// Size of the render target in pixels.
    pub viewport_size: (u32, u32),
    pub queues: BTreeMap<i32, Vec<QueueEntry>>,
    /// Uniforms written to every drawn program.
    pub props: BTreeMap<String, UniformValue>,
    /// Textures bound to every drawn program that declares a sampler of that name.
    pub samplers: BTreeMap<String, SamplerBinding>,
    /// Bumped once per camera. Groups update at most once per value.
    pub render_number: u64,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            frame: 0,
            camera: None,
            lights: Vec::new(),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            viewport: Rect::default(),
            viewport_size: (0, 0),
            queues: BTreeMap::new(),
            props: BTreeMap::new(),
            samplers: BTreeMap::new(),
            render_number: 0,
        }
    }
}

impl Step {
    /// Resets per-frame state. Queue allocations are kept.
    pub fn begin_frame(
        &mut self,
        frame: u64,
        viewport_size: (u32, u32),
        lights: impl IntoIterator<Item = Arc<dyn Light>>,
    ) {
        self.frame = frame;
        self.viewport_size = viewport_size;
        self.camera = None;
        self.lights.clear();
        self.lights.extend(lights);
        self.samplers.clear();
        self.clear_queues();
    }

    pub fn clear_queues(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear();
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Groups queued for the current camera, in draw order.
    pub fn queued(&self) -> impl Iterator<Item = (i32, GroupKey)> + '_ {
        self.queues
            .iter()
            .flat_map(|(key, queue)| queue.iter().map(move |entry| (*key, entry.group)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::driver::recording::RecordingDriver;
    use crate::release::ReleaseQueue;
    use parking_lot::Mutex;

    fn tracing_stage(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Stage {
        Box::new(move |_, mut next| {
            Box::new(move |ctx, step| {
                log.lock().push(format!("{name} in"));
                next(ctx, step);
                log.lock().push(format!("{name} out"));
            })
        })
    }

    #[test]
    fn stages_nest_in_declaration_order() {
        let (driver, _log) = RecordingDriver::new();
        let queue = ReleaseQueue::new();
        let mut ctx = RenderContext::new(Box::new(driver), RenderConfig::default(), queue.sender());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut run = pipeline(
            &mut ctx,
            vec![
                tracing_stage("outer", log.clone()),
                tracing_stage("inner", log.clone()),
            ],
        );
        run(&mut ctx, &mut Step::default());

        assert_eq!(
            *log.lock(),
            vec!["outer in", "inner in", "inner out", "outer out"]
        );
    }

    #[test]
    fn empty_pipeline_is_a_no_op() {
        let (driver, _log) = RecordingDriver::new();
        let queue = ReleaseQueue::new();
        let mut ctx = RenderContext::new(Box::new(driver), RenderConfig::default(), queue.sender());
        let mut step = Step::default();
        pipeline(&mut ctx, Vec::new())(&mut ctx, &mut step);
        assert_eq!(step.render_number, 0);
    }

    #[test]
    fn begin_frame_keeps_queue_buckets_but_empties_them() {
        let mut step = Step::default();
        step.queues.entry(2000).or_default().push(QueueEntry {
            group: GroupKey::default(),
            order: 0,
        });
        step.begin_frame(3, (640, 480), Vec::new());
        assert_eq!(step.queues.len(), 1);
        assert_eq!(step.queued().count(), 0);
        assert_eq!(step.frame, 3);
    }
}
