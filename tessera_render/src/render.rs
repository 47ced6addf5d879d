//! The render orchestrator.
//!
//! [`Render`] owns the driver and everything built on it. It is driven from a single render
//! thread; other threads talk to it through [`Render::event_sender`] and the release hooks of
//! the descriptions they share with it.

use crate::config::RenderConfig;
use crate::context::RenderContext;
use crate::driver::{GpuDriver, UniformValue};
use crate::lighting::ShadowState;
use crate::release::{ReleaseQueue, ReleaseSender};
use crate::scene::{Entity, EntityId, RenderEvent};
use crate::stats::{FrameCounters, FrameStats};
use crate::step::stages::{init_pipeline, standard_pipeline};
use crate::step::{Stage, Step, StepFn, pipeline};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, instrument, trace};
use web_time::Instant;

pub struct Render {
    ctx: RenderContext,
    step: Step,
    init: Option<StepFn>,
    pipeline: StepFn,
    events_tx: Sender<RenderEvent>,
    events_rx: Receiver<RenderEvent>,
    releases: ReleaseQueue,
    stats: FrameStats,
    subscribers: Vec<Sender<FrameStats>>,
    frame: u64,
}

impl Render {
    /// A renderer running the standard frame.
    pub fn new(driver: Box<dyn GpuDriver>, config: RenderConfig) -> Self {
        Self::with_pipeline(driver, config, init_pipeline(), standard_pipeline())
    }

    /// A renderer running custom stages. `init` runs once, before the first frame.
    pub fn with_pipeline(
        driver: Box<dyn GpuDriver>,
        config: RenderConfig,
        init: Vec<Stage>,
        stages: Vec<Stage>,
    ) -> Self {
        let releases = ReleaseQueue::new();
        let mut ctx = RenderContext::new(driver, config, releases.sender());
        let init = pipeline(&mut ctx, init);
        let frame = pipeline(&mut ctx, stages);
        let (events_tx, events_rx) = unbounded();

        Self {
            ctx,
            step: Step::default(),
            init: Some(init),
            pipeline: frame,
            events_tx,
            events_rx,
            releases,
            stats: FrameStats::default(),
            subscribers: Vec::new(),
            frame: 0,
        }
    }

    /// Registers an entity's capabilities. An entity that is already known is replaced.
    #[profiling::function]
    pub fn add_entity(&mut self, entity: Arc<dyn Entity>) {
        let id = entity.id();
        trace!("Adding entity {id}");

        match entity.clone().as_camera() {
            Some(camera) => upsert(&mut self.ctx.cameras, id, camera),
            None => {
                remove(&mut self.ctx.cameras, id);
            }
        }
        match entity.clone().as_light() {
            Some(light) => upsert(&mut self.ctx.lights, id, light),
            None => {
                remove(&mut self.ctx.lights, id);
            }
        }

        self.remove_instance(id);
        if let Some(renderable) = entity.as_renderable() {
            self.ctx.groups.add(id, renderable);
        }
    }

    /// Unregisters an entity. Returns `false` if it was not known.
    #[profiling::function]
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        let camera = remove(&mut self.ctx.cameras, id);
        let light = remove(&mut self.ctx.lights, id);
        let instance = self.remove_instance(id);
        camera || light || instance
    }

    fn remove_instance(&mut self, id: EntityId) -> bool {
        if self.ctx.groups.group_of(id).is_none() {
            return false;
        }
        if let Some(group) = self.ctx.groups.remove(id) {
            trace!("Destroying emptied group {group:?}");
            group.destroy(self.ctx.driver.as_mut(), &mut self.ctx.caches);
        }
        true
    }

    pub fn handle_event(&mut self, event: RenderEvent) {
        trace!("Handling {event:?}");
        match event {
            RenderEvent::AddEntity(entity) => self.add_entity(entity),
            RenderEvent::RemoveEntity(id) => {
                self.remove_entity(id);
            }
            RenderEvent::MeshChanged(mesh) => {
                mesh.mark_updated();
                if self.ctx.caches.vbos.handle_of(mesh.id()).is_some() {
                    let caches = &mut self.ctx.caches;
                    caches
                        .vbos
                        .get_or_create(self.ctx.driver.as_mut(), &mut caches.buffers, &mesh);
                }
            }
            RenderEvent::TextureChanged(texture) => {
                texture.mark_updated();
                if self.ctx.caches.textures.handle_of(texture.id()).is_some() {
                    self.ctx
                        .caches
                        .textures
                        .get_or_create(self.ctx.driver.as_mut(), &texture);
                }
            }
        }
    }

    /// A channel end other threads can post scene changes to. Events are applied at the start
    /// of the next frame.
    pub fn event_sender(&self) -> Sender<RenderEvent> {
        self.events_tx.clone()
    }

    pub fn release_sender(&self) -> ReleaseSender {
        self.releases.sender()
    }

    /// Renders one frame into a target of `viewport_size` pixels.
    #[instrument(skip_all, fields(frame = self.frame + 1))]
    pub fn frame(&mut self, viewport_size: (u32, u32)) -> FrameStats {
        let start = Instant::now();
        self.frame += 1;

        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        for release in self.releases.drain() {
            self.ctx.caches.release(self.ctx.driver.as_mut(), release);
        }

        self.ctx.counters = FrameCounters::default();
        let lights = self.ctx.lights.iter().map(|(_, light)| light.clone());
        self.step.begin_frame(self.frame, viewport_size, lights);

        if let Some(mut init) = self.init.take() {
            debug!("Running init pipeline");
            init(&mut self.ctx, &mut self.step);
        }
        (self.pipeline)(&mut self.ctx, &mut self.step);

        let counters = self.ctx.counters;
        let caches = &self.ctx.caches;
        let stats = FrameStats {
            frame: self.frame,
            live_buffers: caches.buffers.live(),
            live_vbos: caches.vbos.live(),
            live_shaders: caches.shaders.live(),
            live_textures: caches.textures.live(),
            live_groups: self.ctx.groups.len(),
            draw_calls: counters.draw_calls,
            instances_drawn: counters.instances_drawn,
            shadow_passes: counters.shadow_passes,
            skybox_captures: counters.skybox_captures,
            render_duration: start.elapsed(),
        };

        if self.ctx.config.log_stats {
            debug!("{stats}");
        }
        self.publish(&stats);
        self.stats = stats.clone();
        stats
    }

    fn publish(&mut self, stats: &FrameStats) {
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(stats.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Receives a snapshot after every frame. A subscriber that falls behind by more than
    /// the configured capacity misses snapshots.
    pub fn subscribe_stats(&mut self) -> Receiver<FrameStats> {
        let (tx, rx) = bounded(self.ctx.config.stats_capacity);
        self.subscribers.push(tx);
        rx
    }

    pub fn last_stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Sets a uniform on every program drawn from the next frame on.
    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.step.props.insert(name.into(), value.into());
    }

    pub fn remove_global(&mut self, name: &str) -> Option<UniformValue> {
        self.step.props.remove(name)
    }

    /// Shadow state of every light in the last frame, in registration order.
    pub fn shadow_states(&self) -> Vec<ShadowState> {
        self.ctx.shadows.states().collect()
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.ctx
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn config(&self) -> &RenderConfig {
        &self.ctx.config
    }

    /// Frames rendered so far.
    pub fn frame_number(&self) -> u64 {
        self.frame
    }
}

impl Drop for Render {
    fn drop(&mut self) {
        for release in self.releases.drain() {
            self.ctx.caches.release(self.ctx.driver.as_mut(), release);
        }
        self.ctx.destroy();
    }
}

fn upsert<T: ?Sized>(list: &mut Vec<(EntityId, Arc<T>)>, id: EntityId, value: Arc<T>) {
    match list.iter().find_position(|(owner, _)| *owner == id) {
        Some((index, _)) => list[index].1 = value,
        None => list.push((id, value)),
    }
}

fn remove<T: ?Sized>(list: &mut Vec<(EntityId, Arc<T>)>, id: EntityId) -> bool {
    let Some((index, _)) = list.iter().find_position(|(owner, _)| *owner == id) else {
        return false;
    };
    list.remove(index);
    true
}
