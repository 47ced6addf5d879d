use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Snapshot of one rendered frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub live_buffers: usize,
    pub live_vbos: usize,
    pub live_shaders: usize,
    pub live_textures: usize,
    pub live_groups: usize,
    pub draw_calls: usize,
    pub instances_drawn: usize,
    pub shadow_passes: usize,
    pub skybox_captures: usize,
    pub render_duration: Duration,
}

/// Work counted while a frame is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub draw_calls: usize,
    pub instances_drawn: usize,
    pub shadow_passes: usize,
    pub skybox_captures: usize,
}

impl FrameCounters {
    pub fn record_draw(&mut self, instances: usize) {
        self.draw_calls += 1;
        self.instances_drawn += instances;
    }
}

impl Display for FrameStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame {}: {} draws ({} instances), {} shadow passes, {} sky captures in {:?} \
             | live: {} buffers, {} vbos, {} shaders, {} textures, {} groups",
            self.frame,
            self.draw_calls,
            self.instances_drawn,
            self.shadow_passes,
            self.skybox_captures,
            self.render_duration,
            self.live_buffers,
            self.live_vbos,
            self.live_shaders,
            self.live_textures,
            self.live_groups,
        )
    }
}
