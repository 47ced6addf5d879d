use crate::lighting::MAX_SHADOWED_LIGHTS;
use bon::Builder;
use tessera_utils::RenderArgs;

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct RenderConfig {
    #[builder(default = true)]
    pub shadows: bool,
    /// Edge length of every shadow map and shadow cube face.
    #[builder(default = 1024)]
    pub shadow_map_size: u32,
    /// Lights past this many shadowed ones render unshadowed.
    #[builder(default = MAX_SHADOWED_LIGHTS)]
    pub shadowed_lights: usize,
    #[builder(default = 0.05)]
    pub shadow_near: f32,
    /// Half extent of the orthographic volume a directional light casts shadows in.
    #[builder(default = 40.0)]
    pub directional_shadow_extent: f32,
    #[builder(default = true)]
    pub skybox_capture: bool,
    #[builder(default = 256)]
    pub skybox_capture_size: u32,
    /// Sun direction change below which the captured sky is kept.
    #[builder(default = 1e-4)]
    pub sky_direction_epsilon: f32,
    /// Snapshots a statistics subscriber can lag behind before new ones are dropped.
    #[builder(default = 8)]
    pub stats_capacity: usize,
    #[builder(default = false)]
    pub log_stats: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RenderConfig {
    /// Defaults overridden by the command line switches of the process.
    pub fn from_args() -> Self {
        Self::default().with_args(RenderArgs::get())
    }

    pub fn with_args(mut self, args: &RenderArgs) -> Self {
        self.shadows &= !args.no_shadows;
        self.skybox_capture &= !args.no_skybox_capture;
        self.log_stats |= args.log_stats;
        if let Some(size) = args.shadow_map_size {
            self.shadow_map_size = size;
        }
        if let Some(lights) = args.shadowed_lights {
            self.shadowed_lights = lights as usize;
        }
        self.clamped()
    }

    /// Keeps values inside what the renderer can allocate.
    pub fn clamped(mut self) -> Self {
        self.shadowed_lights = self.shadowed_lights.min(MAX_SHADOWED_LIGHTS);
        self.shadow_map_size = self.shadow_map_size.max(1);
        self.skybox_capture_size = self.skybox_capture_size.max(1);
        self.stats_capacity = self.stats_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RenderConfig::default();
        assert!(config.shadows);
        assert_eq!(config.shadow_map_size, 1024);
        assert_eq!(config.shadowed_lights, MAX_SHADOWED_LIGHTS);
        assert!(config.skybox_capture);
    }

    #[test]
    fn args_override_defaults() {
        let args = RenderArgs {
            no_shadows: true,
            shadow_map_size: Some(256),
            shadowed_lights: Some(64),
            ..RenderArgs::default()
        };
        let config = RenderConfig::default().with_args(&args);
        assert!(!config.shadows);
        assert_eq!(config.shadow_map_size, 256);
        assert_eq!(config.shadowed_lights, MAX_SHADOWED_LIGHTS);
    }
}
