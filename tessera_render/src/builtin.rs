//! Shaders and meshes the renderer itself draws with.

use crate::assets::mesh::{Indices, MeshDescription, VertexLayout};
use crate::assets::shader::ShaderDescription;
use std::sync::Arc;

pub const STANDARD_SHADER: &str = include_str!("shaders/standard.glsl");
pub const DEPTH_SHADER: &str = include_str!("shaders/depth.glsl");
pub const SKYBOX_SHADER: &str = include_str!("shaders/skybox.glsl");
pub const SKY_CAPTURE_SHADER: &str = include_str!("shaders/sky_capture.glsl");

pub const CAMERA_BLOCK: &str = "Camera";
pub const LIGHTS_BLOCK: &str = "Lights";
pub const CAMERA_BINDING: u32 = 0;
pub const LIGHTS_BINDING: u32 = 1;

pub const LIGHT_VIEW_PROJECTION: &str = "u_light_view_projection";
pub const SKY_VIEW_PROJECTION: &str = "u_sky_view_projection";
pub const FACE_VIEW_PROJECTION: &str = "u_face_view_projection";
pub const SUN_DIRECTION: &str = "u_sun_direction";
pub const SKYBOX_SAMPLER: &str = "u_skybox";

pub fn shadow_map_sampler(slot: usize) -> String {
    format!("u_shadow_maps[{slot}]")
}

pub fn shadow_cube_sampler(slot: usize) -> String {
    format!("u_shadow_cubes[{slot}]")
}

#[derive(Debug)]
pub struct Builtin {
    /// Lit shader for materials that do not bring their own.
    pub standard: Arc<ShaderDescription>,
    pub depth: Arc<ShaderDescription>,
    pub skybox: Arc<ShaderDescription>,
    pub sky_capture: Arc<ShaderDescription>,
    pub cube: Arc<MeshDescription>,
}

impl Builtin {
    pub fn new() -> Self {
        Self {
            standard: Arc::new(ShaderDescription::new("standard", STANDARD_SHADER)),
            depth: Arc::new(ShaderDescription::new("depth", DEPTH_SHADER)),
            skybox: Arc::new(ShaderDescription::new("skybox", SKYBOX_SHADER)),
            sky_capture: Arc::new(ShaderDescription::new("sky_capture", SKY_CAPTURE_SHADER)),
            cube: Arc::new(unit_cube()),
        }
    }
}

impl Default for Builtin {
    fn default() -> Self {
        Self::new()
    }
}

/// A cube spanning -1 to 1 on every axis, positions only.
pub fn unit_cube() -> MeshDescription {
    #[rustfmt::skip]
    let vertices = vec![
        -1.0, -1.0, -1.0,
         1.0, -1.0, -1.0,
         1.0,  1.0, -1.0,
        -1.0,  1.0, -1.0,
        -1.0, -1.0,  1.0,
         1.0, -1.0,  1.0,
         1.0,  1.0,  1.0,
        -1.0,  1.0,  1.0,
    ];
    #[rustfmt::skip]
    let indices = vec![
        0, 1, 2, 2, 3, 0,
        5, 4, 7, 7, 6, 5,
        4, 0, 3, 3, 7, 4,
        1, 5, 6, 6, 2, 1,
        3, 2, 6, 6, 7, 3,
        4, 5, 1, 1, 0, 4,
    ];
    MeshDescription::new(VertexLayout::position(), vertices, Some(Indices::U16(indices)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ShaderManager;
    use crate::driver::recording::RecordingDriver;
    use crate::release::ReleaseQueue;

    #[test]
    fn builtin_shaders_compile_and_declare_their_interface() {
        let (mut driver, _log) = RecordingDriver::new();
        let queue = ReleaseQueue::new();
        let mut shaders = ShaderManager::new(queue.sender());
        let builtin = Builtin::new();

        let standard = shaders.setup(&mut driver, &builtin.standard, ["HAS_NORMAL", "HAS_UV"]);
        let standard = shaders.get(standard).unwrap();
        assert!(standard.has_block(CAMERA_BLOCK));
        assert!(standard.has_block(LIGHTS_BLOCK));
        assert!(standard.has_sampler(&shadow_map_sampler(3)));
        assert!(standard.has_sampler(&shadow_cube_sampler(0)));
        assert!(standard.has_uniform("u_base_color"));
        assert!(!standard.has_uniform("u_light_count"));
        for input in ["position", "normal", "uv", "i_color", "i_model", "i_normal"] {
            assert!(standard.attribute(input).is_some(), "missing {input}");
        }

        let depth = shaders.setup(&mut driver, &builtin.depth, ["HAS_POSITION"]);
        assert!(shaders.get(depth).unwrap().has_uniform(LIGHT_VIEW_PROJECTION));

        let skybox = shaders.setup(&mut driver, &builtin.skybox, [] as [&str; 0]);
        assert!(shaders.get(skybox).unwrap().has_sampler(SKYBOX_SAMPLER));

        let capture = shaders.setup(&mut driver, &builtin.sky_capture, [] as [&str; 0]);
        assert!(shaders.get(capture).unwrap().has_uniform(SUN_DIRECTION));
    }

    #[test]
    fn unit_cube_is_indexed() {
        let cube = unit_cube();
        let data = cube.read();
        assert_eq!(data.vertices.len(), 24);
        assert_eq!(data.indices.as_ref().map(Indices::len), Some(36));
    }
}
