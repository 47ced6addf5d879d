//! Light data on the GPU and the matrices shadow passes render with.

pub mod shadow;

use crate::config::RenderConfig;
use crate::driver::CubeFace;
use crate::scene::{Light, LightKind, LightParams};
use bytemuck::{Pod, Zeroable};
use glamx::{Mat4, Vec3, Vec4};
use static_assertions::const_assert_eq;
use std::f32::consts::FRAC_PI_2;

/// Lights that can own a shadow map at the same time.
pub const MAX_SHADOWED_LIGHTS: usize = 4;
/// Lights that fit the `Lights` uniform block.
pub const MAX_LIGHTS: usize = 16;
pub const LIGHT_STRIDE: usize = 128;
/// Byte offset of the light count inside the `Lights` block.
pub const LIGHT_COUNT_OFFSET: usize = MAX_LIGHTS * LIGHT_STRIDE;
pub const LIGHTS_BLOCK_SIZE: usize = LIGHT_COUNT_OFFSET + 16;

const SPOT_NEAR: f32 = 0.05;

/// One element of the `u_lights` array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightBlockEntry {
    /// World position, kind code in `w`.
    pub position_kind: Vec4,
    pub direction_range: Vec4,
    pub color_intensity: Vec4,
    /// Cosines of the inner and outer cone angle, shadow slot (or -1) and depth bias.
    pub cone: Vec4,
    pub shadow_matrix: Mat4,
}

const_assert_eq!(size_of::<LightBlockEntry>(), LIGHT_STRIDE);

impl LightBlockEntry {
    pub fn new(light: &dyn Light, params: &LightParams, shadow: ShadowState, matrix: Mat4) -> Self {
        let slot = shadow.slot().map_or(-1.0, |slot| slot as f32);
        Self {
            position_kind: light.position().extend(kind_code(params.kind)),
            direction_range: light.direction().extend(params.range),
            color_intensity: params.color.extend(params.intensity),
            cone: Vec4::new(
                params.inner_angle.cos(),
                params.outer_angle.cos(),
                slot,
                params.shadow_bias,
            ),
            shadow_matrix: matrix,
        }
    }
}

pub const fn kind_code(kind: LightKind) -> f32 {
    match kind {
        LightKind::Directional => 0.0,
        LightKind::Point => 1.0,
        LightKind::Spot => 2.0,
    }
}

/// Where a light is in its shadow cycle for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowState {
    /// Shadows are off, the light is over the bound or does not cast shadows.
    #[default]
    NoShadow,
    /// Depth passes are being rendered into the shared framebuffer.
    DepthPass,
    /// The depth texture is sampled as `u_shadow_maps[slot]` or `u_shadow_cubes[slot]`.
    Bound { slot: usize, cube: bool },
}

impl ShadowState {
    pub const fn slot(&self) -> Option<usize> {
        match self {
            ShadowState::Bound { slot, .. } => Some(*slot),
            ShadowState::NoShadow | ShadowState::DepthPass => None,
        }
    }
}

/// The view-projection matrices of the depth passes of one light.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowViews {
    /// One entry per pass. Point lights render one pass per cube face.
    pub passes: Vec<(Option<CubeFace>, Mat4)>,
    /// Stored in the light block. Point lights store their projection only, the shader picks
    /// the face from the fragment direction.
    pub block_matrix: Mat4,
}

/// Center of the box around `positions` and the distance from it to the farthest corner.
pub fn focus_of(positions: impl IntoIterator<Item = Vec3>) -> Option<(Vec3, f32)> {
    let mut positions = positions.into_iter();
    let first = positions.next()?;
    let (min, max) = positions.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
    Some(((min + max) * 0.5, (max - min).length() * 0.5))
}

/// Computes the shadow passes of a light.
///
/// Directional lights cover a box around `focus`, grown by `spread` so every point within
/// `spread` of the focus keeps the configured extent around it.
pub fn shadow_views(
    params: &LightParams,
    position: Vec3,
    direction: Vec3,
    (focus, spread): (Vec3, f32),
    config: &RenderConfig,
) -> ShadowViews {
    match params.kind {
        LightKind::Directional => {
            let extent = config.directional_shadow_extent.max(config.shadow_near * 2.0) + spread;
            let eye = focus - direction * extent;
            let view = Mat4::look_at_rh(eye, focus, stable_up(direction));
            let projection = Mat4::orthographic_rh(
                -extent,
                extent,
                -extent,
                extent,
                config.shadow_near,
                extent * 2.0,
            );
            let view_projection = projection * view;
            ShadowViews {
                passes: vec![(None, view_projection)],
                block_matrix: view_projection,
            }
        }
        LightKind::Spot => {
            let fovy = (2.0 * params.outer_angle).clamp(0.0175, 3.12);
            let far = params.range.max(SPOT_NEAR + 0.01);
            let projection = Mat4::perspective_rh(fovy, 1.0, SPOT_NEAR, far);
            let view = Mat4::look_at_rh(position, position + direction, stable_up(direction));
            let view_projection = projection * view;
            ShadowViews {
                passes: vec![(None, view_projection)],
                block_matrix: view_projection,
            }
        }
        LightKind::Point => {
            let near = config.shadow_near;
            let far = params.range.max(near + 0.01);
            let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, near, far);
            ShadowViews {
                passes: CubeFace::ALL
                    .into_iter()
                    .map(|face| (Some(face), projection * face.view_matrix(position)))
                    .collect(),
                block_matrix: projection,
            }
        }
    }
}

fn stable_up(direction: Vec3) -> Vec3 {
    if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}
