//! What the renderer needs to know about the scene.
//!
//! The scene graph lives outside of this crate. Entities are handed over as trait objects and
//! asked once, when they are added, which capabilities they have.

use crate::assets::material::Material;
use crate::assets::mesh::MeshDescription;
use crate::assets::texture::TextureDescription;
use crate::driver::Rect;
use crate::release::ResourceId;
use glamx::{Mat4, Vec3, Vec4};
use parking_lot::RwLock;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Well known queue keys. Queues are drawn in ascending key order.
pub mod queue {
    pub const BACKGROUND: i32 = 1000;
    pub const GEOMETRY: i32 = 2000;
    pub const TRANSPARENT: i32 = 3000;
    pub const OVERLAY: i32 = 4000;
}

/// The mesh and material a set of instances is drawn with, plus how they are sorted and
/// filtered. Instances sharing one description are drawn with a single instanced call.
#[derive(Debug)]
pub struct RenderableDescription {
    id: ResourceId,
    mesh: RwLock<Arc<MeshDescription>>,
    material: RwLock<Arc<Material>>,
    queue: i32,
    order: i32,
    cull_mask: u32,
    casts_shadows: bool,
}

impl RenderableDescription {
    pub fn new(mesh: Arc<MeshDescription>, material: Arc<Material>) -> Self {
        let casts_shadows = material.casts_shadows();
        Self {
            id: ResourceId::new(),
            mesh: RwLock::new(mesh),
            material: RwLock::new(material),
            queue: queue::GEOMETRY,
            order: 0,
            cull_mask: 1,
            casts_shadows,
        }
    }

    pub fn with_queue(mut self, queue: i32) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_cull_mask(mut self, cull_mask: u32) -> Self {
        self.cull_mask = cull_mask;
        self
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows;
        self
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn mesh(&self) -> Arc<MeshDescription> {
        self.mesh.read().clone()
    }

    pub fn material(&self) -> Arc<Material> {
        self.material.read().clone()
    }

    pub fn set_mesh(&self, mesh: Arc<MeshDescription>) {
        *self.mesh.write() = mesh;
    }

    pub fn set_material(&self, material: Arc<Material>) {
        *self.material.write() = material;
    }

    pub fn queue(&self) -> i32 {
        self.queue
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn cull_mask(&self) -> u32 {
        self.cull_mask
    }

    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }
}

/// Something in the scene. Capabilities are resolved once when the entity is added.
pub trait Entity: Send + Sync {
    fn id(&self) -> EntityId;

    fn as_camera(self: Arc<Self>) -> Option<Arc<dyn Camera>> {
        None
    }

    fn as_light(self: Arc<Self>) -> Option<Arc<dyn Light>> {
        None
    }

    fn as_renderable(self: Arc<Self>) -> Option<Arc<dyn Renderable>> {
        None
    }
}

/// One instance of a [`RenderableDescription`].
pub trait Renderable: Send + Sync {
    fn description(&self) -> Arc<RenderableDescription>;

    fn world_matrix(&self) -> Mat4;

    /// Per-instance tint.
    fn color(&self) -> Vec4 {
        Vec4::ONE
    }

    /// Disabled instances stay in their group but are not drawn.
    fn render_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fov_y: f32, near: f32, far: f32 },
    Orthographic { height: f32, near: f32, far: f32 },
}

impl Projection {
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        match *self {
            Projection::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh(fov_y, aspect, near, far)
            }
            Projection::Orthographic { height, near, far } => {
                let half_h = height * 0.5;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
            }
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// A viewport in fractions of the render target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const FULL: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn to_pixels(&self, size: (u32, u32)) -> Rect {
        let (w, h) = (size.0 as f32, size.1 as f32);
        let x = (self.x.clamp(0.0, 1.0) * w).round();
        let y = (self.y.clamp(0.0, 1.0) * h).round();
        let width = (self.width.clamp(0.0, 1.0) * w).round().min(w - x);
        let height = (self.height.clamp(0.0, 1.0) * h).round().min(h - y);
        Rect::new(x as u32, y as u32, width.max(0.0) as u32, height.max(0.0) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearMode {
    /// Clear depth and draw the captured sky. Falls back to a depth clear without a sky.
    Skybox,
    Color(Vec4),
    Depth,
    Nothing,
}

pub trait Camera: Send + Sync {
    /// Cameras render in ascending order.
    fn order(&self) -> i32 {
        0
    }

    /// Renderables are drawn when their mask shares a bit with this one.
    fn cull_mask(&self) -> u32 {
        u32::MAX
    }

    fn world_matrix(&self) -> Mat4;

    fn projection(&self) -> Projection {
        Projection::default()
    }

    fn viewport(&self) -> NormalizedRect {
        NormalizedRect::FULL
    }

    fn clear(&self) -> ClearMode {
        ClearMode::Skybox
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

impl LightKind {
    /// Depth passes one shadowed light of this kind costs per frame.
    pub const fn shadow_passes(self) -> usize {
        match self {
            LightKind::Point => 6,
            LightKind::Directional | LightKind::Spot => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightParams {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    /// Spot cone angles in radians, measured from the axis.
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub casts_shadows: bool,
    pub shadow_bias: f32,
}

impl LightParams {
    pub fn directional() -> Self {
        Self {
            kind: LightKind::Directional,
            range: 0.0,
            ..Self::point()
        }
    }

    pub fn point() -> Self {
        Self {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            inner_angle: 0.0,
            outer_angle: 0.0,
            casts_shadows: true,
            shadow_bias: 0.005,
        }
    }

    pub fn spot(inner_angle: f32, outer_angle: f32) -> Self {
        Self {
            kind: LightKind::Spot,
            inner_angle,
            outer_angle: outer_angle.max(inner_angle),
            ..Self::point()
        }
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range;
        self
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows;
        self
    }
}

/// A light. Lights shine along their local -Z axis.
pub trait Light: Send + Sync {
    fn params(&self) -> LightParams;

    fn world_matrix(&self) -> Mat4;

    fn position(&self) -> Vec3 {
        self.world_matrix().w_axis.truncate()
    }

    fn direction(&self) -> Vec3 {
        self.world_matrix()
            .transform_vector3(Vec3::NEG_Z)
            .normalize_or(Vec3::NEG_Z)
    }
}

/// Scene changes posted to the renderer, possibly from other threads.
pub enum RenderEvent {
    AddEntity(Arc<dyn Entity>),
    RemoveEntity(EntityId),
    /// Forces a re-upload of a mesh outside of its update counter.
    MeshChanged(Arc<MeshDescription>),
    TextureChanged(Arc<TextureDescription>),
}

impl Debug for RenderEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderEvent::AddEntity(entity) => write!(f, "Add Entity {}", entity.id()),
            RenderEvent::RemoveEntity(id) => write!(f, "Remove Entity {id}"),
            RenderEvent::MeshChanged(mesh) => write!(f, "Mesh Changed {}", mesh.id()),
            RenderEvent::TextureChanged(texture) => write!(f, "Texture Changed {}", texture.id()),
        }
    }
}
