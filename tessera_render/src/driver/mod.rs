//! The boundary between the renderer core and the graphics API.
//!
//! Everything the core does on the GPU goes through [`GpuDriver`]. Implementations are
//! expected to be thin and stateless wrappers around the native calls. The core only ever
//! calls a driver from the render thread.

mod glsl;
pub mod recording;

use glamx::{Mat3, Mat4, Vec2, Vec3, Vec4};
use wgpu::{
    AddressMode, BlendState, CompareFunction, Face, FilterMode, FrontFace, PrimitiveTopology,
    StencilFaceState, TextureFormat, VertexFormat,
};

macro_rules! driver_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

driver_id!(
    /// A raw buffer object.
    BufferId,
    /// A vertex array object: a fixed binding of attribute slots to buffers.
    VertexArrayId,
    /// A single compiled shader stage.
    ShaderObjectId,
    /// A linked program.
    ProgramId,
    TextureId,
    FramebufferId,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Vertex,
    Element,
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    /// The preprocessor symbol that selects this stage's section of a shader source.
    pub const fn define(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VERT_SRC",
            ShaderStage::Fragment => "FRAG_SRC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// View direction and up vector used when rendering into this face.
    pub const fn basis(self) -> (Vec3, Vec3) {
        match self {
            CubeFace::PositiveX => (Vec3::X, Vec3::NEG_Y),
            CubeFace::NegativeX => (Vec3::NEG_X, Vec3::NEG_Y),
            CubeFace::PositiveY => (Vec3::Y, Vec3::Z),
            CubeFace::NegativeY => (Vec3::NEG_Y, Vec3::NEG_Z),
            CubeFace::PositiveZ => (Vec3::Z, Vec3::NEG_Y),
            CubeFace::NegativeZ => (Vec3::NEG_Z, Vec3::NEG_Y),
        }
    }

    pub fn view_matrix(self, eye: Vec3) -> Mat4 {
        let (dir, up) = self.basis();
        Mat4::look_at_rh(eye, eye + dir, up)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    UInt,
    Bool,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
    Sampler2DShadow,
    SamplerCubeShadow,
}

impl UniformType {
    pub fn from_glsl(name: &str) -> Option<Self> {
        let ty = match name {
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "int" => UniformType::Int,
            "uint" => UniformType::UInt,
            "bool" => UniformType::Bool,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            "sampler2D" => UniformType::Sampler2D,
            "samplerCube" => UniformType::SamplerCube,
            "sampler2DShadow" => UniformType::Sampler2DShadow,
            "samplerCubeShadow" => UniformType::SamplerCubeShadow,
            _ => return None,
        };
        Some(ty)
    }

    pub const fn is_sampler(self) -> bool {
        matches!(
            self,
            UniformType::Sampler2D
                | UniformType::SamplerCube
                | UniformType::Sampler2DShadow
                | UniformType::SamplerCubeShadow
        )
    }

    /// Number of consecutive attribute locations a vertex input of this type occupies.
    pub const fn attribute_slots(self) -> u32 {
        match self {
            UniformType::Mat3 => 3,
            UniformType::Mat4 => 4,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    /// The value a uniform of type `ty` holds after a fresh link.
    ///
    /// Samplers are integer uniforms naming a texture unit, so their zero is unit 0.
    pub const fn zero(ty: UniformType) -> UniformValue {
        match ty {
            UniformType::Float => UniformValue::Float(0.0),
            UniformType::Vec2 => UniformValue::Vec2(Vec2::ZERO),
            UniformType::Vec3 => UniformValue::Vec3(Vec3::ZERO),
            UniformType::Vec4 => UniformValue::Vec4(Vec4::ZERO),
            UniformType::Int
            | UniformType::Sampler2D
            | UniformType::SamplerCube
            | UniformType::Sampler2DShadow
            | UniformType::SamplerCubeShadow => UniformValue::Int(0),
            UniformType::UInt => UniformValue::UInt(0),
            UniformType::Bool => UniformValue::Bool(false),
            UniformType::Mat3 => UniformValue::Mat3(Mat3::ZERO),
            UniformType::Mat4 => UniformValue::Mat4(Mat4::ZERO),
        }
    }
}

impl UniformValue {
    /// Whether this value can be written to a uniform of type `ty`.
    pub const fn matches(&self, ty: UniformType) -> bool {
        matches!(
            (self, ty),
            (UniformValue::Float(_), UniformType::Float)
                | (UniformValue::Vec2(_), UniformType::Vec2)
                | (UniformValue::Vec3(_), UniformType::Vec3)
                | (UniformValue::Vec4(_), UniformType::Vec4)
                | (UniformValue::Int(_), UniformType::Int)
                | (UniformValue::UInt(_), UniformType::UInt)
                | (UniformValue::Bool(_), UniformType::Bool)
                | (UniformValue::Mat3(_), UniformType::Mat3)
                | (UniformValue::Mat4(_), UniformType::Mat4)
                | (
                    UniformValue::Int(_),
                    UniformType::Sampler2D
                        | UniformType::SamplerCube
                        | UniformType::Sampler2DShadow
                        | UniformType::SamplerCubeShadow
                )
        )
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<u32> for UniformValue {
    fn from(value: u32) -> Self {
        UniformValue::UInt(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        UniformValue::Mat4(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformInfo {
    /// Array uniforms are reported once, as `name[0]`, with `size` elements.
    pub name: String,
    pub ty: UniformType,
    pub size: u32,
    pub location: UniformLocation,
    /// Index of the uniform block this uniform is a member of.
    pub block: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlockInfo {
    pub name: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    pub ty: UniformType,
    pub location: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeBinding {
    pub location: u32,
    pub format: VertexFormat,
    pub stride: u32,
    pub offset: u32,
    /// 0 advances per vertex, 1 per instance.
    pub divisor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    U16,
    U32,
}

impl ElementType {
    pub const fn size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 => 4,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn square(size: u32) -> Self {
        Self::new(0, 0, size, size)
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
        }
    }
}

impl SamplerState {
    pub const CLAMP_LINEAR: SamplerState = SamplerState {
        address_u: AddressMode::ClampToEdge,
        address_v: AddressMode::ClampToEdge,
        address_w: AddressMode::ClampToEdge,
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blend: Option<BlendState>,
    /// `None` disables the depth test.
    pub depth_compare: Option<CompareFunction>,
    pub depth_write: bool,
    pub cull: Option<Face>,
    pub front_face: FrontFace,
    /// `None` disables the stencil test.
    pub stencil: Option<StencilFaceState>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: None,
            depth_compare: Some(CompareFunction::Less),
            depth_write: true,
            cull: Some(Face::Back),
            front_face: FrontFace::Ccw,
            stencil: None,
        }
    }
}

impl RenderState {
    pub const fn depth_only() -> Self {
        Self {
            blend: None,
            depth_compare: Some(CompareFunction::LessEqual),
            depth_write: true,
            cull: Some(Face::Front),
            front_face: FrontFace::Ccw,
            stencil: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureStorage {
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawCall {
    pub topology: PrimitiveTopology,
    /// Element count when `elements` is set, vertex count otherwise.
    pub count: u32,
    pub elements: Option<ElementType>,
    pub instances: u32,
}

/// Primitive GPU operations the renderer core is built on.
pub trait GpuDriver {
    fn create_buffer(&mut self) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);
    /// Replaces the whole storage of `buffer`.
    fn buffer_data(
        &mut self,
        buffer: BufferId,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    );
    fn buffer_sub_data(
        &mut self,
        buffer: BufferId,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
    );
    fn bind_buffer_base(&mut self, buffer: BufferId, binding: u32);

    fn create_vertex_array(&mut self) -> VertexArrayId;
    fn delete_vertex_array(&mut self, vao: VertexArrayId);
    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>);
    fn vertex_attribute(
        &mut self,
        vao: VertexArrayId,
        buffer: BufferId,
        binding: &VertexAttributeBinding,
    );
    fn element_buffer(&mut self, vao: VertexArrayId, buffer: BufferId);

    /// Compiles one stage. The error carries the compiler log.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str)
    -> Result<ShaderObjectId, String>;
    fn delete_shader(&mut self, shader: ShaderObjectId);
    /// Links compiled stages into a program. The error carries the linker log.
    fn link_program(&mut self, shaders: &[ShaderObjectId]) -> Result<ProgramId, String>;
    fn delete_program(&mut self, program: ProgramId);
    fn active_uniform_blocks(&self, program: ProgramId) -> Vec<UniformBlockInfo>;
    fn active_uniforms(&self, program: ProgramId) -> Vec<UniformInfo>;
    fn active_attributes(&self, program: ProgramId) -> Vec<AttributeInfo>;
    fn use_program(&mut self, program: ProgramId);
    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: &UniformValue);
    fn uniform_block_binding(&mut self, program: ProgramId, block_index: u32, binding: u32);

    fn create_texture(&mut self, kind: TextureKind) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);
    fn texture_data(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        data: &[u8],
    );
    /// Allocates uninitialized storage, used for render targets.
    fn texture_storage(&mut self, texture: TextureId, storage: &TextureStorage);
    fn bind_texture(&mut self, unit: u32, texture: TextureId, kind: TextureKind);
    fn sampler_state(&mut self, texture: TextureId, kind: TextureKind, sampler: &SamplerState);

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    /// `None` binds the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn attach_depth(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        face: Option<CubeFace>,
    );
    fn attach_color(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        face: Option<CubeFace>,
    );

    fn viewport(&mut self, rect: Rect);
    fn scissor(&mut self, rect: Option<Rect>);
    fn clear(&mut self, color: Option<Vec4>, depth: bool);
    fn render_state(&mut self, state: &RenderState);
    fn draw(&mut self, call: &DrawCall);
}

/// Maps a float component count to the matching vertex format.
pub const fn float_format(components: u8) -> Option<VertexFormat> {
    match components {
        1 => Some(VertexFormat::Float32),
        2 => Some(VertexFormat::Float32x2),
        3 => Some(VertexFormat::Float32x3),
        4 => Some(VertexFormat::Float32x4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_zero_is_texture_unit_zero() {
        assert_eq!(
            UniformValue::zero(UniformType::SamplerCubeShadow),
            UniformValue::Int(0)
        );
        assert_eq!(
            UniformValue::zero(UniformType::Vec4),
            UniformValue::Vec4(Vec4::ZERO)
        );
    }

    #[test]
    fn cube_faces_look_along_their_axis() {
        let view = CubeFace::NegativeZ.view_matrix(Vec3::ZERO);
        let forward = view.transform_point3(Vec3::new(0.0, 0.0, -2.0));
        // looking down -Z, a point in front of the eye stays in front in view space
        assert!(forward.z < 0.0);
    }

    #[test]
    fn glsl_types_parse() {
        assert_eq!(UniformType::from_glsl("mat4"), Some(UniformType::Mat4));
        assert_eq!(UniformType::from_glsl("dvec3"), None);
        assert!(UniformType::from_glsl("sampler2DShadow").is_some_and(UniformType::is_sampler));
        assert_eq!(UniformType::Mat4.attribute_slots(), 4);
    }
}
