//! A headless [`GpuDriver`] that records every call.
//!
//! It keeps no GPU state besides what introspection needs, which makes it useful for offline
//! validation of a frame and for tests. The log is shared through [`DriverLog`] so it can be
//! inspected while the driver itself is owned by a renderer.

use crate::driver::glsl::{self, Declared, StageInterface};
use crate::driver::{
    AttributeInfo, BufferId, BufferTarget, BufferUsage, CubeFace, DrawCall, FramebufferId,
    GpuDriver, ProgramId, Rect, RenderState, SamplerState, ShaderObjectId, ShaderStage,
    TextureId, TextureKind, TextureStorage, UniformBlockInfo, UniformInfo, UniformLocation,
    UniformValue, VertexArrayId, VertexAttributeBinding,
};
use glamx::Vec4;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;
use wgpu::TextureFormat;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    CreateBuffer(BufferId),
    DeleteBuffer(BufferId),
    BufferData {
        buffer: BufferId,
        target: BufferTarget,
        len: usize,
        usage: BufferUsage,
    },
    BufferSubData {
        buffer: BufferId,
        target: BufferTarget,
        offset: usize,
        len: usize,
    },
    BindBufferBase {
        buffer: BufferId,
        binding: u32,
    },
    CreateVertexArray(VertexArrayId),
    DeleteVertexArray(VertexArrayId),
    BindVertexArray(Option<VertexArrayId>),
    VertexAttribute {
        vao: VertexArrayId,
        buffer: BufferId,
        binding: VertexAttributeBinding,
    },
    ElementBuffer {
        vao: VertexArrayId,
        buffer: BufferId,
    },
    CompileShader {
        stage: ShaderStage,
        result: Result<ShaderObjectId, String>,
    },
    DeleteShader(ShaderObjectId),
    LinkProgram(Result<ProgramId, String>),
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    SetUniform {
        program: ProgramId,
        name: Option<String>,
        location: UniformLocation,
        value: UniformValue,
    },
    UniformBlockBinding {
        program: ProgramId,
        block_index: u32,
        binding: u32,
    },
    CreateTexture(TextureId, TextureKind),
    DeleteTexture(TextureId),
    TextureData {
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        len: usize,
    },
    TextureStorage(TextureId, TextureStorage),
    BindTexture {
        unit: u32,
        texture: TextureId,
        kind: TextureKind,
    },
    SamplerState(TextureId, SamplerState),
    CreateFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    AttachDepth {
        framebuffer: FramebufferId,
        texture: TextureId,
        face: Option<CubeFace>,
    },
    AttachColor {
        framebuffer: FramebufferId,
        texture: TextureId,
        face: Option<CubeFace>,
    },
    Viewport(Rect),
    Scissor(Option<Rect>),
    Clear {
        color: Option<Vec4>,
        depth: bool,
    },
    RenderState(RenderState),
    Draw(DrawCall),
}

impl DriverCall {
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            DriverCall::DeleteBuffer(_)
                | DriverCall::DeleteVertexArray(_)
                | DriverCall::DeleteShader(_)
                | DriverCall::DeleteProgram(_)
                | DriverCall::DeleteTexture(_)
                | DriverCall::DeleteFramebuffer(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub call: DriverCall,
    pub thread: ThreadId,
}

#[derive(Debug, Clone)]
struct ProgramInterface {
    uniforms: Vec<UniformInfo>,
    blocks: Vec<UniformBlockInfo>,
    attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Default)]
pub struct Recording {
    calls: Vec<Recorded>,
    stages: HashMap<ShaderObjectId, StageInterface>,
    programs: HashMap<ProgramId, ProgramInterface>,
}

impl Recording {
    pub fn calls(&self) -> impl Iterator<Item = &DriverCall> {
        self.calls.iter().map(|r| &r.call)
    }

    pub fn recorded(&self) -> &[Recorded] {
        &self.calls
    }

    pub fn count(&self, filter: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls().filter(|c| filter(c)).count()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.calls()
            .filter_map(|c| match c {
                DriverCall::Draw(draw) => Some(*draw),
                _ => None,
            })
            .collect()
    }

    /// Every value written to a uniform called `name`, in call order.
    pub fn uniform_writes(&self, name: &str) -> Vec<UniformValue> {
        self.calls()
            .filter_map(|c| match c {
                DriverCall::SetUniform {
                    name: Some(n),
                    value,
                    ..
                } if n == name => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

/// Shared handle to the call log of a [`RecordingDriver`].
#[derive(Debug, Clone, Default)]
pub struct DriverLog(Arc<Mutex<Recording>>);

impl DriverLog {
    pub fn lock(&self) -> MutexGuard<'_, Recording> {
        self.0.lock()
    }
}

#[derive(Debug)]
pub struct RecordingDriver {
    log: DriverLog,
    next_id: u32,
}

impl RecordingDriver {
    pub fn new() -> (Self, DriverLog) {
        let log = DriverLog::default();
        let driver = Self {
            log: log.clone(),
            next_id: 1,
        };
        (driver, log)
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&self, call: DriverCall) {
        self.log.lock().calls.push(Recorded {
            call,
            thread: std::thread::current().id(),
        });
    }

    fn link(&self, stages: &[ShaderObjectId]) -> Result<ProgramInterface, String> {
        let recording = self.log.lock();
        let mut merged: Vec<Declared> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();
        let mut members: Vec<(String, Declared)> = Vec::new();
        let mut inputs: Vec<Declared> = Vec::new();

        for id in stages {
            let Some(stage) = recording.stages.get(id) else {
                return Err(format!("error: shader object {} was never compiled", id.0));
            };
            if !stage.has_main {
                return Err(format!(
                    "error: shader object {} has no main function",
                    id.0
                ));
            }

            for uniform in &stage.uniforms {
                match merged.iter().find(|u| u.name == uniform.name) {
                    Some(existing) if existing.ty != uniform.ty || existing.size != uniform.size => {
                        return Err(format!(
                            "error: uniform '{}' differs between shader stages",
                            uniform.name
                        ));
                    }
                    Some(_) => {}
                    None => merged.push(uniform.clone()),
                }
            }
            for block in &stage.blocks {
                if !blocks.contains(block) {
                    blocks.push(block.clone());
                }
            }
            for member in &stage.block_members {
                if !members.iter().any(|(_, m)| m.name == member.1.name) {
                    members.push(member.clone());
                }
            }
            inputs.extend(stage.inputs.iter().cloned());
        }

        let mut next_location = 0;
        let mut uniforms: Vec<UniformInfo> = merged
            .into_iter()
            .map(|u| {
                let location = UniformLocation(next_location);
                next_location += u.size as i32;
                let name = if u.size > 1 {
                    format!("{}[0]", u.name)
                } else {
                    u.name
                };
                UniformInfo {
                    name,
                    ty: u.ty,
                    size: u.size,
                    location,
                    block: None,
                }
            })
            .collect();

        uniforms.extend(members.into_iter().map(|(block, member)| UniformInfo {
            name: member.name,
            ty: member.ty,
            size: member.size,
            location: UniformLocation(-1),
            block: blocks.iter().position(|b| *b == block).map(|i| i as u32),
        }));

        let blocks = blocks
            .into_iter()
            .enumerate()
            .map(|(index, name)| UniformBlockInfo {
                name,
                index: index as u32,
            })
            .collect();

        let mut next_slot = 0;
        let attributes = inputs
            .into_iter()
            .map(|input| {
                let location = next_slot;
                next_slot += input.ty.attribute_slots() * input.size;
                AttributeInfo {
                    name: input.name,
                    ty: input.ty,
                    location,
                }
            })
            .collect();

        Ok(ProgramInterface {
            uniforms,
            blocks,
            attributes,
        })
    }

    fn uniform_name(&self, program: ProgramId, location: UniformLocation) -> Option<String> {
        let recording = self.log.lock();
        let interface = recording.programs.get(&program)?;
        interface.uniforms.iter().find_map(|u| {
            if u.block.is_some() {
                return None;
            }
            let offset = location.0 - u.location.0;
            if offset < 0 || offset >= u.size as i32 {
                return None;
            }
            if u.size > 1 {
                let base = u.name.trim_end_matches("[0]");
                Some(format!("{base}[{offset}]"))
            } else {
                Some(u.name.clone())
            }
        })
    }
}

impl GpuDriver for RecordingDriver {
    fn create_buffer(&mut self) -> BufferId {
        let id = BufferId(self.next());
        self.record(DriverCall::CreateBuffer(id));
        id
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.record(DriverCall::DeleteBuffer(buffer));
    }

    fn buffer_data(
        &mut self,
        buffer: BufferId,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) {
        self.record(DriverCall::BufferData {
            buffer,
            target,
            len: data.len(),
            usage,
        });
    }

    fn buffer_sub_data(
        &mut self,
        buffer: BufferId,
        target: BufferTarget,
        offset: usize,
        data: &[u8],
    ) {
        self.record(DriverCall::BufferSubData {
            buffer,
            target,
            offset,
            len: data.len(),
        });
    }

    fn bind_buffer_base(&mut self, buffer: BufferId, binding: u32) {
        self.record(DriverCall::BindBufferBase { buffer, binding });
    }

    fn create_vertex_array(&mut self) -> VertexArrayId {
        let id = VertexArrayId(self.next());
        self.record(DriverCall::CreateVertexArray(id));
        id
    }

    fn delete_vertex_array(&mut self, vao: VertexArrayId) {
        self.record(DriverCall::DeleteVertexArray(vao));
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) {
        self.record(DriverCall::BindVertexArray(vao));
    }

    fn vertex_attribute(
        &mut self,
        vao: VertexArrayId,
        buffer: BufferId,
        binding: &VertexAttributeBinding,
    ) {
        self.record(DriverCall::VertexAttribute {
            vao,
            buffer,
            binding: *binding,
        });
    }

    fn element_buffer(&mut self, vao: VertexArrayId, buffer: BufferId) {
        self.record(DriverCall::ElementBuffer { vao, buffer });
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderObjectId, String> {
        let result = glsl::scan(stage, source).map(|interface| {
            let id = ShaderObjectId(self.next());
            self.log.lock().stages.insert(id, interface);
            id
        });
        self.record(DriverCall::CompileShader {
            stage,
            result: result.clone(),
        });
        result
    }

    fn delete_shader(&mut self, shader: ShaderObjectId) {
        self.log.lock().stages.remove(&shader);
        self.record(DriverCall::DeleteShader(shader));
    }

    fn link_program(&mut self, shaders: &[ShaderObjectId]) -> Result<ProgramId, String> {
        let result = self.link(shaders).map(|interface| {
            let id = ProgramId(self.next());
            self.log.lock().programs.insert(id, interface);
            id
        });
        self.record(DriverCall::LinkProgram(result.clone()));
        result
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.log.lock().programs.remove(&program);
        self.record(DriverCall::DeleteProgram(program));
    }

    fn active_uniform_blocks(&self, program: ProgramId) -> Vec<UniformBlockInfo> {
        self.log
            .lock()
            .programs
            .get(&program)
            .map(|p| p.blocks.clone())
            .unwrap_or_default()
    }

    fn active_uniforms(&self, program: ProgramId) -> Vec<UniformInfo> {
        self.log
            .lock()
            .programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_attributes(&self, program: ProgramId) -> Vec<AttributeInfo> {
        self.log
            .lock()
            .programs
            .get(&program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: ProgramId) {
        self.record(DriverCall::UseProgram(program));
    }

    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: &UniformValue) {
        let name = self.uniform_name(program, location);
        self.record(DriverCall::SetUniform {
            program,
            name,
            location,
            value: *value,
        });
    }

    fn uniform_block_binding(&mut self, program: ProgramId, block_index: u32, binding: u32) {
        self.record(DriverCall::UniformBlockBinding {
            program,
            block_index,
            binding,
        });
    }

    fn create_texture(&mut self, kind: TextureKind) -> TextureId {
        let id = TextureId(self.next());
        self.record(DriverCall::CreateTexture(id, kind));
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.record(DriverCall::DeleteTexture(texture));
    }

    fn texture_data(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        self.record(DriverCall::TextureData {
            texture,
            format,
            width,
            height,
            len: data.len(),
        });
    }

    fn texture_storage(&mut self, texture: TextureId, storage: &TextureStorage) {
        self.record(DriverCall::TextureStorage(texture, *storage));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId, kind: TextureKind) {
        self.record(DriverCall::BindTexture {
            unit,
            texture,
            kind,
        });
    }

    fn sampler_state(&mut self, texture: TextureId, _kind: TextureKind, sampler: &SamplerState) {
        self.record(DriverCall::SamplerState(texture, *sampler));
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = FramebufferId(self.next());
        self.record(DriverCall::CreateFramebuffer(id));
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.record(DriverCall::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.record(DriverCall::BindFramebuffer(framebuffer));
    }

    fn attach_depth(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        face: Option<CubeFace>,
    ) {
        self.record(DriverCall::AttachDepth {
            framebuffer,
            texture,
            face,
        });
    }

    fn attach_color(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        face: Option<CubeFace>,
    ) {
        self.record(DriverCall::AttachColor {
            framebuffer,
            texture,
            face,
        });
    }

    fn viewport(&mut self, rect: Rect) {
        self.record(DriverCall::Viewport(rect));
    }

    fn scissor(&mut self, rect: Option<Rect>) {
        self.record(DriverCall::Scissor(rect));
    }

    fn clear(&mut self, color: Option<Vec4>, depth: bool) {
        self.record(DriverCall::Clear { color, depth });
    }

    fn render_state(&mut self, state: &RenderState) {
        self.record(DriverCall::RenderState(*state));
    }

    fn draw(&mut self, call: &DrawCall) {
        self.record(DriverCall::Draw(*call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UniformType;

    const VERT: &str = "#version 330 core\nin vec3 position;\nin mat4 i_model;\nuniform mat4 u_view;\nuniform float u_weights[3];\nvoid main() {}\n";
    const FRAG: &str = "#version 330 core\nuniform vec4 u_tint;\nuniform mat4 u_view;\nvoid main() {}\n";

    #[test]
    fn link_merges_stage_interfaces() {
        let (mut driver, log) = RecordingDriver::new();
        let vs = driver.compile_shader(ShaderStage::Vertex, VERT).unwrap();
        let fs = driver.compile_shader(ShaderStage::Fragment, FRAG).unwrap();
        let program = driver.link_program(&[vs, fs]).unwrap();

        let uniforms = driver.active_uniforms(program);
        let names: Vec<_> = uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["u_view", "u_weights[0]", "u_tint"]);
        assert_eq!(uniforms[1].size, 3);
        assert_eq!(uniforms[2].location, UniformLocation(4));

        let attributes = driver.active_attributes(program);
        assert_eq!(attributes[1].ty, UniformType::Mat4);
        assert_eq!(attributes[1].location, 1);

        driver.set_uniform(program, UniformLocation(2), &UniformValue::Float(0.5));
        assert_eq!(
            log.lock().uniform_writes("u_weights[1]"),
            vec![UniformValue::Float(0.5)]
        );
    }

    #[test]
    fn link_fails_on_conflicting_uniforms() {
        let (mut driver, _log) = RecordingDriver::new();
        let vs = driver
            .compile_shader(ShaderStage::Vertex, "uniform vec3 u_x;\nvoid main() {}\n")
            .unwrap();
        let fs = driver
            .compile_shader(ShaderStage::Fragment, "uniform vec4 u_x;\nvoid main() {}\n")
            .unwrap();
        let err = driver.link_program(&[vs, fs]).unwrap_err();
        assert!(err.contains("u_x"));
    }

    #[test]
    fn link_fails_without_main() {
        let (mut driver, _log) = RecordingDriver::new();
        let vs = driver
            .compile_shader(ShaderStage::Vertex, "uniform vec3 u_x;\n")
            .unwrap();
        assert!(driver.link_program(&[vs]).is_err());
    }

    #[test]
    fn records_calling_thread() {
        let (mut driver, log) = RecordingDriver::new();
        let buffer = driver.create_buffer();
        driver.delete_buffer(buffer);

        let recording = log.lock();
        let deletes: Vec<_> = recording
            .recorded()
            .iter()
            .filter(|r| r.call.is_delete())
            .collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].thread, std::thread::current().id());
    }
}
