use crate::assets::shader::{ShaderDescription, split_version};
use crate::driver::{
    AttributeInfo, GpuDriver, ProgramId, ShaderStage, UniformLocation, UniformType, UniformValue,
};
use crate::error::{CompileErr, LinkErr, MissingVersionErr, ShaderError};
use crate::release::{ReleaseSender, ResourceId};
use itertools::Itertools;
use slotmap::{SlotMap, new_key_type};
use snafu::OptionExt;
use std::collections::{HashMap, HashSet};
use tessera_utils::hash::{mix, str_hash, xor_hash};
use tracing::{debug, error, trace, warn};

type Result<T, E = ShaderError> = std::result::Result<T, E>;

new_key_type! { pub struct ShaderHandle; }

/// Hash identifying a variant of a shader: the name XOR every define.
///
/// XOR makes the result independent of the order the defines are given in.
pub fn variant_hash<I, S>(name: &str, defines: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    str_hash(name) ^ xor_hash(defines)
}

/// Sorted and deduplicated, so equal define sets compile to identical sources.
fn normalize<I, S>(defines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    defines
        .into_iter()
        .map(|d| d.as_ref().trim().to_string())
        .filter(|d| !d.is_empty())
        .sorted()
        .dedup()
        .collect()
}

#[derive(Debug, Clone)]
pub struct UniformSlot {
    pub location: UniformLocation,
    pub ty: UniformType,
    cached: Option<UniformValue>,
}

#[derive(Debug, Clone)]
struct BlockSlot {
    index: u32,
    binding: Option<u32>,
}

/// A linked program and everything introspected from it.
#[derive(Debug)]
pub struct Shader {
    name: String,
    source: ResourceId,
    program: ProgramId,
    defines: Vec<String>,
    defines_hash: u64,
    uniforms: HashMap<String, UniformSlot>,
    samplers: HashMap<String, UniformSlot>,
    blocks: HashMap<String, BlockSlot>,
    attributes: HashMap<String, AttributeInfo>,
    attribute_hash: u64,
}

impl Shader {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    pub fn defines_hash(&self) -> u64 {
        self.defines_hash
    }

    /// Hash of the vertex inputs. Programs with equal hashes can use the same vertex layout.
    pub fn attribute_hash(&self) -> u64 {
        self.attribute_hash
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.attributes.values()
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.contains_key(name)
    }

    pub fn has_sampler(&self, name: &str) -> bool {
        self.samplers.contains_key(name)
    }

    /// Sampler uniforms by name, array elements expanded, in name order.
    pub fn samplers(&self) -> impl Iterator<Item = (&str, UniformType)> {
        self.samplers
            .iter()
            .map(|(name, slot)| (name.as_str(), slot.ty))
            .sorted_by_key(|&(name, _)| name)
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformSlot> {
        self.uniforms.get(name)
    }

    /// The last value written through [`Shader::set`].
    pub fn cached_value(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).and_then(|slot| slot.cached)
    }

    /// Writes a uniform. `None` writes the zero value of the uniform's type.
    ///
    /// Unknown names and values equal to the last written one cause no driver call.
    /// Returns whether the driver was called.
    pub fn set(
        &mut self,
        driver: &mut dyn GpuDriver,
        name: &str,
        value: Option<&UniformValue>,
    ) -> bool {
        let Some(slot) = self.uniforms.get_mut(name) else {
            return false;
        };

        let value = value.copied().unwrap_or(UniformValue::zero(slot.ty));
        if !value.matches(slot.ty) {
            warn!(
                "Uniform {name:?} of shader {:?} is {:?}, got {value:?}",
                self.name, slot.ty
            );
            return false;
        }
        if slot.cached == Some(value) {
            return false;
        }

        driver.set_uniform(self.program, slot.location, &value);
        slot.cached = Some(value);
        true
    }

    /// Points a sampler uniform at a texture unit. Returns `false` if the program has no
    /// sampler called `name`.
    pub fn bind_sampler(&mut self, driver: &mut dyn GpuDriver, name: &str, unit: u32) -> bool {
        let Some(slot) = self.samplers.get_mut(name) else {
            return false;
        };

        let value = UniformValue::Int(unit as i32);
        if slot.cached != Some(value) {
            driver.set_uniform(self.program, slot.location, &value);
            slot.cached = Some(value);
        }
        true
    }

    /// Connects a uniform block to a buffer binding point. Returns `false` if the program has
    /// no block called `name`.
    pub fn bind_block(&mut self, driver: &mut dyn GpuDriver, name: &str, binding: u32) -> bool {
        let Some(block) = self.blocks.get_mut(name) else {
            return false;
        };

        if block.binding != Some(binding) {
            driver.uniform_block_binding(self.program, block.index, binding);
            block.binding = Some(binding);
        }
        true
    }

    fn introspect(
        driver: &dyn GpuDriver,
        name: String,
        source: ResourceId,
        program: ProgramId,
        defines: Vec<String>,
        defines_hash: u64,
    ) -> Self {
        let blocks = driver
            .active_uniform_blocks(program)
            .into_iter()
            .map(|block| {
                let slot = BlockSlot {
                    index: block.index,
                    binding: None,
                };
                (block.name, slot)
            })
            .collect();

        let mut uniforms = HashMap::new();
        let mut samplers = HashMap::new();
        for info in driver.active_uniforms(program) {
            if info.block.is_some() {
                continue;
            }

            let target = if info.ty.is_sampler() {
                &mut samplers
            } else {
                &mut uniforms
            };

            match info.name.strip_suffix("[0]") {
                Some(base) => {
                    for i in 0..info.size.max(1) {
                        let slot = UniformSlot {
                            location: UniformLocation(info.location.0 + i as i32),
                            ty: info.ty,
                            cached: None,
                        };
                        target.insert(format!("{base}[{i}]"), slot);
                    }
                }
                None => {
                    let slot = UniformSlot {
                        location: info.location,
                        ty: info.ty,
                        cached: None,
                    };
                    target.insert(info.name, slot);
                }
            }
        }

        let attributes: HashMap<String, AttributeInfo> = driver
            .active_attributes(program)
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();

        let attribute_hash = attributes
            .values()
            .sorted_by_key(|a| a.location)
            .fold(0, |acc, a| mix(acc ^ str_hash(&a.name), a.location as u64));

        Self {
            name,
            source,
            program,
            defines,
            defines_hash,
            uniforms,
            samplers,
            blocks,
            attributes,
            attribute_hash,
        }
    }
}

/// Compiled shader variants, keyed by source and define set.
#[derive(Debug)]
pub struct ShaderManager {
    shaders: SlotMap<ShaderHandle, Shader>,
    by_key: HashMap<(ResourceId, u64), ShaderHandle>,
    failed: HashSet<(ResourceId, u64)>,
    release: ReleaseSender,
}

impl ShaderManager {
    pub fn new(release: ReleaseSender) -> Self {
        Self {
            shaders: SlotMap::with_key(),
            by_key: HashMap::new(),
            failed: HashSet::new(),
            release,
        }
    }

    /// Resolves the variant of `desc` with `defines`, compiling it on first use.
    ///
    /// # Panics
    /// When the source cannot be compiled or linked. The message names the shader and holds
    /// the driver log.
    #[profiling::function]
    pub fn setup<I, S>(
        &mut self,
        driver: &mut dyn GpuDriver,
        desc: &ShaderDescription,
        defines: I,
    ) -> ShaderHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.try_setup(driver, desc, defines) {
            Ok(handle) => handle,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_setup<I, S>(
        &mut self,
        driver: &mut dyn GpuDriver,
        desc: &ShaderDescription,
        defines: I,
    ) -> Result<ShaderHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let defines = normalize(defines);
        let hash = variant_hash(desc.name(), &defines);
        if let Some(&handle) = self.by_key.get(&(desc.id(), hash)) {
            return Ok(handle);
        }

        let shader = build(driver, desc, defines, hash)?;
        desc.release_hook().attach(&self.release);
        let handle = self.shaders.insert(shader);
        self.by_key.insert((desc.id(), hash), handle);
        self.failed.remove(&(desc.id(), hash));
        Ok(handle)
    }

    /// Resolves a variant at runtime. A variant that fails to build is logged once and
    /// `previous` is returned instead; later calls for the same define set do not retry.
    #[profiling::function]
    pub fn recompile<I, S>(
        &mut self,
        driver: &mut dyn GpuDriver,
        desc: &ShaderDescription,
        defines: I,
        previous: Option<ShaderHandle>,
    ) -> Option<ShaderHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let defines = normalize(defines);
        let key = (desc.id(), variant_hash(desc.name(), &defines));
        if self.failed.contains(&key) {
            trace!("Skipping known bad variant of shader {:?}", desc.name());
            return previous;
        }

        match self.try_setup(driver, desc, &defines) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Keeping previous variant: {e}");
                self.failed.insert(key);
                previous
            }
        }
    }

    pub fn get(&self, handle: ShaderHandle) -> Option<&Shader> {
        self.shaders.get(handle)
    }

    pub fn get_mut(&mut self, handle: ShaderHandle) -> Option<&mut Shader> {
        self.shaders.get_mut(handle)
    }

    /// Deletes every variant built from the source `id`.
    pub fn release(&mut self, driver: &mut dyn GpuDriver, id: ResourceId) {
        let handles: Vec<ShaderHandle> = self
            .by_key
            .iter()
            .filter(|((source, _), _)| *source == id)
            .map(|(_, handle)| *handle)
            .collect();
        self.by_key.retain(|(source, _), _| *source != id);
        self.failed.retain(|(source, _)| *source != id);

        for handle in handles {
            if let Some(shader) = self.shaders.remove(handle) {
                debug!("Deleting shader {:?} ({} defines)", shader.name, shader.defines.len());
                driver.delete_program(shader.program);
            }
        }
    }

    pub fn live(&self) -> usize {
        self.shaders.len()
    }

    /// Deletes every program, including variants of sources that are still alive.
    pub fn clear(&mut self, driver: &mut dyn GpuDriver) {
        for (_, shader) in self.shaders.drain() {
            driver.delete_program(shader.program);
        }
        self.by_key.clear();
        self.failed.clear();
    }
}

fn compose(version: &str, body: &str, stage: ShaderStage, defines: &[String]) -> String {
    let mut source = String::with_capacity(version.len() + body.len() + 32 * (defines.len() + 1));
    source.push_str(version);
    source.push('\n');
    source.push_str("#define ");
    source.push_str(stage.define());
    source.push('\n');
    for define in defines {
        source.push_str("#define ");
        source.push_str(define);
        source.push('\n');
    }
    source.push_str(body);
    source
}

fn build(
    driver: &mut dyn GpuDriver,
    desc: &ShaderDescription,
    defines: Vec<String>,
    hash: u64,
) -> Result<Shader> {
    let name = desc.name();
    let (version, body) = split_version(desc.source()).context(MissingVersionErr { name })?;

    let mut objects = Vec::with_capacity(ShaderStage::ALL.len());
    for stage in ShaderStage::ALL {
        let source = compose(version, body, stage, &defines);
        match driver.compile_shader(stage, &source) {
            Ok(object) => objects.push(object),
            Err(log) => {
                for object in objects {
                    driver.delete_shader(object);
                }
                return CompileErr { name, stage, log }.fail();
            }
        }
    }

    let linked = driver.link_program(&objects);
    for object in objects {
        driver.delete_shader(object);
    }
    let program = linked.map_err(|log| LinkErr { name, log }.build())?;

    debug!("Linked shader {name:?} with defines {defines:?}");
    Ok(Shader::introspect(
        driver,
        name.to_string(),
        desc.id(),
        program,
        defines,
        hash,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DriverCall, RecordingDriver};
    use crate::release::ReleaseQueue;
    use glamx::Vec4;

    const SOURCE: &str = r#"#version 330 core
layout(std140) uniform Camera {
    mat4 view_projection;
};

#ifdef VERT_SRC
in vec3 position;
#ifdef HAS_NORMAL
in vec3 normal;
#endif
in vec4 i_color;
in mat4 i_model;
void main() {}
#endif

#ifdef FRAG_SRC
uniform vec4 u_tint;
uniform float u_weights[3];
uniform sampler2D u_albedo;
#ifdef BROKEN
#error this variant does not build
#endif
void main() {}
#endif
"#;

    fn manager() -> (ShaderManager, ReleaseQueue) {
        let queue = ReleaseQueue::new();
        (ShaderManager::new(queue.sender()), queue)
    }

    #[test]
    fn define_order_does_not_create_new_variants() {
        let (mut driver, log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);

        let a = shaders.setup(&mut driver, &desc, ["HAS_NORMAL", "FOG"]);
        let b = shaders.setup(&mut driver, &desc, ["FOG", "HAS_NORMAL"]);
        let c = shaders.setup(&mut driver, &desc, ["FOG", "HAS_NORMAL", "FOG"]);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(shaders.live(), 1);
        assert_eq!(
            log.lock()
                .count(|c| matches!(c, DriverCall::LinkProgram(Ok(_)))),
            1
        );

        let plain = shaders.setup(&mut driver, &desc, [] as [&str; 0]);
        assert_ne!(a, plain);
        assert_eq!(shaders.live(), 2);
    }

    #[test]
    fn introspection_separates_uniforms_samplers_and_blocks() {
        let (mut driver, _log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);
        let handle = shaders.setup(&mut driver, &desc, ["HAS_NORMAL"]);
        let shader = shaders.get(handle).unwrap();

        assert!(shader.has_uniform("u_tint"));
        assert!(shader.has_uniform("u_weights[0]"));
        assert!(shader.has_uniform("u_weights[2]"));
        assert!(!shader.has_uniform("u_weights[3]"));
        assert!(!shader.has_uniform("u_albedo"));
        assert!(shader.has_sampler("u_albedo"));
        assert_eq!(
            shader.samplers().collect::<Vec<_>>(),
            vec![("u_albedo", UniformType::Sampler2D)]
        );
        assert!(shader.has_block("Camera"));
        assert!(!shader.has_uniform("view_projection"));
        assert!(shader.attribute("normal").is_some());
        assert_eq!(
            shader.uniform("u_weights[1]").unwrap().location.0,
            shader.uniform("u_weights[0]").unwrap().location.0 + 1
        );
    }

    #[test]
    fn attribute_hash_follows_inputs_only() {
        let (mut driver, _log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);

        let a = shaders.setup(&mut driver, &desc, ["FOG"]);
        let b = shaders.setup(&mut driver, &desc, ["SHINY"]);
        let c = shaders.setup(&mut driver, &desc, ["HAS_NORMAL"]);
        let hash = |h| shaders.get(h).unwrap().attribute_hash();
        assert_eq!(hash(a), hash(b));
        assert_ne!(hash(a), hash(c));
    }

    #[test]
    fn set_skips_unknown_and_repeated_values() {
        let (mut driver, log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);
        let handle = shaders.setup(&mut driver, &desc, [] as [&str; 0]);
        let shader = shaders.get_mut(handle).unwrap();

        let red = UniformValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(shader.set(&mut driver, "u_tint", Some(&red)));
        assert!(!shader.set(&mut driver, "u_tint", Some(&red)));
        assert!(!shader.set(&mut driver, "u_missing", Some(&red)));
        assert!(!shader.set(&mut driver, "u_tint", Some(&UniformValue::Float(1.0))));

        assert!(shader.set(&mut driver, "u_tint", None));
        assert_eq!(shader.cached_value("u_tint"), Some(UniformValue::Vec4(Vec4::ZERO)));
        assert!(!shader.set(&mut driver, "u_tint", None));

        assert_eq!(
            log.lock().uniform_writes("u_tint"),
            vec![red, UniformValue::Vec4(Vec4::ZERO)]
        );
    }

    #[test]
    fn bind_sampler_and_block_ignore_undeclared_names() {
        let (mut driver, log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);
        let handle = shaders.setup(&mut driver, &desc, [] as [&str; 0]);
        let shader = shaders.get_mut(handle).unwrap();

        assert!(shader.bind_sampler(&mut driver, "u_albedo", 2));
        assert!(shader.bind_sampler(&mut driver, "u_albedo", 2));
        assert!(!shader.bind_sampler(&mut driver, "u_shadow_maps[0]", 3));
        assert!(shader.bind_block(&mut driver, "Camera", 0));
        assert!(!shader.bind_block(&mut driver, "Lights", 1));

        let recording = log.lock();
        assert_eq!(recording.uniform_writes("u_albedo"), vec![UniformValue::Int(2)]);
        assert_eq!(
            recording.count(|c| matches!(c, DriverCall::UniformBlockBinding { .. })),
            1
        );
    }

    #[test]
    #[should_panic(expected = "broken")]
    fn setup_panics_with_shader_name_on_compile_error() {
        let (mut driver, _log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("broken", SOURCE);
        shaders.setup(&mut driver, &desc, ["BROKEN"]);
    }

    #[test]
    fn missing_version_is_reported() {
        let (mut driver, _log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("headless", "void main() {}\n");
        let err = shaders
            .try_setup(&mut driver, &desc, [] as [&str; 0])
            .unwrap_err();
        assert!(matches!(err, ShaderError::MissingVersion { .. }));
    }

    #[test]
    fn recompile_keeps_previous_variant_and_does_not_retry() {
        let (mut driver, log) = RecordingDriver::new();
        let (mut shaders, _queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);
        let good = shaders.setup(&mut driver, &desc, [] as [&str; 0]);

        let first = shaders.recompile(&mut driver, &desc, ["BROKEN"], Some(good));
        let second = shaders.recompile(&mut driver, &desc, ["BROKEN"], Some(good));
        assert_eq!(first, Some(good));
        assert_eq!(second, Some(good));
        assert_eq!(
            log.lock()
                .count(|c| matches!(c, DriverCall::CompileShader { result: Err(_), .. })),
            1
        );

        let variant = shaders.recompile(&mut driver, &desc, ["HAS_NORMAL"], Some(good));
        assert!(variant.is_some_and(|v| v != good));
    }

    #[test]
    fn release_deletes_all_variants_of_a_source() {
        let (mut driver, log) = RecordingDriver::new();
        let (mut shaders, queue) = manager();
        let desc = ShaderDescription::new("lit", SOURCE);
        let other = ShaderDescription::new("other", SOURCE);
        shaders.setup(&mut driver, &desc, ["A"]);
        shaders.setup(&mut driver, &desc, ["B"]);
        let kept = shaders.setup(&mut driver, &other, ["A"]);

        drop(desc);
        for release in queue.drain() {
            if let crate::release::Release::Shader(source) = release {
                shaders.release(&mut driver, source);
            }
        }

        assert_eq!(shaders.live(), 1);
        assert!(shaders.get(kept).is_some());
        assert_eq!(
            log.lock()
                .count(|c| matches!(c, DriverCall::DeleteProgram(_))),
            2
        );
    }
}
