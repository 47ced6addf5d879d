use crate::assets::shader::ShaderDescription;
use crate::assets::texture::TextureBinding;
use crate::driver::{RenderState, UniformValue};
use crate::release::ResourceId;
use bon::Builder;
use glamx::Vec4;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tint the builtin shaders multiply every fragment by.
pub const BASE_COLOR: &str = "u_base_color";

/// Shader, define set, uniform values and textures a group is drawn with.
///
/// A property set to `None` stays in the map: the next bind writes the uniform's zero value
/// instead of keeping whatever was written before. Every material starts with a white
/// [`BASE_COLOR`], programs without that uniform ignore it.
#[derive(Debug, Builder)]
pub struct Material {
    #[builder(skip = ResourceId::new())]
    id: ResourceId,
    shader: Arc<ShaderDescription>,
    #[builder(default)]
    defines: Vec<String>,
    #[builder(default)]
    state: RenderState,
    #[builder(default = true)]
    casts_shadows: bool,
    #[builder(skip = default_props())]
    props: RwLock<BTreeMap<String, Option<UniformValue>>>,
    #[builder(skip)]
    textures: RwLock<BTreeMap<String, Option<TextureBinding>>>,
}

impl Material {
    pub fn new(shader: Arc<ShaderDescription>) -> Self {
        Self::builder().shader(shader).build()
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn shader(&self) -> &Arc<ShaderDescription> {
        &self.shader
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }

    pub fn set_prop(&self, name: impl Into<String>, value: Option<UniformValue>) {
        self.props.write().insert(name.into(), value);
    }

    pub fn prop(&self, name: &str) -> Option<UniformValue> {
        self.props.read().get(name).copied().flatten()
    }

    pub fn props(&self) -> RwLockReadGuard<'_, BTreeMap<String, Option<UniformValue>>> {
        self.props.read()
    }

    /// Assigns a texture slot. `None` samples the white fallback.
    pub fn set_texture(&self, name: impl Into<String>, binding: Option<TextureBinding>) {
        self.textures.write().insert(name.into(), binding);
    }

    pub fn textures(&self) -> RwLockReadGuard<'_, BTreeMap<String, Option<TextureBinding>>> {
        self.textures.read()
    }
}

fn default_props() -> RwLock<BTreeMap<String, Option<UniformValue>>> {
    let white = UniformValue::Vec4(Vec4::ONE);
    RwLock::new(BTreeMap::from([(BASE_COLOR.to_string(), Some(white))]))
}
