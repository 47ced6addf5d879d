//! CPU-side descriptions the renderer builds GPU objects from.

pub mod material;
pub mod mesh;
pub mod shader;
pub mod texture;

pub use material::Material;
pub use mesh::{Indices, MeshData, MeshDescription, VertexAttribute, VertexLayout};
pub use shader::ShaderDescription;
pub use texture::{TextureBinding, TextureData, TextureDescription};
