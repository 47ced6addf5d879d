use crate::driver::ShaderStage;
use snafu::Snafu;
use wgpu::TextureFormat;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)), visibility(pub(crate)))]
pub enum ShaderError {
    #[snafu(display("Shader {name:?} has no #version directive"))]
    MissingVersion { name: String },

    #[snafu(display("Shader {name:?} failed to compile its {stage:?} stage:\n{log}"))]
    Compile {
        name: String,
        stage: ShaderStage,
        log: String,
    },

    #[snafu(display("Shader {name:?} failed to link:\n{log}"))]
    Link { name: String, log: String },
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)), visibility(pub(crate)))]
pub enum ResourceError {
    #[snafu(display(
        "Vertex data holds {len} floats, which is not a multiple of the {stride} float stride"
    ))]
    VertexDataLength { len: usize, stride: usize },

    #[snafu(display("Texture data holds {actual} bytes, expected {expected}"))]
    TextureDataLength { expected: usize, actual: usize },

    #[snafu(display("Texture format {format:?} cannot be uploaded from raw bytes"))]
    UnsupportedTextureFormat { format: TextureFormat },
}
