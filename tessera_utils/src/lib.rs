pub mod hash;
mod logging;
mod render_args;

pub use render_args::RenderArgs;

pub use tracing;
