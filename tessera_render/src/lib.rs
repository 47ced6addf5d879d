//! Retained-mode renderer core.
//!
//! Scene data lives on the CPU as shared descriptions. The caches in [`cache`] mirror them on
//! the GPU and re-upload whenever an update counter moves. Renderables sharing a description
//! are drawn as one instanced [`group::RenderableGroup`], and every frame is a chain of
//! [`step`] stages driven by [`Render`].

pub mod assets;
pub mod builtin;
pub mod cache;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod group;
pub mod lighting;
pub mod release;
pub mod render;
pub mod scene;
pub mod sky;
pub mod stats;
pub mod step;

pub use config::RenderConfig;
pub use context::RenderContext;
pub use driver::GpuDriver;
pub use error::{ResourceError, ShaderError};
pub use render::Render;
pub use scene::{Camera, Entity, EntityId, Light, LightKind, LightParams, RenderEvent, Renderable};
pub use stats::FrameStats;
