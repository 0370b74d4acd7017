//! Stellar - a GPU-driven deferred renderer
//!
//! Per frame the renderer packs camera, light and material state into
//! buffers laid out for fixed binding slots, batches drawables into an
//! instance stream with one indirect draw per (mesh, material) pair,
//! tessellates terrain by camera distance, and runs a render graph of
//! three passes: G-buffer, sun shadow map and fullscreen deferred lighting.
//!
//! Two backends execute the recorded commands:
//! - **software**: CPU rasterizer and lighting kernels, always available
//! - **wgpu**: headless GPU realization behind the `wgpu-backend` feature
//!
//! # Features
//! - Render graph with deterministic pass ordering
//! - Frame pool with fence-guarded buffer reuse and 1-3 frames in flight
//! - Indirect instanced draws over a shared geometry arena
//! - Distance-based terrain tessellation with frustum culling
//! - Cook-Torrance shading with sun, point, spot and ambient lights

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod logging;
pub mod math;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod shaders;

pub use backend::{CompletionMode, GraphicsBackend, SoftwareBackend, TextureReadback};
pub use config::RendererConfig;
pub use error::{Diagnostic, RenderError, RenderResult};
pub use gpu::{BindingTable, BufferIndex, GBufferTexture};
pub use logging::{init_logging, LoggingConfig};
pub use pipeline::{DeferredRenderer, FrameOutcome, FrameReport, PreparedFrame};
pub use scene::{Camera, Drawable, FrameInput, Light};

#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuBackend;

static_assertions::assert_impl_all!(SoftwareBackend: Send);
static_assertions::assert_impl_all!(FrameInput: Send, Sync);
