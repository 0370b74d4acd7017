//! Backend abstraction layer
//!
//! Provides the traits and command types both backends implement. The
//! software backend is always built; the wgpu backend sits behind the
//! `wgpu-backend` feature.

pub mod command;
pub mod software;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use command::*;
pub use software::{CompletionMode, SoftwareBackend};
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;
