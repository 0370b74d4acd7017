//! The CPU/GPU data contract: binding slots and byte layouts.

pub mod bindings;
pub mod types;

pub use bindings::{BindingTable, BufferIndex, GBufferTexture, SlotOverride, TextureIndex};
pub use types::*;
