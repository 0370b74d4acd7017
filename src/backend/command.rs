//! Recorded command lists handed to a backend at submission.
//!
//! Passes record backend-neutral commands; each backend realizes them on
//! its own device. Buffer bindings carry both the logical index and the
//! resolved slot so backends never re-derive the binding table.

use crate::backend::traits::{BufferHandle, TextureHandle};
use crate::gpu::{BufferIndex, GBufferTexture};

/// Which kernel family a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    GBuffer,
    Shadow,
    Lighting,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

/// Rasterizer depth bias applied while rendering a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub slope_scale: f32,
    pub clamp: f32,
}

impl DepthBias {
    /// Bias for a triangle whose maximum depth slope is `slope`.
    pub fn resolve(&self, slope: f32) -> f32 {
        let bias = self.constant + self.slope_scale * slope;
        if self.clamp > 0.0 {
            bias.min(self.clamp)
        } else if self.clamp < 0.0 {
            bias.max(self.clamp)
        } else {
            bias
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorTarget {
    pub texture: TextureHandle,
    pub load: LoadOp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthTarget {
    pub texture: TextureHandle,
    /// Clear depth, or `None` to keep existing contents.
    pub clear: Option<f32>,
    pub bias: Option<DepthBias>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassDescriptor {
    pub label: String,
    pub kind: PassKind,
    pub color_targets: Vec<ColorTarget>,
    pub depth_target: Option<DepthTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass(PassDescriptor),
    BindBuffer {
        index: BufferIndex,
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindTexture {
        binding: GBufferTexture,
        texture: TextureHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
    },
    /// Instanced draw whose arguments live in a GPU buffer; per-instance data
    /// comes from the buffer bound at [`BufferIndex::Instances`].
    DrawIndexedIndirect {
        buffer: BufferHandle,
        offset: u64,
    },
    /// Non-instanced draw using the buffer bound at [`BufferIndex::ModelParams`].
    DrawIndexed {
        first_index: u32,
        index_count: u32,
        base_vertex: i32,
    },
    /// One full-screen triangle for screen-space passes.
    DrawFullscreen,
    EndPass,
}

/// Commands for one frame, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    pub label: String,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: Command) {
        log::trace!("[{}] record {:?}", self.label, command);
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Every buffer the list reads.
    pub fn referenced_buffers(&self) -> Vec<BufferHandle> {
        let mut buffers = Vec::new();
        for command in &self.commands {
            let handle = match command {
                Command::BindBuffer { buffer, .. }
                | Command::SetIndexBuffer { buffer }
                | Command::DrawIndexedIndirect { buffer, .. } => *buffer,
                _ => continue,
            };
            if !buffers.contains(&handle) {
                buffers.push(handle);
            }
        }
        buffers
    }

    /// Labels of the passes in recorded order.
    pub fn pass_order(&self) -> Vec<(String, PassKind)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::BeginPass(desc) => Some((desc.label.clone(), desc.kind)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_bias_clamp() {
        let bias = DepthBias {
            constant: 0.01,
            slope_scale: 1.0,
            clamp: 0.01,
        };
        assert_eq!(bias.resolve(0.0), 0.01);
        assert_eq!(bias.resolve(5.0), 0.01);

        let unclamped = DepthBias {
            constant: 0.001,
            slope_scale: 0.5,
            clamp: 0.0,
        };
        assert!((unclamped.resolve(0.1) - 0.051).abs() < 1e-6);
    }

    #[test]
    fn test_referenced_buffers_dedup() {
        let mut list = CommandList::new("frame");
        let buffer = BufferHandle(4);
        list.push(Command::BindBuffer {
            index: BufferIndex::Instances,
            slot: 16,
            buffer,
            offset: 0,
        });
        list.push(Command::DrawIndexedIndirect { buffer, offset: 0 });
        list.push(Command::SetIndexBuffer {
            buffer: BufferHandle(9),
        });
        assert_eq!(list.referenced_buffers(), vec![buffer, BufferHandle(9)]);
    }
}
