//! Render pass definitions for the render graph

use crate::backend::command::{Command, CommandList, PassKind};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameBufferKind, FrameBuffers, FrameId};
use crate::gpu::{BindingTable, BufferIndex};
use crate::pipeline::indirect::IndirectCommandBuffer;
use crate::pipeline::shadow_pass::ShadowView;
use crate::pipeline::terrain::TerrainDraw;
use crate::render_graph::resource::*;
use crate::resources::GeometryBuffers;
use std::any::Any;
use std::collections::HashMap;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for setting up pass resources
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a mut Vec<VirtualTexture>,
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) next_resource_id: &'a mut u32,
    pub(crate) screen_width: u32,
    pub(crate) screen_height: u32,
}

impl<'a> PassSetupContext<'a> {
    /// Create a new texture resource
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        let id = ResourceId(*self.next_resource_id);
        *self.next_resource_id += 1;

        self.resources.push(VirtualTexture {
            id,
            desc,
            name: name.to_string(),
        });

        id
    }

    /// Create a texture with size relative to screen
    pub fn create_texture_relative(
        &mut self,
        name: &str,
        size: TextureSize,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> ResourceId {
        let (width, height) = size.resolve(self.screen_width, self.screen_height);

        self.create_texture(
            name,
            TextureDescriptor {
                label: Some(name.to_string()),
                width,
                height,
                format,
                usage,
            },
        )
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }
}

/// Per-frame state every pass encodes against.
pub struct FrameContext<'a> {
    pub frame: FrameId,
    pub bindings: &'a BindingTable,
    pub buffers: &'a FrameBuffers,
    pub geometry: Option<GeometryBuffers>,
    pub indirect: &'a IndirectCommandBuffer,
    pub terrain: Option<TerrainDraw>,
    pub shadow: Option<&'a ShadowView>,
    pub clear_color: [f32; 4],
}

/// Context for encoding a render pass
pub struct PassEncodeContext<'a> {
    pub commands: &'a mut CommandList,
    pub textures: &'a HashMap<ResourceId, TextureHandle>,
    pub frame: &'a FrameContext<'a>,
}

impl<'a> PassEncodeContext<'a> {
    /// Get the texture allocated for a resource
    pub fn texture(&self, resource: ResourceId) -> RenderResult<TextureHandle> {
        self.textures.get(&resource).copied().ok_or_else(|| {
            RenderError::Backend(BackendError::InvalidHandle(format!(
                "render graph resource {resource:?} was never allocated"
            )))
        })
    }

    /// Get a frame buffer of this frame's slot
    pub fn frame_buffer(&self, kind: FrameBufferKind) -> RenderResult<BufferHandle> {
        self.frame.buffers.handle(kind).ok_or_else(|| {
            RenderError::Backend(BackendError::InvalidHandle(format!(
                "frame slot has no {kind:?} buffer"
            )))
        })
    }

    /// Record a binding of `buffer` at the slot the binding table assigns to `index`
    pub fn bind(&mut self, index: BufferIndex, buffer: BufferHandle) {
        let slot = self.frame.bindings.slot(index);
        self.commands.push(Command::BindBuffer {
            index,
            slot,
            buffer,
            offset: 0,
        });
    }

    /// Bind a frame buffer of this frame's slot
    pub fn bind_frame_buffer(&mut self, index: BufferIndex, kind: FrameBufferKind) -> RenderResult<()> {
        let buffer = self.frame_buffer(kind)?;
        self.bind(index, buffer);
        Ok(())
    }
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Kernel family the pass runs
    fn kind(&self) -> PassKind;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Encode phase - record commands for the current frame
    fn encode(&self, ctx: &mut PassEncodeContext) -> RenderResult<()>;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub kind: PassKind,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource)
    }
}
