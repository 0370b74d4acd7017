//! Render graph executor

use crate::backend::command::CommandList;
use crate::backend::traits::*;
use crate::error::{RenderError, RenderResult};
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Executor for running the compiled render graph
pub struct RenderGraphExecutor {
    /// Allocated textures mapped by resource ID
    allocated_textures: HashMap<ResourceId, TextureHandle>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            allocated_textures: HashMap::new(),
        }
    }

    /// Allocate textures needed for the render graph
    pub fn allocate_resources<B: GraphicsBackend + ?Sized>(
        &mut self,
        graph: &RenderGraph,
        backend: &mut B,
    ) -> BackendResult<()> {
        for tex in graph.resources() {
            if !self.allocated_textures.contains_key(&tex.id) {
                let handle = backend.create_texture(&tex.desc)?;
                log::trace!(
                    "Allocated '{}' {}x{} {:?}",
                    tex.name,
                    tex.desc.width,
                    tex.desc.height,
                    tex.desc.format
                );
                self.allocated_textures.insert(tex.id, handle);
            }
        }
        Ok(())
    }

    /// Texture backing a graph resource
    pub fn texture(&self, resource: ResourceId) -> Option<TextureHandle> {
        self.allocated_textures.get(&resource).copied()
    }

    /// Encode every pass, in compiled order, into one command list
    pub fn execute(
        &self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        frame: &FrameContext<'_>,
    ) -> RenderResult<CommandList> {
        let mut commands = CommandList::new(frame.frame.to_string());
        for &pass_id in &compiled.pass_order {
            let pass = graph.get_pass(pass_id).ok_or_else(|| {
                RenderError::InvalidConfig(format!("compiled graph names unknown pass {pass_id:?}"))
            })?;
            let mut ctx = PassEncodeContext {
                commands: &mut commands,
                textures: &self.allocated_textures,
                frame,
            };
            pass.encode(&mut ctx)?;
        }
        Ok(commands)
    }

    /// Clean up allocated resources
    pub fn cleanup<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, handle) in self.allocated_textures.drain() {
            backend.destroy_texture(handle);
        }
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating render graphs with a fluent API
pub struct RenderGraphBuilder {
    graph: RenderGraph,
    screen_width: u32,
    screen_height: u32,
}

impl RenderGraphBuilder {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            graph: RenderGraph::new(),
            screen_width,
            screen_height,
        }
    }

    /// Add a pass
    pub fn pass<P: RenderPass + 'static>(mut self, pass: P) -> (Self, PassId) {
        let id = self.graph.add_pass(pass, self.screen_width, self.screen_height);
        (self, id)
    }

    /// Access the graph under construction, e.g. to read resources a pass declared
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// Build the render graph
    pub fn build(self) -> RenderGraph {
        self.graph
    }
}
