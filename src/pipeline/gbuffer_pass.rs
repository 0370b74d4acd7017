//! G-Buffer generation pass for deferred rendering
//!
//! Renders geometry to multiple render targets (MRT):
//! - Albedo: base color, ambient occlusion in alpha
//! - Normal: world-space normal, roughness in alpha
//! - Position: world-space position, coverage in alpha
//! - Specular: specular color, metallic in alpha
//! - Depth buffer

use crate::backend::command::{ColorTarget, Command, DepthTarget, LoadOp, PassDescriptor, PassKind};
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameBufferKind;
use crate::gpu::{BufferIndex, GBufferTexture};
use crate::pipeline::indirect::IndirectCommandBuffer;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

/// Fails when the encoded draws belong to another frame than the one being recorded.
pub(crate) fn ensure_current_draws(ctx: &PassEncodeContext, stage: &'static str) -> RenderResult<()> {
    let encoded = ctx.frame.indirect.frame;
    if encoded != ctx.frame.frame {
        return Err(RenderError::FrameSequenceViolation {
            stage,
            expected: ctx.frame.frame.to_string(),
            found: encoded.to_string(),
        });
    }
    Ok(())
}

/// Records the instanced indirect draws and the terrain draw of a frame.
///
/// Shared by the geometry and shadow passes; the caller binds the
/// pass-specific buffers first.
pub(crate) fn encode_scene_draws(ctx: &mut PassEncodeContext) -> RenderResult<()> {
    let indirect = ctx.frame.indirect;
    if let (Some(geometry), false) = (ctx.frame.geometry, indirect.is_empty()) {
        let commands = ctx.frame_buffer(FrameBufferKind::IndirectCommands)?;
        ctx.bind(BufferIndex::Vertices, geometry.vertices);
        ctx.bind_frame_buffer(BufferIndex::Instances, FrameBufferKind::Instances)?;
        ctx.bind(BufferIndex::IndirectCommandBuffer, commands);
        ctx.commands.push(Command::SetIndexBuffer {
            buffer: geometry.indices,
        });
        for index in 0..indirect.len() {
            ctx.commands.push(Command::DrawIndexedIndirect {
                buffer: commands,
                offset: IndirectCommandBuffer::offset_of(index),
            });
        }
    }

    if let Some(terrain) = ctx.frame.terrain {
        ctx.bind_frame_buffer(BufferIndex::Vertices, FrameBufferKind::TerrainVertices)?;
        ctx.bind_frame_buffer(BufferIndex::ModelParams, FrameBufferKind::ModelParams)?;
        ctx.bind_frame_buffer(BufferIndex::TerrainUniforms, FrameBufferKind::TerrainUniforms)?;
        ctx.bind_frame_buffer(
            BufferIndex::TessellationFactors,
            FrameBufferKind::TessellationFactors,
        )?;
        let indices = ctx.frame_buffer(FrameBufferKind::TerrainIndices)?;
        ctx.commands.push(Command::SetIndexBuffer { buffer: indices });
        ctx.commands.push(Command::DrawIndexed {
            first_index: 0,
            index_count: terrain.index_count,
            base_vertex: 0,
        });
    }
    Ok(())
}

/// Full-screen float target, so every channel reads back exactly.
fn color_target(ctx: &mut PassSetupContext, name: &str) -> ResourceId {
    let id = ctx.create_texture_relative(
        name,
        TextureSize::Screen,
        TextureFormat::Rgba32Float,
        TextureUsage::TARGET,
    );
    ctx.write(id, ResourceUsage::RenderTarget);
    id
}

/// G-Buffer generation pass for deferred rendering
pub struct GBufferPass {
    albedo_texture: Option<ResourceId>,
    normal_texture: Option<ResourceId>,
    position_texture: Option<ResourceId>,
    specular_texture: Option<ResourceId>,
    depth_texture: Option<ResourceId>,
}

impl GBufferPass {
    pub fn new() -> Self {
        Self {
            albedo_texture: None,
            normal_texture: None,
            position_texture: None,
            specular_texture: None,
            depth_texture: None,
        }
    }

    pub fn albedo_texture(&self) -> Option<ResourceId> {
        self.albedo_texture
    }

    pub fn normal_texture(&self) -> Option<ResourceId> {
        self.normal_texture
    }

    pub fn position_texture(&self) -> Option<ResourceId> {
        self.position_texture
    }

    pub fn specular_texture(&self) -> Option<ResourceId> {
        self.specular_texture
    }

    pub fn depth_texture(&self) -> Option<ResourceId> {
        self.depth_texture
    }

    /// Resource behind a G-buffer channel. The shadow channel lives in the shadow pass.
    pub fn channel(&self, channel: GBufferTexture) -> Option<ResourceId> {
        match channel {
            GBufferTexture::Albedo => self.albedo_texture,
            GBufferTexture::Normal => self.normal_texture,
            GBufferTexture::Position => self.position_texture,
            GBufferTexture::Specular => self.specular_texture,
            GBufferTexture::Shadow => None,
        }
    }

    fn targets(&self) -> RenderResult<[ResourceId; 5]> {
        match (
            self.albedo_texture,
            self.normal_texture,
            self.position_texture,
            self.specular_texture,
            self.depth_texture,
        ) {
            (Some(a), Some(n), Some(p), Some(s), Some(d)) => Ok([a, n, p, s, d]),
            _ => Err(RenderError::InvalidConfig(
                "G-buffer pass was never set up".to_string(),
            )),
        }
    }
}

impl Default for GBufferPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "G-Buffer Pass"
    }

    fn kind(&self) -> PassKind {
        PassKind::GBuffer
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        self.albedo_texture = Some(color_target(ctx, "gbuffer_albedo"));
        self.normal_texture = Some(color_target(ctx, "gbuffer_normal"));
        self.position_texture = Some(color_target(ctx, "gbuffer_position"));
        self.specular_texture = Some(color_target(ctx, "gbuffer_specular"));

        let depth = ctx.create_texture_relative(
            "gbuffer_depth",
            TextureSize::Screen,
            TextureFormat::Depth32Float,
            TextureUsage::TARGET,
        );
        self.depth_texture = Some(depth);
        ctx.write(depth, ResourceUsage::DepthWrite);
    }

    fn encode(&self, ctx: &mut PassEncodeContext) -> RenderResult<()> {
        ensure_current_draws(ctx, "gbuffer")?;
        let [albedo, normal, position, specular, depth] = self.targets()?;
        let mut color_targets = Vec::with_capacity(4);
        for id in [albedo, normal, position, specular] {
            color_targets.push(ColorTarget {
                texture: ctx.texture(id)?,
                load: LoadOp::Clear([0.0; 4]),
            });
        }
        ctx.commands.push(Command::BeginPass(PassDescriptor {
            label: self.name().to_string(),
            kind: PassKind::GBuffer,
            color_targets,
            depth_target: Some(DepthTarget {
                texture: ctx.texture(depth)?,
                clear: Some(1.0),
                bias: None,
            }),
        }));

        ctx.bind_frame_buffer(BufferIndex::SceneConstants, FrameBufferKind::SceneConstants)?;
        ctx.bind_frame_buffer(BufferIndex::Uniforms, FrameBufferKind::Uniforms)?;
        ctx.bind_frame_buffer(BufferIndex::Materials, FrameBufferKind::Materials)?;
        ctx.bind_frame_buffer(BufferIndex::Models, FrameBufferKind::Models)?;
        ctx.bind_frame_buffer(BufferIndex::DrawArguments, FrameBufferKind::DrawArguments)?;
        encode_scene_draws(ctx)?;

        ctx.commands.push(Command::EndPass);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::frame::{FrameCapacities, FrameId, FramePool};
    use crate::gpu::BindingTable;
    use crate::render_graph::{RenderGraph, RenderGraphExecutor};

    /// Executes a graph holding only the geometry pass for frame 1 with
    /// draws encoded for `encoded`.
    fn record_frame_one(encoded: FrameId) -> RenderResult<usize> {
        let mut backend = SoftwareBackend::new();
        let mut graph = RenderGraph::new();
        graph.add_pass(GBufferPass::new(), 8, 8);
        let compiled = graph.compile()?;
        let mut executor = RenderGraphExecutor::new();
        executor.allocate_resources(&graph, &mut backend)?;

        let mut pool = FramePool::new(&mut backend, 1, &FrameCapacities::default())?;
        let slot = pool.acquire(&mut backend, FrameId(1))?;
        let bindings = BindingTable::new();
        let indirect = IndirectCommandBuffer {
            frame: encoded,
            commands: Vec::new(),
            bindings: Vec::new(),
        };
        let frame = FrameContext {
            frame: FrameId(1),
            bindings: &bindings,
            buffers: slot.buffers(),
            geometry: None,
            indirect: &indirect,
            terrain: None,
            shadow: None,
            clear_color: [0.0; 4],
        };
        let commands = executor.execute(&graph, &compiled, &frame)?;
        Ok(commands.len())
    }

    #[test]
    fn test_current_draws_are_recorded() {
        assert!(record_frame_one(FrameId(1)).unwrap() > 0);
    }

    #[test]
    fn test_stale_draws_are_a_sequence_violation() {
        let err = record_frame_one(FrameId(2)).unwrap_err();
        assert!(err.is_fatal());
        match err {
            RenderError::FrameSequenceViolation { stage, expected, found } => {
                assert_eq!(stage, "gbuffer");
                assert_eq!(expected, FrameId(1).to_string());
                assert_eq!(found, FrameId(2).to_string());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
