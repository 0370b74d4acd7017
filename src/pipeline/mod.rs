//! Deferred rendering pipeline
//!
//! Per frame the CPU builders run in parallel, the indirect command
//! encoder turns their output into GPU draws, and the render graph
//! records three passes:
//! 1. G-Buffer pass - instanced indirect draws plus terrain into four targets
//! 2. Shadow pass - the same draws from the dominant sun into a depth map
//! 3. Lighting pass - fullscreen shading from the G-buffer and shadow map

pub mod gbuffer_pass;
pub mod indirect;
pub mod instance_stream;
pub mod lighting_pass;
pub mod renderer;
pub mod scene_buffers;
pub mod shading;
pub mod shadow_pass;
pub mod terrain;

pub use gbuffer_pass::GBufferPass;
pub use indirect::{IndirectCommandBuffer, IndirectCommandEncoder};
pub use instance_stream::{Batch, BatchKey, InstanceStream, InstanceStreamBuilder, InstanceStreamInput};
pub use lighting_pass::LightingPass;
pub use renderer::{DeferredRenderer, FrameOutcome, FrameReport, FrameStats, PreparedFrame};
pub use scene_buffers::{SceneBufferBuilder, SceneBufferInput, SceneBuffers};
pub use shadow_pass::{plan_shadow, ShadowConfig, ShadowPass, ShadowView};
pub use terrain::{Terrain, TerrainConfig, TerrainFrame, TerrainStage};

use crate::error::{RenderError, RenderResult};
use crate::gpu::GBufferTexture;
use crate::render_graph::{PassId, RenderGraph, RenderGraphBuilder, ResourceId};

/// Resources and passes of the deferred graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredResources {
    pub gbuffer_pass: PassId,
    pub shadow_pass: PassId,
    pub lighting_pass: PassId,
    pub gbuffer_albedo: ResourceId,
    pub gbuffer_normal: ResourceId,
    pub gbuffer_position: ResourceId,
    pub gbuffer_specular: ResourceId,
    pub gbuffer_depth: ResourceId,
    pub shadow_map: ResourceId,
    pub lit_color: ResourceId,
}

impl DeferredResources {
    /// Texture behind a debug view channel.
    pub fn channel(&self, channel: GBufferTexture) -> ResourceId {
        match channel {
            GBufferTexture::Albedo => self.gbuffer_albedo,
            GBufferTexture::Normal => self.gbuffer_normal,
            GBufferTexture::Position => self.gbuffer_position,
            GBufferTexture::Specular => self.gbuffer_specular,
            GBufferTexture::Shadow => self.shadow_map,
        }
    }
}

fn missing(what: &str) -> RenderError {
    RenderError::InvalidConfig(format!("deferred graph is missing its {what}"))
}

/// Build the deferred render graph
pub fn build_deferred_graph(
    width: u32,
    height: u32,
    shadow: &ShadowConfig,
) -> RenderResult<(RenderGraph, DeferredResources)> {
    let builder = RenderGraphBuilder::new(width, height);

    let (builder, gbuffer_pass) = builder.pass(GBufferPass::new());
    let gbuffer = builder
        .graph()
        .pass::<GBufferPass>(gbuffer_pass)
        .ok_or_else(|| missing("G-buffer pass"))?;
    let albedo = gbuffer.albedo_texture().ok_or_else(|| missing("albedo target"))?;
    let normal = gbuffer.normal_texture().ok_or_else(|| missing("normal target"))?;
    let position = gbuffer.position_texture().ok_or_else(|| missing("position target"))?;
    let specular = gbuffer.specular_texture().ok_or_else(|| missing("specular target"))?;
    let depth = gbuffer.depth_texture().ok_or_else(|| missing("depth target"))?;

    let (builder, shadow_pass) = builder.pass(ShadowPass::new(shadow));
    let shadow_map = builder
        .graph()
        .pass::<ShadowPass>(shadow_pass)
        .and_then(ShadowPass::shadow_map)
        .ok_or_else(|| missing("shadow map"))?;

    let mut lighting = LightingPass::new();
    lighting.set_gbuffer_resources(albedo, normal, position, specular);
    lighting.set_shadow_map(shadow_map);
    let (builder, lighting_pass) = builder.pass(lighting);
    let lit_color = builder
        .graph()
        .pass::<LightingPass>(lighting_pass)
        .and_then(LightingPass::output)
        .ok_or_else(|| missing("lit color target"))?;

    let resources = DeferredResources {
        gbuffer_pass,
        shadow_pass,
        lighting_pass,
        gbuffer_albedo: albedo,
        gbuffer_normal: normal,
        gbuffer_position: position,
        gbuffer_specular: specular,
        gbuffer_depth: depth,
        shadow_map,
        lit_color,
    };
    Ok((builder.build(), resources))
}
