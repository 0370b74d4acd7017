//! Deferred lighting pass
//!
//! Performs lighting calculations using G-buffer data.
//! Draws one fullscreen triangle; background pixels keep the clear color.

use crate::backend::command::{ColorTarget, Command, LoadOp, PassDescriptor, PassKind};
use crate::backend::types::*;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameBufferKind;
use crate::gpu::{BufferIndex, GBufferTexture};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

/// Deferred lighting pass
#[derive(Default)]
pub struct LightingPass {
    /// Lit output texture
    output: Option<ResourceId>,
    /// G-buffer resource IDs (set before adding to the graph)
    pub gbuffer_albedo: Option<ResourceId>,
    pub gbuffer_normal: Option<ResourceId>,
    pub gbuffer_position: Option<ResourceId>,
    pub gbuffer_specular: Option<ResourceId>,
    pub shadow_map: Option<ResourceId>,
}

impl LightingPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> Option<ResourceId> {
        self.output
    }

    /// Set G-buffer resource IDs (call before adding to graph)
    pub fn set_gbuffer_resources(
        &mut self,
        albedo: ResourceId,
        normal: ResourceId,
        position: ResourceId,
        specular: ResourceId,
    ) {
        self.gbuffer_albedo = Some(albedo);
        self.gbuffer_normal = Some(normal);
        self.gbuffer_position = Some(position);
        self.gbuffer_specular = Some(specular);
    }

    pub fn set_shadow_map(&mut self, shadow_map: ResourceId) {
        self.shadow_map = Some(shadow_map);
    }

    fn inputs(&self) -> [(GBufferTexture, Option<ResourceId>); 5] {
        [
            (GBufferTexture::Albedo, self.gbuffer_albedo),
            (GBufferTexture::Normal, self.gbuffer_normal),
            (GBufferTexture::Position, self.gbuffer_position),
            (GBufferTexture::Shadow, self.shadow_map),
            (GBufferTexture::Specular, self.gbuffer_specular),
        ]
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "Deferred Lighting Pass"
    }

    fn kind(&self) -> PassKind {
        PassKind::Lighting
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        for (_, resource) in self.inputs() {
            if let Some(resource) = resource {
                ctx.read(resource, ResourceUsage::TextureRead);
            }
        }

        let output = ctx.create_texture_relative(
            "lit_color",
            TextureSize::Screen,
            TextureFormat::Rgba32Float,
            TextureUsage::TARGET,
        );
        ctx.write(output, ResourceUsage::RenderTarget);
        self.output = Some(output);
    }

    fn encode(&self, ctx: &mut PassEncodeContext) -> RenderResult<()> {
        let output = self
            .output
            .ok_or_else(|| RenderError::InvalidConfig("lighting pass was never set up".to_string()))?;
        ctx.commands.push(Command::BeginPass(PassDescriptor {
            label: self.name().to_string(),
            kind: PassKind::Lighting,
            color_targets: vec![ColorTarget {
                texture: ctx.texture(output)?,
                load: LoadOp::Clear(ctx.frame.clear_color),
            }],
            depth_target: None,
        }));

        for (binding, resource) in self.inputs() {
            let resource = resource.ok_or_else(|| {
                RenderError::InvalidConfig(format!("lighting pass is missing its {binding:?} input"))
            })?;
            let texture = ctx.texture(resource)?;
            ctx.commands.push(Command::BindTexture { binding, texture });
        }
        ctx.bind_frame_buffer(BufferIndex::Lights, FrameBufferKind::Lights)?;
        ctx.bind_frame_buffer(BufferIndex::LightConstants, FrameBufferKind::LightConstants)?;
        ctx.bind_frame_buffer(BufferIndex::FragmentUniforms, FrameBufferKind::FragmentUniforms)?;
        ctx.bind_frame_buffer(BufferIndex::Uniforms, FrameBufferKind::Uniforms)?;
        ctx.commands.push(Command::DrawFullscreen);
        ctx.commands.push(Command::EndPass);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
