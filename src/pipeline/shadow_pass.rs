//! Shadow pass: depth from the dominant sunlight's point of view.
//!
//! The sun is modelled with an orthographic projection centred on the
//! camera target. The map is written with a rasterizer depth bias and
//! sampled by the lighting pass with a plain `<=` comparison.

use crate::backend::command::{Command, DepthBias, DepthTarget, PassDescriptor, PassKind};
use crate::backend::types::{TextureFormat, TextureUsage};
use crate::error::{RenderError, RenderResult};
use crate::gpu::BufferIndex;
use crate::frame::FrameBufferKind;
use crate::pipeline::gbuffer_pass::{encode_scene_draws, ensure_current_draws};
use crate::render_graph::{
    PassEncodeContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage, TextureSize,
};
use crate::scene::{Camera, Light, LightKind};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::any::Any;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Shadow map width and height in texels.
    pub resolution: u32,
    /// Half-size of the orthographic light frustum.
    pub half_extent: f32,
    pub near: f32,
    pub far: f32,
    /// Distance from the focus point back to the light eye.
    pub eye_distance: f32,
    pub depth_bias: f32,
    pub slope_scale: f32,
    pub bias_clamp: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: 2048,
            half_extent: 15.0,
            near: 0.1,
            far: 30.0,
            eye_distance: 15.0,
            depth_bias: 0.01,
            slope_scale: 1.0,
            bias_clamp: 0.01,
        }
    }
}

impl ShadowConfig {
    pub fn bias(&self) -> DepthBias {
        DepthBias {
            constant: self.depth_bias,
            slope_scale: self.slope_scale,
            clamp: self.bias_clamp,
        }
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.resolution == 0 {
            return Err(RenderError::InvalidConfig(
                "shadow resolution must be non-zero".to_string(),
            ));
        }
        if !(self.half_extent > 0.0) || !(self.near >= 0.0) || !(self.far > self.near) {
            return Err(RenderError::InvalidConfig(format!(
                "shadow frustum extent {} near {} far {} is empty",
                self.half_extent, self.near, self.far
            )));
        }
        Ok(())
    }
}

/// The light-space view chosen for this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowView {
    /// Index of the caster in the frame's light list.
    pub light_index: usize,
    /// Travel direction of the sunlight.
    pub direction: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    /// `projection * view`, world space to light clip space.
    pub shadow_matrix: Mat4,
}

/// Picks the dominant sunlight and builds its light-space matrices.
///
/// The dominant sun is the contributing sunlight with the highest
/// intensity; ties go to the earliest. Without one the frame renders
/// unshadowed.
pub fn plan_shadow(lights: &[Light], camera: &Camera, config: &ShadowConfig) -> RenderResult<ShadowView> {
    let mut caster: Option<(usize, Vec3, f32)> = None;
    for (index, light) in lights.iter().enumerate() {
        let LightKind::Sun { direction } = light.kind else {
            continue;
        };
        if !light.contributes() || direction.length_squared() == 0.0 {
            continue;
        }
        if caster.map_or(true, |(_, _, best)| light.intensity > best) {
            caster = Some((index, direction.normalize(), light.intensity));
        }
    }
    let (light_index, direction, _) = caster.ok_or(RenderError::NoShadowCaster)?;

    let center = camera.target;
    let eye = center - direction * config.eye_distance;
    let up = if direction.dot(Vec3::Y).abs() > 0.999 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let view = Mat4::look_at_rh(eye, center, up);
    let e = config.half_extent;
    let projection = Mat4::orthographic_rh(-e, e, -e, e, config.near, config.far);
    log::debug!("Shadow caster: light {light_index}, direction {direction:?}");
    Ok(ShadowView {
        light_index,
        direction,
        view,
        projection,
        shadow_matrix: projection * view,
    })
}

/// Renders instanced geometry and terrain into the shadow map.
///
/// When the frame has no shadow caster the map is only cleared.
pub struct ShadowPass {
    resolution: u32,
    bias: DepthBias,
    shadow_map: Option<ResourceId>,
}

impl ShadowPass {
    pub fn new(config: &ShadowConfig) -> Self {
        Self {
            resolution: config.resolution.max(1),
            bias: config.bias(),
            shadow_map: None,
        }
    }

    pub fn shadow_map(&self) -> Option<ResourceId> {
        self.shadow_map
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "Shadow Pass"
    }

    fn kind(&self) -> PassKind {
        PassKind::Shadow
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let map = ctx.create_texture_relative(
            "shadow_map",
            TextureSize::Square(self.resolution),
            TextureFormat::Depth32Float,
            TextureUsage::TARGET,
        );
        ctx.write(map, ResourceUsage::DepthWrite);
        self.shadow_map = Some(map);
    }

    fn encode(&self, ctx: &mut PassEncodeContext) -> RenderResult<()> {
        ensure_current_draws(ctx, "shadow")?;
        let map = self
            .shadow_map
            .ok_or_else(|| RenderError::InvalidConfig("shadow pass was never set up".to_string()))?;
        let texture = ctx.texture(map)?;
        ctx.commands.push(Command::BeginPass(PassDescriptor {
            label: self.name().to_string(),
            kind: PassKind::Shadow,
            color_targets: Vec::new(),
            depth_target: Some(DepthTarget {
                texture,
                clear: Some(1.0),
                bias: Some(self.bias),
            }),
        }));
        if ctx.frame.shadow.is_some() {
            ctx.bind_frame_buffer(BufferIndex::Uniforms, FrameBufferKind::Uniforms)?;
            encode_scene_draws(ctx)?;
        }
        ctx.commands.push(Command::EndPass);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
