//! Scene Buffer Builder: packs camera, light and material state.
//!
//! Pure function of the frame input. Runs on a worker thread alongside the
//! instance and terrain builders.

use crate::error::{Diagnostic, Diagnostics, RenderError, RenderResult};
use crate::gpu::{
    pack_mat3, FragmentUniforms, GpuLight, GpuMaterial, LightConstants, SceneConstants, Uniforms,
};
use crate::math::{is_finite_mat4, normal_matrix};
use crate::pipeline::shadow_pass::ShadowView;
use crate::resources::Material;
use crate::scene::{AmbientLight, Camera, Light, LightType};
use glam::{Mat3, Mat4};

/// Normal matrix of `model`, falling back to identity (with a diagnostic) when singular.
pub fn normal_matrix_or_identity(model: &Mat4, source: &str, diagnostics: &Diagnostics) -> Mat3 {
    match normal_matrix(model) {
        Some(n) => n,
        None => {
            diagnostics.record(Diagnostic::DegenerateTransform {
                source: source.to_string(),
            });
            Mat3::IDENTITY
        }
    }
}

pub struct SceneBufferInput<'a> {
    pub camera: &'a Camera,
    pub lights: &'a [Light],
    pub materials: &'a [Material],
    pub ambient: AmbientLight,
    pub shadow: Option<&'a ShadowView>,
}

/// Byte-ready per-frame scene state.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBuffers {
    pub scene_constants: SceneConstants,
    pub fragment_uniforms: FragmentUniforms,
    pub light_constants: LightConstants,
    pub uniforms: Uniforms,
    pub lights: Vec<GpuLight>,
    pub materials: Vec<GpuMaterial>,
}

impl SceneBuffers {
    pub fn light_count(&self) -> u32 {
        self.light_constants.light_count
    }
}

#[derive(Debug, Clone)]
pub struct SceneBufferBuilder {
    pub max_lights: usize,
    pub max_materials: usize,
}

impl SceneBufferBuilder {
    pub fn new(max_lights: usize, max_materials: usize) -> Self {
        Self {
            max_lights,
            max_materials,
        }
    }

    pub fn build(&self, input: &SceneBufferInput<'_>) -> RenderResult<SceneBuffers> {
        let camera = input.camera;
        if !camera.is_valid() {
            return Err(RenderError::InvalidTransform {
                what: format!(
                    "camera at {:?} looking at {:?}",
                    camera.position, camera.target
                ),
            });
        }
        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        if !is_finite_mat4(&view) || !is_finite_mat4(&projection) {
            return Err(RenderError::InvalidTransform {
                what: "camera matrices".to_string(),
            });
        }

        let active: Vec<&Light> = input
            .lights
            .iter()
            .filter(|l| l.light_type() != LightType::Unused)
            .collect();
        if active.len() > self.max_lights {
            return Err(RenderError::CapacityExceeded {
                resource: "lights",
                requested: active.len(),
                capacity: self.max_lights,
            });
        }
        if input.materials.len() > self.max_materials {
            return Err(RenderError::CapacityExceeded {
                resource: "materials",
                requested: input.materials.len(),
                capacity: self.max_materials,
            });
        }

        let lights: Vec<GpuLight> = active.iter().map(|l| l.to_gpu()).collect();
        let materials: Vec<GpuMaterial> = input.materials.iter().map(Material::to_gpu).collect();
        let light_count = lights.len() as u32;

        let shadow_matrix = input
            .shadow
            .map(|s| s.shadow_matrix)
            .unwrap_or(Mat4::IDENTITY);

        let buffers = SceneBuffers {
            scene_constants: SceneConstants {
                projection_matrix: projection,
                view_matrix: view,
                camera_position: camera.position,
                _padding: 0.0,
            },
            fragment_uniforms: FragmentUniforms {
                camera_position: camera.position,
                light_count,
                ambient_color: input.ambient.color,
                ambient_intensity: input.ambient.intensity.max(0.0),
                shadow_enabled: input.shadow.is_some() as u32,
                _padding: [0; 3],
            },
            light_constants: LightConstants {
                light_count,
                _padding: [0; 3],
            },
            uniforms: Uniforms {
                model_matrix: Mat4::IDENTITY,
                view_matrix: view,
                projection_matrix: projection,
                normal_matrix: pack_mat3(Mat3::IDENTITY),
                shadow_matrix,
                clip_plane: camera.clip_plane,
                camera_position: camera.position,
                _padding: 0.0,
            },
            lights,
            materials,
        };
        log::debug!(
            "Scene buffers: {} lights ({} skipped as unused), {} materials",
            light_count,
            input.lights.len() - active.len(),
            buffers.materials.len()
        );
        Ok(buffers)
    }
}

/// Unpacks a light array read back from GPU memory.
pub fn unpack_lights(lights: &[GpuLight]) -> Vec<Light> {
    lights.iter().filter_map(Light::from_gpu).collect()
}
