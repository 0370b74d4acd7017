//! Scene management

mod camera;
mod light;
mod transform;

pub use camera::*;
pub use light::*;
pub use transform::*;

use crate::pipeline::terrain::Terrain;
use crate::resources::{Material, MaterialId, MeshId};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// One renderable instance of a registered mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Drawable {
    pub mesh: MeshId,
    pub material: MaterialId,
    pub model_matrix: Mat4,
    pub texture_id: Option<u32>,
}

impl Drawable {
    pub fn new(mesh: MeshId, material: MaterialId) -> Self {
        Self {
            mesh,
            material,
            model_matrix: Mat4::IDENTITY,
            texture_id: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<Mat4>) -> Self {
        self.model_matrix = transform.into();
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.model_matrix = Mat4::from_translation(position) * self.model_matrix;
        self
    }

    pub fn with_texture(mut self, texture_id: u32) -> Self {
        self.texture_id = Some(texture_id);
        self
    }
}

/// Per-frame morph/texture override for one drawable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphOverride {
    /// Index into [`FrameInput::drawables`].
    pub drawable: usize,
    pub texture_id: Option<u32>,
    pub morph_target_id: Option<u32>,
}

/// Scene-wide ambient term added to every lit pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 0.05,
        }
    }
}

/// Everything the renderer consumes for one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameInput {
    pub camera: Camera,
    pub lights: Vec<Light>,
    pub materials: Vec<Material>,
    pub drawables: Vec<Drawable>,
    pub morph_overrides: Vec<MorphOverride>,
    pub terrain: Option<Terrain>,
    /// Overrides the configured ambient term for this frame.
    pub ambient: Option<AmbientLight>,
}

impl FrameInput {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            ..Default::default()
        }
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() as u32 - 1)
    }

    pub fn add_drawable(&mut self, drawable: Drawable) -> usize {
        self.drawables.push(drawable);
        self.drawables.len() - 1
    }
}
