//! Material definitions

use crate::gpu::GpuMaterial;
use glam::Vec3;

/// Index into the frame's material table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// Surface parameters consumed by the G-buffer and lighting passes.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: Vec3,
    pub specular_color: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub ambient_occlusion: f32,
    /// Carried for layout compatibility; the microfacet model ignores it.
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec3::ONE,
            specular_color: Vec3::ONE,
            roughness: 0.5,
            metallic: 0.0,
            ambient_occlusion: 1.0,
            shininess: 32.0,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec3) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_specular_color(mut self, color: Vec3) -> Self {
        self.specular_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_ambient_occlusion(mut self, ao: f32) -> Self {
        self.ambient_occlusion = ao;
        self
    }

    /// Packs into the GPU layout, clamping scalar factors into `[0, 1]`.
    pub fn to_gpu(&self) -> GpuMaterial {
        GpuMaterial {
            base_color: self.base_color,
            roughness: self.roughness.clamp(0.0, 1.0),
            specular_color: self.specular_color,
            metallic: self.metallic.clamp(0.0, 1.0),
            ambient_occlusion: self.ambient_occlusion.clamp(0.0, 1.0),
            shininess: self.shininess,
            _padding: [0.0; 2],
        }
    }

    /// Rebuilds a material from its packed form (name is not stored on the GPU).
    pub fn from_gpu(gpu: &GpuMaterial) -> Self {
        Self {
            name: String::new(),
            base_color: gpu.base_color,
            specular_color: gpu.specular_color,
            roughness: gpu.roughness,
            metallic: gpu.metallic,
            ambient_occlusion: gpu.ambient_occlusion,
            shininess: gpu.shininess,
        }
    }

    // Preset materials

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color)
            .with_metallic(0.0)
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color)
            .with_specular_color(color)
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn rubber(color: Vec3) -> Self {
        Self::new("rubber")
            .with_base_color(color)
            .with_specular_color(Vec3::splat(0.2))
            .with_roughness(0.9)
    }

    pub fn grass() -> Self {
        Self::new("grass")
            .with_base_color(Vec3::new(0.25, 0.45, 0.15))
            .with_specular_color(Vec3::splat(0.1))
            .with_roughness(0.95)
    }
}
