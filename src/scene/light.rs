//! Light types for the scene

use crate::gpu::GpuLight;
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

/// Numeric light type stored in [`GpuLight::light_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LightType {
    Unused = 0,
    Sunlight = 1,
    Spotlight = 2,
    Pointlight = 3,
    Ambientlight = 4,
}

impl LightType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(LightType::Unused),
            1 => Some(LightType::Sunlight),
            2 => Some(LightType::Spotlight),
            3 => Some(LightType::Pointlight),
            4 => Some(LightType::Ambientlight),
            _ => None,
        }
    }
}

/// Default sun travel direction, down and away from the default camera.
pub fn default_sun_direction() -> Vec3 {
    Vec3::new(0.0, -1000.0, -1000.0).normalize()
}

/// Spot cone parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotCone {
    /// Direction the spot points.
    pub direction: Vec3,
    /// Half-angle in radians.
    pub angle: f32,
    /// Exponent applied to the cosine falloff inside the cone.
    pub attenuation: f32,
}

/// Per-type light data; only the fields a type uses exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Directional light travelling along `direction`.
    Sun { direction: Vec3 },
    Spot { position: Vec3, cone: SpotCone },
    Point { position: Vec3 },
    /// Uniform light with no direction.
    Ambient,
    /// Placeholder slot that contributes nothing.
    Unused,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub specular_color: Vec3,
    pub intensity: f32,
    /// Constant, linear and quadratic falloff for point and spot lights.
    pub attenuation: Vec3,
}

impl Default for Light {
    /// White point light at the origin with no falloff.
    fn default() -> Self {
        Self {
            kind: LightKind::Point {
                position: Vec3::ZERO,
            },
            color: Vec3::ONE,
            specular_color: Vec3::splat(0.6),
            intensity: 1.0,
            attenuation: Vec3::new(1.0, 0.0, 0.0),
        }
    }
}

impl Light {
    pub fn sun(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Sun {
                direction: direction.normalize_or_zero(),
            },
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32, attenuation: Vec3) -> Self {
        Self {
            kind: LightKind::Point { position },
            color,
            intensity,
            attenuation,
            ..Default::default()
        }
    }

    pub fn spot(position: Vec3, cone: SpotCone, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Spot {
                position,
                cone: SpotCone {
                    direction: cone.direction.normalize_or_zero(),
                    ..cone
                },
            },
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn unused() -> Self {
        Self {
            kind: LightKind::Unused,
            color: Vec3::ZERO,
            specular_color: Vec3::ZERO,
            intensity: 0.0,
            attenuation: Vec3::ZERO,
        }
    }

    pub fn with_specular(mut self, specular_color: Vec3) -> Self {
        self.specular_color = specular_color;
        self
    }

    pub fn light_type(&self) -> LightType {
        match self.kind {
            LightKind::Sun { .. } => LightType::Sunlight,
            LightKind::Spot { .. } => LightType::Spotlight,
            LightKind::Point { .. } => LightType::Pointlight,
            LightKind::Ambient => LightType::Ambientlight,
            LightKind::Unused => LightType::Unused,
        }
    }

    /// True when the light adds anything to shading.
    pub fn contributes(&self) -> bool {
        self.light_type() != LightType::Unused && self.intensity > 0.0
    }

    /// Packs into the GPU light layout. Fields a type does not use are zero.
    pub fn to_gpu(&self) -> GpuLight {
        let mut gpu = GpuLight {
            position: Vec3::ZERO,
            light_type: self.light_type() as u32,
            color: self.color,
            intensity: self.intensity,
            specular_color: self.specular_color,
            cone_angle: 0.0,
            attenuation: self.attenuation,
            cone_attenuation: 0.0,
            cone_direction: Vec3::ZERO,
            _padding: 0.0,
        };
        match self.kind {
            LightKind::Sun { direction } => gpu.position = direction,
            LightKind::Point { position } => gpu.position = position,
            LightKind::Spot { position, cone } => {
                gpu.position = position;
                gpu.cone_angle = cone.angle;
                gpu.cone_attenuation = cone.attenuation;
                gpu.cone_direction = cone.direction;
            }
            LightKind::Ambient | LightKind::Unused => {}
        }
        gpu
    }

    /// Inverse of [`Light::to_gpu`]; `None` for an unknown type tag.
    pub fn from_gpu(gpu: &GpuLight) -> Option<Self> {
        let kind = match LightType::from_raw(gpu.light_type)? {
            LightType::Unused => LightKind::Unused,
            LightType::Sunlight => LightKind::Sun {
                direction: gpu.position,
            },
            LightType::Pointlight => LightKind::Point {
                position: gpu.position,
            },
            LightType::Spotlight => LightKind::Spot {
                position: gpu.position,
                cone: SpotCone {
                    direction: gpu.cone_direction,
                    angle: gpu.cone_angle,
                    attenuation: gpu.cone_attenuation,
                },
            },
            LightType::Ambientlight => LightKind::Ambient,
        };
        Some(Self {
            kind,
            color: gpu.color,
            specular_color: gpu.specular_color,
            intensity: gpu.intensity,
            attenuation: gpu.attenuation,
        })
    }
}

/// Scatters `count` coloured point lights over a square of half-size `extent`
/// at `height`. The same seed always yields the same lights.
pub fn scatter_point_lights(count: usize, extent: f32, height: f32, seed: u64) -> Vec<Light> {
    const PALETTE: [Vec3; 6] = [
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
    ];
    let mut rng = Pcg32::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let position = Vec3::new(
                rng.random_range(-extent..=extent),
                height,
                rng.random_range(-extent..=extent),
            );
            Light::point(
                position,
                PALETTE[i % PALETTE.len()],
                5.0,
                Vec3::new(0.4, 0.4, 0.4),
            )
        })
        .collect()
}
