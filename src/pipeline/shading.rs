//! Per-pixel deferred shading.
//!
//! The software backend calls these functions directly and
//! `shaders/lighting.wgsl` mirrors them line for line, so both backends
//! produce the same image for the same G-buffer.

use crate::gpu::{FragmentUniforms, GpuLight};
use crate::scene::LightType;
use glam::{Mat4, Vec3, Vec4Swizzles};
use std::f32::consts::PI;

/// Reflectance of dielectrics at normal incidence.
pub const DIELECTRIC_F0: f32 = 0.04;

/// Lower bound on roughness so the GGX lobe stays finite.
pub const MIN_ROUGHNESS: f32 = 0.045;

const EPSILON: f32 = 1e-6;

/// Surface attributes decoded from one G-buffer texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub base_color: Vec3,
    pub ambient_occlusion: f32,
    pub roughness: f32,
    pub specular_color: Vec3,
    pub metallic: f32,
}

impl SurfaceSample {
    /// Decodes the albedo/normal/position/specular texels of one pixel.
    ///
    /// `None` for background pixels, whose position coverage is zero.
    pub fn from_gbuffer(
        albedo: [f32; 4],
        normal: [f32; 4],
        position: [f32; 4],
        specular: [f32; 4],
    ) -> Option<Self> {
        if position[3] <= 0.0 {
            return None;
        }
        Some(Self {
            position: Vec3::new(position[0], position[1], position[2]),
            normal: Vec3::new(normal[0], normal[1], normal[2]).normalize_or_zero(),
            base_color: Vec3::new(albedo[0], albedo[1], albedo[2]),
            ambient_occlusion: albedo[3],
            roughness: normal[3],
            specular_color: Vec3::new(specular[0], specular[1], specular[2]),
            metallic: specular[3],
        })
    }
}

/// Inputs of the BRDF for one light at one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    /// Unit vector from the surface towards the light.
    pub light_direction: Vec3,
    /// Unit vector from the surface towards the camera.
    pub view_direction: Vec3,
    pub base_color: Vec3,
    pub normal: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
    pub light_color: Vec3,
    pub light_specular_color: Vec3,
    pub specular_color: Vec3,
    pub intensity: f32,
}

impl Lighting {
    /// Lambert diffuse plus Cook-Torrance specular, weighted by `N.L`.
    pub fn radiance(&self) -> Vec3 {
        let n_dot_l = self.normal.dot(self.light_direction);
        if n_dot_l <= 0.0 || self.intensity <= 0.0 {
            return Vec3::ZERO;
        }
        let n_dot_v = self.normal.dot(self.view_direction).max(EPSILON);
        let half = (self.light_direction + self.view_direction).normalize_or_zero();
        let n_dot_h = self.normal.dot(half).max(0.0);
        let v_dot_h = self.view_direction.dot(half).max(0.0);

        let roughness = self.roughness.clamp(MIN_ROUGHNESS, 1.0);
        let metallic = self.metallic.clamp(0.0, 1.0);

        let f0 = Vec3::splat(DIELECTRIC_F0).lerp(self.base_color, metallic);
        let fresnel = fresnel_schlick(v_dot_h, f0);
        let d = distribution_ggx(n_dot_h, roughness);
        let g = geometry_smith(n_dot_v, n_dot_l, roughness);
        let specular = d * g * fresnel / (4.0 * n_dot_l * n_dot_v);

        let diffuse = self.base_color * (1.0 - metallic);
        let diffuse_radiance = diffuse * self.light_color * self.intensity;
        let specular_radiance =
            specular * self.specular_color * self.light_specular_color * self.intensity;
        (diffuse_radiance + specular_radiance) * n_dot_l
    }
}

pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta.clamp(0.0, 1.0)).powi(5)
}

/// GGX normal distribution with `alpha = roughness^2`.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * denom * denom).max(EPSILON)
}

fn geometry_schlick_ggx(n_dot: f32, k: f32) -> f32 {
    n_dot / (n_dot * (1.0 - k) + k)
}

/// Smith shadowing-masking with the direct-lighting `k = (r + 1)^2 / 8`.
pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    geometry_schlick_ggx(n_dot_v, k) * geometry_schlick_ggx(n_dot_l, k)
}

/// Distance falloff `1 / (c + l*d + q*d^2)`; 1 when the denominator vanishes.
pub fn distance_falloff(attenuation: Vec3, distance: f32) -> f32 {
    let denom = attenuation.x + attenuation.y * distance + attenuation.z * distance * distance;
    if denom > EPSILON {
        1.0 / denom
    } else {
        1.0
    }
}

/// Spot cone mask: 0 outside the cone, `cos^exponent` inside.
pub fn cone_factor(light: &GpuLight, to_light: Vec3) -> f32 {
    let spot_direction = light.cone_direction.normalize_or_zero();
    let cos_angle = (-to_light).dot(spot_direction);
    if cos_angle < light.cone_angle.cos() {
        return 0.0;
    }
    cos_angle.max(0.0).powf(light.cone_attenuation.max(0.0))
}

/// Direction to the light and the scalar attenuation for one light, or
/// `None` when the light adds no direct term at `position`.
pub fn light_incidence(light: &GpuLight, position: Vec3) -> Option<(Vec3, f32)> {
    match LightType::from_raw(light.light_type)? {
        LightType::Sunlight => {
            let direction = (-light.position).normalize_or_zero();
            (direction != Vec3::ZERO).then_some((direction, 1.0))
        }
        LightType::Pointlight => {
            let offset = light.position - position;
            let distance = offset.length();
            let direction = offset.normalize_or_zero();
            Some((direction, distance_falloff(light.attenuation, distance)))
        }
        LightType::Spotlight => {
            let offset = light.position - position;
            let distance = offset.length();
            let direction = offset.normalize_or_zero();
            let cone = cone_factor(light, direction);
            if cone <= 0.0 {
                return None;
            }
            Some((direction, cone * distance_falloff(light.attenuation, distance)))
        }
        LightType::Ambientlight | LightType::Unused => None,
    }
}

/// Binary shadow test against a depth map.
///
/// `sample` returns the stored depth at a `[0, 1]` UV. Points that project
/// outside the map are lit.
pub fn shadow_visibility(shadow_matrix: &Mat4, position: Vec3, sample: impl Fn(f32, f32) -> f32) -> f32 {
    let clip = *shadow_matrix * position.extend(1.0);
    if clip.w.abs() <= EPSILON {
        return 1.0;
    }
    let ndc = clip.xyz() / clip.w;
    let u = ndc.x * 0.5 + 0.5;
    let v = 1.0 - (ndc.y * 0.5 + 0.5);
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
        return 1.0;
    }
    if ndc.z <= sample(u, v) {
        1.0
    } else {
        0.0
    }
}

/// Shades one G-buffer sample.
///
/// Lights are accumulated in array order. Unused lights and lights with
/// non-positive intensity are skipped. `shadow` returns the visibility of
/// the sample from the shadow caster and is only consulted for sunlight.
pub fn shade(
    surface: &SurfaceSample,
    uniforms: &FragmentUniforms,
    lights: &[GpuLight],
    shadow: impl Fn(Vec3) -> f32,
) -> Vec3 {
    let ao = surface.ambient_occlusion;
    let mut color =
        uniforms.ambient_color * uniforms.ambient_intensity.max(0.0) * surface.base_color * ao;
    let view_direction = (uniforms.camera_position - surface.position).normalize_or_zero();
    let count = (uniforms.light_count as usize).min(lights.len());

    for light in &lights[..count] {
        if !(light.intensity > 0.0) {
            continue;
        }
        let light_type = match LightType::from_raw(light.light_type) {
            Some(LightType::Unused) | None => continue,
            Some(t) => t,
        };
        if light_type == LightType::Ambientlight {
            color += light.color * light.intensity * surface.base_color * ao;
            continue;
        }
        let Some((light_direction, attenuation)) = light_incidence(light, surface.position) else {
            continue;
        };
        let visibility = if light_type == LightType::Sunlight && uniforms.shadow_enabled != 0 {
            shadow(surface.position)
        } else {
            1.0
        };
        if visibility <= 0.0 {
            continue;
        }
        let lighting = Lighting {
            light_direction,
            view_direction,
            base_color: surface.base_color,
            normal: surface.normal,
            metallic: surface.metallic,
            roughness: surface.roughness,
            ambient_occlusion: ao,
            light_color: light.color,
            light_specular_color: light.specular_color,
            specular_color: surface.specular_color,
            intensity: light.intensity * attenuation,
        };
        color += lighting.radiance() * visibility;
    }
    color
}
