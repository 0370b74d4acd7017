//! Terrain Tessellation Stage.
//!
//! Splits the terrain into a grid of quad patches, computes per-patch
//! tessellation factors from camera distance and emits the tessellated,
//! height-displaced geometry for the visible patches.

use crate::error::{Diagnostics, RenderError, RenderResult};
use crate::gpu::{pack_mat3, ModelParams, PatchTessellation, TerrainUniforms, Vertex};
use crate::math::{is_finite_mat4, Aabb, Frustum};
use crate::pipeline::scene_buffers::normal_matrix_or_identity;
use crate::resources::{HeightMap, MaterialId};
use glam::{Mat4, UVec2, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hardware limit on tessellation factors.
pub const MAX_TESSELLATION_LIMIT: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Cap on any tessellation factor, at most [`MAX_TESSELLATION_LIMIT`].
    pub max_tessellation: u32,
    /// Distance within which patches get the full factor.
    pub detail_distance: f32,
    /// Zero the factors of patches outside the view frustum.
    pub culling: bool,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            max_tessellation: 16,
            detail_distance: 4.0,
            culling: true,
        }
    }
}

/// A height-mapped terrain centred on its local origin in the XZ plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Terrain {
    /// Extent along X and Z.
    pub size: Vec2,
    /// World height of a height-map value of 1.
    pub height: f32,
    /// Patch grid dimensions.
    pub patches: UVec2,
    pub heightmap: Arc<HeightMap>,
    pub material: MaterialId,
    pub tiling: u32,
    pub transform: Mat4,
}

impl Terrain {
    pub fn new(size: Vec2, height: f32, patches: UVec2, heightmap: HeightMap, material: MaterialId) -> Self {
        Self {
            size,
            height,
            patches: patches.max(UVec2::ONE),
            heightmap: Arc::new(heightmap),
            material,
            tiling: 1,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn patch_count(&self) -> usize {
        (self.patches.x * self.patches.y) as usize
    }

    /// Local-space height at normalized coordinates.
    pub fn height_at(&self, u: f32, v: f32) -> f32 {
        self.heightmap.sample(u, v) * self.height
    }

    fn local_point(&self, u: f32, v: f32) -> Vec3 {
        Vec3::new(
            (u - 0.5) * self.size.x,
            self.height_at(u, v),
            (v - 0.5) * self.size.y,
        )
    }

    fn local_normal(&self, u: f32, v: f32) -> Vec3 {
        let e = 1.0 / 256.0;
        let dx = (self.height_at(u + e, v) - self.height_at(u - e, v)) / (2.0 * e * self.size.x);
        let dz = (self.height_at(u, v + e) - self.height_at(u, v - e)) / (2.0 * e * self.size.y);
        Vec3::new(-dx, 1.0, -dz).normalize_or_zero()
    }
}

/// Tessellation factor for a feature `distance` away from the camera.
///
/// Equals `max_tessellation` within `detail_distance` and falls off as
/// `max * detail / distance` beyond it, never below 1.
pub fn tessellation_factor(distance: f32, max_tessellation: u32, detail_distance: f32) -> f32 {
    let max = max_tessellation.clamp(1, MAX_TESSELLATION_LIMIT) as f32;
    if distance.is_nan() {
        return 1.0;
    }
    if distance <= detail_distance {
        return max;
    }
    (max * detail_distance / distance).clamp(1.0, max)
}

/// Per-frame terrain output.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainFrame {
    pub uniforms: TerrainUniforms,
    pub model_params: ModelParams,
    pub factors: Vec<PatchTessellation>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub culled_patches: usize,
}

impl TerrainFrame {
    /// Draw parameters, or `None` when every patch was culled.
    pub fn draw(&self) -> Option<TerrainDraw> {
        (!self.indices.is_empty()).then(|| TerrainDraw {
            index_count: self.indices.len() as u32,
        })
    }
}

/// Non-instanced terrain draw over the slot's terrain vertex and index buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerrainDraw {
    pub index_count: u32,
}

#[derive(Debug, Clone)]
pub struct TerrainStage {
    pub config: TerrainConfig,
}

impl TerrainStage {
    pub fn new(config: TerrainConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        terrain: &Terrain,
        camera_position: Vec3,
        frustum: &Frustum,
        material_count: usize,
        diagnostics: &Diagnostics,
    ) -> RenderResult<TerrainFrame> {
        if !is_finite_mat4(&terrain.transform) {
            return Err(RenderError::InvalidTransform {
                what: "terrain transform".to_string(),
            });
        }
        if terrain.material.0 as usize >= material_count {
            return Err(RenderError::UnknownMaterial(terrain.material.0));
        }

        let max_tessellation = self.config.max_tessellation.clamp(1, MAX_TESSELLATION_LIMIT);
        let detail = self.config.detail_distance;
        let grid = terrain.patches.max(UVec2::ONE);
        let world = |u: f32, v: f32| terrain.transform.transform_point3(terrain.local_point(u, v));
        let factor_at = |u: f32, v: f32| {
            tessellation_factor(world(u, v).distance(camera_position), max_tessellation, detail)
        };

        let mut factors = Vec::with_capacity(terrain.patch_count());
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut culled_patches = 0;

        for pz in 0..grid.y {
            for px in 0..grid.x {
                // Both sides of a shared edge derive from the same integer.
                let u0 = px as f32 / grid.x as f32;
                let v0 = pz as f32 / grid.y as f32;
                let u1 = (px + 1) as f32 / grid.x as f32;
                let v1 = (pz + 1) as f32 / grid.y as f32;

                if self.config.culling && !frustum.intersects_aabb(&patch_bounds(terrain, u0, v0, u1, v1)) {
                    factors.push(PatchTessellation::culled());
                    culled_patches += 1;
                    continue;
                }

                let um = (u0 + u1) * 0.5;
                let vm = (v0 + v1) * 0.5;
                let inside = factor_at(um, vm);
                let patch = PatchTessellation {
                    edges: [
                        factor_at(u0, vm),
                        factor_at(um, v0),
                        factor_at(u1, vm),
                        factor_at(um, v1),
                    ],
                    inside: [inside, inside],
                    _padding: [0.0; 2],
                };
                factors.push(patch);
                emit_patch(terrain, (u0, v0), (u1, v1), inside, &mut vertices, &mut indices);
            }
        }

        let normal = normal_matrix_or_identity(&terrain.transform, "terrain", diagnostics);
        log::debug!(
            "Terrain: {} patches, {} culled, {} vertices",
            factors.len(),
            culled_patches,
            vertices.len()
        );

        Ok(TerrainFrame {
            uniforms: TerrainUniforms {
                size: terrain.size,
                height: terrain.height,
                max_tessellation,
            },
            model_params: ModelParams {
                model_matrix: terrain.transform,
                normal_matrix: pack_mat3(normal),
                tiling: terrain.tiling,
                material_index: terrain.material.0,
                _padding: [0; 2],
            },
            factors,
            vertices,
            indices,
            culled_patches,
        })
    }
}

/// World-space bounds of a patch, spanning the height map's full range.
fn patch_bounds(terrain: &Terrain, u0: f32, v0: f32, u1: f32, v1: f32) -> Aabb {
    let (lo, hi) = terrain.heightmap.range();
    let (a, b) = (lo * terrain.height, hi * terrain.height);
    let (low, high) = (a.min(b), a.max(b));
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for (u, v) in [(u0, v0), (u1, v0), (u0, v1), (u1, v1)] {
        for y in [low, high] {
            let local = Vec3::new((u - 0.5) * terrain.size.x, y, (v - 0.5) * terrain.size.y);
            let p = terrain.transform.transform_point3(local);
            min = min.min(p);
            max = max.max(p);
        }
    }
    Aabb::new(min, max)
}

/// Exact endpoints at `i == 0` and `i == segments` so neighbours share border vertices.
fn lerp_edge(a: f32, b: f32, i: u32, segments: u32) -> f32 {
    match i {
        0 => a,
        i if i == segments => b,
        i => a + (b - a) * i as f32 / segments as f32,
    }
}

/// Appends a `segments x segments` displaced grid for one patch.
fn emit_patch(
    terrain: &Terrain,
    (u0, v0): (f32, f32),
    (u1, v1): (f32, f32),
    factor: f32,
    vertices: &mut Vec<Vertex>,
    indices: &mut Vec<u32>,
) {
    let segments = factor.round().max(1.0) as u32;
    let base = vertices.len() as u32;
    let tiling = terrain.tiling.max(1) as f32;
    for j in 0..=segments {
        for i in 0..=segments {
            let u = lerp_edge(u0, u1, i, segments);
            let v = lerp_edge(v0, v1, j, segments);
            vertices.push(Vertex::new(
                terrain.local_point(u, v).to_array(),
                terrain.local_normal(u, v).to_array(),
                [u * tiling, v * tiling],
            ));
        }
    }
    let row = segments + 1;
    for j in 0..segments {
        for i in 0..segments {
            let current = base + j * row + i;
            let next = current + row;
            indices.extend_from_slice(&[current, next, current + 1, current + 1, next, next + 1]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;
    use rstest::rstest;

    fn flat_terrain() -> Terrain {
        Terrain::new(
            Vec2::new(8.0, 8.0),
            1.0,
            UVec2::new(4, 4),
            HeightMap::flat(),
            MaterialId(0),
        )
    }

    #[rstest]
    #[case(0.0, 16.0)]
    #[case(4.0, 16.0)]
    #[case(8.0, 8.0)]
    #[case(32.0, 2.0)]
    #[case(1000.0, 1.0)]
    fn test_factor_table(#[case] distance: f32, #[case] expected: f32) {
        assert!((tessellation_factor(distance, 16, 4.0) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_factor_monotonic_and_bounded() {
        let mut previous = f32::INFINITY;
        for step in 0..2000 {
            let distance = step as f32 * 0.05;
            let factor = tessellation_factor(distance, 64, 3.0);
            assert!(factor <= previous);
            assert!((1.0..=64.0).contains(&factor));
            previous = factor;
        }
    }

    #[test]
    fn test_factor_caps_at_hardware_limit() {
        assert_eq!(tessellation_factor(0.0, 500, 1.0), 64.0);
    }

    #[test]
    fn test_patches_behind_camera_culled() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 0.0, -4.0));
        let stage = TerrainStage::new(TerrainConfig::default());
        let frame = stage
            .build(
                &flat_terrain(),
                camera.position,
                &camera.frustum(),
                1,
                &Diagnostics::new(),
            )
            .unwrap();

        assert_eq!(frame.factors.len(), 16);
        assert!(frame.culled_patches > 0);
        // The row of patches furthest along +Z is behind the camera.
        for patch in &frame.factors[12..16] {
            assert!(patch.is_culled());
            assert_eq!(patch.edges, [0.0; 4]);
        }
        for patch in frame.factors.iter().filter(|p| !p.is_culled()) {
            assert!(patch.inside[0] >= 1.0 && patch.inside[0] <= 16.0);
        }
    }

    #[test]
    fn test_no_culling_emits_all_patches() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 0.0, -4.0));
        let config = TerrainConfig {
            culling: false,
            ..Default::default()
        };
        let frame = TerrainStage::new(config)
            .build(
                &flat_terrain(),
                camera.position,
                &camera.frustum(),
                1,
                &Diagnostics::new(),
            )
            .unwrap();
        assert_eq!(frame.culled_patches, 0);
        assert!(frame.indices.iter().all(|&i| (i as usize) < frame.vertices.len()));
        assert!(frame.vertices.iter().all(|v| v.position[1] == 0.0));
    }

    #[test]
    fn test_shared_edges_match() {
        let terrain = Terrain::new(
            Vec2::new(9.0, 9.0),
            2.0,
            UVec2::new(7, 7),
            HeightMap::hills(33),
            MaterialId(0),
        );
        let camera = Camera::new(Vec3::new(-3.0, 1.0, 2.0), Vec3::ZERO);
        let config = TerrainConfig {
            culling: false,
            detail_distance: 0.5,
            ..Default::default()
        };
        let frame = TerrainStage::new(config)
            .build(
                &terrain,
                camera.position,
                &camera.frustum(),
                1,
                &Diagnostics::new(),
            )
            .unwrap();
        let at = |px: usize, pz: usize| &frame.factors[pz * 7 + px];
        for pz in 0..7 {
            for px in 0..7 {
                if px + 1 < 7 {
                    assert_eq!(at(px, pz).edges[2], at(px + 1, pz).edges[0], "patch ({px}, {pz}) right");
                }
                if pz + 1 < 7 {
                    assert_eq!(at(px, pz).edges[3], at(px, pz + 1).edges[1], "patch ({px}, {pz}) top");
                }
            }
        }
        // Vertices near a patch boundary sit exactly on it.
        let borders: Vec<f32> = (0..=7).map(|i| i as f32 / 7.0).collect();
        for vertex in &frame.vertices {
            for coord in vertex.tex_coords {
                if let Some(b) = borders.iter().find(|b| (coord - **b).abs() < 1e-5) {
                    assert_eq!(coord, *b);
                }
            }
        }
    }

    #[test]
    fn test_raised_plateau_not_culled() {
        let plateau = HeightMap::new(2, 2, vec![10.0; 4]).unwrap();
        let terrain = Terrain::new(
            Vec2::new(8.0, 8.0),
            1.0,
            UVec2::new(4, 4),
            plateau,
            MaterialId(0),
        );
        let camera = Camera::new(Vec3::new(0.0, 10.5, 0.0), Vec3::new(0.0, 10.5, -4.0));
        let frame = TerrainStage::new(TerrainConfig::default())
            .build(
                &terrain,
                camera.position,
                &camera.frustum(),
                1,
                &Diagnostics::new(),
            )
            .unwrap();
        // The far row along -Z sits in front of the camera at plateau height.
        for patch in &frame.factors[0..4] {
            assert!(!patch.is_culled());
        }
        assert!(frame.vertices.iter().all(|v| (v.position[1] - 10.0).abs() < 1e-4));
    }

    #[test]
    fn test_unknown_material_rejected() {
        let camera = Camera::default();
        let result = TerrainStage::new(TerrainConfig::default()).build(
            &flat_terrain(),
            camera.position,
            &camera.frustum(),
            0,
            &Diagnostics::new(),
        );
        assert!(matches!(result, Err(RenderError::UnknownMaterial(0))));
    }
}
