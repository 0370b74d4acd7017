//! CPU versions of the geometry, shadow and lighting kernels.

use super::raster::{rasterize_triangle, ClipVertex, Fragment};
use super::{Bound, Texture};
use crate::backend::command::{DepthBias, PassKind};
use crate::backend::traits::{BackendError, BackendResult};
use crate::gpu::{
    read_array, unpack_mat3, BufferIndex, FragmentUniforms, GBufferTexture, GpuLight, GpuMaterial,
    InstanceRecord, LightConstants, ModelParams, SceneConstants, Uniforms, Vertex,
};
use crate::pipeline::shading::{shade, shadow_visibility, SurfaceSample};
use glam::{Mat3, Mat4, Vec3};
use rayon::prelude::*;
use std::collections::HashMap;

/// Placement of one drawn copy of a mesh.
#[derive(Debug, Clone, Copy)]
pub(super) struct DrawInstance {
    pub model: Mat4,
    pub normal: Mat3,
    pub material_index: u32,
}

impl From<&InstanceRecord> for DrawInstance {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            model: record.model_matrix,
            normal: unpack_mat3(&record.normal_matrix),
            material_index: record.material_index,
        }
    }
}

impl From<&ModelParams> for DrawInstance {
    fn from(params: &ModelParams) -> Self {
        Self {
            model: params.model_matrix,
            normal: unpack_mat3(&params.normal_matrix),
            material_index: params.material_index,
        }
    }
}

/// Index range of one draw.
#[derive(Debug, Clone, Copy)]
pub(super) struct IndexRange {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

/// Attachments of the pass being recorded.
pub(super) struct Targets<'a> {
    pub colors: &'a mut [Texture],
    pub depth: Option<&'a mut Texture>,
    pub bias: Option<DepthBias>,
}

impl Targets<'_> {
    fn size(&self) -> Option<(u32, u32)> {
        self.depth
            .as_deref()
            .or(self.colors.first())
            .map(|t| (t.desc.width, t.desc.height))
    }
}

pub(super) fn fetch<T: bytemuck::Pod>(bytes: &[u8], index: usize) -> BackendResult<T> {
    let size = std::mem::size_of::<T>();
    let start = index * size;
    bytes
        .get(start..start + size)
        .map(bytemuck::pod_read_unaligned)
        .ok_or_else(|| {
            BackendError::InvalidCommand(format!(
                "element {index} lies past the end of a {} byte buffer",
                bytes.len()
            ))
        })
}

/// Rasterizes `instances` copies of an indexed mesh.
///
/// G-buffer passes transform with the scene camera and write surface
/// attributes; shadow passes transform with the light matrix and write
/// biased depth only.
pub(super) fn draw_geometry(
    kind: PassKind,
    bound: &Bound<'_>,
    index_buffer: &[u8],
    range: IndexRange,
    instances: &[DrawInstance],
    targets: &mut Targets<'_>,
) -> BackendResult<()> {
    let (view_projection, clip_plane) = match kind {
        PassKind::GBuffer => {
            let scene: SceneConstants = bound.read(BufferIndex::SceneConstants, 0)?;
            let uniforms: Uniforms = bound.read(BufferIndex::Uniforms, 0)?;
            (
                scene.projection_matrix * scene.view_matrix,
                Some(uniforms.clip_plane),
            )
        }
        PassKind::Shadow => {
            let uniforms: Uniforms = bound.read(BufferIndex::Uniforms, 0)?;
            (uniforms.shadow_matrix, None)
        }
        PassKind::Lighting => {
            return Err(BackendError::InvalidCommand(
                "geometry draw inside a lighting pass".to_string(),
            ))
        }
    };
    let (width, height) = targets.size().ok_or_else(|| {
        BackendError::InvalidCommand("draw in a pass without attachments".to_string())
    })?;
    let vertices = bound.bytes(BufferIndex::Vertices)?;
    let materials = match kind {
        PassKind::GBuffer => Some(bound.bytes(BufferIndex::Materials)?),
        _ => None,
    };
    let bias = targets.bias;

    for instance in instances {
        let material: GpuMaterial = match materials {
            Some(bytes) => fetch(bytes, instance.material_index as usize)?,
            None => bytemuck::Zeroable::zeroed(),
        };
        let mut write = |fragment: Fragment| {
            let pixel = (fragment.y * width + fragment.x) as usize;
            if let Some(plane) = clip_plane {
                if fragment.world.extend(1.0).dot(plane) < 0.0 {
                    return;
                }
            }
            let depth = match bias {
                Some(bias) => (fragment.depth + bias.resolve(fragment.slope)).clamp(0.0, 1.0),
                None => fragment.depth,
            };
            if let Some(target) = targets.depth.as_deref_mut() {
                if depth >= target.texels[pixel] {
                    return;
                }
                target.texels[pixel] = depth;
            }
            if kind != PassKind::GBuffer {
                return;
            }
            let normal = fragment.normal.normalize_or_zero();
            let values = [
                material.base_color.extend(material.ambient_occlusion),
                normal.extend(material.roughness),
                fragment.world.extend(1.0),
                material.specular_color.extend(material.metallic),
            ];
            for (target, value) in targets.colors.iter_mut().zip(values) {
                target.texels[pixel * 4..pixel * 4 + 4].copy_from_slice(&value.to_array());
            }
        };

        for triangle in 0..range.index_count / 3 {
            let mut corners = [ClipVertex {
                clip: glam::Vec4::ZERO,
                world: Vec3::ZERO,
                normal: Vec3::ZERO,
            }; 3];
            for (corner, slot) in corners.iter_mut().enumerate() {
                let at = range.first_index as usize + triangle as usize * 3 + corner;
                let index: u32 = fetch(index_buffer, at)?;
                let vertex_index = range.base_vertex as i64 + index as i64;
                if vertex_index < 0 {
                    return Err(BackendError::InvalidCommand(format!(
                        "negative vertex index {vertex_index}"
                    )));
                }
                let vertex: Vertex = fetch(vertices, vertex_index as usize)?;
                let world = instance.model.transform_point3(Vec3::from(vertex.position));
                *slot = ClipVertex {
                    clip: view_projection * world.extend(1.0),
                    world,
                    normal: instance.normal * Vec3::from(vertex.normal),
                };
            }
            rasterize_triangle(corners, width, height, &mut write);
        }
    }
    Ok(())
}

/// Instances drawn by the indirect draw at `offset` in `arguments`.
pub(super) fn indirect_draw(
    bound: &Bound<'_>,
    arguments: &[u8],
    offset: u64,
) -> BackendResult<(IndexRange, Vec<DrawInstance>)> {
    let args: crate::gpu::DrawIndexedIndirectArgs = arguments
        .get(offset as usize..offset as usize + crate::gpu::DrawIndexedIndirectArgs::SIZE as usize)
        .map(bytemuck::pod_read_unaligned)
        .ok_or_else(|| {
            BackendError::InvalidCommand(format!("indirect arguments at offset {offset} out of range"))
        })?;
    let instance_bytes = bound.bytes(BufferIndex::Instances)?;
    let instances = (args.first_instance..args.first_instance + args.instance_count)
        .map(|i| fetch::<InstanceRecord>(instance_bytes, i as usize).map(|r| DrawInstance::from(&r)))
        .collect::<BackendResult<Vec<_>>>()?;
    Ok((
        IndexRange {
            first_index: args.first_index,
            index_count: args.index_count,
            base_vertex: args.base_vertex,
        },
        instances,
    ))
}

/// Full-screen deferred lighting into `output`.
pub(super) fn draw_lighting(
    bound: &Bound<'_>,
    inputs: &HashMap<GBufferTexture, &Texture>,
    output: &mut Texture,
) -> BackendResult<()> {
    let input = |binding: GBufferTexture| {
        inputs.get(&binding).copied().ok_or_else(|| {
            BackendError::InvalidCommand(format!("lighting pass has no {binding:?} texture bound"))
        })
    };
    let albedo = input(GBufferTexture::Albedo)?;
    let normal = input(GBufferTexture::Normal)?;
    let position = input(GBufferTexture::Position)?;
    let specular = input(GBufferTexture::Specular)?;
    let shadow_map = input(GBufferTexture::Shadow)?;

    let uniforms: FragmentUniforms = bound.read(BufferIndex::FragmentUniforms, 0)?;
    let constants: LightConstants = bound.read(BufferIndex::LightConstants, 0)?;
    let shadow_matrix = bound.read::<Uniforms>(BufferIndex::Uniforms, 0)?.shadow_matrix;
    let count = constants.light_count as usize;
    let lights: Vec<GpuLight> = read_array(bound.bytes(BufferIndex::Lights)?, count);
    if lights.len() < count {
        return Err(BackendError::InvalidCommand(format!(
            "light buffer holds {} of {count} lights",
            lights.len()
        )));
    }

    let width = output.desc.width as usize;
    let (out_w, out_h) = (output.desc.width, output.desc.height);
    output
        .texels
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let (x32, y32) = (x as u32, y as u32);
                let sample = SurfaceSample::from_gbuffer(
                    albedo.texel_scaled(x32, y32, out_w, out_h),
                    normal.texel_scaled(x32, y32, out_w, out_h),
                    position.texel_scaled(x32, y32, out_w, out_h),
                    specular.texel_scaled(x32, y32, out_w, out_h),
                );
                let Some(surface) = sample else {
                    continue;
                };
                let color = shade(&surface, &uniforms, &lights, |p| {
                    shadow_visibility(&shadow_matrix, p, |u, v| shadow_map.sample_nearest(u, v))
                });
                row[x * 4..x * 4 + 4].copy_from_slice(&color.extend(1.0).to_array());
            }
        });
    Ok(())
}
