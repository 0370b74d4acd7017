//! Byte layouts of every GPU-visible struct.
//!
//! All structs are `#[repr(C)]` and `Pod`, laid out in 16-byte rows so the
//! same bytes read correctly under WGSL storage/uniform layout rules.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use static_assertions::const_assert_eq;

/// Sentinel for "no texture" / "no morph target" in instance records.
pub const NONE_INDEX: u32 = u32::MAX;

/// Vertex with position, normal and texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coords,
        }
    }

    /// Attribute offsets in bytes: position, normal, uv.
    pub const ATTRIBUTE_OFFSETS: [u64; 3] = [0, 12, 24];
}

/// One entry of the light array.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// World position for point/spot lights, travel direction for the sun.
    pub position: Vec3,
    pub light_type: u32,
    pub color: Vec3,
    pub intensity: f32,
    pub specular_color: Vec3,
    /// Spot cone half-angle in radians.
    pub cone_angle: f32,
    /// Constant, linear and quadratic falloff terms.
    pub attenuation: Vec3,
    pub cone_attenuation: f32,
    pub cone_direction: Vec3,
    pub _padding: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub base_color: Vec3,
    pub roughness: f32,
    pub specular_color: Vec3,
    pub metallic: f32,
    pub ambient_occlusion: f32,
    pub shininess: f32,
    pub _padding: [f32; 2],
}

/// Per-frame camera constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub projection_matrix: Mat4,
    pub view_matrix: Mat4,
    pub camera_position: Vec3,
    pub _padding: f32,
}

/// Constants read by the lighting kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FragmentUniforms {
    pub camera_position: Vec3,
    pub light_count: u32,
    pub ambient_color: Vec3,
    pub ambient_intensity: f32,
    /// Non-zero when the shadow map holds valid depth for this frame.
    pub shadow_enabled: u32,
    pub _padding: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightConstants {
    pub light_count: u32,
    pub _padding: [u32; 3],
}

/// View-level uniforms: model/view/projection, shadow matrix and clip plane.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    pub model_matrix: Mat4,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub normal_matrix: [Vec4; 3],
    pub shadow_matrix: Mat4,
    pub clip_plane: Vec4,
    pub camera_position: Vec3,
    pub _padding: f32,
}

/// Per-draw parameters for non-instanced geometry such as terrain.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelParams {
    pub model_matrix: Mat4,
    pub normal_matrix: [Vec4; 3],
    pub tiling: u32,
    pub material_index: u32,
    pub _padding: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TerrainUniforms {
    pub size: Vec2,
    pub height: f32,
    pub max_tessellation: u32,
}

/// One instance in the instance stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub model_matrix: Mat4,
    pub normal_matrix: [Vec4; 3],
    pub material_index: u32,
    pub texture_id: u32,
    pub morph_target_id: u32,
    pub _padding: u32,
}

/// Per-batch record bound at the models slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ModelRecord {
    pub mesh_index: u32,
    pub material_index: u32,
    pub first_instance: u32,
    pub instance_count: u32,
}

/// Arguments of one indexed indirect draw, in the layout GPUs consume.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(index_count: u32, instance_count: u32) -> Self {
        Self {
            index_count,
            instance_count,
            ..Default::default()
        }
    }

    pub fn with_first_index(mut self, first_index: u32) -> Self {
        self.first_index = first_index;
        self
    }

    pub fn with_base_vertex(mut self, base_vertex: i32) -> Self {
        self.base_vertex = base_vertex;
        self
    }

    pub fn with_first_instance(mut self, first_instance: u32) -> Self {
        self.first_instance = first_instance;
        self
    }
}

/// An encoded draw in the indirect command buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EncodedDraw {
    pub args: DrawIndexedIndirectArgs,
    pub batch_index: u32,
    pub material_index: u32,
    pub _padding: u32,
}

impl EncodedDraw {
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Tessellation factors for one quad patch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PatchTessellation {
    /// Left, bottom, right, top edge factors.
    pub edges: [f32; 4],
    pub inside: [f32; 2],
    pub _padding: [f32; 2],
}

impl PatchTessellation {
    pub fn culled() -> Self {
        Self::default()
    }

    pub fn is_culled(&self) -> bool {
        self.inside[0] == 0.0
    }
}

const_assert_eq!(std::mem::size_of::<Vertex>(), 32);
const_assert_eq!(std::mem::size_of::<GpuLight>(), 80);
const_assert_eq!(std::mem::size_of::<GpuMaterial>(), 48);
const_assert_eq!(std::mem::size_of::<SceneConstants>(), 144);
const_assert_eq!(std::mem::size_of::<FragmentUniforms>(), 48);
const_assert_eq!(std::mem::size_of::<LightConstants>(), 16);
const_assert_eq!(std::mem::size_of::<Uniforms>(), 336);
const_assert_eq!(std::mem::size_of::<ModelParams>(), 128);
const_assert_eq!(std::mem::size_of::<TerrainUniforms>(), 16);
const_assert_eq!(std::mem::size_of::<InstanceRecord>(), 128);
const_assert_eq!(std::mem::size_of::<ModelRecord>(), 16);
const_assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);
const_assert_eq!(std::mem::size_of::<EncodedDraw>(), 32);
const_assert_eq!(std::mem::size_of::<PatchTessellation>(), 32);

/// Packs a 3x3 matrix as three padded columns.
pub fn pack_mat3(m: Mat3) -> [Vec4; 3] {
    [
        m.x_axis.extend(0.0),
        m.y_axis.extend(0.0),
        m.z_axis.extend(0.0),
    ]
}

pub fn unpack_mat3(columns: &[Vec4; 3]) -> Mat3 {
    Mat3::from_cols(
        columns[0].truncate(),
        columns[1].truncate(),
        columns[2].truncate(),
    )
}

/// Reads a `Pod` array out of raw bytes, ignoring any trailing partial element.
pub fn read_array<T: Pod>(bytes: &[u8], count: usize) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    bytes
        .chunks_exact(size)
        .take(count)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat3_pack_roundtrip() {
        let m = Mat3::from_cols(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec3::new(7.0, 8.0, 9.0),
        );
        let packed = pack_mat3(m);
        assert_eq!(packed[1], Vec4::new(4.0, 5.0, 6.0, 0.0));
        assert_eq!(unpack_mat3(&packed), m);
    }

    #[test]
    fn test_draw_args_builder() {
        let args = DrawIndexedIndirectArgs::new(36, 4)
            .with_first_index(12)
            .with_base_vertex(-3)
            .with_first_instance(8);
        assert_eq!(args.index_count, 36);
        assert_eq!(args.instance_count, 4);
        assert_eq!(args.first_index, 12);
        assert_eq!(args.base_vertex, -3);
        assert_eq!(args.first_instance, 8);
    }

    #[test]
    fn test_read_array_unaligned() {
        let lights = [
            LightConstants {
                light_count: 3,
                _padding: [0; 3],
            },
            LightConstants {
                light_count: 7,
                _padding: [0; 3],
            },
        ];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(bytemuck::cast_slice(&lights));
        let read: Vec<LightConstants> = read_array(&bytes[1..], 2);
        assert_eq!(read, lights);
    }
}
