//! Mesh data, procedural generators and the shared geometry arena.

use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend};
use crate::error::RenderResult;
use crate::gpu::Vertex;
use glam::{Vec2, Vec3};

/// A mesh with vertex and index data
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

fn vertex(position: Vec3, normal: Vec3, uv: Vec2) -> Vertex {
    Vertex::new(position.to_array(), normal.to_array(), uv.to_array())
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        for (face, (normal, right, up)) in faces.into_iter().enumerate() {
            let center = normal * 0.5;
            let corners = [
                (center - right * 0.5 - up * 0.5, Vec2::new(0.0, 1.0)),
                (center + right * 0.5 - up * 0.5, Vec2::new(1.0, 1.0)),
                (center + right * 0.5 + up * 0.5, Vec2::new(1.0, 0.0)),
                (center - right * 0.5 + up * 0.5, Vec2::new(0.0, 0.0)),
            ];
            for (position, uv) in corners {
                mesh.vertices.push(vertex(position, normal, uv));
            }
            let base = face as u32 * 4;
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                let uv = Vec2::new(
                    segment as f32 / segments as f32,
                    ring as f32 / rings as f32,
                );
                mesh.vertices
                    .push(vertex(normal * 0.5, normal.normalize_or_zero(), uv));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Create a plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let px = -half_width + x as f32 * step_x;
                let pz = -half_depth + z as f32 * step_z;
                let uv = Vec2::new(
                    x as f32 / subdivisions as f32,
                    z as f32 / subdivisions as f32,
                );
                mesh.vertices
                    .push(vertex(Vec3::new(px, 0.0, pz), Vec3::Y, uv));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// Unit square in the XY plane facing +Z
    pub fn quad() -> Self {
        let mut mesh = Mesh::new("quad");
        let corners = [
            (Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.0), Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, 0.0), Vec2::new(0.0, 0.0)),
        ];
        for (position, uv) in corners {
            mesh.vertices.push(vertex(position, Vec3::Z, uv));
        }
        mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
        mesh
    }
}

/// Handle of a mesh registered in a [`GeometryArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Where a mesh lives inside the shared vertex and index buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub vertex_count: u32,
}

/// GPU copies of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryBuffers {
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
}

/// Packs every mesh into one vertex buffer and one index buffer.
///
/// Indices stay mesh-local; draws add `base_vertex`. The GPU copy is
/// static and only rebuilt when new meshes are added.
#[derive(Debug, Default)]
pub struct GeometryArena {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    ranges: Vec<MeshRange>,
    names: Vec<String>,
    uploaded: Option<GeometryBuffers>,
    dirty: bool,
}

impl GeometryArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mesh: &Mesh) -> MeshId {
        let range = MeshRange {
            first_index: self.indices.len() as u32,
            index_count: mesh.indices.len() as u32,
            base_vertex: self.vertices.len() as i32,
            vertex_count: mesh.vertices.len() as u32,
        };
        self.vertices.extend_from_slice(&mesh.vertices);
        self.indices.extend_from_slice(&mesh.indices);
        self.ranges.push(range);
        self.names.push(mesh.name.clone());
        self.dirty = true;
        let id = MeshId(self.ranges.len() as u32 - 1);
        log::debug!(
            "Registered mesh '{}' as {:?}: {} vertices, {} indices",
            mesh.name,
            id,
            range.vertex_count,
            range.index_count
        );
        id
    }

    pub fn range(&self, id: MeshId) -> Option<MeshRange> {
        self.ranges.get(id.0 as usize).copied()
    }

    pub fn name(&self, id: MeshId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// True when meshes were added since the last upload.
    pub fn needs_upload(&self) -> bool {
        self.dirty || self.uploaded.is_none()
    }

    pub fn buffers(&self) -> Option<GeometryBuffers> {
        self.uploaded
    }

    /// Uploads (or re-uploads) the packed geometry.
    ///
    /// Callers must ensure no submitted work still reads the previous buffers.
    pub fn upload<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> RenderResult<GeometryBuffers> {
        if let (Some(buffers), false) = (self.uploaded, self.dirty) {
            return Ok(buffers);
        }
        if let Some(old) = self.uploaded.take() {
            backend.destroy_buffer(old.vertices);
            backend.destroy_buffer(old.indices);
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);
        let vertices = backend.create_buffer(&BufferDescriptor {
            label: Some("Geometry Vertices".to_string()),
            size: (vertex_bytes.len() as u64).max(Vertex::STRIDE),
            usage: BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
        })?;
        let indices = backend.create_buffer(&BufferDescriptor {
            label: Some("Geometry Indices".to_string()),
            size: (index_bytes.len() as u64).max(4),
            usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
        })?;
        if !vertex_bytes.is_empty() {
            backend.write_buffer(vertices, 0, vertex_bytes)?;
        }
        if !index_bytes.is_empty() {
            backend.write_buffer(indices, 0, index_bytes)?;
        }

        let buffers = GeometryBuffers { vertices, indices };
        self.uploaded = Some(buffers);
        self.dirty = false;
        log::debug!(
            "Uploaded geometry arena: {} meshes, {} vertices, {} indices",
            self.ranges.len(),
            self.vertices.len(),
            self.indices.len()
        );
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_shape() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
        for v in &cube.vertices {
            let n = Vec3::from_array(v.normal);
            let p = Vec3::from_array(v.position);
            assert!((p.dot(n) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_arena_ranges_are_packed() {
        let mut arena = GeometryArena::new();
        let quad = arena.add(&Mesh::quad());
        let cube = arena.add(&Mesh::cube());

        assert_eq!(
            arena.range(quad),
            Some(MeshRange {
                first_index: 0,
                index_count: 6,
                base_vertex: 0,
                vertex_count: 4
            })
        );
        assert_eq!(
            arena.range(cube),
            Some(MeshRange {
                first_index: 6,
                index_count: 36,
                base_vertex: 4,
                vertex_count: 24
            })
        );
        assert!(arena.range(MeshId(2)).is_none());
        assert_eq!(arena.name(cube), Some("cube"));
    }
}
