//! Instance Stream Builder: groups drawables into (mesh, material) batches.
//!
//! Output is one contiguous instance array ordered by batch, plus one
//! indexed indirect draw per batch. Batches appear in first-seen order and
//! instances keep their input order inside a batch, so identical inputs
//! always produce identical bytes.

use crate::error::{Diagnostics, RenderError, RenderResult};
use crate::frame::FrameId;
use crate::gpu::{pack_mat3, DrawIndexedIndirectArgs, InstanceRecord, ModelRecord, NONE_INDEX};
use crate::math::is_finite_mat4;
use crate::pipeline::scene_buffers::normal_matrix_or_identity;
use crate::resources::{GeometryArena, MaterialId, MeshId};
use crate::scene::{Drawable, MorphOverride};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub mesh: MeshId,
    pub material: MaterialId,
}

/// A contiguous run of instances sharing one mesh and material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub key: BatchKey,
    pub first_instance: u32,
    pub instance_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStream {
    pub frame: FrameId,
    pub instances: Vec<InstanceRecord>,
    pub batches: Vec<Batch>,
    pub draw_arguments: Vec<DrawIndexedIndirectArgs>,
    /// Drawable index for each instance slot.
    pub source_order: Vec<usize>,
    lookup: HashMap<BatchKey, usize>,
}

impl InstanceStream {
    pub fn empty(frame: FrameId) -> Self {
        Self {
            frame,
            instances: Vec::new(),
            batches: Vec::new(),
            draw_arguments: Vec::new(),
            source_order: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// `(offset, count)` of the batch for `key`.
    pub fn batch_range(&self, key: BatchKey) -> Option<(u32, u32)> {
        self.lookup.get(&key).map(|&i| {
            let batch = &self.batches[i];
            (batch.first_instance, batch.instance_count)
        })
    }

    pub fn model_records(&self) -> Vec<ModelRecord> {
        self.batches
            .iter()
            .map(|b| ModelRecord {
                mesh_index: b.key.mesh.0,
                material_index: b.key.material.0,
                first_instance: b.first_instance,
                instance_count: b.instance_count,
            })
            .collect()
    }
}

pub struct InstanceStreamInput<'a> {
    pub frame: FrameId,
    pub drawables: &'a [Drawable],
    pub morph_overrides: &'a [MorphOverride],
    pub geometry: &'a GeometryArena,
    pub material_count: usize,
}

#[derive(Debug, Clone)]
pub struct InstanceStreamBuilder {
    pub max_instances: usize,
}

impl InstanceStreamBuilder {
    pub fn new(max_instances: usize) -> Self {
        Self { max_instances }
    }

    /// Builds the stream. On any error nothing is emitted.
    pub fn build(
        &self,
        input: &InstanceStreamInput<'_>,
        diagnostics: &Diagnostics,
    ) -> RenderResult<InstanceStream> {
        let drawables = input.drawables;
        if drawables.len() > self.max_instances {
            return Err(RenderError::CapacityExceeded {
                resource: "instances",
                requested: drawables.len(),
                capacity: self.max_instances,
            });
        }

        let mut overrides: HashMap<usize, MorphOverride> = HashMap::new();
        for o in input.morph_overrides {
            if o.drawable >= drawables.len() {
                log::debug!("Ignoring morph override for missing drawable {}", o.drawable);
                continue;
            }
            overrides.insert(o.drawable, *o);
        }

        // Bucket drawable indices per batch in first-seen order.
        let mut lookup: HashMap<BatchKey, usize> = HashMap::new();
        let mut keys: Vec<BatchKey> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (index, drawable) in drawables.iter().enumerate() {
            if !is_finite_mat4(&drawable.model_matrix) {
                return Err(RenderError::InvalidTransform {
                    what: format!("model matrix of drawable {index}"),
                });
            }
            if input.geometry.range(drawable.mesh).is_none() {
                return Err(RenderError::UnknownMesh(drawable.mesh.0));
            }
            if drawable.material.0 as usize >= input.material_count {
                return Err(RenderError::UnknownMaterial(drawable.material.0));
            }
            let key = BatchKey {
                mesh: drawable.mesh,
                material: drawable.material,
            };
            let batch = *lookup.entry(key).or_insert_with(|| {
                keys.push(key);
                members.push(Vec::new());
                keys.len() - 1
            });
            members[batch].push(index);
        }

        let mut stream = InstanceStream::empty(input.frame);
        stream.instances.reserve(drawables.len());
        stream.source_order.reserve(drawables.len());

        for (key, indices) in keys.iter().zip(&members) {
            let range = input
                .geometry
                .range(key.mesh)
                .ok_or(RenderError::UnknownMesh(key.mesh.0))?;
            let first_instance = stream.instances.len() as u32;
            for &index in indices {
                let drawable = &drawables[index];
                let normal = normal_matrix_or_identity(
                    &drawable.model_matrix,
                    &format!("drawable {index}"),
                    diagnostics,
                );
                let morph = overrides.get(&index);
                let texture_id = morph
                    .and_then(|o| o.texture_id)
                    .or(drawable.texture_id)
                    .unwrap_or(NONE_INDEX);
                let morph_target_id = morph.and_then(|o| o.morph_target_id).unwrap_or(NONE_INDEX);
                stream.instances.push(InstanceRecord {
                    model_matrix: drawable.model_matrix,
                    normal_matrix: pack_mat3(normal),
                    material_index: key.material.0,
                    texture_id,
                    morph_target_id,
                    _padding: 0,
                });
                stream.source_order.push(index);
            }
            let instance_count = indices.len() as u32;
            stream.batches.push(Batch {
                key: *key,
                first_instance,
                instance_count,
            });
            stream.draw_arguments.push(
                DrawIndexedIndirectArgs::new(range.index_count, instance_count)
                    .with_first_index(range.first_index)
                    .with_base_vertex(range.base_vertex)
                    .with_first_instance(first_instance),
            );
        }
        stream.lookup = lookup;

        log::debug!(
            "Instance stream for {}: {} instances in {} batches",
            input.frame,
            stream.instances.len(),
            stream.batches.len()
        );
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::unpack_mat3;
    use crate::resources::Mesh;
    use glam::{Mat3, Mat4, Vec3};

    fn arena() -> (GeometryArena, MeshId, MeshId) {
        let mut arena = GeometryArena::new();
        let quad = arena.add(&Mesh::quad());
        let cube = arena.add(&Mesh::cube());
        (arena, quad, cube)
    }

    fn build(
        drawables: &[Drawable],
        overrides: &[MorphOverride],
        arena: &GeometryArena,
        max: usize,
    ) -> RenderResult<InstanceStream> {
        InstanceStreamBuilder::new(max).build(
            &InstanceStreamInput {
                frame: FrameId(3),
                drawables,
                morph_overrides: overrides,
                geometry: arena,
                material_count: 2,
            },
            &Diagnostics::new(),
        )
    }

    #[test]
    fn test_batches_first_seen_order() {
        let (arena, quad, cube) = arena();
        let m0 = MaterialId(0);
        let m1 = MaterialId(1);
        let drawables = vec![
            Drawable::new(cube, m0).with_position(Vec3::X),
            Drawable::new(quad, m1).with_position(Vec3::Y),
            Drawable::new(cube, m0).with_position(Vec3::Z),
            Drawable::new(cube, m1),
        ];
        let stream = build(&drawables, &[], &arena, 16).unwrap();

        assert_eq!(stream.batches.len(), 3);
        assert_eq!(stream.source_order, vec![0, 2, 1, 3]);
        assert_eq!(
            stream.batch_range(BatchKey {
                mesh: cube,
                material: m0
            }),
            Some((0, 2))
        );
        let args = stream.draw_arguments[1];
        assert_eq!(args.index_count, 6);
        assert_eq!(args.first_instance, 2);
        assert_eq!(args.instance_count, 1);
        assert_eq!(stream.draw_arguments[0].base_vertex, 4);
        assert_eq!(stream.instances[1].model_matrix, Mat4::from_translation(Vec3::Z));
    }

    #[test]
    fn test_build_is_deterministic() {
        let (arena, quad, cube) = arena();
        let drawables: Vec<Drawable> = (0..20)
            .map(|i| {
                let mesh = if i % 3 == 0 { quad } else { cube };
                Drawable::new(mesh, MaterialId(i % 2)).with_position(Vec3::splat(i as f32))
            })
            .collect();
        let a = build(&drawables, &[], &arena, 64).unwrap();
        let b = build(&drawables, &[], &arena, 64).unwrap();
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&a.instances),
            bytemuck::cast_slice::<_, u8>(&b.instances)
        );
        assert_eq!(a.draw_arguments, b.draw_arguments);
    }

    #[test]
    fn test_over_capacity_emits_nothing() {
        let (arena, quad, _) = arena();
        let drawables = vec![Drawable::new(quad, MaterialId(0)); 5];
        match build(&drawables, &[], &arena, 4) {
            Err(RenderError::CapacityExceeded {
                requested,
                capacity,
                ..
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(capacity, 4);
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_morph_override_and_texture() {
        let (arena, quad, _) = arena();
        let drawables = vec![
            Drawable::new(quad, MaterialId(0)).with_texture(4),
            Drawable::new(quad, MaterialId(0)),
        ];
        let overrides = [MorphOverride {
            drawable: 1,
            texture_id: None,
            morph_target_id: Some(2),
        }];
        let stream = build(&drawables, &overrides, &arena, 4).unwrap();
        assert_eq!(stream.instances[0].texture_id, 4);
        assert_eq!(stream.instances[0].morph_target_id, NONE_INDEX);
        assert_eq!(stream.instances[1].texture_id, NONE_INDEX);
        assert_eq!(stream.instances[1].morph_target_id, 2);
    }

    #[test]
    fn test_degenerate_instance_uses_identity_normal_matrix() {
        let (arena, quad, _) = arena();
        let drawables = vec![
            Drawable::new(quad, MaterialId(0)).with_transform(Mat4::from_scale(Vec3::ZERO))
        ];
        let diagnostics = Diagnostics::new();
        let stream = InstanceStreamBuilder::new(4)
            .build(
                &InstanceStreamInput {
                    frame: FrameId(0),
                    drawables: &drawables,
                    morph_overrides: &[],
                    geometry: &arena,
                    material_count: 1,
                },
                &diagnostics,
            )
            .unwrap();
        assert_eq!(unpack_mat3(&stream.instances[0].normal_matrix), Mat3::IDENTITY);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_invalid_references_rejected() {
        let (arena, quad, _) = arena();
        let bad_mesh = vec![Drawable::new(MeshId(9), MaterialId(0))];
        assert!(matches!(
            build(&bad_mesh, &[], &arena, 4),
            Err(RenderError::UnknownMesh(9))
        ));
        let bad_material = vec![Drawable::new(quad, MaterialId(5))];
        assert!(matches!(
            build(&bad_material, &[], &arena, 4),
            Err(RenderError::UnknownMaterial(5))
        ));
        let nan = vec![Drawable::new(quad, MaterialId(0))
            .with_transform(Mat4::from_translation(Vec3::new(f32::NAN, 0.0, 0.0)))];
        assert!(matches!(
            build(&nan, &[], &arena, 4),
            Err(RenderError::InvalidTransform { .. })
        ));
    }
}
