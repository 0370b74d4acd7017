//! Indirect Command Encoder.
//!
//! Turns an instance stream into the indirect command buffer the G-buffer
//! pass executes: one encoded draw per batch, in batch order, plus the
//! buffer bindings those draws read.

use crate::backend::BackendError;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameId;
use crate::gpu::{BindingTable, BufferIndex, EncodedDraw};
use crate::pipeline::instance_stream::InstanceStream;

/// Buffers every instanced G-buffer draw reads.
pub const INSTANCED_DRAW_BINDINGS: [BufferIndex; 6] = [
    BufferIndex::Vertices,
    BufferIndex::SceneConstants,
    BufferIndex::Materials,
    BufferIndex::Instances,
    BufferIndex::Models,
    BufferIndex::IndirectCommandBuffer,
];

#[derive(Debug, Clone, PartialEq)]
pub struct IndirectCommandBuffer {
    pub frame: FrameId,
    pub commands: Vec<EncodedDraw>,
    /// `(buffer, slot)` pairs resolved through the binding table.
    pub bindings: Vec<(BufferIndex, u32)>,
}

impl IndirectCommandBuffer {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Byte offset of draw `index` inside the uploaded buffer.
    pub fn offset_of(index: usize) -> u64 {
        index as u64 * EncodedDraw::STRIDE
    }

    pub fn total_instances(&self) -> u32 {
        self.commands.iter().map(|c| c.args.instance_count).sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndirectCommandEncoder;

impl IndirectCommandEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encodes `stream` for `frame`.
    ///
    /// A stream built for another frame is a sequencing error: the G-buffer
    /// pass must never draw stale instances.
    pub fn encode(
        &self,
        stream: &InstanceStream,
        bindings: &BindingTable,
        frame: FrameId,
    ) -> RenderResult<IndirectCommandBuffer> {
        if stream.frame != frame {
            log::error!("Instance stream from {} encoded during {}", stream.frame, frame);
            return Err(RenderError::FrameSequenceViolation {
                stage: "encode",
                expected: frame.to_string(),
                found: stream.frame.to_string(),
            });
        }
        if stream.batches.len() != stream.draw_arguments.len() {
            return Err(BackendError::InvalidCommand(format!(
                "{} batches but {} draw arguments",
                stream.batches.len(),
                stream.draw_arguments.len()
            ))
            .into());
        }

        let mut next_instance = 0u32;
        let mut commands = Vec::with_capacity(stream.batches.len());
        for (index, (batch, args)) in stream
            .batches
            .iter()
            .zip(&stream.draw_arguments)
            .enumerate()
        {
            if batch.first_instance != next_instance
                || args.first_instance != batch.first_instance
                || args.instance_count != batch.instance_count
            {
                return Err(BackendError::InvalidCommand(format!(
                    "batch {index} does not continue the instance range at {next_instance}"
                ))
                .into());
            }
            next_instance += batch.instance_count;
            commands.push(EncodedDraw {
                args: *args,
                batch_index: index as u32,
                material_index: batch.key.material.0,
                _padding: 0,
            });
        }
        if next_instance as usize != stream.instances.len() {
            return Err(BackendError::InvalidCommand(format!(
                "batches cover {next_instance} of {} instances",
                stream.instances.len()
            ))
            .into());
        }

        let bindings = INSTANCED_DRAW_BINDINGS
            .iter()
            .map(|&b| (b, bindings.slot(b)))
            .collect();
        log::trace!("Encoded {} indirect draws for {}", commands.len(), frame);
        Ok(IndirectCommandBuffer {
            frame,
            commands,
            bindings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::pipeline::instance_stream::{InstanceStreamBuilder, InstanceStreamInput};
    use crate::resources::{GeometryArena, MaterialId, Mesh};
    use crate::scene::Drawable;
    use glam::Vec3;

    fn stream(frame: FrameId) -> InstanceStream {
        let mut arena = GeometryArena::new();
        let cube = arena.add(&Mesh::cube());
        let quad = arena.add(&Mesh::quad());
        let drawables = vec![
            Drawable::new(cube, MaterialId(1)),
            Drawable::new(quad, MaterialId(0)).with_position(Vec3::X),
            Drawable::new(cube, MaterialId(1)).with_position(Vec3::Y),
        ];
        InstanceStreamBuilder::new(8)
            .build(
                &InstanceStreamInput {
                    frame,
                    drawables: &drawables,
                    morph_overrides: &[],
                    geometry: &arena,
                    material_count: 2,
                },
                &Diagnostics::new(),
            )
            .unwrap()
    }

    #[test]
    fn test_encode_preserves_batch_order() {
        let frame = FrameId(7);
        let icb = IndirectCommandEncoder::new()
            .encode(&stream(frame), &BindingTable::default(), frame)
            .unwrap();

        assert_eq!(icb.len(), 2);
        assert_eq!(icb.commands[0].batch_index, 0);
        assert_eq!(icb.commands[0].material_index, 1);
        assert_eq!(icb.commands[0].args.instance_count, 2);
        assert_eq!(icb.commands[1].args.first_instance, 2);
        assert_eq!(icb.total_instances(), 3);
        assert_eq!(IndirectCommandBuffer::offset_of(1), 32);
    }

    #[test]
    fn test_stale_stream_rejected() {
        let result =
            IndirectCommandEncoder::new().encode(&stream(FrameId(1)), &BindingTable::default(), FrameId(2));
        match result {
            Err(err @ RenderError::FrameSequenceViolation { .. }) => assert!(err.is_fatal()),
            other => panic!("expected FrameSequenceViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_bindings_follow_remap() {
        let frame = FrameId(0);
        let table = BindingTable::default().with_remap(BufferIndex::Instances, 30);
        let icb = IndirectCommandEncoder::new()
            .encode(&stream(frame), &table, frame)
            .unwrap();
        assert!(icb.bindings.contains(&(BufferIndex::Instances, 30)));
        assert!(icb.bindings.contains(&(BufferIndex::Vertices, 0)));
    }

    #[test]
    fn test_empty_stream_encodes_nothing() {
        let frame = FrameId(4);
        let icb = IndirectCommandEncoder::new()
            .encode(&InstanceStream::empty(frame), &BindingTable::default(), frame)
            .unwrap();
        assert!(icb.is_empty());
    }

    #[test]
    fn test_broken_contiguity_rejected() {
        let frame = FrameId(0);
        let mut broken = stream(frame);
        broken.batches[1].first_instance = 5;
        assert!(IndirectCommandEncoder::new()
            .encode(&broken, &BindingTable::default(), frame)
            .is_err());
    }
}
