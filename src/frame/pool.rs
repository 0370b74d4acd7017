//! Per-frame GPU buffers with fence-guarded reuse.
//!
//! With N frames in flight there are N slots, each owning a full set of
//! per-frame buffers. A slot is handed out as a [`FrameSlot`] token; the
//! token is consumed on submission, so a frame's buffers cannot be written
//! once its work is in flight. Reusing a slot waits for the fence of the
//! frame that last used it.
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```

use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend};
use crate::error::{RenderError, RenderResult};
use crate::frame::{Fence, FrameId};
use std::collections::HashMap;

const MIN_BUFFER_SIZE: u64 = 256;

/// Per-frame buffers written by the CPU builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameBufferKind {
    SceneConstants,
    FragmentUniforms,
    LightConstants,
    Uniforms,
    Lights,
    Materials,
    Instances,
    DrawArguments,
    Models,
    IndirectCommands,
    ModelParams,
    TerrainUniforms,
    TessellationFactors,
    TerrainVertices,
    TerrainIndices,
}

impl FrameBufferKind {
    pub const ALL: [FrameBufferKind; 15] = [
        FrameBufferKind::SceneConstants,
        FrameBufferKind::FragmentUniforms,
        FrameBufferKind::LightConstants,
        FrameBufferKind::Uniforms,
        FrameBufferKind::Lights,
        FrameBufferKind::Materials,
        FrameBufferKind::Instances,
        FrameBufferKind::DrawArguments,
        FrameBufferKind::Models,
        FrameBufferKind::IndirectCommands,
        FrameBufferKind::ModelParams,
        FrameBufferKind::TerrainUniforms,
        FrameBufferKind::TessellationFactors,
        FrameBufferKind::TerrainVertices,
        FrameBufferKind::TerrainIndices,
    ];

    fn usage(self) -> BufferUsage {
        let base = BufferUsage::COPY_DST | BufferUsage::COPY_SRC;
        match self {
            FrameBufferKind::SceneConstants
            | FrameBufferKind::FragmentUniforms
            | FrameBufferKind::LightConstants
            | FrameBufferKind::Uniforms
            | FrameBufferKind::ModelParams
            | FrameBufferKind::TerrainUniforms => base | BufferUsage::UNIFORM,
            FrameBufferKind::DrawArguments | FrameBufferKind::IndirectCommands => {
                base | BufferUsage::STORAGE | BufferUsage::INDIRECT
            }
            FrameBufferKind::TerrainVertices => base | BufferUsage::VERTEX | BufferUsage::STORAGE,
            FrameBufferKind::TerrainIndices => base | BufferUsage::INDEX,
            FrameBufferKind::Lights
            | FrameBufferKind::Materials
            | FrameBufferKind::Instances
            | FrameBufferKind::Models
            | FrameBufferKind::TessellationFactors => base | BufferUsage::STORAGE,
        }
    }
}

/// Initial byte sizes for a slot's buffers.
#[derive(Debug, Clone, Default)]
pub struct FrameCapacities {
    sizes: HashMap<FrameBufferKind, u64>,
}

impl FrameCapacities {
    pub fn with(mut self, kind: FrameBufferKind, bytes: u64) -> Self {
        self.sizes.insert(kind, bytes);
        self
    }

    pub fn get(&self, kind: FrameBufferKind) -> u64 {
        self.sizes
            .get(&kind)
            .copied()
            .unwrap_or(MIN_BUFFER_SIZE)
            .max(MIN_BUFFER_SIZE)
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotBuffer {
    handle: BufferHandle,
    capacity: u64,
}

/// One slot's buffer set.
#[derive(Debug)]
pub struct FrameBuffers {
    buffers: HashMap<FrameBufferKind, SlotBuffer>,
    slot: usize,
}

impl FrameBuffers {
    fn allocate<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        slot: usize,
        capacities: &FrameCapacities,
    ) -> RenderResult<Self> {
        let mut buffers = HashMap::new();
        for kind in FrameBufferKind::ALL {
            let capacity = capacities.get(kind);
            let handle = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("{kind:?} (slot {slot})")),
                size: capacity,
                usage: kind.usage(),
            })?;
            buffers.insert(kind, SlotBuffer { handle, capacity });
        }
        Ok(Self { buffers, slot })
    }

    pub fn handle(&self, kind: FrameBufferKind) -> Option<BufferHandle> {
        self.buffers.get(&kind).map(|b| b.handle)
    }

    pub fn capacity(&self, kind: FrameBufferKind) -> u64 {
        self.buffers.get(&kind).map(|b| b.capacity).unwrap_or(0)
    }

    /// Writes `bytes` at offset zero, growing the buffer when it is too small.
    pub fn upload<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        kind: FrameBufferKind,
        bytes: &[u8],
    ) -> RenderResult<BufferHandle> {
        let len = bytes.len() as u64;
        let current = self.buffers.get(&kind).copied();
        let buffer = match current {
            Some(buffer) if buffer.capacity >= len => buffer,
            _ => {
                let capacity = len.next_power_of_two().max(MIN_BUFFER_SIZE);
                if let Some(old) = current {
                    log::debug!(
                        "Growing {kind:?} in slot {} from {} to {capacity} bytes",
                        self.slot,
                        old.capacity
                    );
                    backend.destroy_buffer(old.handle);
                }
                let handle = backend.create_buffer(&BufferDescriptor {
                    label: Some(format!("{kind:?} (slot {})", self.slot)),
                    size: capacity,
                    usage: kind.usage(),
                })?;
                let buffer = SlotBuffer { handle, capacity };
                self.buffers.insert(kind, buffer);
                buffer
            }
        };
        if !bytes.is_empty() {
            backend.write_buffer(buffer.handle, 0, bytes)?;
        }
        Ok(buffer.handle)
    }

    fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for (_, buffer) in self.buffers {
            backend.destroy_buffer(buffer.handle);
        }
    }
}

/// Exclusive ownership of one slot for the frame being prepared.
///
/// Not `Clone`: returned to the pool by [`FramePool::retire`] on submission
/// or [`FramePool::release`] on cancellation.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    frame: FrameId,
    buffers: FrameBuffers,
}

impl FrameSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn buffers(&self) -> &FrameBuffers {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut FrameBuffers {
        &mut self.buffers
    }
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    CheckedOut(FrameId),
    InFlight(FrameId),
}

#[derive(Debug)]
enum SlotState {
    Idle(FrameBuffers),
    CheckedOut(FrameId),
    InFlight {
        buffers: FrameBuffers,
        fence: Fence,
        frame: FrameId,
    },
}

/// Round-robin pool of frame slots.
///
/// Not thread-safe; owned by the render loop.
#[derive(Debug)]
pub struct FramePool {
    slots: Vec<SlotState>,
    next: usize,
}

impl FramePool {
    /// Allocates `frames_in_flight` buffer sets.
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        frames_in_flight: usize,
        capacities: &FrameCapacities,
    ) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        let slots = (0..frames_in_flight)
            .map(|slot| FrameBuffers::allocate(backend, slot, capacities).map(SlotState::Idle))
            .collect::<RenderResult<Vec<_>>>()?;
        log::debug!("Frame pool with {frames_in_flight} slots");
        Ok(Self { slots, next: 0 })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next acquisition will use.
    pub fn next_slot(&self) -> usize {
        self.next
    }

    pub fn status(&self, index: usize) -> Option<SlotStatus> {
        self.slots.get(index).map(|state| match state {
            SlotState::Idle(_) => SlotStatus::Idle,
            SlotState::CheckedOut(frame) => SlotStatus::CheckedOut(*frame),
            SlotState::InFlight { fence, frame, .. } => {
                if fence.is_signaled() {
                    SlotStatus::Idle
                } else {
                    SlotStatus::InFlight(*frame)
                }
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        (0..self.slots.len())
            .filter(|&i| matches!(self.status(i), Some(SlotStatus::InFlight(_))))
            .count()
    }

    /// Takes the next slot for `frame`, blocking until its previous work completes.
    pub fn acquire<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        frame: FrameId,
    ) -> RenderResult<FrameSlot> {
        let index = self.next;
        let buffers = match std::mem::replace(&mut self.slots[index], SlotState::CheckedOut(frame))
        {
            SlotState::Idle(buffers) => buffers,
            SlotState::CheckedOut(owner) => {
                self.slots[index] = SlotState::CheckedOut(owner);
                return Err(RenderError::FrameSequenceViolation {
                    stage: "acquire",
                    expected: format!("slot {index} returned to the pool"),
                    found: format!("slot {index} still held by {owner}"),
                });
            }
            SlotState::InFlight {
                buffers,
                fence,
                frame: previous,
            } => {
                if !fence.is_signaled() {
                    log::trace!("Slot {index} busy with {previous}, waiting");
                    if let Err(err) = backend.poll(true) {
                        self.slots[index] = SlotState::InFlight {
                            buffers,
                            fence,
                            frame: previous,
                        };
                        return Err(err.into());
                    }
                }
                if !fence.is_signaled() {
                    self.slots[index] = SlotState::InFlight {
                        buffers,
                        fence,
                        frame: previous,
                    };
                    return Err(RenderError::DeviceFaulted(format!(
                        "{previous} never completed after a blocking poll"
                    )));
                }
                buffers
            }
        };
        self.next = (index + 1) % self.slots.len();
        log::trace!("Begin {frame} (slot {index})");
        Ok(FrameSlot {
            index,
            frame,
            buffers,
        })
    }

    /// Takes the next slot only if it is free right now.
    pub fn try_acquire(&mut self, frame: FrameId) -> Option<FrameSlot> {
        let index = self.next;
        match &self.slots[index] {
            SlotState::Idle(_) => {}
            SlotState::InFlight { fence, .. } if fence.is_signaled() => {}
            _ => return None,
        }
        let buffers = match std::mem::replace(&mut self.slots[index], SlotState::CheckedOut(frame))
        {
            SlotState::Idle(buffers) | SlotState::InFlight { buffers, .. } => buffers,
            SlotState::CheckedOut(_) => return None,
        };
        self.next = (index + 1) % self.slots.len();
        Some(FrameSlot {
            index,
            frame,
            buffers,
        })
    }

    /// Marks a submitted frame's slot as in flight until `fence` signals.
    pub fn retire(&mut self, slot: FrameSlot, fence: Fence) -> RenderResult<()> {
        let FrameSlot {
            index,
            frame,
            buffers,
        } = slot;
        let expected = matches!(self.slots[index], SlotState::CheckedOut(owner) if owner == frame);
        log::trace!("End {frame} (slot {index})");
        self.slots[index] = SlotState::InFlight {
            buffers,
            fence,
            frame,
        };
        if expected {
            Ok(())
        } else {
            Err(RenderError::FrameSequenceViolation {
                stage: "retire",
                expected: format!("slot {index} held by {frame}"),
                found: "slot in another state".to_string(),
            })
        }
    }

    /// Returns a slot whose frame was cancelled before submission.
    pub fn release(&mut self, slot: FrameSlot) {
        log::trace!("Release {} (slot {})", slot.frame, slot.index);
        self.slots[slot.index] = SlotState::Idle(slot.buffers);
    }

    /// Blocks until every in-flight frame has completed.
    pub fn wait_idle<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> RenderResult<()> {
        let pending = self
            .slots
            .iter()
            .any(|s| matches!(s, SlotState::InFlight { fence, .. } if !fence.is_signaled()));
        if pending {
            backend.poll(true)?;
        }
        for slot in &mut self.slots {
            if let SlotState::InFlight { fence, frame, .. } = slot {
                if !fence.is_signaled() {
                    return Err(RenderError::DeviceFaulted(format!(
                        "{frame} never completed after a blocking poll"
                    )));
                }
            }
            let state = std::mem::replace(slot, SlotState::CheckedOut(FrameId::default()));
            *slot = match state {
                SlotState::InFlight { buffers, .. } => SlotState::Idle(buffers),
                other => other,
            };
        }
        Ok(())
    }

    /// Waits for outstanding work and frees every idle slot's buffers.
    pub fn destroy<B: GraphicsBackend + ?Sized>(mut self, backend: &mut B) -> RenderResult<()> {
        self.wait_idle(backend)?;
        for state in self.slots.drain(..) {
            if let SlotState::Idle(buffers) = state {
                buffers.destroy(backend);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{CompletionMode, SoftwareBackend};
    use crate::backend::CommandList;

    fn pool(backend: &mut SoftwareBackend, frames: usize) -> FramePool {
        FramePool::new(backend, frames, &FrameCapacities::default()).unwrap()
    }

    #[test]
    fn test_zero_frames_rejected() {
        let mut backend = SoftwareBackend::new();
        assert!(FramePool::new(&mut backend, 0, &FrameCapacities::default()).is_err());
    }

    #[test]
    fn test_round_robin_slots() {
        let mut backend = SoftwareBackend::new();
        let mut pool = pool(&mut backend, 2);

        let a = pool.acquire(&mut backend, FrameId(0)).unwrap();
        assert_eq!(a.index(), 0);
        let fence = backend.submit(CommandList::new("a")).unwrap();
        pool.retire(a, fence).unwrap();

        let b = pool.acquire(&mut backend, FrameId(1)).unwrap();
        assert_eq!(b.index(), 1);
        pool.release(b);
        assert_eq!(pool.next_slot(), 0);
    }

    #[test]
    fn test_checked_out_slot_is_violation() {
        let mut backend = SoftwareBackend::new();
        let mut pool = pool(&mut backend, 1);
        let _held = pool.acquire(&mut backend, FrameId(0)).unwrap();
        let err = pool.acquire(&mut backend, FrameId(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_try_acquire_respects_fence() {
        let mut backend = SoftwareBackend::with_completion(CompletionMode::Deferred);
        let mut pool = pool(&mut backend, 1);

        let slot = pool.acquire(&mut backend, FrameId(0)).unwrap();
        let fence = backend.submit(CommandList::new("pending")).unwrap();
        pool.retire(slot, fence).unwrap();
        assert_eq!(pool.status(0), Some(SlotStatus::InFlight(FrameId(0))));
        assert!(pool.try_acquire(FrameId(1)).is_none());

        backend.poll(true).unwrap();
        assert!(pool.try_acquire(FrameId(1)).is_some());
    }

    #[test]
    fn test_upload_grows_buffer() {
        let mut backend = SoftwareBackend::new();
        let mut pool = pool(&mut backend, 1);
        let mut slot = pool.acquire(&mut backend, FrameId(0)).unwrap();

        let bytes = vec![7u8; 1000];
        let handle = slot
            .buffers_mut()
            .upload(&mut backend, FrameBufferKind::Instances, &bytes)
            .unwrap();
        assert_eq!(slot.buffers().capacity(FrameBufferKind::Instances), 1024);
        assert_eq!(&backend.read_buffer(handle).unwrap()[..1000], &bytes[..]);
        pool.release(slot);
    }
}
