//! Frame pacing: fences, per-frame buffer slots and stage sequencing.

pub mod fence;
pub mod pool;
pub mod sequence;

pub use fence::{Fence, FenceStatus};
pub use pool::{FrameBufferKind, FrameBuffers, FrameCapacities, FramePool, FrameSlot, SlotStatus};
pub use sequence::{FrameId, FrameSequencer, FrameStage};
