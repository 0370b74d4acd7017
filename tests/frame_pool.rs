//! Frame slots, fences and stage ordering against a deferred-completion backend.

use rstest::rstest;
use stellar_deferred::backend::{
    BackendError, Command, CommandList, CompletionMode, GraphicsBackend, PassDescriptor, PassKind,
};
use stellar_deferred::frame::{
    FrameBufferKind, FrameCapacities, FrameId, FramePool, FrameSequencer, FrameStage, SlotStatus,
};
use stellar_deferred::gpu::BufferIndex;
use stellar_deferred::{RenderError, SoftwareBackend};

fn deferred() -> SoftwareBackend {
    SoftwareBackend::with_completion(CompletionMode::Deferred)
}

/// An empty shadow pass that reads `buffer`, enough to keep it referenced.
fn reading(buffer: stellar_deferred::backend::BufferHandle) -> CommandList {
    let mut list = CommandList::new("reader");
    list.push(Command::BeginPass(PassDescriptor {
        label: "reader".to_string(),
        kind: PassKind::Shadow,
        color_targets: Vec::new(),
        depth_target: None,
    }));
    list.push(Command::BindBuffer {
        index: BufferIndex::Uniforms,
        slot: BufferIndex::Uniforms.slot(),
        buffer,
        offset: 0,
    });
    list.push(Command::EndPass);
    list
}

#[test]
fn test_in_flight_buffers_cannot_be_rewritten() {
    let mut backend = deferred();
    let mut pool = FramePool::new(&mut backend, 2, &FrameCapacities::default()).unwrap();

    let mut slot = pool.acquire(&mut backend, FrameId(0)).unwrap();
    let uniforms = slot
        .buffers_mut()
        .upload(&mut backend, FrameBufferKind::Uniforms, &[1u8; 64])
        .unwrap();
    let fence = backend.submit(reading(uniforms)).unwrap();
    pool.retire(slot, fence.clone()).unwrap();

    assert!(matches!(
        backend.write_buffer(uniforms, 0, &[2u8; 64]),
        Err(BackendError::BufferInUse(_))
    ));

    backend.poll(true).unwrap();
    assert!(fence.is_signaled());
    backend.write_buffer(uniforms, 0, &[2u8; 64]).unwrap();
}

#[rstest]
#[case::one(1)]
#[case::two(2)]
#[case::three(3)]
fn test_acquire_waits_for_the_oldest_frame(#[case] frames: usize) {
    let mut backend = deferred();
    let mut pool = FramePool::new(&mut backend, frames, &FrameCapacities::default()).unwrap();
    let mut fences = Vec::new();

    for frame in 0..frames as u64 {
        let slot = pool.acquire(&mut backend, FrameId(frame)).unwrap();
        let fence = backend.submit(CommandList::new(format!("frame {frame}"))).unwrap();
        fences.push(fence.clone());
        pool.retire(slot, fence).unwrap();
    }
    assert_eq!(pool.in_flight(), frames);
    assert!(pool.try_acquire(FrameId(frames as u64)).is_none());

    // The blocking acquire drives completion of the slot's previous frame.
    let slot = pool.acquire(&mut backend, FrameId(frames as u64)).unwrap();
    assert_eq!(slot.index(), 0);
    assert!(fences[0].is_signaled());
    pool.release(slot);
    assert_eq!(pool.status(0), Some(SlotStatus::Idle));
}

#[test]
fn test_wait_idle_completes_everything() {
    let mut backend = deferred();
    let mut pool = FramePool::new(&mut backend, 3, &FrameCapacities::default()).unwrap();
    for frame in 0..3 {
        let slot = pool.acquire(&mut backend, FrameId(frame)).unwrap();
        let fence = backend.submit(CommandList::new("work")).unwrap();
        pool.retire(slot, fence).unwrap();
    }
    assert_eq!(backend.pending_submissions(), 3);
    pool.wait_idle(&mut backend).unwrap();
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(backend.pending_submissions(), 0);
}

#[test]
fn test_destroy_frees_slot_buffers() {
    let mut backend = SoftwareBackend::new();
    let before = backend.live_buffers();
    let pool = FramePool::new(&mut backend, 2, &FrameCapacities::default()).unwrap();
    assert_eq!(backend.live_buffers(), before + 2 * FrameBufferKind::ALL.len());
    pool.destroy(&mut backend).unwrap();
    assert_eq!(backend.live_buffers(), before);
}

#[test]
fn test_sequencer_walks_stages_in_order() {
    let mut sequencer = FrameSequencer::new();
    let frame = sequencer.begin().unwrap();
    assert!(matches!(
        sequencer.begin(),
        Err(RenderError::FrameSequenceViolation { .. })
    ));
    assert!(sequencer.mark_encoded(frame).is_err());
    sequencer.mark_built(frame).unwrap();
    sequencer.mark_encoded(frame).unwrap();
    assert_eq!(sequencer.stage(), FrameStage::Encoded);
    assert!(sequencer.mark_submitted(frame.next()).is_err());
    sequencer.mark_submitted(frame).unwrap();

    let next = sequencer.begin().unwrap();
    assert_eq!(next, frame.next());
    sequencer.cancel(next).unwrap();
    assert_eq!(sequencer.stage(), FrameStage::Idle);
    assert_eq!(sequencer.begin().unwrap(), FrameId(2));
}
