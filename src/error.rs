//! Renderer error types and per-frame diagnostics.

use crate::backend::BackendError;
use crate::gpu::BufferIndex;
use parking_lot::Mutex;
use thiserror::Error;

/// Errors produced while building, encoding or submitting a frame.
#[derive(Error, Debug)]
pub enum RenderError {
    /// More lights, instances or materials than the configured buffers hold.
    #[error("{resource} capacity exceeded: requested {requested}, capacity {capacity}")]
    CapacityExceeded {
        resource: &'static str,
        requested: usize,
        capacity: usize,
    },
    /// A camera or model matrix contains NaN or infinite values.
    #[error("invalid transform: {what}")]
    InvalidTransform { what: String },
    /// A drawable or terrain references a mesh that was never registered.
    #[error("unknown mesh id {0}")]
    UnknownMesh(u32),
    /// A drawable references a material index outside the frame's material table.
    #[error("unknown material id {0}")]
    UnknownMaterial(u32),
    /// Shadows were requested but no sunlight is active.
    #[error("no active sunlight to cast shadows")]
    NoShadowCaster,
    /// A stage consumed data produced for a different frame, or ran out of order.
    #[error("frame sequence violation in {stage}: expected {expected}, found {found}")]
    FrameSequenceViolation {
        stage: &'static str,
        expected: String,
        found: String,
    },
    /// Two logical buffers resolve to the same binding slot.
    #[error("binding slot {slot} is claimed by both {first:?} and {second:?}")]
    BindingConflict {
        slot: u32,
        first: BufferIndex,
        second: BufferIndex,
    },
    /// Configuration values outside their accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The frame was discarded before submission.
    #[error("frame dropped: {0}")]
    FrameDropped(String),
    /// The device reported a fault while executing submitted work.
    #[error("device faulted: {0}")]
    DeviceFaulted(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RenderError {
    /// Fatal errors stop the render loop; everything else drops the current frame only.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::FrameSequenceViolation { .. }
            | RenderError::BindingConflict { .. }
            | RenderError::InvalidConfig(_)
            | RenderError::DeviceFaulted(_) => true,
            RenderError::Backend(err) => err.is_device_loss(),
            _ => false,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Non-fatal conditions observed while building a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A model matrix had a singular upper 3x3; identity was used for its normal matrix.
    DegenerateTransform { source: String },
    /// Shadows were skipped because no sunlight is active.
    NoShadowCaster,
    /// The frame was dropped; the previous image stays presented.
    FrameDropped { reason: String },
}

/// Thread-safe sink shared by the parallel frame builders.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::DegenerateTransform { source } => {
                log::warn!("Degenerate transform for {source}, using identity normal matrix")
            }
            Diagnostic::NoShadowCaster => log::debug!("No sunlight active, rendering unshadowed"),
            Diagnostic::FrameDropped { reason } => log::warn!("Frame dropped: {reason}"),
        }
        self.entries.lock().push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drains everything recorded so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }
}
