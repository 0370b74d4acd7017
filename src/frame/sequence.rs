//! Frame identity and stage ordering.
//!
//! Every frame walks `Begun -> Built -> Encoded -> Submitted` (or is
//! cancelled before submission). Any other transition is a fatal
//! sequencing error.

use crate::error::{RenderError, RenderResult};
use std::fmt;

/// Monotonic frame number stamped on everything a frame produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn next(self) -> Self {
        FrameId(self.0 + 1)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// No frame in progress.
    Idle,
    Begun,
    /// CPU builders finished.
    Built,
    /// Indirect commands encoded.
    Encoded,
}

/// Tracks the one frame currently being prepared.
#[derive(Debug)]
pub struct FrameSequencer {
    current: Option<FrameId>,
    stage: FrameStage,
    next: FrameId,
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self {
            current: None,
            stage: FrameStage::Idle,
            next: FrameId(0),
        }
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn current(&self) -> Option<FrameId> {
        self.current
    }

    /// Starts the next frame; the previous one must have been submitted or cancelled.
    pub fn begin(&mut self) -> RenderResult<FrameId> {
        if self.stage != FrameStage::Idle {
            return Err(self.violation("begin", FrameStage::Idle));
        }
        let frame = self.next;
        self.next = frame.next();
        self.current = Some(frame);
        self.stage = FrameStage::Begun;
        log::trace!("Begin {frame}");
        Ok(frame)
    }

    pub fn mark_built(&mut self, frame: FrameId) -> RenderResult<()> {
        self.advance(frame, "build", FrameStage::Begun, FrameStage::Built)
    }

    pub fn mark_encoded(&mut self, frame: FrameId) -> RenderResult<()> {
        self.advance(frame, "encode", FrameStage::Built, FrameStage::Encoded)
    }

    pub fn mark_submitted(&mut self, frame: FrameId) -> RenderResult<()> {
        self.advance(frame, "submit", FrameStage::Encoded, FrameStage::Idle)?;
        self.current = None;
        Ok(())
    }

    /// Abandons the current frame. Frames can only be cancelled before submission.
    pub fn cancel(&mut self, frame: FrameId) -> RenderResult<()> {
        self.check_frame(frame, "cancel")?;
        log::debug!("Cancel {frame} at {:?}", self.stage);
        self.stage = FrameStage::Idle;
        self.current = None;
        Ok(())
    }

    fn advance(
        &mut self,
        frame: FrameId,
        stage: &'static str,
        from: FrameStage,
        to: FrameStage,
    ) -> RenderResult<()> {
        self.check_frame(frame, stage)?;
        if self.stage != from {
            return Err(self.violation(stage, from));
        }
        self.stage = to;
        Ok(())
    }

    fn check_frame(&self, frame: FrameId, stage: &'static str) -> RenderResult<()> {
        match self.current {
            Some(current) if current == frame => Ok(()),
            Some(current) => Err(RenderError::FrameSequenceViolation {
                stage,
                expected: current.to_string(),
                found: frame.to_string(),
            }),
            None => Err(RenderError::FrameSequenceViolation {
                stage,
                expected: "a frame in progress".to_string(),
                found: frame.to_string(),
            }),
        }
    }

    fn violation(&self, stage: &'static str, expected: FrameStage) -> RenderError {
        let err = RenderError::FrameSequenceViolation {
            stage,
            expected: format!("{expected:?}"),
            found: format!("{:?}", self.stage),
        };
        log::error!("{err}");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence() {
        let mut seq = FrameSequencer::new();
        let frame = seq.begin().unwrap();
        assert_eq!(frame, FrameId(0));
        seq.mark_built(frame).unwrap();
        seq.mark_encoded(frame).unwrap();
        seq.mark_submitted(frame).unwrap();
        assert_eq!(seq.stage(), FrameStage::Idle);
        assert_eq!(seq.begin().unwrap(), FrameId(1));
    }

    #[test]
    fn test_encode_before_build_is_violation() {
        let mut seq = FrameSequencer::new();
        let frame = seq.begin().unwrap();
        let err = seq.mark_encoded(frame).unwrap_err();
        assert!(matches!(
            err,
            RenderError::FrameSequenceViolation { stage: "encode", .. }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_stale_frame_rejected() {
        let mut seq = FrameSequencer::new();
        let first = seq.begin().unwrap();
        seq.cancel(first).unwrap();
        let second = seq.begin().unwrap();
        assert!(seq.mark_built(first).is_err());
        assert!(seq.mark_built(second).is_ok());
    }

    #[test]
    fn test_begin_twice_is_violation() {
        let mut seq = FrameSequencer::new();
        seq.begin().unwrap();
        assert!(seq.begin().is_err());
    }
}
