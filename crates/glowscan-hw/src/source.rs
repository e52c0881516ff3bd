//! The frame acquisition seam pulled by the analysis pipeline.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::collections::VecDeque;

/// A blocking producer of frames.
///
/// `Ok(None)` signals end-of-stream; an `Err` means the device failed and no
/// further frames will follow. Implementations release their device when
/// dropped, so an owner that goes out of scope on any path releases it once.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        (**self).next_frame()
    }
}

/// Replays a fixed sequence of frames, then reports end-of-stream.
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<Frame>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        Ok(self.frames.pop_front())
    }
}
