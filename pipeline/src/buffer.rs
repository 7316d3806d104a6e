use screen_recap_common::frame::Frame;

/// Kept frames awaiting analysis, in capture order.
///
/// The session drains it when the size threshold is reached or the periodic
/// flush timer fires. `drain` empties the buffer in one step, so a frame is
/// handed to exactly one batch and never analyzed twice.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Take all buffered frames, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }
}
