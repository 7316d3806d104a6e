use crate::session::{CaptureState, SessionResult};

/// Progress notifications emitted by a running session.
///
/// Delivery is best-effort over an optional unbounded channel: a missing or
/// dropped receiver never stalls the capture loop. Consumers get lifecycle
/// transitions, running frame counters, and exactly one terminal event.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session entered a new state.
    StateChanged(CaptureState),
    /// Counters after a frame was kept: `seen` evaluated, `kept` retained.
    FrameCount { seen: u64, kept: u64 },
    /// Terminal success, carrying the final (possibly degraded) result.
    Completed(SessionResult),
    /// Terminal failure: the frame source could not be acquired.
    Failed(String),
}
