use std::sync::Arc;
use std::time::Duration;

use screen_recap_common::config::{BatchConfig, CaptureConfig, DifferConfig};
use screen_recap_common::frame::Frame;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::analyzer::{AnalysisRecord, BatchAnalyzer};
use crate::buffer::FrameBuffer;
use crate::clock::AdaptiveClock;
use crate::differ::FrameDiffer;
use crate::events::SessionEvent;
use crate::summarizer::SummarizerAdapter;
use crate::traits::{AcquisitionError, FrameSource, TextSummarizer, VisionDescriber};

/// Lifecycle of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Constructed, source not yet acquired.
    Idle,
    /// Ticking: frames are being read, diffed and buffered.
    Capturing,
    /// No more captures; remaining frames flush and batches are awaited.
    Draining,
    /// All analyses collected; the summary is being produced.
    Summarizing,
    /// Terminal: a result was produced.
    Complete,
    /// Terminal: the source could not be acquired.
    Failed,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Complete | CaptureState::Failed)
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
            CaptureState::Draining => "draining",
            CaptureState::Summarizing => "summarizing",
            CaptureState::Complete => "complete",
            CaptureState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Final output of a completed session.
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// The session summary; always non-empty, possibly degraded.
    pub summary: String,
    /// Per-frame analyses in dispatch order.
    pub records: Vec<AnalysisRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to acquire frame source: {0}")]
    Acquisition(#[from] AcquisitionError),
}

/// Drives one capture session from acquisition to summary.
///
/// Owns every pipeline component; nothing here is shared between sessions.
/// The tick cadence comes from the adaptive clock, the flush cadence from an
/// independent periodic timer, and both race a stop signal in one select
/// loop. Batches analyze on spawned tasks while capture continues; they are
/// awaited in dispatch order during draining so the final record order equals
/// capture order and no in-flight describe call is ever abandoned.
pub struct SessionController {
    selection: String,
    batch: BatchConfig,
    source: Box<dyn FrameSource>,
    analyzer: Arc<BatchAnalyzer>,
    summarizer: SummarizerAdapter,
    differ: FrameDiffer,
    clock: AdaptiveClock,
    buffer: FrameBuffer,
    state: CaptureState,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    batches: Vec<JoinHandle<Vec<AnalysisRecord>>>,
    frames_seen: u64,
    frames_kept: u64,
}

impl SessionController {
    pub fn new(
        selection: String,
        capture: CaptureConfig,
        batch: BatchConfig,
        differ: DifferConfig,
        source: Box<dyn FrameSource>,
        describer: Arc<dyn VisionDescriber>,
        summarizer: Arc<dyn TextSummarizer>,
    ) -> Self {
        Self {
            selection,
            source,
            analyzer: Arc::new(BatchAnalyzer::new(describer, batch.concurrency)),
            summarizer: SummarizerAdapter::new(summarizer),
            differ: FrameDiffer::new(&differ),
            clock: AdaptiveClock::new(&capture),
            buffer: FrameBuffer::new(),
            state: CaptureState::Idle,
            events: None,
            batches: Vec::new(),
            frames_seen: 0,
            frames_kept: 0,
            batch,
        }
    }

    /// Register a channel for progress events. Delivery is best-effort; a
    /// dropped receiver never affects the session.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Drive the session to a terminal state. Consumes the controller, so a
    /// finished session cannot be restarted.
    ///
    /// The session ends when `stop` fires (or its sender is dropped), when
    /// the source reports the end of the stream, or never on its own. Every
    /// exit path that acquired the source drains buffered frames through the
    /// analyzer and produces a `SessionResult`.
    pub async fn run(
        mut self,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<SessionResult, SessionError> {
        info!(selection = %self.selection, "starting capture session");

        if let Err(e) = self.source.start(&self.selection).await {
            error!(error = %e, "failed to acquire frame source");
            self.set_state(CaptureState::Failed);
            self.emit(SessionEvent::Failed(e.to_string()));
            return Err(SessionError::from(e));
        }

        self.differ.reset();
        self.clock.reset();
        self.set_state(CaptureState::Capturing);

        let flush_period = Duration::from_millis(self.batch.flush_interval_ms.max(1));
        let mut flush_timer = time::interval_at(Instant::now() + flush_period, flush_period);
        flush_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        // Persistent capture deadline: a flush tick must not slip the cadence.
        let mut next_tick = Instant::now();
        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("stop requested, draining session");
                    break;
                }
                _ = flush_timer.tick() => {
                    self.flush_pending("timer");
                }
                _ = time::sleep_until(next_tick) => {
                    match self.source.next_frame().await {
                        Ok(Some(frame)) => {
                            self.on_frame(frame);
                            next_tick = Instant::now() + self.clock.delay();
                        }
                        Ok(None) => {
                            info!("frame source ended, draining session");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "frame read failed, skipping tick");
                            next_tick = Instant::now() + self.clock.delay();
                        }
                    }
                }
            }
        }

        let records = self.drain_batches().await;

        self.set_state(CaptureState::Summarizing);
        let summary = self.summarizer.summarize(&records).await;
        let result = SessionResult { summary, records };

        self.set_state(CaptureState::Complete);
        info!(
            frames_seen = self.frames_seen,
            frames_kept = self.frames_kept,
            analyses = result.records.len(),
            "session complete"
        );
        self.emit(SessionEvent::Completed(result.clone()));
        Ok(result)
    }

    /// Evaluate one captured frame: diff, adjust the clock, buffer if kept.
    fn on_frame(&mut self, frame: Frame) {
        self.frames_seen += 1;
        let kept = self.differ.should_keep(&frame);
        // The clock hears about every evaluation, kept or not.
        let delay = self.clock.on_frame_evaluated(kept);
        debug!(
            seq = frame.seq,
            kept,
            delay_ms = delay.as_millis() as u64,
            "frame evaluated"
        );

        if !kept {
            return;
        }

        self.frames_kept += 1;
        self.buffer.push(frame);
        self.emit(SessionEvent::FrameCount {
            seen: self.frames_seen,
            kept: self.frames_kept,
        });

        if self.buffer.len() >= self.batch.size_threshold {
            self.flush_pending("size");
        }
    }

    /// Drain the buffer and dispatch the frames as one analysis batch.
    /// No-op when the buffer is empty.
    fn flush_pending(&mut self, trigger: &'static str) {
        if self.buffer.is_empty() {
            return;
        }
        let frames = self.buffer.drain();
        info!(
            frames = frames.len(),
            trigger,
            batch = self.batches.len(),
            "dispatching analysis batch"
        );
        let analyzer = Arc::clone(&self.analyzer);
        self.batches
            .push(tokio::spawn(async move { analyzer.analyze(frames).await }));
    }

    /// Stop the source, flush what is left, and await every dispatched batch
    /// in dispatch order.
    async fn drain_batches(&mut self) -> Vec<AnalysisRecord> {
        self.set_state(CaptureState::Draining);
        self.source.stop().await;
        self.flush_pending("drain");

        let handles = std::mem::take(&mut self.batches);
        let mut records = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    // A panicked analysis task loses its batch, not the session.
                    error!(error = %e, batch = index, "analysis task failed");
                }
            }
        }
        records
    }

    fn set_state(&mut self, state: CaptureState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "session state changed");
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::NO_FRAMES_MESSAGE;
    use crate::traits::{DescribeError, FrameReadError, SummarizeError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use tokio::time::timeout;

    enum Step {
        Frame(Frame),
        ReadError,
    }

    enum OnEmpty {
        /// Report the end of the stream.
        EndStream,
        /// Keep yielding the last frame (a static scene) and signal that the
        /// script ran out, so the test knows when to stop the session.
        RepeatLast(Arc<Notify>),
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
        on_empty: OnEmpty,
        last: Option<Frame>,
        fail_start: bool,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>, on_empty: OnEmpty) -> Self {
            Self {
                steps: steps.into(),
                on_empty,
                last: None,
                fail_start: false,
                started: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing_to_start() -> Self {
            Self {
                fail_start: true,
                ..Self::new(Vec::new(), OnEmpty::EndStream)
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn start(&mut self, _selection: &str) -> Result<(), AcquisitionError> {
            if self.fail_start {
                return Err(AcquisitionError::Connect("scripted refusal".into()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn next_frame(&mut self) -> Result<Option<Frame>, FrameReadError> {
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => {
                    self.last = Some(frame.clone());
                    Ok(Some(frame))
                }
                Some(Step::ReadError) => Err(FrameReadError::Read("scripted read failure".into())),
                None => match &self.on_empty {
                    OnEmpty::EndStream => Ok(None),
                    OnEmpty::RepeatLast(exhausted) => {
                        exhausted.notify_one();
                        Ok(self.last.clone())
                    }
                },
            }
        }

        async fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockDescriber {
        fail_seqs: Vec<u64>,
        on_call: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl VisionDescriber for MockDescriber {
        async fn describe(&self, frame: &Frame) -> Result<String, DescribeError> {
            if let Some(notify) = &self.on_call {
                notify.notify_one();
            }
            if self.fail_seqs.contains(&frame.seq) {
                Err(DescribeError::Upstream("mock description failure".into()))
            } else {
                Ok(format!("described frame {}", frame.seq))
            }
        }
    }

    #[derive(Default)]
    struct MockSummarizer;

    #[async_trait]
    impl TextSummarizer for MockSummarizer {
        async fn summarize(&self, analyses: &[String]) -> Result<String, SummarizeError> {
            Ok(format!("session summary covering {} analyses", analyses.len()))
        }
    }

    /// 8x8 grayscale PNG: rows above `split` black, the rest white.
    /// Distinct splits in 1..=7 yield distinct fingerprints.
    fn scene_png(split: u32) -> Vec<u8> {
        let img = image::GrayImage::from_fn(8, 8, |_, y| {
            if y < split {
                image::Luma([0u8])
            } else {
                image::Luma([255u8])
            }
        });
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn frame(payload: Vec<u8>, seq: u64) -> Frame {
        Frame::new(payload, 1_700_000_000_000 + seq as i64 * 1000, seq)
    }

    fn fast_capture() -> CaptureConfig {
        CaptureConfig {
            initial_delay_ms: 5,
            min_delay_ms: 1,
            max_delay_ms: 20,
            delay_step_ms: 1,
            max_duration_secs: 0,
        }
    }

    fn batch(size_threshold: usize, flush_interval_ms: u64) -> BatchConfig {
        BatchConfig {
            size_threshold,
            flush_interval_ms,
            concurrency: 3,
        }
    }

    fn build(
        source: ScriptedSource,
        describer: MockDescriber,
        batch_config: BatchConfig,
    ) -> (SessionController, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(
            "scripted://test".to_string(),
            fast_capture(),
            batch_config,
            DifferConfig::default(),
            Box::new(source),
            Arc::new(describer),
            Arc::new(MockSummarizer),
        )
        .with_events(tx);
        (controller, rx)
    }

    fn collect_events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn state_changes(events: &[SessionEvent]) -> Vec<CaptureState> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn terminal_states_are_identified() {
        assert!(CaptureState::Complete.is_terminal());
        assert!(CaptureState::Failed.is_terminal());
        assert!(!CaptureState::Capturing.is_terminal());
        assert!(!CaptureState::Draining.is_terminal());
    }

    #[tokio::test]
    async fn static_scene_with_one_change_yields_two_records() {
        let scene_a = scene_png(2);
        let scene_b = scene_png(6);
        let exhausted = Arc::new(Notify::new());
        let source = ScriptedSource::new(
            vec![
                Step::Frame(frame(scene_a.clone(), 0)),
                Step::Frame(frame(scene_a.clone(), 1)),
                Step::Frame(frame(scene_a, 2)),
                Step::Frame(frame(scene_b, 3)),
            ],
            OnEmpty::RepeatLast(Arc::clone(&exhausted)),
        );
        let stopped = Arc::clone(&source.stopped);
        let (controller, mut rx) = build(source, MockDescriber::default(), batch(5, 600_000));

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(controller.run(stop_rx));

        timeout(Duration::from_secs(5), exhausted.notified())
            .await
            .unwrap();
        stop_tx.send(()).unwrap();
        let result = handle.await.unwrap().unwrap();

        // Three identical frames collapse to one; the changed frame is kept.
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].seq, 0);
        assert_eq!(result.records[1].seq, 3);
        assert!(result.records.iter().all(|r| r.ok));
        assert_eq!(result.summary, "session summary covering 2 analyses");
        assert!(stopped.load(Ordering::SeqCst));

        let events = collect_events(&mut rx);
        assert_eq!(
            state_changes(&events),
            vec![
                CaptureState::Capturing,
                CaptureState::Draining,
                CaptureState::Summarizing,
                CaptureState::Complete,
            ]
        );
        let counts: Vec<(u64, u64)> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::FrameCount { seen, kept } => Some((*seen, *kept)),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![(1, 1), (4, 2)]);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Completed(_))));
    }

    #[tokio::test]
    async fn size_threshold_flushes_while_capturing() {
        let exhausted = Arc::new(Notify::new());
        let first_describe = Arc::new(Notify::new());
        let steps: Vec<Step> = (1u32..=5)
            .map(|k| Step::Frame(frame(scene_png(k), k as u64 - 1)))
            .collect();
        let source = ScriptedSource::new(steps, OnEmpty::RepeatLast(Arc::clone(&exhausted)));
        let describer = MockDescriber {
            fail_seqs: Vec::new(),
            on_call: Some(Arc::clone(&first_describe)),
        };
        // The flush timer is effectively disabled; only the size trigger can fire.
        let (controller, _rx) = build(source, describer, batch(5, 600_000));

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(controller.run(stop_rx));

        // A describe call before any stop proves the threshold dispatched the batch.
        timeout(Duration::from_secs(5), first_describe.notified())
            .await
            .unwrap();
        stop_tx.send(()).unwrap();
        let result = handle.await.unwrap().unwrap();

        assert_eq!(result.records.len(), 5);
        assert_eq!(
            result.records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn timer_flush_dispatches_partial_batches() {
        let exhausted = Arc::new(Notify::new());
        let first_describe = Arc::new(Notify::new());
        let source = ScriptedSource::new(
            vec![
                Step::Frame(frame(scene_png(2), 0)),
                Step::Frame(frame(scene_png(5), 1)),
            ],
            OnEmpty::RepeatLast(Arc::clone(&exhausted)),
        );
        let describer = MockDescriber {
            fail_seqs: Vec::new(),
            on_call: Some(Arc::clone(&first_describe)),
        };
        // Threshold out of reach; only the 50ms flush timer can dispatch.
        let (controller, _rx) = build(source, describer, batch(10, 50));

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(controller.run(stop_rx));

        timeout(Duration::from_secs(5), first_describe.notified())
            .await
            .unwrap();
        stop_tx.send(()).unwrap();
        let result = handle.await.unwrap().unwrap();

        assert_eq!(result.records.len(), 2);
    }

    #[tokio::test]
    async fn describer_failure_is_recorded_in_place() {
        let source = ScriptedSource::new(
            vec![
                Step::Frame(frame(scene_png(1), 0)),
                Step::Frame(frame(scene_png(3), 1)),
                Step::Frame(frame(scene_png(5), 2)),
            ],
            OnEmpty::EndStream,
        );
        let describer = MockDescriber {
            fail_seqs: vec![1],
            on_call: None,
        };
        let (controller, _rx) = build(source, describer, batch(5, 600_000));

        // Held so the session only ends when the stream does.
        let (_stop_tx, stop_rx) = oneshot::channel();
        let result = controller.run(stop_rx).await.unwrap();

        assert_eq!(result.records.len(), 3);
        assert!(result.records[0].ok);
        assert!(!result.records[1].ok);
        assert!(result.records[1].text.contains("analysis failed"));
        assert!(result.records[2].ok);
        assert_eq!(
            result.records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn stream_end_drains_without_a_stop_signal() {
        let source = ScriptedSource::new(
            vec![
                Step::Frame(frame(scene_png(2), 0)),
                Step::Frame(frame(scene_png(6), 1)),
            ],
            OnEmpty::EndStream,
        );
        let started = Arc::clone(&source.started);
        let stopped = Arc::clone(&source.stopped);
        let (controller, mut rx) = build(source, MockDescriber::default(), batch(5, 600_000));

        let (_stop_tx, stop_rx) = oneshot::channel();
        let result = controller.run(stop_rx).await.unwrap();

        assert_eq!(result.records.len(), 2);
        assert!(started.load(Ordering::SeqCst));
        // The source is released even though nobody sent a stop.
        assert!(stopped.load(Ordering::SeqCst));

        let events = collect_events(&mut rx);
        assert_eq!(
            state_changes(&events),
            vec![
                CaptureState::Capturing,
                CaptureState::Draining,
                CaptureState::Summarizing,
                CaptureState::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn read_errors_skip_the_tick_and_continue() {
        let source = ScriptedSource::new(
            vec![
                Step::Frame(frame(scene_png(2), 0)),
                Step::ReadError,
                Step::ReadError,
                Step::Frame(frame(scene_png(6), 1)),
            ],
            OnEmpty::EndStream,
        );
        let (controller, _rx) = build(source, MockDescriber::default(), batch(5, 600_000));

        let (_stop_tx, stop_rx) = oneshot::channel();
        let result = controller.run(stop_rx).await.unwrap();

        assert_eq!(
            result.records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn acquisition_failure_fails_the_session() {
        let source = ScriptedSource::failing_to_start();
        let stopped = Arc::clone(&source.stopped);
        let (controller, mut rx) = build(source, MockDescriber::default(), batch(5, 600_000));

        let (_stop_tx, stop_rx) = oneshot::channel();
        let error = controller.run(stop_rx).await.unwrap_err();

        assert!(matches!(
            error,
            SessionError::Acquisition(AcquisitionError::Connect(_))
        ));
        // Nothing was acquired, so nothing is released.
        assert!(!stopped.load(Ordering::SeqCst));

        let events = collect_events(&mut rx);
        assert_eq!(state_changes(&events), vec![CaptureState::Failed]);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Failed(message) if message.contains("scripted"))));
    }

    #[tokio::test]
    async fn empty_stream_completes_with_the_no_frames_message() {
        let source = ScriptedSource::new(Vec::new(), OnEmpty::EndStream);
        let (controller, mut rx) = build(source, MockDescriber::default(), batch(5, 600_000));

        let (_stop_tx, stop_rx) = oneshot::channel();
        let result = controller.run(stop_rx).await.unwrap();

        assert!(result.records.is_empty());
        assert_eq!(result.summary, NO_FRAMES_MESSAGE);

        let events = collect_events(&mut rx);
        assert_eq!(
            state_changes(&events),
            vec![
                CaptureState::Capturing,
                CaptureState::Draining,
                CaptureState::Summarizing,
                CaptureState::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn dropping_the_stop_sender_stops_the_session() {
        let exhausted = Arc::new(Notify::new());
        let source = ScriptedSource::new(
            vec![Step::Frame(frame(scene_png(3), 0))],
            OnEmpty::RepeatLast(Arc::clone(&exhausted)),
        );
        let (controller, _rx) = build(source, MockDescriber::default(), batch(5, 600_000));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(controller.run(stop_rx));

        timeout(Duration::from_secs(5), exhausted.notified())
            .await
            .unwrap();
        drop(stop_tx);
        let result = handle.await.unwrap().unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.summary, "described frame 0");
    }
}
