use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use screen_recap_common::frame::Frame;
use tracing::{debug, warn};

use crate::traits::VisionDescriber;

/// Outcome of analyzing one frame.
///
/// `text` is either the model's description or a bracketed error note; `ok`
/// tells them apart. `seq` identifies the source frame for traceability.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub text: String,
    pub ok: bool,
}

impl AnalysisRecord {
    fn described(frame: &Frame, text: String) -> Self {
        Self {
            seq: frame.seq,
            captured_at_ms: frame.captured_at_ms,
            text,
            ok: true,
        }
    }

    fn failed(frame: &Frame, reason: &str) -> Self {
        Self {
            seq: frame.seq,
            captured_at_ms: frame.captured_at_ms,
            text: format!("[frame {} analysis failed: {}]", frame.seq, reason),
            ok: false,
        }
    }
}

/// Runs a batch of frames through the vision describer.
///
/// At most `concurrency` describe calls are in flight at once; results come
/// back in input order regardless of which call finishes first. Each frame is
/// fault-isolated: a bad frame yields an error record, never a failed batch.
pub struct BatchAnalyzer {
    describer: Arc<dyn VisionDescriber>,
    concurrency: usize,
}

impl BatchAnalyzer {
    pub fn new(describer: Arc<dyn VisionDescriber>, concurrency: usize) -> Self {
        Self {
            describer,
            concurrency: concurrency.max(1),
        }
    }

    /// Analyze `frames`, yielding one record per frame with `output[i]`
    /// corresponding to `frames[i]`.
    pub async fn analyze(&self, frames: Vec<Frame>) -> Vec<AnalysisRecord> {
        let total = frames.len();
        let records: Vec<AnalysisRecord> = stream::iter(frames)
            .map(|frame| self.analyze_frame(frame))
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed = records.iter().filter(|r| !r.ok).count();
        debug!(frames = total, failed, "batch analyzed");
        records
    }

    async fn analyze_frame(&self, frame: Frame) -> AnalysisRecord {
        // Cheap pre-checks so obviously broken frames never cost an upstream call.
        if frame.payload.is_empty() {
            warn!(seq = frame.seq, "empty frame payload, skipping describe");
            return AnalysisRecord::failed(&frame, "empty frame payload");
        }
        if frame.encoding().is_none() {
            warn!(seq = frame.seq, "unrecognized image encoding, skipping describe");
            return AnalysisRecord::failed(&frame, "unrecognized image encoding");
        }

        match self.describer.describe(&frame).await {
            Ok(text) => AnalysisRecord::described(&frame, text),
            Err(e) => {
                warn!(seq = frame.seq, error = %e, "describe failed");
                AnalysisRecord::failed(&frame, &e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DescribeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockDescriber {
        /// Per-seq artificial latency in milliseconds.
        delays_ms: Vec<u64>,
        fail_seqs: Vec<u64>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockDescriber {
        fn new(delays_ms: Vec<u64>, fail_seqs: Vec<u64>) -> Self {
            Self {
                delays_ms,
                fail_seqs,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionDescriber for MockDescriber {
        async fn describe(&self, frame: &Frame) -> Result<String, DescribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self.delays_ms.get(frame.seq as usize).copied().unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_seqs.contains(&frame.seq) {
                Err(DescribeError::Upstream("mock backend refused".into()))
            } else {
                Ok(format!("description of frame {}", frame.seq))
            }
        }
    }

    fn jpeg_frame(seq: u64) -> Frame {
        // JPEG magic is enough for the encoding pre-check; the mock never decodes.
        Frame::new(
            vec![0xFF, 0xD8, 0xFF, 0xE0, seq as u8],
            1_700_000_000_000 + seq as i64 * 1000,
            seq,
        )
    }

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        // Frame 0 is the slowest, so completion order is reversed.
        let describer = Arc::new(MockDescriber::new(vec![60, 30, 5], vec![]));
        let analyzer = BatchAnalyzer::new(describer, 3);

        let records = analyzer
            .analyze(vec![jpeg_frame(0), jpeg_frame(1), jpeg_frame(2)])
            .await;

        assert_eq!(
            records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(records[0].text, "description of frame 0");
        assert_eq!(records[2].text, "description of frame 2");
    }

    #[tokio::test]
    async fn failures_are_isolated_per_frame() {
        let describer = Arc::new(MockDescriber::new(vec![], vec![1]));
        let analyzer = BatchAnalyzer::new(describer, 3);

        let records = analyzer
            .analyze(vec![jpeg_frame(0), jpeg_frame(1), jpeg_frame(2)])
            .await;

        assert_eq!(records.len(), 3);
        assert!(records[0].ok);
        assert!(!records[1].ok);
        assert!(records[1].text.contains("analysis failed"));
        assert!(records[1].text.contains("mock backend refused"));
        assert!(records[2].ok);
    }

    #[tokio::test]
    async fn in_flight_calls_never_exceed_the_cap() {
        let describer = Arc::new(MockDescriber::new(vec![20; 10], vec![]));
        let analyzer = BatchAnalyzer::new(Arc::clone(&describer) as Arc<dyn VisionDescriber>, 3);

        let frames: Vec<Frame> = (0u64..10).map(jpeg_frame).collect();
        let records = analyzer.analyze(frames).await;

        assert_eq!(records.len(), 10);
        assert_eq!(describer.calls.load(Ordering::SeqCst), 10);
        assert_eq!(describer.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn precheck_failures_never_reach_the_describer() {
        let describer = Arc::new(MockDescriber::new(vec![], vec![]));
        let analyzer = BatchAnalyzer::new(Arc::clone(&describer) as Arc<dyn VisionDescriber>, 3);

        let records = analyzer
            .analyze(vec![
                jpeg_frame(0),
                Frame::new(vec![], 1_700_000_000_000, 1),
                Frame::new(b"not an image at all".to_vec(), 1_700_000_001_000, 2),
            ])
            .await;

        assert_eq!(records.len(), 3);
        assert!(records[0].ok);
        assert!(!records[1].ok);
        assert!(records[1].text.contains("empty frame payload"));
        assert!(!records[2].ok);
        assert!(records[2].text.contains("unrecognized image encoding"));
        // Only the valid frame cost a describer call.
        assert_eq!(describer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_batch_yields_no_records() {
        let describer = Arc::new(MockDescriber::new(vec![], vec![]));
        let analyzer = BatchAnalyzer::new(describer, 3);
        assert!(analyzer.analyze(Vec::new()).await.is_empty());
    }
}
