use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzer::AnalysisRecord;
use crate::traits::TextSummarizer;

/// Returned when a session ends without a single analyzed frame.
pub const NO_FRAMES_MESSAGE: &str = "No frames were captured during this session.";

const FALLBACK_NOTE: &str = "Summarization failed; the raw frame analyses follow.";

/// Folds the ordered per-frame analyses into the final session summary.
///
/// Degrades instead of failing: zero records get a fixed message, a single
/// record is returned verbatim without a model call, and a failed summarize
/// call falls back to concatenating the analyses. The caller always gets a
/// non-empty string.
pub struct SummarizerAdapter {
    summarizer: Arc<dyn TextSummarizer>,
}

impl SummarizerAdapter {
    pub fn new(summarizer: Arc<dyn TextSummarizer>) -> Self {
        Self { summarizer }
    }

    pub async fn summarize(&self, records: &[AnalysisRecord]) -> String {
        match records {
            [] => {
                info!("no analyses to summarize");
                NO_FRAMES_MESSAGE.to_string()
            }
            [only] => only.text.clone(),
            _ => {
                let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
                match self.summarizer.summarize(&texts).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        warn!(
                            error = %e,
                            analyses = texts.len(),
                            "summarize failed, falling back to concatenation"
                        );
                        format!("{}\n\n{}", FALLBACK_NOTE, texts.join("\n\n"))
                    }
                }
            }
        }
    }
}
