mod mjpeg;
mod openai;
mod polling;

use screen_recap_common::config::Config;
use screen_recap_pipeline::events::SessionEvent;
use screen_recap_pipeline::session::SessionController;
use screen_recap_pipeline::traits::{FrameSource, TextSummarizer, VisionDescriber};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
    #[error("no API key configured: set vision.api_key or OPENAI_API_KEY")]
    MissingApiKey,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.stream.url,
        mode = config.stream.mode,
        model = config.vision.model,
        size_threshold = config.batch.size_threshold,
        flush_interval_ms = config.batch.flush_interval_ms,
        concurrency = config.batch.concurrency,
        "starting screen-recap watcher"
    );

    let openai = match openai::OpenAiClient::new(&config.vision) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "failed to build vision client");
            std::process::exit(1);
        }
    };
    let describer = Arc::clone(&openai) as Arc<dyn VisionDescriber>;
    let summarizer = openai as Arc<dyn TextSummarizer>;

    let source: Box<dyn FrameSource> = match config.stream.mode.as_str() {
        "mjpeg" => Box::new(mjpeg::MjpegSource::new()),
        "polling" => Box::new(polling::PollingSource::new()),
        other => {
            error!(mode = other, "unknown stream mode, expected 'mjpeg' or 'polling'");
            std::process::exit(1);
        }
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::StateChanged(state) => debug!(%state, "session state"),
                SessionEvent::FrameCount { seen, kept } => debug!(seen, kept, "frame counters"),
                SessionEvent::Completed(result) => {
                    info!(analyses = result.records.len(), "session complete");
                }
                SessionEvent::Failed(message) => error!(error = %message, "session failed"),
            }
        }
    });

    let max_duration_secs = config.capture.max_duration_secs;
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(async move {
        wait_for_stop(max_duration_secs).await;
        let _ = stop_tx.send(());
    });

    let controller = SessionController::new(
        config.stream.url,
        config.capture,
        config.batch,
        config.differ,
        source,
        describer,
        summarizer,
    )
    .with_events(event_tx);

    match controller.run(stop_rx).await {
        Ok(result) => {
            println!("\n=== session summary ===\n{}", result.summary);
        }
        Err(e) => {
            error!(error = %e, "watcher exiting after session failure");
            std::process::exit(1);
        }
    }
}

/// Resolves when the session should stop: on ctrl-c, or once the configured
/// maximum duration elapses.
async fn wait_for_stop(max_duration_secs: u64) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to listen for ctrl-c, relying on the duration cap");
            std::future::pending::<()>().await;
        }
    };

    if max_duration_secs == 0 {
        ctrl_c.await;
        info!("ctrl-c received, stopping session");
        return;
    }

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, stopping session"),
        _ = tokio::time::sleep(Duration::from_secs(max_duration_secs)) => {
            info!(max_duration_secs, "maximum session duration reached");
        }
    }
}
