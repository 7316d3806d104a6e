use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use screen_recap_common::config::VisionConfig;
use screen_recap_common::frame::Frame;
use screen_recap_pipeline::traits::{
    DescribeError, SummarizeError, TextSummarizer, VisionDescriber,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::WatcherError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on how much of an upstream error body is carried into error messages.
const ERROR_BODY_LIMIT: usize = 300;

/// Chat-completion failure, before it is mapped onto the describe- or
/// summarize-facing error.
#[derive(Debug, thiserror::Error)]
enum ChatError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}: {1}")]
    Status(u16, String),
    #[error("response had no message content")]
    MalformedResponse,
}

/// Client for an OpenAI-compatible chat completions endpoint. One instance
/// serves both the per-frame describe calls and the end-of-session summary.
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    describe_prompt: String,
    summarize_prompt: String,
}

impl OpenAiClient {
    pub fn new(config: &VisionConfig) -> Result<Self, WatcherError> {
        let api_key = if config.api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        if api_key.is_empty() {
            return Err(WatcherError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WatcherError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            describe_prompt: config.describe_prompt.clone(),
            summarize_prompt: config.summarize_prompt.clone(),
        })
    }

    /// Sends one chat completion request and extracts the reply text.
    async fn chat(&self, body: Value) -> Result<String, ChatError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::Timeout
                } else {
                    ChatError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ChatError::Status(status.as_u16(), truncate_body(&detail)));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(ChatError::MalformedResponse)?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl VisionDescriber for OpenAiClient {
    async fn describe(&self, frame: &Frame) -> Result<String, DescribeError> {
        let Some(encoding) = frame.encoding() else {
            return Err(DescribeError::InvalidImage(
                "unrecognized image encoding".to_string(),
            ));
        };
        let image_url = format!(
            "data:{};base64,{}",
            encoding.mime(),
            base64::engine::general_purpose::STANDARD.encode(&frame.payload)
        );

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.describe_prompt },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            }],
            "max_tokens": 300,
        });

        debug!(seq = frame.seq, bytes = frame.payload_size(), "describing frame");
        match self.chat(body).await {
            Ok(text) => Ok(text),
            Err(ChatError::Timeout) => Err(DescribeError::Timeout),
            Err(ChatError::Status(400, detail)) => Err(DescribeError::InvalidImage(detail)),
            Err(e) => Err(DescribeError::Upstream(e.to_string())),
        }
    }
}

#[async_trait]
impl TextSummarizer for OpenAiClient {
    async fn summarize(&self, analyses: &[String]) -> Result<String, SummarizeError> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": numbered_analyses(&self.summarize_prompt, analyses),
            }],
            "max_tokens": 500,
        });

        debug!(analyses = analyses.len(), "requesting session summary");
        match self.chat(body).await {
            Ok(text) => Ok(text),
            Err(ChatError::Timeout) => Err(SummarizeError::Timeout),
            Err(e) => Err(SummarizeError::Upstream(e.to_string())),
        }
    }
}

/// Lays the frame analyses out as a numbered list under the summary prompt.
fn numbered_analyses(prompt: &str, analyses: &[String]) -> String {
    let mut text = String::from(prompt);
    text.push_str("\n\n");
    for (i, analysis) in analyses.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, analysis));
    }
    text
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
