//! OpenAI-backed [`Summarizer`].
//!
//! Sends the article text to `POST {api_base}/v1/chat/completions` asking
//! for a JSON object with `summary`, `key_points`, `decisions` and
//! `action_items`, then parses the reply with
//! [`parse_summary_json`](kb_ingest_core::summarize::parse_summary_json).
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → give up
//! - Network errors → retry
//!
//! Backoff is exponential: 1s, 2s, 4s, ... Any failure ends in `None`
//! after a `warn!`; summarization never fails an ingestion outcome.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use kb_ingest_core::summarize::{parse_summary_json, Summarizer, Summary};

use crate::config::SummarizerConfig;

const SYSTEM_MESSAGE: &str = "You are a helpful assistant that analyzes team conversations and \
     documentation and extracts structured information. Always respond with valid JSON only.";

pub struct OpenAiSummarizer {
    config: SummarizerConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiSummarizer {
    pub fn new(config: SummarizerConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Call the chat completions API with retry/backoff and return the
    /// assistant message content.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": 0.3,
            "max_tokens": 1000,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": prompt},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return json
                            .pointer("/choices/0/message/content")
                            .and_then(|c| c.as_str())
                            .map(str::to_string)
                            .ok_or_else(|| anyhow::anyhow!("OpenAI response has no content"));
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Summarization failed after retries")))
    }
}

/// Build the user prompt for `text` about `topic`.
pub fn build_prompt(topic: &str, text: &str, previous_summary: Option<&str>) -> String {
    let mut prompt = format!(
        "Analyze the following content about \"{}\" and provide a structured summary in JSON \
         format with these exact keys:\n\
         - \"summary\": A concise 2-3 sentence summary of the main discussion\n\
         - \"key_points\": An array of 3-7 key points\n\
         - \"decisions\": An array of any decisions made (can be empty)\n\
         - \"action_items\": An array of action items, formatted \"Action: [description] - \
         Assigned to: [person]\" or \"Action: [description]\" when no assignee is mentioned\n\n\
         Be specific and extract actual information. Use an empty array for a section with no \
         relevant content.\n\n",
        topic
    );
    if let Some(previous) = previous_summary.filter(|p| !p.trim().is_empty()) {
        prompt.push_str("Previous summary of an earlier revision:\n");
        prompt.push_str(previous);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Content:\n");
    prompt.push_str(text);
    prompt.push_str("\n\nRespond ONLY with valid JSON, no additional text or markdown formatting.");
    prompt
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        topic: &str,
        text: &str,
        previous_summary: Option<&str>,
    ) -> Option<Summary> {
        let prompt = build_prompt(topic, text, previous_summary);
        match self.complete(&prompt).await {
            Ok(content) => {
                let parsed = parse_summary_json(&content);
                if parsed.is_none() {
                    warn!(topic, "Summarizer reply was not a usable summary; using fallback");
                    debug!(content = %content, "Unparsed summarizer reply");
                }
                parsed
            }
            Err(e) => {
                warn!(topic, error = %e, "Summarizer failed; using fallback");
                None
            }
        }
    }
}
