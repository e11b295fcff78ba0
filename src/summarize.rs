//! Match summarization.
//!
//! Summaries are optional enrichment. The [`Summarizer`] trait has two
//! implementations:
//! - **[`DisabledSummarizer`]**: always fails; used when no provider is configured.
//! - **[`OpenAiSummarizer`]**: one chat-completions call per match; a failed
//!   call leaves that match without a summary.
//!
//! Callers go through [`summarize_or_passthrough`], which returns the
//! matches unmodified whenever summarization fails, so a pipeline run never
//! depends on the provider.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SummarizeConfig;
use crate::models::Match;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 300;
const TEMPERATURE: f64 = 0.3;
const SYSTEM_PROMPT: &str = "Você é um assistente especializado em resumos de publicações \
oficiais do DOU. Forneça um resumo conciso e objetivo em português, destacando a relevância \
dos termos mencionados.";

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Return the matches with [`Match::summary`] filled in.
    async fn summarize(&self, matches: Vec<Match>) -> Result<Vec<Match>>;
}

/// Summarizer used when summaries are not configured.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _matches: Vec<Match>) -> Result<Vec<Match>> {
        bail!("summarization is disabled")
    }
}

/// Summarizer backed by the OpenAI chat-completions API.
///
/// Built by [`create_summarizer`] when `OPENAI_API_KEY` is set. Document
/// text is truncated to `max_input_chars` characters before sending.
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_input_chars: usize,
}

impl OpenAiSummarizer {
    /// Point the summarizer at a compatible endpoint.
    pub fn with_endpoint(endpoint: &str, api_key: &str, config: &SummarizeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            max_input_chars: config.max_input_chars,
        })
    }

    async fn summarize_one(&self, m: &Match) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(m, self.max_input_chars) },
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, mut matches: Vec<Match>) -> Result<Vec<Match>> {
        for m in matches.iter_mut() {
            match self.summarize_one(m).await {
                Ok(summary) => {
                    debug!(filename = %m.document.filename, "summary generated");
                    m.summary = Some(summary);
                }
                Err(e) => {
                    warn!(filename = %m.document.filename, error = %e, "summary failed, keeping plain match");
                }
            }
        }
        Ok(matches)
    }
}

fn user_prompt(m: &Match, max_input_chars: usize) -> String {
    let text: String = m.document.text.chars().take(max_input_chars).collect();
    format!(
        "Resuma o seguinte artigo do DOU, enfatizando menções aos termos '{}':\n\n{}",
        m.matched_terms.join(", "),
        text
    )
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;
    let content = content.trim();
    if content.is_empty() {
        bail!("OpenAI returned an empty summary");
    }
    Ok(content.to_string())
}

/// Build the configured [`Summarizer`].
///
/// | `summarize.provider` | Summarizer |
/// |----------------------|------------|
/// | `"disabled"` | [`DisabledSummarizer`] |
/// | `"openai"` | [`OpenAiSummarizer`], or [`DisabledSummarizer`] without `OPENAI_API_KEY` |
pub fn create_summarizer(config: &SummarizeConfig) -> Result<Box<dyn Summarizer>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    summarizer_with_key(config, api_key)
}

fn summarizer_with_key(
    config: &SummarizeConfig,
    api_key: Option<String>,
) -> Result<Box<dyn Summarizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledSummarizer)),
        "openai" => match api_key {
            Some(key) => Ok(Box::new(OpenAiSummarizer::with_endpoint(
                OPENAI_CHAT_URL,
                &key,
                config,
            )?)),
            None => {
                warn!("OPENAI_API_KEY not set, summaries disabled");
                Ok(Box::new(DisabledSummarizer))
            }
        },
        other => bail!("Unknown summarize provider: {}", other),
    }
}

/// Summarize, or hand back the input untouched on any failure.
pub async fn summarize_or_passthrough(summarizer: &dyn Summarizer, matches: Vec<Match>) -> Vec<Match> {
    if matches.is_empty() {
        return matches;
    }
    match summarizer.summarize(matches.clone()).await {
        Ok(summarized) => summarized,
        Err(e) => {
            warn!(error = %e, "summarization unavailable, using plain matches");
            matches
        }
    }
}
