//! Decision oracle backed by a chat-completion model.
//!
//! Each query becomes one JSON-mode request; the reply is parsed strictly into
//! the asking stage's verdict vocabulary.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use mediascreen_llm::{LlmClient, Message, Request, ResponseFormat};
use mediascreen_types::{Result, ScreeningError, TokenUsage};

use crate::config::ScreeningConfig;
use crate::oracle::{DecisionOracle, OracleQuery, OracleResponse, Verdict};
use crate::prompts;
use crate::stage::Stage;
use crate::state::{DetailVerdict, Sentiment};

pub struct LlmOracle {
    client: Arc<LlmClient>,
    model: String,
    provider: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmOracle {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    pub fn from_config(client: Arc<LlmClient>, config: &ScreeningConfig) -> Self {
        Self {
            client,
            model: config.oracle.model.clone(),
            provider: config.oracle.provider.clone(),
            temperature: config.oracle.temperature,
            max_tokens: config.oracle.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, query: &OracleQuery) -> Request {
        let mut request = Request::new(
            self.model.clone(),
            vec![
                Message::system(prompts::system_prompt()),
                Message::user(prompts::user_prompt(
                    query.stage,
                    &query.question,
                    &query.applicant,
                    query.article.text(),
                )),
            ],
        );
        request.temperature = Some(self.temperature);
        request.max_tokens = Some(self.max_tokens);
        request.response_format = ResponseFormat::JsonObject;
        request.provider = self.provider.clone();
        request
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn judge(&self, query: &OracleQuery) -> Result<OracleResponse> {
        let request = self.build_request(query);
        let response = self.client.complete(&request).await?;
        let usage = response.usage.token_usage();
        let (verdict, rationale) =
            parse_verdict(query.stage, &response.text).map_err(|err| match err {
                ScreeningError::UnparseableVerdict { stage, message, .. } => {
                    ScreeningError::UnparseableVerdict {
                        stage,
                        message,
                        usage,
                    }
                }
                other => other,
            })?;
        tracing::debug!(
            stage = %query.stage,
            model = %response.model,
            verdict = %verdict.label(),
            "Oracle verdict parsed"
        );
        Ok(OracleResponse::new(verdict, rationale, usage))
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct NamePresenceReply {
    name_is_present: bool,
    #[serde(default)]
    explanation: String,
}

#[derive(Deserialize)]
struct AgeReply {
    age_matches: bool,
    #[serde(default)]
    explanation: String,
}

#[derive(Deserialize)]
struct DetailReply {
    decision: DetailVerdict,
    #[serde(default)]
    explanation: String,
}

#[derive(Deserialize)]
struct SentimentReply {
    sentiment: Sentiment,
    #[serde(default)]
    explanation: String,
}

/// Drop a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // skip an info string such as `json`; it may share the line with the body
    match rest.split_once('\n') {
        Some((info, body)) if !info.contains('{') => body.trim(),
        _ => rest
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
            .trim(),
    }
}

/// Parse a model reply into `stage`'s verdict and its explanation.
///
/// Anything outside the stage's vocabulary is an [`ScreeningError::UnparseableVerdict`].
pub fn parse_verdict(stage: Stage, text: &str) -> Result<(Verdict, String)> {
    let body = strip_code_fences(text);
    let unparseable = |e: serde_json::Error| ScreeningError::UnparseableVerdict {
        stage: stage.name().to_string(),
        message: e.to_string(),
        usage: TokenUsage::default(),
    };

    let parsed = match stage {
        Stage::NamePresence => serde_json::from_str::<NamePresenceReply>(body)
            .map(|r| (Verdict::NamePresence(r.name_is_present), r.explanation)),
        Stage::AgeVerification => serde_json::from_str::<AgeReply>(body)
            .map(|r| (Verdict::Age(r.age_matches), r.explanation)),
        Stage::DetailVerification => serde_json::from_str::<DetailReply>(body)
            .map(|r| (Verdict::Detail(r.decision), r.explanation)),
        Stage::SentimentAssessment => serde_json::from_str::<SentimentReply>(body)
            .map(|r| (Verdict::Sentiment(r.sentiment), r.explanation)),
    };
    parsed.map_err(unparseable)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
