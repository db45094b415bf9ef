use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::{FinishReason, Message, ProviderAdapter, Request, Response, ResponseFormat, Role, Usage};
use mediascreen_types::ScreeningError;

const PROVIDER: &str = "google";

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            default_model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self, ScreeningError> {
        let key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| ScreeningError::AuthError {
                provider: PROVIDER.into(),
            })?;
        Ok(Self::new(key))
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        // 1. System messages become systemInstruction
        let system_parts: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| json!({ "text": m.content }))
            .collect();

        // 2. Everything else becomes contents
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(convert_message)
            .collect();

        let mut body = json!({
            "contents": contents,
        });

        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }

        // 3. Generation config
        let mut gen_config = json!({});
        if let Some(max_tokens) = request.max_tokens {
            gen_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            gen_config["temperature"] = json!(temp);
        }
        if request.response_format == ResponseFormat::JsonObject {
            gen_config["responseMimeType"] = json!("application/json");
        }
        if gen_config.as_object().map_or(false, |o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<Response, ScreeningError> {
        let candidates = json["candidates"]
            .as_array()
            .ok_or_else(|| ScreeningError::ProviderError {
                provider: PROVIDER.into(),
                status: 0,
                message: "Missing candidates in response".into(),
                retryable: true,
            })?;

        let candidate = candidates
            .first()
            .ok_or_else(|| ScreeningError::ProviderError {
                provider: PROVIDER.into(),
                status: 0,
                message: "Empty candidates array".into(),
                retryable: true,
            })?;

        let finish_reason = match candidate["finishReason"].as_str() {
            Some("STOP") => FinishReason::EndTurn,
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
                FinishReason::ContentFilter
            }
            Some("STOP_SEQUENCE") => FinishReason::StopSequence,
            _ => FinishReason::EndTurn,
        };

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage_meta = &json["usageMetadata"];
        let input_tokens = usage_meta["promptTokenCount"].as_u64().unwrap_or(0);
        let output_tokens = usage_meta["candidatesTokenCount"].as_u64().unwrap_or(0);
        let total_tokens = usage_meta["totalTokenCount"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens);

        Ok(Response {
            id: json["responseId"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            text,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens,
            },
            model: json["modelVersion"].as_str().unwrap_or_default().to_string(),
            finish_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Message conversion helpers
// ---------------------------------------------------------------------------

fn convert_message(msg: &Message) -> serde_json::Value {
    let role = match msg.role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    };

    json!({
        "role": role,
        "parts": [{ "text": msg.content }]
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub(crate) fn map_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> ScreeningError {
    let status_u16 = status.as_u16();
    let message = extract_error_message(body);
    match status_u16 {
        429 => ScreeningError::RateLimited {
            provider: provider.into(),
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000))
                .unwrap_or(1000),
        },
        401 | 403 => ScreeningError::AuthError {
            provider: provider.into(),
        },
        400 | 404 | 422 => {
            if message.to_lowercase().contains("token") && message.to_lowercase().contains("limit") {
                ScreeningError::ContextLengthExceeded {
                    provider: provider.into(),
                    message,
                }
            } else {
                ScreeningError::InvalidRequest {
                    provider: provider.into(),
                    message,
                }
            }
        }
        408 | 500 | 502 | 503 | 504 => ScreeningError::ProviderError {
            provider: provider.into(),
            status: status_u16,
            message,
            retryable: true,
        },
        _ => ScreeningError::ProviderError {
            provider: provider.into(),
            status: status_u16,
            message,
            retryable: false,
        },
    }
}

pub(crate) fn map_transport_error(
    provider: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> ScreeningError {
    if err.is_timeout() {
        ScreeningError::RequestTimeout {
            provider: provider.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        ScreeningError::ProviderError {
            provider: provider.into(),
            status: 0,
            message: err.to_string(),
            retryable: true,
        }
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, ScreeningError> {
        let body = self.build_request_body(request);
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(PROVIDER, self.timeout, e))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let response_body = resp
            .text()
            .await
            .map_err(|e| map_transport_error(PROVIDER, self.timeout, e))?;

        if !status.is_success() {
            return Err(map_error(
                PROVIDER,
                status,
                retry_after.as_deref(),
                &response_body,
            ));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| ScreeningError::ProviderError {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: true,
            })?;

        let mut response = self.parse_response(json)?;
        if response.model.is_empty() {
            response.model = model.to_string();
        }
        Ok(response)
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn supports_json_mode(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
