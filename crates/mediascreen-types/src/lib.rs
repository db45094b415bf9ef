//! Shared types and errors for the adverse-media screening pipeline.
//!
//! This crate provides the foundational types used across the other crates:
//! - `ScreeningError` — unified error taxonomy
//! - `FailureClass` — transient vs. non-transient classification used by retries
//! - `TokenUsage` — prompt/completion token counters for one oracle call or stage

use serde::{Deserialize, Serialize};

/// Unified error type for all screening subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    #[error("Invalid request to {provider}: {message}")]
    InvalidRequest { provider: String, message: String },

    // === Oracle Errors ===
    /// `usage` is what the provider billed for the reply that failed to parse.
    #[error("Unparseable verdict for stage '{stage}': {message}")]
    UnparseableVerdict {
        stage: String,
        message: String,
        usage: TokenUsage,
    },

    // === Pipeline Errors ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to fetch article at {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Run state invariant violated: {0}")]
    InvariantViolation(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

/// Whether a failed operation may succeed if attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    NonTransient,
}

impl ScreeningError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScreeningError::RateLimited { .. }
                | ScreeningError::RequestTimeout { .. }
                | ScreeningError::UnparseableVerdict { .. }
                | ScreeningError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScreeningError::AuthError { .. }
                | ScreeningError::InvalidRequest { .. }
                | ScreeningError::InvalidInput(_)
                | ScreeningError::ContextLengthExceeded { .. }
        )
    }

    /// Default classifier handed to the retry wrapper.
    pub fn failure_class(&self) -> FailureClass {
        if self.is_retryable() {
            FailureClass::Transient
        } else {
            FailureClass::NonTransient
        }
    }

    /// Short machine-readable reason code recorded in stage failures.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ScreeningError::ProviderError { .. } => "provider_error",
            ScreeningError::RateLimited { .. } => "rate_limited",
            ScreeningError::AuthError { .. } => "auth",
            ScreeningError::RequestTimeout { .. } => "timeout",
            ScreeningError::ContextLengthExceeded { .. } => "context_length",
            ScreeningError::InvalidRequest { .. } => "invalid_request",
            ScreeningError::UnparseableVerdict { .. } => "unparseable",
            ScreeningError::InvalidInput(_) => "invalid_input",
            ScreeningError::Fetch { .. } => "fetch",
            ScreeningError::InvariantViolation(_) => "invariant",
            ScreeningError::Io(_) => "io",
            ScreeningError::Json(_) => "json",
            ScreeningError::Csv(_) => "csv",
            ScreeningError::Other(_) => "other",
        }
    }

    /// Suggested minimum wait before the next attempt, when the provider sent one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ScreeningError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

impl ScreeningError {
    /// Tokens the provider charged for a call that still ended in this error.
    pub fn billed_usage(&self) -> TokenUsage {
        match self {
            ScreeningError::UnparseableVerdict { usage, .. } => *usage,
            _ => TokenUsage::default(),
        }
    }
}

/// A convenience alias for `Result<T, ScreeningError>`.
pub type Result<T> = std::result::Result<T, ScreeningError>;

// ---------------------------------------------------------------------------
// TokenUsage — prompt/completion counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    /// Saturating accumulation; counters never decrease.
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, rhs: TokenUsage) -> TokenUsage {
        self.accumulate(rhs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = ScreeningError::ProviderError {
            provider: "google".into(),
            status: 500,
            message: "internal server error".into(),
            retryable: true,
        };
        assert_eq!(
            err.to_string(),
            "Provider google returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_rate_limited() {
        let err = ScreeningError::RateLimited {
            provider: "openai".into(),
            retry_after_ms: 3000,
        };
        assert_eq!(err.to_string(), "Rate limited by openai, retry after 3000ms");
    }

    #[test]
    fn error_display_unparseable_verdict() {
        let err = ScreeningError::UnparseableVerdict {
            stage: "age_verification".into(),
            message: "missing key 'age_matches'".into(),
            usage: TokenUsage::default(),
        };
        assert_eq!(
            err.to_string(),
            "Unparseable verdict for stage 'age_verification': missing key 'age_matches'"
        );
    }

    #[test]
    fn error_display_fetch() {
        let err = ScreeningError::Fetch {
            url: "https://example.com/a".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to fetch article at https://example.com/a: connection refused"
        );
    }

    // --- classification ---

    #[test]
    fn transient_errors_are_retryable() {
        let transient = [
            ScreeningError::RateLimited {
                provider: "x".into(),
                retry_after_ms: 0,
            },
            ScreeningError::RequestTimeout {
                provider: "x".into(),
                timeout_ms: 100,
            },
            ScreeningError::UnparseableVerdict {
                stage: "s".into(),
                message: "m".into(),
                usage: TokenUsage::new(10, 2),
            },
            ScreeningError::ProviderError {
                provider: "x".into(),
                status: 503,
                message: "unavailable".into(),
                retryable: true,
            },
        ];
        for err in &transient {
            assert!(err.is_retryable(), "{err} should be retryable");
            assert!(!err.is_terminal(), "{err} should not be terminal");
            assert_eq!(err.failure_class(), FailureClass::Transient);
        }
    }

    #[test]
    fn permanent_errors_are_terminal() {
        let permanent = [
            ScreeningError::AuthError {
                provider: "x".into(),
            },
            ScreeningError::InvalidRequest {
                provider: "x".into(),
                message: "bad".into(),
            },
            ScreeningError::ContextLengthExceeded {
                provider: "x".into(),
                message: "too long".into(),
            },
            ScreeningError::InvalidInput("empty name".into()),
        ];
        for err in &permanent {
            assert!(!err.is_retryable(), "{err} should not be retryable");
            assert!(err.is_terminal(), "{err} should be terminal");
            assert_eq!(err.failure_class(), FailureClass::NonTransient);
        }
    }

    #[test]
    fn non_flagged_provider_error_is_not_retryable() {
        let err = ScreeningError::ProviderError {
            provider: "x".into(),
            status: 418,
            message: "teapot".into(),
            retryable: false,
        };
        assert_eq!(err.failure_class(), FailureClass::NonTransient);
    }

    #[test]
    fn reason_codes() {
        assert_eq!(
            ScreeningError::RequestTimeout {
                provider: "x".into(),
                timeout_ms: 1
            }
            .reason_code(),
            "timeout"
        );
        assert_eq!(
            ScreeningError::AuthError {
                provider: "x".into()
            }
            .reason_code(),
            "auth"
        );
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let err = ScreeningError::RateLimited {
            provider: "x".into(),
            retry_after_ms: 1500,
        };
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert_eq!(ScreeningError::Other("x".into()).retry_after_ms(), None);
    }

    #[test]
    fn billed_usage_only_for_unparseable_replies() {
        let err = ScreeningError::UnparseableVerdict {
            stage: "age_verification".into(),
            message: "prose".into(),
            usage: TokenUsage::new(400, 40),
        };
        assert_eq!(err.billed_usage().total(), 440);
        assert!(ScreeningError::AuthError {
            provider: "x".into()
        }
        .billed_usage()
        .is_zero());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ScreeningError = io_err.into();
        assert!(matches!(err, ScreeningError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ScreeningError = json_err.into();
        assert!(matches!(err, ScreeningError::Json(_)));
    }

    // --- TokenUsage ---

    #[test]
    fn token_usage_accumulates() {
        let mut usage = TokenUsage::default();
        assert!(usage.is_zero());
        usage.accumulate(TokenUsage::new(100, 20));
        usage.accumulate(TokenUsage::new(50, 5));
        assert_eq!(usage.prompt_tokens, 150);
        assert_eq!(usage.completion_tokens, 25);
        assert_eq!(usage.total(), 175);
    }

    #[test]
    fn token_usage_add_saturates() {
        let a = TokenUsage::new(u64::MAX, 1);
        let b = TokenUsage::new(10, 2);
        let sum = a + b;
        assert_eq!(sum.prompt_tokens, u64::MAX);
        assert_eq!(sum.completion_tokens, 3);
    }

    #[test]
    fn failure_class_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&FailureClass::NonTransient).unwrap(),
            "\"non_transient\""
        );
    }
}
