use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mediascreen_types::{ScreeningError, TokenUsage};

use crate::{ProviderAdapter, Request, Response, ResponseFormat};

// ---------------------------------------------------------------------------
// UsageMeter
// ---------------------------------------------------------------------------

/// Billed tokens across every call made through a client. Clones share the
/// counters, so a caller keeps one handle and gives another to the client.
#[derive(Clone, Default)]
pub struct UsageMeter {
    calls: Arc<AtomicU64>,
    input: Arc<AtomicU64>,
    output: Arc<AtomicU64>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, usage: TokenUsage) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.output.fetch_add(usage.completion_tokens, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn totals(&self) -> TokenUsage {
        TokenUsage::new(
            self.input.load(Ordering::Relaxed),
            self.output.load(Ordering::Relaxed),
        )
    }
}

// ---------------------------------------------------------------------------
// ModelInfo / ModelCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub context_window: usize,
    /// USD per million prompt tokens.
    pub input_price_per_million: f64,
    /// USD per million completion tokens.
    pub output_price_per_million: f64,
}

impl ModelInfo {
    pub fn estimate_cost_usd(&self, usage: TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_price_per_million
            + usage.completion_tokens as f64 * self.output_price_per_million)
            / 1_000_000.0
    }
}

pub struct ModelCatalog {
    models: HashMap<String, ModelInfo>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut models = HashMap::new();

        // Gemini models
        for (id, input, output) in [
            ("gemini-2.5-pro", 1.25, 10.0),
            ("gemini-2.5-flash", 0.30, 2.50),
            ("gemini-2.0-flash", 0.10, 0.40),
        ] {
            models.insert(
                id.to_string(),
                ModelInfo {
                    id: id.to_string(),
                    provider: "google".to_string(),
                    context_window: 1_000_000,
                    input_price_per_million: input,
                    output_price_per_million: output,
                },
            );
        }

        // GPT models
        for (id, ctx, input, output) in [
            ("gpt-4o", 128_000, 2.50, 10.0),
            ("gpt-4o-mini", 128_000, 0.15, 0.60),
            ("gpt-4.1-mini", 1_000_000, 0.40, 1.60),
        ] {
            models.insert(
                id.to_string(),
                ModelInfo {
                    id: id.to_string(),
                    provider: "openai".to_string(),
                    context_window: ctx,
                    input_price_per_million: input,
                    output_price_per_million: output,
                },
            );
        }

        Self { models }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelInfo> {
        self.models.get(model)
    }

    pub fn provider_for_model(&self, model: &str) -> Option<&str> {
        self.models.get(model).map(|m| m.provider.as_str())
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: HashMap<String, Box<dyn ProviderAdapter>>,
    model_catalog: ModelCatalog,
    meter: Option<UsageMeter>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            model_catalog: ModelCatalog::new(),
            meter: None,
        }
    }

    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let name = provider.name().to_string();
        self.providers.insert(name, Box::new(provider));
    }

    /// Count billed tokens of every completion into `meter`.
    pub fn with_usage_meter(mut self, meter: UsageMeter) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn model_catalog(&self) -> &ModelCatalog {
        &self.model_catalog
    }

    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, ScreeningError> {
        let provider = self.resolve_provider(request)?;
        let downgraded;
        let req = if request.response_format == ResponseFormat::JsonObject
            && !provider.supports_json_mode()
        {
            tracing::warn!(provider = provider.name(), "JSON mode unsupported, sending as text");
            let mut plain = request.clone();
            plain.response_format = ResponseFormat::Text;
            downgraded = plain;
            &downgraded
        } else {
            request
        };

        tracing::debug!(
            provider = provider.name(),
            model = %req.model,
            messages = req.messages.len(),
            format = ?req.response_format,
            "LLM request"
        );
        let resp = provider.complete(req).await?;
        tracing::debug!(
            model = %resp.model,
            input_tokens = resp.usage.input_tokens,
            output_tokens = resp.usage.output_tokens,
            finish = ?resp.finish_reason,
            "LLM response"
        );

        if let Some(meter) = &self.meter {
            meter.record(resp.usage.token_usage());
        }
        Ok(resp)
    }

    fn resolve_provider(&self, request: &Request) -> Result<&dyn ProviderAdapter, ScreeningError> {
        // 1. Explicit provider field
        if let Some(ref provider_name) = request.provider {
            return self
                .providers
                .get(provider_name)
                .map(|p| p.as_ref())
                .ok_or_else(|| {
                    ScreeningError::Other(format!("Provider '{}' not registered", provider_name))
                });
        }

        // 2. Model catalog lookup
        if let Some(provider_name) = self.model_catalog.provider_for_model(&request.model) {
            if let Some(provider) = self.providers.get(provider_name) {
                return Ok(provider.as_ref());
            }
        }

        // 3. Fall back to the first registered provider (by name, for determinism)
        if let Some(name) = self.provider_names().first() {
            if let Some(provider) = self.providers.get(*name) {
                return Ok(provider.as_ref());
            }
        }

        Err(ScreeningError::Other("No providers registered".to_string()))
    }

    /// Create from environment variables (detect available API keys).
    pub fn from_env() -> Result<Self, ScreeningError> {
        let mut client = Self::new();
        let mut found_any = false;

        if let Ok(adapter) = crate::GeminiAdapter::from_env() {
            client.register_provider(adapter);
            found_any = true;
        }

        if let Ok(adapter) = crate::OpenAiAdapter::from_env() {
            client.register_provider(adapter);
            found_any = true;
        }

        if !found_any {
            return Err(ScreeningError::AuthError {
                provider: "No LLM provider API keys found in environment (GOOGLE_API_KEY, GEMINI_API_KEY, OPENAI_API_KEY)".to_string(),
            });
        }

        Ok(client)
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Message, ProviderAdapter, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockProvider {
        name: &'static str,
        json_mode: bool,
        formats: Arc<Mutex<Vec<ResponseFormat>>>,
    }

    impl MockProvider {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                json_mode: true,
                formats: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(&self, request: &Request) -> Result<Response, ScreeningError> {
            self.formats.lock().unwrap().push(request.response_format);
            Ok(Response {
                id: format!("{}-resp", self.name),
                text: "{}".into(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                    total_tokens: 30,
                },
                model: "mock-model".into(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            self.name
        }

        fn supports_json_mode(&self) -> bool {
            self.json_mode
        }
    }

    fn make_request(model: &str, provider: Option<&str>) -> Request {
        let mut req = Request::new(model, vec![Message::user("hello")]);
        req.provider = provider.map(String::from);
        req
    }

    #[tokio::test]
    async fn register_provider_and_complete() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::named("mock"));

        let req = make_request("mock-model", Some("mock"));
        let resp = client.complete(&req).await.unwrap();
        assert_eq!(resp.id, "mock-resp");
    }

    #[test]
    fn model_catalog_lookup() {
        let catalog = ModelCatalog::new();

        let info = catalog.lookup("gemini-2.5-flash").unwrap();
        assert_eq!(info.provider, "google");
        assert_eq!(info.context_window, 1_000_000);

        let info = catalog.lookup("gpt-4o-mini").unwrap();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.context_window, 128_000);

        assert!(catalog.lookup("nonexistent-model").is_none());
    }

    #[test]
    fn model_info_estimates_cost() {
        let info = ModelInfo {
            id: "m".into(),
            provider: "p".into(),
            context_window: 1,
            input_price_per_million: 1.0,
            output_price_per_million: 4.0,
        };
        let cost = info.estimate_cost_usd(TokenUsage::new(500_000, 250_000));
        assert!((cost - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn resolve_provider_by_model_name() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::named("openai"));
        client.register_provider(MockProvider::named("google"));

        let req = make_request("gemini-2.5-flash", None);
        let resp = client.complete(&req).await.unwrap();
        assert_eq!(resp.id, "google-resp");

        let req = make_request("gpt-4o", None);
        let resp = client.complete(&req).await.unwrap();
        assert_eq!(resp.id, "openai-resp");
    }

    #[tokio::test]
    async fn json_request_downgraded_for_text_only_provider() {
        let provider = MockProvider {
            json_mode: false,
            ..MockProvider::named("plain")
        };
        let formats = provider.formats.clone();
        let mut client = LlmClient::new();
        client.register_provider(provider);

        let mut req = make_request("mock-model", Some("plain"));
        req.response_format = ResponseFormat::JsonObject;
        client.complete(&req).await.unwrap();

        assert_eq!(*formats.lock().unwrap(), vec![ResponseFormat::Text]);
        // the caller's request is untouched
        assert_eq!(req.response_format, ResponseFormat::JsonObject);
    }

    #[test]
    fn resolve_provider_unknown_returns_error() {
        let client = LlmClient::new();
        let req = make_request("some-model", Some("nonexistent"));
        assert!(client.resolve_provider(&req).is_err());
    }

    #[tokio::test]
    async fn resolve_provider_falls_back_to_first_by_name() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::named("zeta"));
        client.register_provider(MockProvider::named("alpha"));

        let req = make_request("unknown-model", None);
        let resp = client.complete(&req).await.unwrap();
        assert_eq!(resp.id, "alpha-resp");
    }

    #[test]
    fn no_providers_returns_error() {
        let client = LlmClient::new();
        let req = make_request("some-model", None);
        let result = client.resolve_provider(&req);
        assert!(result.err().unwrap().to_string().contains("No providers"));
    }

    #[tokio::test]
    async fn usage_meter_counts_every_call() {
        let meter = UsageMeter::new();
        let mut client = LlmClient::new().with_usage_meter(meter.clone());
        client.register_provider(MockProvider::named("mock"));

        let req = make_request("mock-model", Some("mock"));
        client.complete(&req).await.unwrap();
        assert_eq!(meter.totals(), TokenUsage::new(10, 20));

        client.complete(&req).await.unwrap();
        assert_eq!(meter.calls(), 2);
        assert_eq!(meter.totals(), TokenUsage::new(20, 40));
    }

    #[test]
    fn provider_names_sorted() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::named("openai"));
        client.register_provider(MockProvider::named("google"));
        assert_eq!(client.provider_names(), vec!["google", "openai"]);
    }
}
