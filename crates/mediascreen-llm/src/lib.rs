//! LLM client with multi-provider support (Gemini, OpenAI-compatible).
//!
//! Provides the `ProviderAdapter` trait, a shared `UsageMeter`, the model
//! catalog with pricing, and `LlmClient` for routing requests by provider.
//! The screening pipeline uses this crate as the backing for its decision oracle.

mod client;
mod gemini;
mod openai;
mod provider;
mod types;

pub use client::*;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use types::*;
