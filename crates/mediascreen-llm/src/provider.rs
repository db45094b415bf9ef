use async_trait::async_trait;

use crate::{Request, Response};
use mediascreen_types::ScreeningError;

/// One chat-completion backend. The client owns adapters as trait objects
/// keyed by [`ProviderAdapter::name`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, ScreeningError>;
    fn name(&self) -> &str;
    /// Whether the backend can be told to answer with a bare JSON object.
    fn supports_json_mode(&self) -> bool;
}
