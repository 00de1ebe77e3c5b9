use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

mod retry;

pub use retry::RetryPolicy;

/// Retryability is decided here, at the adapter boundary, by constructing
/// the right kind. Nothing downstream inspects message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Timeouts, 429s, 5xx, overloaded: retried with bounded backoff.
    Transient,
    /// Bad credentials: surfaced immediately, never retried.
    Auth,
    /// Malformed request or response.
    Invalid,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("provider error ({kind:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Invalid,
            message: message.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Flow-name keyed dispatch, resolved once per request instead of scattered
/// conditionals at each call site.
pub struct ProviderRouter {
    routes: HashMap<String, Arc<dyn Provider>>,
    fallback: Arc<dyn Provider>,
}

impl ProviderRouter {
    pub fn new(fallback: Arc<dyn Provider>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback,
        }
    }

    pub fn with_route(mut self, flow: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.routes.insert(flow.into(), provider);
        self
    }

    pub fn resolve(&self, flow: &str) -> Arc<dyn Provider> {
        self.routes
            .get(flow)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
