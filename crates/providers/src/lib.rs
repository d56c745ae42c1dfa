//! Category sources: remote store lookups and an OpenAI-compatible chat
//! endpoint, behind one lookup capability.

use std::sync::Arc;
use storage::{Category, Source};
use thiserror::Error;

pub mod app_store;
pub mod categories;
pub mod google_play;
mod http;
pub mod known_names;
pub mod openai;
pub mod rate_limit;

pub use rate_limit::RateLimiter;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("source not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient failures are worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::RateLimited(_) | ProviderError::Timeout
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_connect() || e.is_request() {
            ProviderError::Unavailable(e.to_string())
        } else {
            ProviderError::RequestFailed(e.to_string())
        }
    }
}

/// What a source knows about one package. `category == None` is "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceAnswer {
    pub category: Option<Category>,
    pub display_name: Option<String>,
}

impl SourceAnswer {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(category: Category) -> Self {
        Self {
            category: Some(category),
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.display_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }
}

#[async_trait::async_trait]
pub trait CategorySource: Send + Sync {
    /// Which record source this lookup stands for.
    fn source(&self) -> Source;

    async fn lookup(
        &self,
        identifier: &str,
        display_name: Option<&str>,
    ) -> Result<SourceAnswer, ProviderError>;
}

/// Sources in lookup priority order. Registration order does not matter.
#[derive(Default, Clone)]
pub struct SourceChain {
    sources: Vec<Arc<dyn CategorySource>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn CategorySource>) -> Self {
        self.sources.push(source);
        // stable, so two sources of the same kind keep registration order
        self.sources.sort_by_key(|s| s.source());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CategorySource>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn kinds(&self) -> Vec<Source> {
        self.sources.iter().map(|s| s.source()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Source);

    #[async_trait::async_trait]
    impl CategorySource for Fixed {
        fn source(&self) -> Source {
            self.0
        }

        async fn lookup(&self, _: &str, _: Option<&str>) -> Result<SourceAnswer, ProviderError> {
            Ok(SourceAnswer::not_found())
        }
    }

    #[test]
    fn chain_orders_by_priority() {
        let chain = SourceChain::new()
            .with_source(Arc::new(Fixed(Source::Ai)))
            .with_source(Arc::new(Fixed(Source::RemoteDomestic)))
            .with_source(Arc::new(Fixed(Source::RemoteInternational)));
        assert_eq!(
            chain.kinds(),
            vec![Source::RemoteInternational, Source::RemoteDomestic, Source::Ai]
        );
    }

    #[test]
    fn only_network_conditions_are_transient() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::RateLimited("429".into()).is_transient());
        assert!(!ProviderError::RequestFailed("bad json".into()).is_transient());
        assert!(!ProviderError::NotConfigured("api key".into()).is_transient());
    }
}
