use crate::packaging::PackagingError;
use crate::transport::TransportError;
use providers::ProviderError;
use std::path::PathBuf;
use storage::{CacheError, Source};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
    #[error("snapshot {} contains no applications", .0.display())]
    EmptySnapshot(PathBuf),
    #[error("{provider} unavailable: {reason}")]
    SourceUnavailable { provider: Source, reason: String },
    #[error("{provider} rate limited: {reason}")]
    RateLimited { provider: Source, reason: String },
    #[error("no category match for {0}")]
    NoCategoryMatch(String),
    #[error("write conflict: {0}")]
    WriteConflict(String),
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
    #[error("no restore point under {}", .0.display())]
    RestorePointMissing(PathBuf),
    #[error("invalid capacity policy: {0}")]
    InvalidPolicy(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Packaging(#[from] PackagingError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> EngineError {
        let path = path.into();
        move |source| EngineError::Io { path, source }
    }

    /// Lifts a source failure into the run-level taxonomy.
    pub fn from_provider(provider: Source, err: &ProviderError) -> EngineError {
        match err {
            ProviderError::RateLimited(reason) => EngineError::RateLimited {
                provider,
                reason: reason.clone(),
            },
            other => EngineError::SourceUnavailable {
                provider,
                reason: other.to_string(),
            },
        }
    }
}
