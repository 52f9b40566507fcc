use powerfit_cache::CacheError;
use powerfit_common::ShellError;
use powerfit_net::NetError;
use powerfit_outbox::OutboxError;
use thiserror::Error;

// ==================== Errors ====================

/// Errors raised by worker event handlers.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install of {generation} failed: {source}")]
    Install {
        generation: String,
        #[source]
        source: CacheError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(#[from] OutboxError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("State error: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Config(#[from] ShellError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl WorkerError {
    /// Short label used in error reports.
    pub fn category(&self) -> &'static str {
        match self {
            WorkerError::Install { .. } => "install",
            WorkerError::Cache(_) => "cache",
            WorkerError::Storage(_) => "storage",
            WorkerError::Network(_) => "network",
            WorkerError::InvalidState(_) => "state",
            WorkerError::Config(e) => e.category(),
            WorkerError::TaskFailed(_) => "task",
        }
    }
}

/// A fetch the worker could not answer.
///
/// This is the "failed response" the page sees; the page decides how to render it.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network request for {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Network request for {url} failed and nothing is cached: {source}")]
    NoCachedResponse {
        url: String,
        #[source]
        source: NetError,
    },
}

impl FetchError {
    /// The network error behind this failure.
    pub fn network_error(&self) -> &NetError {
        match self {
            FetchError::Network { source, .. } | FetchError::NoCachedResponse { source, .. } => {
                source
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_error_keeps_source() {
        let err = WorkerError::Install {
            generation: "powerfit-gym-v2".to_string(),
            source: CacheError::BadStatus {
                url: "https://powerfit.example/styles.css".to_string(),
                status: 404,
            },
        };
        assert_eq!(err.category(), "install");
        assert!(err.to_string().contains("powerfit-gym-v2"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_fetch_error_exposes_network_cause() {
        let err = FetchError::Network {
            url: "https://powerfit.example/script.js".to_string(),
            source: NetError::Offline,
        };
        assert!(matches!(err.network_error(), NetError::Offline));
    }
}
