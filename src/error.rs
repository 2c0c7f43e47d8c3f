use thiserror::Error;

/// Errors surfaced by the fetch/parse/persist pipeline.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Remote answered with a non-2xx status.
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Connection failure, timeout or body read failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response carried no body at all.
    #[error("empty response body from {url}")]
    EmptyResponse { url: String },

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl FeedError {
    /// Transport-level failures; a later retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Status { .. } | FeedError::Network(_) | FeedError::EmptyResponse { .. }
        )
    }
}

pub type Result<T, E = FeedError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        let status = FeedError::Status { url: "https://a/1/".into(), status: 503 };
        assert!(status.is_retryable());
        assert_eq!(status.to_string(), "unexpected status 503 from https://a/1/");
        assert!(FeedError::EmptyResponse { url: "x".into() }.is_retryable());
    }

    #[test]
    fn config_errors_are_not_retryable() {
        assert!(!FeedError::UnknownCategory("top".into()).is_retryable());
        assert!(!FeedError::Store(anyhow::anyhow!("disk full")).is_retryable());
    }
}
