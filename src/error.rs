use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no platform entry matches city \"{city}\"")]
    LocationNotFound { city: String },

    #[error("binding location \"{city}\" did not complete within {elapsed_ms}ms")]
    LocationBindTimeout { city: String, elapsed_ms: u64 },

    #[error("request to {url} timed out")]
    FetchTimeout { url: String },

    #[error("request to {url} was blocked: {reason}")]
    FetchBlocked { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint not found: {url}")]
    NotFound { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("failed to parse {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("rendering engine error: {0}")]
    Render(String),

    #[error("no rendering engine is available")]
    RendererUnavailable,

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session cancelled before {context} finished")]
    Cancelled { context: String },
}

impl EngineError {
    pub(crate) fn parse(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the failure is transient and the request may be
    /// retried after a backoff delay.
    ///
    /// Retriable:
    /// - [`EngineError::FetchTimeout`]
    /// - [`EngineError::FetchBlocked`] (429/403 or a challenge interstitial)
    /// - [`EngineError::Http`] (connection reset, DNS hiccup, ...)
    ///
    /// Everything else is deterministic for the same input and is returned
    /// immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FetchTimeout { .. } | Self::FetchBlocked { .. } | Self::Http(_)
        )
    }

    /// Location errors abort the whole session; everything else is recorded
    /// against a single retailer.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::LocationNotFound { .. } | Self::LocationBindTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_fetch_failures_are_retryable() {
        assert!(
            EngineError::FetchTimeout {
                url: "https://x".into()
            }
            .is_retryable()
        );
        assert!(
            EngineError::FetchBlocked {
                url: "https://x".into(),
                reason: "429".into()
            }
            .is_retryable()
        );
        assert!(!EngineError::parse("offer page", "no blocks").is_retryable());
        assert!(
            !EngineError::NotFound {
                url: "https://x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn only_location_errors_are_session_fatal() {
        assert!(
            EngineError::LocationNotFound {
                city: "Nowhere".into()
            }
            .is_session_fatal()
        );
        assert!(
            EngineError::LocationBindTimeout {
                city: "Nowhere".into(),
                elapsed_ms: 10
            }
            .is_session_fatal()
        );
        assert!(
            !EngineError::FetchTimeout {
                url: "https://x".into()
            }
            .is_session_fatal()
        );
    }
}
