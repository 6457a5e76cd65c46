use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can go wrong between loading the certificate and reading
/// the protected API's response.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings are incomplete, or the certificate cannot be loaded.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The token endpoint rejected the request or answered with something
    /// that is not a token.
    #[error("authentication failed with status {status}: {error}: {description}")]
    Authentication {
        status: StatusCode,
        error: String,
        description: String,
        error_codes: Vec<u64>,
        correlation_id: Option<String>,
    },

    #[error("failed to call the web api {url}: {status}")]
    ApiCall { status: StatusCode, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Whether the same request could succeed if tried again later.
    ///
    /// Nothing in this crate retries; the classification is exposed so that
    /// callers embedding the client can decide for themselves.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Authentication { status, .. } | Error::ApiCall { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::Transport(e) => e.is_timeout() || e.is_connect(),
            Error::Configuration(_) | Error::Decode(_) => false,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authentication(status: StatusCode) -> Error {
        Error::Authentication {
            status,
            error: "invalid_client".to_string(),
            description: "AADSTS700027: signature validation failed".to_string(),
            error_codes: vec![700027],
            correlation_id: None,
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!authentication(StatusCode::BAD_REQUEST).is_transient());
        assert!(!Error::ApiCall {
            status: StatusCode::UNAUTHORIZED,
            url: "https://api.example.com/x".to_string(),
        }
        .is_transient());
        assert!(!Error::configuration("missing tenant_id").is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(authentication(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(Error::ApiCall {
            status: StatusCode::TOO_MANY_REQUESTS,
            url: "https://api.example.com/x".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_authentication_message_carries_provider_error() {
        let message = authentication(StatusCode::UNAUTHORIZED).to_string();
        assert!(message.contains("401"));
        assert!(message.contains("invalid_client"));
        assert!(message.contains("AADSTS700027"));
    }
}
