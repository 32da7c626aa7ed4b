use thiserror::Error;

/// Structured failure of a call to the CI server. Fetch methods return this
/// instead of panicking so callers can treat it as "no data this round".
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("Jenkins API error {status} for {endpoint}: {body}")]
    Status { endpoint: String, status: u16, body: String },

    #[error("authorization challenge repeated after crumb retry for {endpoint}")]
    AuthChallenge { endpoint: String },

    #[error("failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl FetchError {
    pub(crate) fn from_reqwest(endpoint: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { endpoint: endpoint.to_string() }
        } else {
            FetchError::Network { endpoint: endpoint.to_string(), message: e.to_string() }
        }
    }

    pub(crate) fn decode(endpoint: &str, e: impl std::fmt::Display) -> Self {
        FetchError::Decode { endpoint: endpoint.to_string(), message: e.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Webhook(String),

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("invalid channel configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Webhook(e.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for NotifyError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        NotifyError::Email(e.to_string())
    }
}

impl From<lettre::error::Error> for NotifyError {
    fn from(e: lettre::error::Error) -> Self {
        NotifyError::Email(e.to_string())
    }
}
