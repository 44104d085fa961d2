use thiserror::Error;

use crate::provider::MetricKind;

/// Failure of the raw HTTP capability. Adapters map these into
/// [`ProviderError::Network`]; nothing above the adapter layer sees them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
}

/// Provider-facing error taxonomy.
///
/// `Auth` and `Network` bubble up to user-facing actions (login, manual
/// refresh). `UnsupportedMetric` means "no data for that dimension", not a
/// hard failure. `Decode` degrades to absence for background work.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(#[from] TransportError),
    #[error("metric '{0}' is not supported by this provider")]
    UnsupportedMetric(MetricKind),
    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

impl ProviderError {
    /// HTTP status → taxonomy mapping shared by both adapters.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(format!("server returned {status}")),
            _ => ProviderError::Network(TransportError::Request {
                url: url.to_string(),
                message: format!("unexpected status {status}"),
            }),
        }
    }
}
