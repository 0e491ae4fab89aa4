//! The seam between the fetcher and individual weather sources.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{SamplePoint, TimeWindow, WeatherObservation};

/// Why a single provider call failed.
///
/// The fetcher retries `Transient` failures and gives up immediately on
/// `Permanent` ones.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Network error, timeout, HTTP 429 or 5xx
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Any other non-success status, or a body we cannot understand
    #[error("provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP status the way every provider does.
    pub fn from_status(provider: &str, status: reqwest::StatusCode) -> Self {
        let msg = format!("{} returned HTTP {}", provider, status);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ProviderError::Transient(msg)
        } else {
            ProviderError::Permanent(msg)
        }
    }

    /// Classify a transport-level reqwest error.
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Permanent(format!("{} sent an unreadable body: {}", provider, err))
        } else {
            ProviderError::Transient(format!("{} request failed: {}", provider, err))
        }
    }
}

/// A source of weather observations for a single sample point.
///
/// `Ok(vec![])` means the provider answered and has nothing for this point and
/// time; that is not a failure.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Short identifier used in logs and in `ProfileEntry::sources`.
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        point: &SamplePoint,
        window: TimeWindow,
    ) -> Result<Vec<WeatherObservation>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status("x", StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(ProviderError::from_status("x", StatusCode::BAD_GATEWAY).is_transient());
        assert!(ProviderError::from_status("x", StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(!ProviderError::from_status("x", StatusCode::NOT_FOUND).is_transient());
        assert!(!ProviderError::from_status("x", StatusCode::FORBIDDEN).is_transient());
    }

    #[test]
    fn test_status_message_names_provider() {
        let err = ProviderError::from_status("yr.no", StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "provider failure: yr.no returned HTTP 400 Bad Request"
        );
    }
}
