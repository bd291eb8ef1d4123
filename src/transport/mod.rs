//! Delivery of payloads to the ingestion service.
//!
//! The dispatch engine talks to the service through the [`Transport`]
//! trait: one payload in, one [`ApiResponse`] or classified
//! [`TransportError`] out. [`HttpTransport`] is the production
//! implementation; tests substitute scripted stubs.
//!
//! # Retry classification
//!
//! - `Ok(response)` — a response was obtained; its `code` drives the
//!   dispatch policy (`0` accepted, `429` rate limited, other values are
//!   API errors).
//! - `Err(Network)` — transient I/O failure; worth retrying.
//! - `Err(Argument)` — the request could not be built from the supplied
//!   payload or configuration; retrying cannot help.
//! - `Err(Other)` — anything else; not retried.

mod http;
mod scrub;

pub use http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, HttpTransport};
pub use scrub::scrub_value;

use serde_json::Value;
use thiserror::Error;

use crate::{config::ReporterConfig, payload::Payload};

/// Structured answer from the ingestion service.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    /// Service error code; `0` means the payload was accepted.
    pub code: u64,
    /// Decoded response document; `Null` when the body was absent or not
    /// JSON.
    pub body: Value,
}

impl ApiResponse {
    /// Code signalling an accepted payload.
    pub const OK: u64 = 0;
    /// Code signalling the token is over its rate limit.
    pub const TOO_MANY_REQUESTS: u64 = 429;

    /// True when the payload was accepted.
    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }

    /// True when the token must back off before sending again.
    pub fn is_rate_limited(&self) -> bool {
        self.code == Self::TOO_MANY_REQUESTS
    }
}

/// Failure to obtain any response from the service.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network-class failure; the same send may succeed if retried.
    #[error("network error: {0}")]
    Network(String),
    /// The request could not be built from the payload or configuration.
    #[error("invalid request: {0}")]
    Argument(String),
    /// Any other failure; not worth retrying.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the retry budget should be spent on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// One-payload-at-a-time delivery to the ingestion service.
///
/// Implementations are stateless from the caller's point of view; the
/// dispatcher may invoke them from its worker thread at any time.
pub trait Transport: Send + Sync {
    /// Serialize `payload` as JSON, with the configuration's scrub fields
    /// redacted, and deliver it to the configured endpoint.
    fn post_as_json(
        &self,
        config: &ReporterConfig,
        payload: &Payload,
    ) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TransportError::Network("reset".into()), true)]
    #[case(TransportError::Argument("bad token".into()), false)]
    #[case(TransportError::Other("fell over".into()), false)]
    fn only_network_errors_are_retryable(#[case] error: TransportError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[rstest]
    fn response_code_predicates() {
        let accepted = ApiResponse {
            code: ApiResponse::OK,
            body: Value::Null,
        };
        let limited = ApiResponse {
            code: ApiResponse::TOO_MANY_REQUESTS,
            body: Value::Null,
        };
        assert!(accepted.is_ok() && !accepted.is_rate_limited());
        assert!(limited.is_rate_limited() && !limited.is_ok());
    }
}
