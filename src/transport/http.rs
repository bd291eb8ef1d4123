//! HTTPS transport backed by a pooled ureq agent.

use std::time::Duration;

use serde_json::Value;
use ureq::{Agent, AgentBuilder};

use crate::{config::ReporterConfig, payload::Payload};

use super::{ApiResponse, Transport, TransportError, scrub::scrub_value};

/// Default timeout for establishing HTTP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for a whole request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";

/// Production [`Transport`]: JSON POSTs over HTTPS with connection pooling.
pub struct HttpTransport {
    agent: Agent,
}

impl HttpTransport {
    /// Transport with the default timeouts.
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Transport with explicit connect and request timeouts.
    pub fn with_timeouts(connect: Duration, request: Duration) -> Self {
        let agent = AgentBuilder::new()
            .timeout_connect(connect)
            .timeout(request)
            .build();
        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn post_as_json(
        &self,
        config: &ReporterConfig,
        payload: &Payload,
    ) -> Result<ApiResponse, TransportError> {
        let token = config
            .token()
            .ok_or_else(|| TransportError::Argument("access token is not configured".to_owned()))?;
        if config.endpoint.is_empty() {
            return Err(TransportError::Argument("endpoint is empty".to_owned()));
        }

        let body = scrub_value(payload.body(), &config.scrub_fields);
        let text = serde_json::to_string(&body)
            .map_err(|err| TransportError::Argument(format!("unserializable payload: {err}")))?;

        let result = self
            .agent
            .post(&config.endpoint)
            .set("Content-Type", "application/json")
            .set(ACCESS_TOKEN_HEADER, token)
            .send_string(&text);

        match result {
            Ok(response) => {
                let status = response.status();
                // The POST itself succeeded; an unreadable body must not
                // trigger a re-send of an already accepted payload.
                let body = response.into_string().unwrap_or_default();
                Ok(decode_response(status, &body))
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Ok(decode_response(status, &body))
            }
            Err(ureq::Error::Transport(err)) => Err(TransportError::Network(err.to_string())),
        }
    }
}

/// Fold HTTP status and response body into one service code.
///
/// The service reports its own code in the body's `err` field; when the
/// body is missing or unparsable the HTTP status stands in (0 for 2xx).
fn decode_response(status: u16, body_text: &str) -> ApiResponse {
    let body: Value = serde_json::from_str(body_text).unwrap_or(Value::Null);
    let code = body
        .get("err")
        .and_then(Value::as_u64)
        .unwrap_or(if (200..300).contains(&status) {
            ApiResponse::OK
        } else {
            u64::from(status)
        });
    ApiResponse { code, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, r#"{"err":0,"result":{}}"#, 0)]
    #[case(200, r#"{"err":5}"#, 5)]
    #[case(200, "not json", 0)]
    #[case(429, "", 429)]
    #[case(429, r#"{"err":429,"message":"rate limited"}"#, 429)]
    #[case(500, "<html>oops</html>", 500)]
    fn decode_folds_status_and_body(
        #[case] status: u16,
        #[case] body: &str,
        #[case] expected: u64,
    ) {
        assert_eq!(decode_response(status, body).code, expected);
    }

    #[rstest]
    fn missing_token_is_an_argument_error() {
        let transport = HttpTransport::new();
        let config = ReporterConfig::default();
        let err = transport
            .post_as_json(&config, &Payload::new(serde_json::json!({})))
            .expect_err("token is required");
        assert!(matches!(err, TransportError::Argument(_)));
    }
}
