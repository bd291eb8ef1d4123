//! Opaque payload values accepted from reporters.
//!
//! The dispatch engine never inspects a payload's contents; it carries the
//! value verbatim from the queue that admitted it to the transport that
//! delivers it. The only metadata attached is the UTC instant the payload
//! was captured, stamped at construction.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single unit of work: an immutable JSON document destined for the
/// ingestion service.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    body: Value,
    captured_at: DateTime<Utc>,
}

impl Payload {
    /// Wrap a JSON document for delivery, stamping the capture time.
    pub fn new(body: Value) -> Self {
        Self {
            body,
            captured_at: Utc::now(),
        }
    }

    /// Returns the JSON document.
    #[inline]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns the instant the payload was captured.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl From<Value> for Payload {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn body_is_preserved_verbatim() {
        let body = json!({ "message": { "body": "disk on fire" } });
        let payload = Payload::new(body.clone());
        assert_eq!(payload.body(), &body);
    }

    #[rstest]
    fn clones_compare_equal() {
        let payload = Payload::new(json!({ "tag": 1 }));
        assert_eq!(payload.clone(), payload);
    }

    #[rstest]
    fn capture_time_is_stamped_at_construction() {
        let before = Utc::now();
        let payload = Payload::new(json!({}));
        let after = Utc::now();
        assert!(payload.captured_at() >= before);
        assert!(payload.captured_at() <= after);
    }

    #[rstest]
    fn displays_as_its_document() {
        let payload = Payload::from(json!({ "tag": 7 }));
        assert_eq!(payload.to_string(), r#"{"tag":7}"#);
    }
}
