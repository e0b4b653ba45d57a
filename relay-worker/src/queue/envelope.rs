//! The webhook envelope carried through the queue.
//!
//! An envelope is the raw request body plus a filtered copy of the request
//! headers. It is encoded as JSON with the field names `Payload` and
//! `Headers`, which is the format already stored in deployed queues.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Headers starting with this prefix are injected by the edge network and
/// never relayed.
pub const DEFAULT_EXCLUDED_HEADER_PREFIX: &str = "CloudFront-";

/// Raw webhook payload and headers, as queued by ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "Payload")]
    payload: String,
    #[serde(rename = "Headers")]
    headers: HashMap<String, String>,
}

impl WebhookEnvelope {
    /// Build an envelope from request headers and body.
    ///
    /// Every header whose name starts with `excluded_prefix` is dropped. Header
    /// names are compared ASCII case-insensitively because the HTTP stack
    /// lowercases them. An empty prefix keeps every header.
    pub fn from_request<'a, I>(headers: I, payload: impl Into<String>, excluded_prefix: &str) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let headers = headers
            .into_iter()
            .filter(|(name, _)| excluded_prefix.is_empty() || !has_prefix(name, excluded_prefix))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Self {
            payload: payload.into(),
            headers,
        }
    }

    /// The original request body, unchanged.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The filtered request headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The GitHub event name, if the sender supplied one.
    pub fn event(&self) -> Option<&str> {
        self.header("X-GitHub-Event")
    }

    /// Encode the envelope as queue message text.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Serialize(e.to_string()))
    }

    /// Decode an envelope from queue message text.
    pub fn from_json(body: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(body)?)
    }
}

fn has_prefix(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("X-GitHub-Event", "push"),
            ("X-Hub-Signature", "sha1=abc"),
            ("CloudFront-Viewer-Country", "US"),
            ("cloudfront-is-mobile-viewer", "false"),
            ("Content-Type", "application/json"),
        ]
    }

    #[test]
    fn test_from_request_filters_edge_headers() {
        let envelope = WebhookEnvelope::from_request(
            sample_headers(),
            "{\"x\":1}",
            DEFAULT_EXCLUDED_HEADER_PREFIX,
        );

        assert_eq!(envelope.payload(), "{\"x\":1}");
        assert_eq!(envelope.headers().len(), 3);
        assert_eq!(envelope.headers().get("X-GitHub-Event").map(String::as_str), Some("push"));
        assert_eq!(
            envelope.headers().get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert!(!envelope.headers().contains_key("CloudFront-Viewer-Country"));
        assert!(!envelope.headers().contains_key("cloudfront-is-mobile-viewer"));
    }

    #[test]
    fn test_from_request_with_empty_prefix_keeps_everything() {
        let envelope = WebhookEnvelope::from_request(sample_headers(), "", "");
        assert_eq!(envelope.headers().len(), 5);
    }

    #[test]
    fn test_from_request_does_not_touch_input() {
        let input: HashMap<String, String> = sample_headers()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let before = input.clone();

        let _ = WebhookEnvelope::from_request(
            input.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            "body",
            DEFAULT_EXCLUDED_HEADER_PREFIX,
        );

        assert_eq!(input, before);
    }

    #[test]
    fn test_prefix_must_match_from_start() {
        let envelope = WebhookEnvelope::from_request(
            vec![("X-CloudFront-Id", "1"), ("CloudFront", "2")],
            "",
            DEFAULT_EXCLUDED_HEADER_PREFIX,
        );
        assert_eq!(envelope.headers().len(), 2);
    }

    #[test]
    fn test_json_uses_queue_field_names() {
        let envelope =
            WebhookEnvelope::from_request(vec![("X-GitHub-Event", "push")], "{\"x\":1}", "");
        let json = envelope.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Payload"], "{\"x\":1}");
        assert_eq!(value["Headers"]["X-GitHub-Event"], "push");
    }

    #[test]
    fn test_filtered_headers_survive_json() {
        let envelope = WebhookEnvelope::from_request(
            sample_headers(),
            "line one\nline \"two\" \u{e9}",
            DEFAULT_EXCLUDED_HEADER_PREFIX,
        );

        let decoded = WebhookEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.payload(), "line one\nline \"two\" \u{e9}");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = WebhookEnvelope::from_json("not-json").unwrap_err();
        assert!(matches!(err, RelayError::Deserialize(_)));
    }

    #[test]
    fn test_from_json_requires_both_fields() {
        assert!(WebhookEnvelope::from_json("{\"Payload\":\"x\"}").is_err());
        assert!(WebhookEnvelope::from_json("{\"Headers\":{}}").is_err());
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let envelope =
            WebhookEnvelope::from_request(vec![("x-github-event", "pull_request")], "", "");
        assert_eq!(envelope.event(), Some("pull_request"));
        assert_eq!(envelope.header("X-GITHUB-EVENT"), Some("pull_request"));
        assert_eq!(envelope.header("X-Missing"), None);
    }
}
