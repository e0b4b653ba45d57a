//! Relay client: forwards a queued webhook to the relay target.
//!
//! One POST per envelope, bounded by a timeout, no retries. Every outcome is
//! logged here and reported back as a `RelayOutcome`; nothing is propagated
//! as an error, because the consumer deletes the entry either way.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::{error, info, warn};
use url::Url;

use crate::error::RelayError;
use crate::queue::WebhookEnvelope;

/// Upper bound on how much of a failed response body is logged.
const MAX_LOGGED_BODY: usize = 4096;

/// Headers that describe the original connection rather than the webhook.
/// The HTTP client sets its own values for these.
const TRANSPORT_HEADERS: [&str; 4] = ["host", "content-length", "transfer-encoding", "connection"];

/// Result of one relay attempt.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The target answered `200 OK`.
    Delivered,
    /// The attempt failed; the entry is dropped anyway.
    Failed(RelayError),
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::Delivered)
    }
}

/// HTTP client bound to a single relay target.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: Client,
    target: Url,
    timeout: Duration,
}

impl RelayClient {
    /// Create a client that posts to `target` with a per-request `timeout`.
    ///
    /// reqwest adds `Accept: */*` unless the envelope carries its own `Accept`.
    pub fn new(target: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            target,
            timeout,
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Relay one envelope and log the outcome.
    pub async fn relay(&self, message_id: &str, envelope: &WebhookEnvelope) -> RelayOutcome {
        let event = envelope.event().unwrap_or("unknown");

        match self.send(envelope).await {
            Ok(status) => {
                info!(
                    message_id = %message_id,
                    event = %event,
                    status_code = status.as_u16(),
                    "relay_delivered"
                );
                RelayOutcome::Delivered
            }
            Err(e) => {
                self.log_failure(message_id, event, &e);
                RelayOutcome::Failed(e)
            }
        }
    }

    fn log_failure(&self, message_id: &str, event: &str, err: &RelayError) {
        match err {
            RelayError::RelayStatus { status, body } => error!(
                message_id = %message_id,
                event = %event,
                status_code = *status,
                response_body = %body,
                "relay_rejected"
            ),
            RelayError::RelayTransport(cause) if cause.is_timeout() => error!(
                message_id = %message_id,
                event = %event,
                timeout_seconds = self.timeout.as_secs_f64(),
                error = %cause,
                "relay_timeout"
            ),
            RelayError::RelayTransport(cause) => error!(
                message_id = %message_id,
                event = %event,
                is_connect = cause.is_connect(),
                error = %cause,
                "relay_transport_failed"
            ),
            other => error!(message_id = %message_id, error = %other, "relay_failed"),
        }
    }

    /// POST the envelope, returning the status on `200 OK`.
    async fn send(&self, envelope: &WebhookEnvelope) -> Result<StatusCode, RelayError> {
        let response = self
            .client
            .post(self.target.clone())
            .headers(outbound_headers(envelope))
            .body(envelope.payload().to_string())
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::OK {
            // Drain so the connection can go back to the pool.
            let _ = response.bytes().await;
            Ok(status)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RelayError::RelayStatus {
                status: status.as_u16(),
                body: truncate(body, MAX_LOGGED_BODY),
            })
        }
    }
}

/// Copy the envelope headers, one value per name, skipping anything that is
/// not valid HTTP or is owned by the transport.
fn outbound_headers(envelope: &WebhookEnvelope) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(envelope.headers().len());

    for (name, value) in envelope.headers() {
        if TRANSPORT_HEADERS
            .iter()
            .any(|skip| name.eq_ignore_ascii_case(skip))
        {
            continue;
        }

        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "relay_header_skipped"),
        }
    }

    headers
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn envelope() -> WebhookEnvelope {
        WebhookEnvelope::from_request(
            vec![
                ("X-GitHub-Event", "push"),
                ("Content-Type", "application/json"),
                ("Host", "abc.execute-api.us-east-1.amazonaws.com"),
                ("Content-Length", "7"),
            ],
            "{\"x\":1}",
            "",
        )
    }

    fn client_for(server: &MockServer, timeout: Duration) -> RelayClient {
        let target = Url::parse(&format!("{}/github-webhook/", server.uri())).unwrap();
        RelayClient::new(target, timeout).unwrap()
    }

    #[tokio::test]
    async fn test_relay_delivers_payload_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/github-webhook/"))
            .and(header("X-GitHub-Event", "push"))
            .and(header("Content-Type", "application/json"))
            .and(body_string("{\"x\":1}"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_secs(5))
            .relay("msg-1", &envelope())
            .await;

        assert!(outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_relay_does_not_forward_original_host() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client_for(&server, Duration::from_secs(5))
            .relay("msg-1", &envelope())
            .await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let host = requests[0].headers.get("host").unwrap().to_str().unwrap();
        assert_ne!(host, "abc.execute-api.us-east-1.amazonaws.com");
        assert_eq!(
            requests[0].headers.get("content-length").unwrap().to_str().unwrap(),
            "7"
        );
    }

    #[tokio::test]
    async fn test_relay_sends_only_envelope_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client_for(&server, Duration::from_secs(5))
            .relay("msg-1", &envelope())
            .await;

        let requests = server.received_requests().await.unwrap();
        let mut names: Vec<&str> = requests[0].headers.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            ["accept", "content-length", "content-type", "host", "x-github-event"]
        );
        assert_eq!(requests[0].headers.get("accept").unwrap(), "*/*");
    }

    #[tokio::test]
    async fn test_relay_keeps_envelope_accept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let envelope = WebhookEnvelope::from_request(
            vec![("Accept", "application/json"), ("X-GitHub-Event", "ping")],
            "{}",
            "",
        );
        let outcome = client_for(&server, Duration::from_secs(5))
            .relay("msg-1", &envelope)
            .await;

        assert!(outcome.is_delivered());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get_all("accept").iter().count(), 1);
    }

    #[tokio::test]
    async fn test_relay_reports_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_secs(5))
            .relay("msg-2", &envelope())
            .await;

        match outcome {
            RelayOutcome::Failed(RelayError::RelayStatus { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "bad request");
            }
            other => panic!("Expected status failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relay_treats_other_success_codes_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_secs(5))
            .relay("msg-3", &envelope())
            .await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed(RelayError::RelayStatus { status: 204, .. })
        ));
    }

    #[tokio::test]
    async fn test_relay_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let outcome = client_for(&server, Duration::from_millis(100))
            .relay("msg-4", &envelope())
            .await;

        match outcome {
            RelayOutcome::Failed(RelayError::RelayTransport(e)) => assert!(e.is_timeout()),
            other => panic!("Expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relay_connection_refused() {
        // Bind and immediately drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = Url::parse(&format!("http://127.0.0.1:{port}/hook")).unwrap();
        let client = RelayClient::new(target, Duration::from_secs(1)).unwrap();

        let outcome = client.relay("msg-5", &envelope()).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed(RelayError::RelayTransport(_))
        ));
    }

    #[test]
    fn test_outbound_headers_skip_invalid() {
        let envelope = WebhookEnvelope::from_request(
            vec![("bad header", "x"), ("X-Ok", "fine"), ("X-Bad-Value", "a\nb")],
            "",
            "",
        );

        let headers = outbound_headers(&envelope);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-ok").unwrap(), "fine");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short".to_string(), 10), "short");
        assert_eq!(truncate("abcdef".to_string(), 3), "abc");
        assert_eq!(truncate("\u{e9}\u{e9}".to_string(), 3), "\u{e9}");
    }
}
