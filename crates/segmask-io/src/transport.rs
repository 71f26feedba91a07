//! HTTP transport to the remote inference service.
//!
//! [`Transport`] is the seam between the session and the network: one
//! authenticated POST, answered with a status, a content type and a
//! body. [`HttpTransport`] implements it with `reqwest`; tests swap in
//! in-memory fakes.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

/// Content type of a JSON request body.
pub const JSON: &str = "application/json";

/// Content type of a raw image request body.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// One authenticated POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Endpoint URL.
    pub url: String,
    /// Bearer credential.
    pub token: String,
    /// Content type of `body`.
    pub content_type: &'static str,
    /// Request body.
    pub body: Vec<u8>,
}

/// The service's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Content-Type` header, empty when absent.
    pub content_type: String,
    /// Response body.
    pub body: Vec<u8>,
}

impl TransportReply {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The body as lossy UTF-8, for error messages.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Errors raised before a reply could be read.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP client failed (connection, TLS, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A non-HTTP transport failed.
    #[error("transport failed: {0}")]
    Other(String),
}

/// Sends requests to the remote inference service.
pub trait Transport {
    /// Send `request` and wait for the reply.
    ///
    /// Non-success statuses are returned as replies, not errors.
    fn post(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportReply, TransportError>> + Send;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Default request timeout; cold models can take a while to load.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Build a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportReply, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .bearer_auth(&request.token)
            .header(CONTENT_TYPE, request.content_type)
            .body(request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response.bytes().await?.to_vec();

        Ok(TransportReply {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reply(status: u16) -> TransportReply {
        TransportReply {
            status,
            content_type: JSON.to_owned(),
            body: b"{\"error\":\"loading\"}".to_vec(),
        }
    }

    #[test]
    fn success_is_2xx_only() {
        assert!(reply(200).is_success());
        assert!(reply(204).is_success());
        assert!(!reply(199).is_success());
        assert!(!reply(302).is_success());
        assert!(!reply(503).is_success());
    }

    #[test]
    fn body_text_is_lossy_utf8() {
        assert_eq!(reply(503).body_text(), "{\"error\":\"loading\"}");
        let binary = TransportReply {
            status: 200,
            content_type: String::new(),
            body: vec![0xFF, b'a'],
        };
        assert_eq!(binary.body_text(), "\u{FFFD}a");
    }

    #[test]
    fn http_transport_builds() {
        assert!(HttpTransport::new(HttpTransport::DEFAULT_TIMEOUT).is_ok());
    }

    #[test]
    fn other_error_display() {
        assert_eq!(
            TransportError::Other("socket closed".to_owned()).to_string(),
            "transport failed: socket closed"
        );
    }
}
