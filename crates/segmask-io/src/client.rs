//! Remote inference client.
//!
//! Wraps a [`Transport`] with the two endpoints the session talks to:
//! super-resolution enhancement (raw image bytes in, image bytes out) and
//! point-prompted segmentation (JSON in, image or JSON mask collection
//! out). Response interpretation is delegated to `segmask-pipeline`.

use segmask_pipeline::decode::{decode, to_data_uri};
use segmask_pipeline::{
    Dimensions, PromptPoint, RemoteSegmentation, RgbaImage, ScoreWeights, SegmentError,
    SegmentationRequest, remote,
};
use serde_json::Value;

use crate::session::SessionError;
use crate::transport::{JSON, OCTET_STREAM, Transport, TransportReply, TransportRequest};

/// Endpoint URLs of the remote inference service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Super-resolution model.
    pub enhance_url: String,
    /// Point-prompted segmentation model.
    pub segment_url: String,
}

impl Endpoints {
    /// Hosted Swin2SR ×4 super-resolution model.
    pub const DEFAULT_ENHANCE_URL: &str =
        "https://api-inference.huggingface.co/models/caidas/swin2sr-classical-sr-x4-64";
    /// Hosted SAM 2 segmentation model.
    pub const DEFAULT_SEGMENT_URL: &str =
        "https://api-inference.huggingface.co/models/facebook/sam2-hiera-large";
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            enhance_url: Self::DEFAULT_ENHANCE_URL.to_owned(),
            segment_url: Self::DEFAULT_SEGMENT_URL.to_owned(),
        }
    }
}

/// Client for the remote inference service.
#[derive(Debug, Clone)]
pub struct RemoteClient<T> {
    transport: T,
    endpoints: Endpoints,
}

impl<T: Transport> RemoteClient<T> {
    /// Create a client over `transport`.
    #[must_use]
    pub const fn new(transport: T, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// The configured endpoints.
    #[must_use]
    pub const fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Send the encoded input image to the enhancement endpoint and
    /// decode the returned image.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the request fails,
    /// [`SegmentError::RemoteService`] for a non-success status, and
    /// decode errors for an unreadable reply body.
    pub async fn enhance(&self, token: &str, image_bytes: &[u8]) -> Result<RgbaImage, SessionError> {
        let reply = self
            .transport
            .post(TransportRequest {
                url: self.endpoints.enhance_url.clone(),
                token: token.to_owned(),
                content_type: OCTET_STREAM,
                body: image_bytes.to_vec(),
            })
            .await?;
        let reply = check_status(reply)?;
        Ok(decode(&reply.body)?)
    }

    /// Request masks for the encoded input image, prompted by `seeds`.
    ///
    /// With exactly one seed the best-scoring candidate is returned;
    /// otherwise every usable candidate is returned as its own region.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the request fails,
    /// [`SegmentError::RemoteService`] for a non-success status or a
    /// malformed body, and [`SegmentError::NoCandidates`] if nothing in
    /// the response decodes.
    pub async fn request_mask(
        &self,
        token: &str,
        image_bytes: &[u8],
        source: Dimensions,
        seeds: &[PromptPoint],
        weights: ScoreWeights,
    ) -> Result<RemoteSegmentation, SessionError> {
        let request = SegmentationRequest::new(to_data_uri(image_bytes), seeds);
        let reply = self
            .transport
            .post(TransportRequest {
                url: self.endpoints.segment_url.clone(),
                token: token.to_owned(),
                content_type: JSON,
                body: request.to_json_bytes()?,
            })
            .await?;
        let reply = check_status(reply)?;

        let response = remote::parse_response(&reply.content_type, &reply.body)?;
        if let remote::RemoteResponse::Candidates { skipped, .. } = &response
            && *skipped > 0
        {
            tracing::debug!(skipped, "ignored mask candidates in an unrecognized format");
        }
        Ok(remote::interpret(response, seeds, source, weights)?)
    }
}

/// Turn a non-success reply into [`SegmentError::RemoteService`].
fn check_status(reply: TransportReply) -> Result<TransportReply, SegmentError> {
    if reply.is_success() {
        return Ok(reply);
    }
    Err(SegmentError::RemoteService(format!(
        "{} {}",
        reply.status,
        error_detail(&reply)
    )))
}

/// The `error` field of a JSON error body, else the raw body text.
fn error_detail(reply: &TransportReply) -> String {
    serde_json::from_slice::<Value>(&reply.body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| reply.body_text())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use segmask_pipeline::decode::encode_png;
    use std::sync::Mutex;

    /// Replays one canned reply and records the request it was sent.
    struct CannedTransport {
        reply: TransportReply,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl CannedTransport {
        fn new(status: u16, content_type: &str, body: &[u8]) -> Self {
            Self {
                reply: TransportReply {
                    status,
                    content_type: content_type.to_owned(),
                    body: body.to_vec(),
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for CannedTransport {
        async fn post(&self, request: TransportRequest) -> Result<TransportReply, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    fn png(w: u32, h: u32) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(w, h, image::Rgba([9, 9, 9, 255]))).unwrap()
    }

    #[tokio::test]
    async fn enhance_posts_raw_bytes_with_token() {
        let client = RemoteClient::new(
            CannedTransport::new(200, "image/png", &png(8, 8)),
            Endpoints::default(),
        );
        let input = png(2, 2);
        let out = client.enhance("hf_secret", &input).await.unwrap();
        assert_eq!(out.dimensions(), (8, 8));

        let seen = client.transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, Endpoints::DEFAULT_ENHANCE_URL);
        assert_eq!(seen[0].token, "hf_secret");
        assert_eq!(seen[0].content_type, OCTET_STREAM);
        assert_eq!(seen[0].body, input);
    }

    #[tokio::test]
    async fn failure_status_is_remote_service_error() {
        let client = RemoteClient::new(
            CannedTransport::new(503, JSON, br#"{"error":"Model is loading"}"#),
            Endpoints::default(),
        );
        let err = client.enhance("t", &png(1, 1)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "remote service error: 503 Model is loading"
        );
    }

    #[tokio::test]
    async fn segment_request_carries_data_uri_and_points() {
        let body = br#"[{"mask": [[1, 0], [0, 0]], "score": 0.4}]"#;
        let client = RemoteClient::new(CannedTransport::new(200, JSON, body), Endpoints::default());
        let seeds = [PromptPoint::include(0, 0)];
        let result = client
            .request_mask(
                "t",
                &png(4, 4),
                Dimensions::new(4, 4),
                &seeds,
                ScoreWeights::default(),
            )
            .await
            .unwrap();
        let RemoteSegmentation::Selected(mask) = result else {
            unreachable!("a single seed selects one candidate");
        };
        assert_eq!(mask.covered_count(), 4);

        let seen = client.transport.seen.lock().unwrap();
        assert_eq!(seen[0].content_type, JSON);
        let sent: Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert!(
            sent["inputs"]["image"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
        assert_eq!(sent["inputs"]["point_coords"], serde_json::json!([[0, 0]]));
        assert_eq!(sent["options"]["wait_for_model"], Value::Bool(true));
    }

    #[tokio::test]
    async fn empty_collection_is_no_candidates() {
        let client = RemoteClient::new(CannedTransport::new(200, JSON, b"[]"), Endpoints::default());
        let err = client
            .request_mask("t", &png(2, 2), Dimensions::new(2, 2), &[], ScoreWeights::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Segment(SegmentError::NoCandidates)));
    }

    #[test]
    fn error_detail_falls_back_to_body_text() {
        let reply = TransportReply {
            status: 500,
            content_type: "text/plain".to_owned(),
            body: b"upstream exploded".to_vec(),
        };
        assert_eq!(error_detail(&reply), "upstream exploded");
    }
}
