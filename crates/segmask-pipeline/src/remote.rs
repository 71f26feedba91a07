//! Remote segmentation payloads, without the transport.
//!
//! Builds the JSON request for a point-prompted segmentation service and
//! interprets its response. The network round trip lives in `segmask-io`;
//! everything here is pure so it can be tested against canned bodies.
//!
//! A response is either a raw image or a JSON collection of candidates.
//! With exactly one seed a raw image is read as the mask itself and the
//! best candidate is chosen by [`select_best`]; otherwise a raw image is
//! shown as-is and every candidate is kept as a separate region.

use image::RgbaImage;
use serde::Serialize;
use serde_json::Value;

use crate::coverage::CoverageMask;
use crate::decode::decode;
use crate::downsample::map_point;
use crate::mask_decode::{self, MaskPayload};
use crate::types::{Dimensions, PromptPoint, ScoreWeights, SegmentError};

/// JSON body sent to the segmentation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationRequest {
    /// Image and optional point prompt.
    pub inputs: RequestInputs,
    /// Service options.
    pub options: RequestOptions,
}

/// The `inputs` object of a [`SegmentationRequest`].
///
/// Points are sent twice, as parallel top-level arrays and inside a
/// nested `prompt`, since services disagree on which one they read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestInputs {
    /// Image as a data URI.
    pub image: String,
    /// `[x, y]` pairs in original pixel space.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_coords: Option<Vec<[u32; 2]>>,
    /// 1 for include, 0 for exclude, parallel to `point_coords`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_labels: Option<Vec<u8>>,
    /// The same points again, nested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PointPrompt>,
}

/// Nested point prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointPrompt {
    /// `[x, y]` pairs.
    pub points: Vec<[u32; 2]>,
    /// Labels parallel to `points`.
    pub labels: Vec<u8>,
}

/// The `options` object of a [`SegmentationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestOptions {
    /// Ask the service to wait for a cold model instead of failing.
    pub wait_for_model: bool,
}

impl SegmentationRequest {
    /// Build a request for `image_data_uri` with optional `seeds`.
    #[must_use]
    pub fn new(image_data_uri: String, seeds: &[PromptPoint]) -> Self {
        let (point_coords, point_labels, prompt) = if seeds.is_empty() {
            (None, None, None)
        } else {
            let points: Vec<[u32; 2]> = seeds.iter().map(|p| [p.x, p.y]).collect();
            let labels: Vec<u8> = seeds.iter().map(|p| p.label()).collect();
            (
                Some(points.clone()),
                Some(labels.clone()),
                Some(PointPrompt { points, labels }),
            )
        };
        Self {
            inputs: RequestInputs {
                image: image_data_uri,
                point_coords,
                point_labels,
                prompt,
            },
            options: RequestOptions {
                wait_for_model: true,
            },
        }
    }

    /// Serialize to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::RemoteService`] if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SegmentError> {
        serde_json::to_vec(self)
            .map_err(|e| SegmentError::RemoteService(format!("failed to encode request: {e}")))
    }
}

/// One candidate mask from a JSON response.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskCandidate {
    /// The mask in whatever encoding the service used.
    pub payload: MaskPayload,
    /// The service's confidence, if reported.
    pub score: Option<f64>,
}

impl MaskCandidate {
    /// Recognize one entry of a response collection.
    ///
    /// The mask may sit directly in the entry or under a `mask` key with
    /// a sibling `score`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::UnsupportedFormat`] if no mask encoding is
    /// recognized.
    pub fn from_json(entry: &Value) -> Result<Self, SegmentError> {
        let mask = entry.get("mask").unwrap_or(entry);
        Ok(Self {
            payload: MaskPayload::from_json(mask)?,
            score: entry.get("score").and_then(Value::as_f64),
        })
    }
}

/// A parsed segmentation response.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResponse {
    /// The service answered with an image; the whole image is the mask.
    Image(RgbaImage),
    /// The service answered with a JSON collection.
    Candidates {
        /// Recognized candidates, in response order.
        candidates: Vec<MaskCandidate>,
        /// Entries skipped because no mask encoding was recognized.
        skipped: usize,
    },
}

/// What a segmentation response means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteSegmentation {
    /// A rendered image to show as-is, with no coverage bookkeeping.
    Rendered(RgbaImage),
    /// The best candidate for a single-seed request.
    Selected(CoverageMask),
    /// Every usable candidate, each as its own region.
    Regions(Vec<CoverageMask>),
}

impl RemoteSegmentation {
    /// Union of every mask in the result, or `None` for a rendered image.
    #[must_use]
    pub fn union(&self) -> Option<CoverageMask> {
        match self {
            Self::Rendered(_) => None,
            Self::Selected(mask) => Some(mask.clone()),
            Self::Regions(masks) => {
                let mut iter = masks.iter();
                let mut union = iter.next()?.clone();
                for mask in iter {
                    union.union_with(mask);
                }
                Some(union)
            }
        }
    }
}

/// Parse a response body according to its content type.
///
/// # Errors
///
/// Returns [`SegmentError::ImageDecode`] for an undecodable image body,
/// [`SegmentError::RemoteService`] for malformed JSON, and
/// [`SegmentError::NoCandidates`] when the collection is empty or
/// missing.
pub fn parse_response(content_type: &str, body: &[u8]) -> Result<RemoteResponse, SegmentError> {
    if content_type.trim_start().starts_with("image/") {
        return Ok(RemoteResponse::Image(decode(body)?));
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| SegmentError::RemoteService(format!("malformed JSON response: {e}")))?;

    let collection = value
        .get("masks")
        .or_else(|| value.get("segments"))
        .unwrap_or(&value);
    let Value::Array(entries) = collection else {
        return Err(SegmentError::NoCandidates);
    };

    let mut candidates = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match MaskCandidate::from_json(entry) {
            Ok(candidate) => candidates.push(candidate),
            Err(_) => skipped += 1,
        }
    }
    if candidates.is_empty() {
        return Err(SegmentError::NoCandidates);
    }
    Ok(RemoteResponse::Candidates {
        candidates,
        skipped,
    })
}

/// Turn a parsed response into masks at `source` resolution.
///
/// # Errors
///
/// Returns [`SegmentError::NoCandidates`] if no candidate decodes.
pub fn interpret(
    response: RemoteResponse,
    seeds: &[PromptPoint],
    source: Dimensions,
    weights: ScoreWeights,
) -> Result<RemoteSegmentation, SegmentError> {
    let candidates = match response {
        RemoteResponse::Image(image) if seeds.len() == 1 => {
            let mask = CoverageMask::from_rgba(&image).resized(source);
            return Ok(RemoteSegmentation::Selected(mask));
        }
        RemoteResponse::Image(image) => return Ok(RemoteSegmentation::Rendered(image)),
        RemoteResponse::Candidates { candidates, .. } => candidates,
    };

    if let [seed] = seeds {
        return select_best(&candidates, *seed, source, weights).map(RemoteSegmentation::Selected);
    }

    let regions: Vec<CoverageMask> = candidates
        .iter()
        .filter_map(|c| mask_decode::decode(&c.payload, source).ok())
        .collect();
    if regions.is_empty() {
        return Err(SegmentError::NoCandidates);
    }
    Ok(RemoteSegmentation::Regions(regions))
}

/// Score of a decoded candidate for a single seed.
///
/// Seed coverage dominates, then the service's confidence, then area.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn candidate_score(
    mask: &CoverageMask,
    score: Option<f64>,
    seed: PromptPoint,
    source: Dimensions,
    weights: ScoreWeights,
) -> f64 {
    let native = map_point(seed, source, mask.dimensions());
    let bonus = if mask.is_covered(native.x, native.y) {
        weights.coverage_bonus
    } else {
        0.0
    };
    weights
        .area_weight
        .mul_add(mask.covered_count() as f64, score.unwrap_or(0.0) + bonus)
}

/// Pick the highest-scoring candidate for `seed`, resized to `source`.
///
/// Candidates that fail to decode are ignored; the first of equally
/// scored candidates wins.
///
/// # Errors
///
/// Returns [`SegmentError::NoCandidates`] if no candidate decodes.
pub fn select_best(
    candidates: &[MaskCandidate],
    seed: PromptPoint,
    source: Dimensions,
    weights: ScoreWeights,
) -> Result<CoverageMask, SegmentError> {
    let mut best: Option<(f64, CoverageMask)> = None;
    for candidate in candidates {
        let Ok(mask) = mask_decode::decode_native(&candidate.payload) else {
            continue;
        };
        let score = candidate_score(&mask, candidate.score, seed, source, weights);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, mask));
        }
    }
    best.map(|(_, mask)| mask.resized(source))
        .ok_or(SegmentError::NoCandidates)
}
