//! Mask payload decoding.
//!
//! Remote services describe masks in several encodings. [`MaskPayload`]
//! names each one explicitly and [`decode`] is the single place that
//! turns any of them into a [`CoverageMask`] at a requested resolution.
//!
//! JSON recognition in [`MaskPayload::from_json`] tries the shapes in a
//! fixed order:
//!
//! 1. `{"rle": [value, count, ...], "size": [width, height]}`
//! 2. `{"png": "<base64>"}`
//! 3. `{"data": "<data URI or base64>"}` or `{"data": [[...], ...]}`
//! 4. a bare base64 / data-URI string
//! 5. a bare array of rows
//!
//! Anything else is [`SegmentError::UnsupportedFormat`].

use serde_json::Value;

use crate::coverage::CoverageMask;
use crate::decode::decode_data_uri;
use crate::types::{Dimensions, SegmentError};

/// One run of identical coverage in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Whether the run's pixels are covered.
    pub covered: bool,
    /// Number of pixels in the run.
    pub count: u32,
}

/// A mask in one of the recognized encodings, at its native resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskPayload {
    /// Alternating runs over a `width × height` raster.
    RunLength {
        /// Runs in row-major order.
        runs: Vec<Run>,
        /// Raster width.
        width: u32,
        /// Raster height.
        height: u32,
    },
    /// An embedded image, as a data URI or bare base64 string. A pixel is
    /// covered when its alpha is nonzero or its red channel exceeds 127.
    Bitmap(String),
    /// Rows of booleans, top to bottom.
    Grid(Vec<Vec<bool>>),
}

impl MaskPayload {
    /// Recognize a JSON mask description.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::UnsupportedFormat`] if `value` matches none
    /// of the recognized shapes.
    pub fn from_json(value: &Value) -> Result<Self, SegmentError> {
        if let (Some(rle), Some(size)) = (value.get("rle"), value.get("size")) {
            return run_length_from_json(rle, size);
        }
        if let Some(Value::String(png)) = value.get("png") {
            return Ok(Self::Bitmap(png.clone()));
        }
        match value.get("data") {
            Some(Value::String(data)) => return Ok(Self::Bitmap(data.clone())),
            Some(rows @ Value::Array(_)) => return grid_from_json(rows),
            _ => {}
        }
        match value {
            Value::String(s) => Ok(Self::Bitmap(s.clone())),
            Value::Array(_) => grid_from_json(value),
            _ => Err(SegmentError::UnsupportedFormat(describe(value))),
        }
    }

    /// Run-length encode a coverage mask, merging adjacent equal runs.
    #[must_use]
    pub fn run_length_from(mask: &CoverageMask) -> Self {
        let mut runs: Vec<Run> = Vec::new();
        for &v in mask.as_gray().as_raw() {
            let covered = v != 0;
            match runs.last_mut() {
                Some(run) if run.covered == covered => run.count += 1,
                _ => runs.push(Run { covered, count: 1 }),
            }
        }
        Self::RunLength {
            runs,
            width: mask.width(),
            height: mask.height(),
        }
    }
}

/// Decode `payload` and resample it to `target` with nearest-neighbor
/// sampling.
///
/// # Errors
///
/// See [`decode_native`].
pub fn decode(payload: &MaskPayload, target: Dimensions) -> Result<CoverageMask, SegmentError> {
    Ok(decode_native(payload)?.resized(target))
}

/// Decode `payload` at its native resolution.
///
/// Runs that overflow the raster are truncated and a short run list
/// leaves the remainder uncovered. Grid rows shorter than the first row
/// are padded with uncovered pixels.
///
/// # Errors
///
/// Returns [`SegmentError::UnsupportedFormat`] for empty rasters or
/// invalid base64, and [`SegmentError::ImageDecode`] when an embedded
/// bitmap cannot be decoded.
pub fn decode_native(payload: &MaskPayload) -> Result<CoverageMask, SegmentError> {
    match payload {
        MaskPayload::RunLength {
            runs,
            width,
            height,
        } => {
            if *width == 0 || *height == 0 {
                return Err(SegmentError::UnsupportedFormat(format!(
                    "run-length mask has empty size {width}x{height}",
                )));
            }
            let mut mask = CoverageMask::new(*width, *height);
            let total = u64::from(*width) * u64::from(*height);
            let mut index = 0u64;
            for run in runs {
                let end = (index + u64::from(run.count)).min(total);
                if run.covered {
                    for i in index..end {
                        mask.set(
                            u32::try_from(i % u64::from(*width)).unwrap_or(u32::MAX),
                            u32::try_from(i / u64::from(*width)).unwrap_or(u32::MAX),
                            true,
                        );
                    }
                }
                index = end;
                if index >= total {
                    break;
                }
            }
            Ok(mask)
        }
        MaskPayload::Bitmap(data) => Ok(CoverageMask::from_rgba(&decode_data_uri(data)?)),
        MaskPayload::Grid(rows) => {
            let width = rows.first().map_or(0, Vec::len);
            if width == 0 {
                return Err(SegmentError::UnsupportedFormat(
                    "grid mask has no columns".to_owned(),
                ));
            }
            let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(rows.len())) else {
                return Err(SegmentError::UnsupportedFormat(
                    "grid mask is too large".to_owned(),
                ));
            };
            Ok(CoverageMask::from_fn(w, h, |x, y| {
                rows[y as usize].get(x as usize).copied().unwrap_or(false)
            }))
        }
    }
}

fn run_length_from_json(rle: &Value, size: &Value) -> Result<MaskPayload, SegmentError> {
    let dimension = |i: usize| {
        size.get(i)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                SegmentError::UnsupportedFormat(format!("run-length size is not [width, height]: {size}"))
            })
    };
    let (width, height) = (dimension(0)?, dimension(1)?);

    let Value::Array(values) = rle else {
        return Err(SegmentError::UnsupportedFormat(
            "run-length data is not an array".to_owned(),
        ));
    };
    let runs = values
        .chunks_exact(2)
        .map(|pair| {
            let count = pair[1]
                .as_u64()
                .ok_or_else(|| {
                    SegmentError::UnsupportedFormat(format!("invalid run count: {}", pair[1]))
                })?;
            Ok(Run {
                covered: truthy(&pair[0]),
                count: u32::try_from(count).unwrap_or(u32::MAX),
            })
        })
        .collect::<Result<Vec<_>, SegmentError>>()?;

    Ok(MaskPayload::RunLength {
        runs,
        width,
        height,
    })
}

fn grid_from_json(rows: &Value) -> Result<MaskPayload, SegmentError> {
    let Value::Array(rows) = rows else {
        return Err(SegmentError::UnsupportedFormat(describe(rows)));
    };
    rows.iter()
        .map(|row| match row {
            Value::Array(cells) => Ok(cells.iter().map(truthy).collect()),
            other => Err(SegmentError::UnsupportedFormat(format!(
                "grid row is not an array: {}",
                describe(other)
            ))),
        })
        .collect::<Result<Vec<Vec<bool>>, SegmentError>>()
        .map(MaskPayload::Grid)
}

/// Loose JSON truthiness: `false`, `null`, `0` and `""` are falsy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(_) => "boolean".to_owned(),
        Value::Number(_) => "number".to_owned(),
        Value::String(_) => "string".to_owned(),
        Value::Array(_) => "array".to_owned(),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
    }
}
