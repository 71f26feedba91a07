//! Image decoding and encoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the RGBA
//! pixel buffer every other stage consumes. Also handles the data-URI
//! and PNG encodings used to exchange images with the remote service.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageEncoder, RgbaImage};

use crate::types::SegmentError;

/// MIME type assumed when the input format cannot be sniffed.
pub const FALLBACK_MIME: &str = "image/png";

/// Decode raw image bytes into an RGBA pixel buffer.
///
/// Supports whatever the `image` crate was built to decode.
///
/// # Errors
///
/// Returns [`SegmentError::EmptyInput`] if `bytes` is empty.
/// Returns [`SegmentError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, SegmentError> {
    if bytes.is_empty() {
        return Err(SegmentError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgba8())
}

/// Strip an optional `data:<mime>;base64,` prefix and decode the base64
/// body into raw bytes.
///
/// # Errors
///
/// Returns [`SegmentError::UnsupportedFormat`] if the body is not valid
/// base64.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, SegmentError> {
    let body = match payload.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => payload,
    };
    BASE64
        .decode(body.trim())
        .map_err(|e| SegmentError::UnsupportedFormat(format!("invalid base64 payload: {e}")))
}

/// Decode an image carried as a data URI or bare base64 string.
///
/// # Errors
///
/// Returns [`SegmentError::UnsupportedFormat`] for invalid base64 and
/// the errors of [`decode`] for the embedded image.
pub fn decode_data_uri(payload: &str) -> Result<RgbaImage, SegmentError> {
    decode(&decode_base64_payload(payload)?)
}

/// Encode an RGBA image as PNG bytes.
///
/// # Errors
///
/// Returns [`SegmentError::ImageDecode`] if the encoder fails.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, SegmentError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buf)
}

/// MIME type of encoded image bytes, sniffed from their magic number.
#[must_use]
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes).map_or(FALLBACK_MIME, |format| format.to_mime_type())
}

/// Wrap encoded image bytes in a `data:<mime>;base64,` URI.
#[must_use]
pub fn to_data_uri(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), BASE64.encode(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        encode_png(img).unwrap()
    }

    #[test]
    fn empty_input_returns_error() {
        let result = decode(&[]);
        assert!(matches!(result, Err(SegmentError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(SegmentError::ImageDecode(_))));
    }

    #[test]
    fn valid_png_decodes_with_pixels_intact() {
        let img = RgbaImage::from_fn(17, 31, |x, y| {
            image::Rgba([(x * 7) as u8, (y * 3) as u8, 32, 255])
        });
        let decoded = decode(&png_bytes(&img)).unwrap();
        assert_eq!(decoded.dimensions(), (17, 31));
        assert_eq!(decoded, img);
    }

    #[test]
    fn data_uri_decodes_with_and_without_prefix() {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 40]));
        let uri = to_data_uri(&png_bytes(&img));
        assert!(uri.starts_with("data:image/png;base64,"));

        assert_eq!(decode_data_uri(&uri).unwrap(), img);
        let bare = uri.split_once(',').unwrap().1;
        assert_eq!(decode_data_uri(bare).unwrap(), img);
    }

    #[test]
    fn invalid_base64_is_unsupported_format() {
        let result = decode_data_uri("data:image/png;base64,@@not base64@@");
        assert!(matches!(result, Err(SegmentError::UnsupportedFormat(_))));
    }

    #[test]
    fn unknown_bytes_fall_back_to_png_mime() {
        assert_eq!(sniff_mime(b"definitely not an image"), FALLBACK_MIME);
    }
}
