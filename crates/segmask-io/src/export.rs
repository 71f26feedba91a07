//! PNG export of session results.

use std::path::Path;

use segmask_pipeline::decode::encode_png;
use segmask_pipeline::{CompositeState, RgbaImage, SegmentError};

/// Suggested file name for the cut-out of an interactive segmentation.
pub const CUTOUT_FILE_NAME: &str = "segment_object.png";

/// Suggested file name for any other rendered result.
pub const RESULT_FILE_NAME: &str = "result.png";

/// An encoded PNG with its suggested file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Suggested file name.
    pub file_name: &'static str,
    /// PNG bytes.
    pub png: Vec<u8>,
}

impl Export {
    /// The base image restricted to the union mask, transparent elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ImageDecode`] if PNG encoding fails.
    pub fn cutout(composite: &CompositeState) -> Result<Self, SegmentError> {
        Ok(Self {
            file_name: CUTOUT_FILE_NAME,
            png: encode_png(&composite.cutout())?,
        })
    }

    /// The rendered output as-is.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::ImageDecode`] if PNG encoding fails.
    pub fn result(image: &RgbaImage) -> Result<Self, SegmentError> {
        Ok(Self {
            file_name: RESULT_FILE_NAME,
            png: encode_png(image)?,
        })
    }

    /// Write the PNG to `path`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from writing the file.
    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, &self.png).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgba;
    use segmask_pipeline::CoverageMask;
    use segmask_pipeline::decode::decode;

    #[test]
    fn cutout_is_transparent_outside_the_union() {
        let base = RgbaImage::from_pixel(3, 1, Rgba([10, 20, 30, 255]));
        let mut composite = CompositeState::new(base);
        composite.union(&CoverageMask::from_fn(3, 1, |x, _| x == 1));

        let export = Export::cutout(&composite).unwrap();
        assert_eq!(export.file_name, CUTOUT_FILE_NAME);
        let png = decode(&export.png).unwrap();
        assert_eq!(png.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(png.get_pixel(1, 0).0, [10, 20, 30, 255]);
        assert_eq!(png.get_pixel(2, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn result_round_trips_through_png() {
        let image = RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 4]));
        let export = Export::result(&image).unwrap();
        assert_eq!(export.file_name, RESULT_FILE_NAME);
        assert_eq!(decode(&export.png).unwrap(), image);
    }

    #[tokio::test]
    async fn write_to_creates_the_file() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([5, 5, 5, 255]));
        let export = Export::result(&image).unwrap();
        let path = std::env::temp_dir().join(format!("segmask-export-{}.png", std::process::id()));
        export.write_to(&path).await.unwrap();
        let written = tokio::fs::read(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(written, export.png);
    }
}
