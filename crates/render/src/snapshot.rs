//! PNG output of scalar images.
//!
//! Feature-gated behind `png` (default on). The quantization is shared with
//! the PGM writer through `ScalarImage::to_gray_bytes`.

use std::path::Path;

use flowline_core::error::FlowError;
use flowline_core::image::ScalarImage;
use tracing::debug;

/// Writes `image` as an 8-bit grayscale PNG quantized over [min, max]
/// (both 0 means auto-range).
///
/// Returns `FlowError::InvalidDimensions` if the image dimensions overflow
/// `u32`, or `FlowError::Io` on write failure.
pub fn write_png(image: &ScalarImage, min: f64, max: f64, path: &Path) -> Result<(), FlowError> {
    let w = u32::try_from(image.width()).map_err(|_| FlowError::InvalidDimensions)?;
    let h = u32::try_from(image.height()).map_err(|_| FlowError::InvalidDimensions)?;
    let img = image::GrayImage::from_raw(w, h, image.to_gray_bytes(min, max))
        .ok_or_else(|| FlowError::Io("gray buffer size mismatch".into()))?;
    img.save(path).map_err(|e| FlowError::Io(e.to_string()))?;
    debug!(path = %path.display(), width = w, height = h, "wrote png");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_png_round_trip() {
        let img = ScalarImage::from_data(3, 2, vec![0.0, 0.5, 1.0, 1.0, 0.5, 0.0]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.png");

        write_png(&img, 0.0, 1.0, &path).unwrap();

        let back = image::open(&path).unwrap().to_luma8();
        assert_eq!(back.width(), 3);
        assert_eq!(back.height(), 2);
        assert_eq!(back.get_pixel(0, 0).0[0], 0);
        assert_eq!(back.get_pixel(2, 0).0[0], 255);
        assert_eq!(back.get_pixel(2, 1).0[0], 0);
    }
}
