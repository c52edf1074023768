//! Binary PGM (P5) output of scalar images.

use std::path::Path;

use flowline_core::error::FlowError;
use flowline_core::image::ScalarImage;
use tracing::debug;

/// Encodes `image` as a binary PGM, quantized over [min, max].
///
/// When both bounds are 0 the image's own range is used. Passing the
/// bounds reversed inverts the gray scale.
pub fn encode_pgm(image: &ScalarImage, min: f64, max: f64) -> Vec<u8> {
    let header = format!("P5\n{} {}\n255\n", image.width(), image.height());
    let mut out = Vec::with_capacity(header.len() + image.data().len());
    out.extend_from_slice(header.as_bytes());
    out.extend(image.to_gray_bytes(min, max));
    out
}

/// Writes `image` as a binary PGM file.
///
/// Returns `FlowError::Io` on write failure.
pub fn write_pgm(image: &ScalarImage, min: f64, max: f64, path: &Path) -> Result<(), FlowError> {
    std::fs::write(path, encode_pgm(image, min, max))
        .map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), width = image.width(), height = image.height(), "wrote pgm");
    Ok(())
}
