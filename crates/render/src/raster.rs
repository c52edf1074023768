//! In-memory raster pictures.
//!
//! Ink accumulates as the maximum intensity drawn over each pixel, so
//! overlapping strokes never exceed full ink. Pixel rows follow canvas y
//! (row 0 at y = 0), the same orientation as scalar images.

use std::path::Path;

use flowline_core::error::FlowError;
use flowline_core::image::ScalarImage;
use flowline_core::picture::{LineDrawable, DEFAULT_RESOLUTION};
use glam::DVec2;

/// A [`LineDrawable`] that rasterizes into an ink buffer.
#[derive(Debug, Clone)]
pub struct RasterPicture {
    ink: ScalarImage,
    intensity: f64,
    width: f64,
}

impl RasterPicture {
    /// A blank picture `width` pixels across covering a canvas of the given
    /// aspect (height over width).
    pub fn new(width: usize, aspect: f64) -> Result<Self, FlowError> {
        if aspect.is_nan() || aspect <= 0.0 {
            return Err(FlowError::invalid("aspect", "must be positive"));
        }
        let height = ((width as f64 * aspect).round() as usize).max(1);
        Ok(Self {
            ink: ScalarImage::new(width, height)?,
            intensity: 1.0,
            width: 1.0,
        })
    }

    pub fn width(&self) -> usize {
        self.ink.width()
    }

    pub fn height(&self) -> usize {
        self.ink.height()
    }

    /// Ink per pixel in [0, 1].
    pub fn ink(&self) -> &ScalarImage {
        &self.ink
    }

    pub fn into_ink(self) -> ScalarImage {
        self.ink
    }

    /// Black ink on white, row-major.
    pub fn gray_bytes(&self) -> Vec<u8> {
        self.ink.to_gray_bytes(1.0, 0.0)
    }

    pub fn write_pgm(&self, path: &Path) -> Result<(), FlowError> {
        crate::pgm::write_pgm(&self.ink, 1.0, 0.0, path)
    }

    #[cfg(feature = "png")]
    pub fn write_png(&self, path: &Path) -> Result<(), FlowError> {
        crate::snapshot::write_png(&self.ink, 1.0, 0.0, path)
    }

    fn to_pixels(&self, x: f64, y: f64) -> DVec2 {
        DVec2::new(x, y) * self.ink.width() as f64
    }

    /// Half the stroke width in pixels, never thinner than one pixel across.
    fn half_width(&self) -> f64 {
        let scale = self.ink.width() as f64 / DEFAULT_RESOLUTION as f64;
        (0.5 * self.width * scale).max(0.5)
    }

    fn plot(&mut self, i: usize, j: usize) {
        if self.ink.pixel(i, j) < self.intensity {
            self.ink.set_pixel(i, j, self.intensity);
        }
    }

    /// Pixel index range covering [lo, hi] along an axis of `size` pixels.
    fn span(lo: f64, hi: f64, size: usize) -> std::ops::Range<usize> {
        let a = lo.floor().max(0.0) as usize;
        let b = (hi.ceil().max(0.0) as usize).min(size);
        a..b.max(a)
    }
}

fn segment_distance(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let len2 = ab.length_squared();
    let t = if len2 > 0.0 {
        ((p - a).dot(ab) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    p.distance(a + t * ab)
}

impl LineDrawable for RasterPicture {
    fn line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64) {
        let a = self.to_pixels(x0, y0);
        let b = self.to_pixels(x1, y1);
        let r = self.half_width();
        let (lo, hi) = (a.min(b) - r, a.max(b) + r);
        for j in Self::span(lo.y, hi.y, self.ink.height()) {
            for i in Self::span(lo.x, hi.x, self.ink.width()) {
                let centre = DVec2::new(i as f64 + 0.5, j as f64 + 0.5);
                if segment_distance(centre, a, b) <= r {
                    self.plot(i, j);
                }
            }
        }
    }

    /// Even-odd scanline fill sampled at pixel centres.
    fn polygon(&mut self, points: &[DVec2]) {
        if points.len() < 3 {
            return;
        }
        let pts: Vec<DVec2> = points.iter().map(|p| self.to_pixels(p.x, p.y)).collect();
        let (lo, hi) = pts
            .iter()
            .fold((pts[0], pts[0]), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
        let mut crossings = Vec::new();
        for j in Self::span(lo.y, hi.y, self.ink.height()) {
            let yc = j as f64 + 0.5;
            crossings.clear();
            for k in 0..pts.len() {
                let (a, b) = (pts[k], pts[(k + 1) % pts.len()]);
                if (a.y <= yc) != (b.y <= yc) {
                    crossings.push(a.x + (yc - a.y) / (b.y - a.y) * (b.x - a.x));
                }
            }
            crossings.sort_by(f64::total_cmp);
            for pair in crossings.chunks_exact(2) {
                for i in Self::span(pair[0] - 0.5, pair[1] - 0.5, self.ink.width()) {
                    let xc = i as f64 + 0.5;
                    if xc >= pair[0] && xc <= pair[1] {
                        self.plot(i, j);
                    }
                }
            }
        }
    }

    fn set_intensity(&mut self, value: f64) {
        self.intensity = value.clamp(0.0, 1.0);
    }

    fn set_width(&mut self, width: f64) {
        self.width = width.max(0.0);
    }

    fn resolution(&self) -> usize {
        self.ink.width()
    }
}
