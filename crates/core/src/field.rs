//! Sampled 2D vector field with bilinear lookup and single-step integration.
//!
//! The field covers x in [0, 1] and y in [0, aspect] with `aspect = height /
//! width`. Grid sample (i, j) sits at `(i / (width - 1), j / (height - 1) *
//! aspect)`, so the outermost samples lie exactly on the canvas border.

use std::path::Path;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::field_source::FieldSource;
use crate::fileio;
use crate::image::{grid_cell, ScalarImage};

/// Step rule used by [`VectorField::integrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrator {
    /// One sample at the start point.
    Euler,
    /// Sample, half step, resample, full step from the start.
    #[default]
    Midpoint,
}

/// A width x height grid of (vx, vy) samples.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    width: usize,
    height: usize,
    data: Vec<DVec2>,
    integrator: Integrator,
}

impl VectorField {
    /// Creates a zero field.
    ///
    /// Returns `FlowError::InvalidDimensions` if either dimension is zero
    /// or if `width * height` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Result<Self, FlowError> {
        if width == 0 || height == 0 {
            return Err(FlowError::InvalidDimensions);
        }
        let len = width
            .checked_mul(height)
            .ok_or(FlowError::InvalidDimensions)?;
        Ok(Self {
            width,
            height,
            data: vec![DVec2::ZERO; len],
            integrator: Integrator::default(),
        })
    }

    /// Samples `f(x, y)` at every grid position (normalized coordinates).
    pub fn from_fn(
        width: usize,
        height: usize,
        f: impl Fn(f64, f64) -> (f64, f64),
    ) -> Result<Self, FlowError> {
        let mut field = Self::new(width, height)?;
        let aspect = field.aspect();
        let sx = (width.max(2) - 1) as f64;
        let sy = (height.max(2) - 1) as f64;
        for j in 0..height {
            for i in 0..width {
                let (vx, vy) = f(i as f64 / sx, j as f64 / sy * aspect);
                field.data[j * width + i] = DVec2::new(vx, vy);
            }
        }
        Ok(field)
    }

    /// Samples a synthetic [`FieldSource`] on the grid.
    pub fn from_source(width: usize, height: usize, source: &dyn FieldSource) -> Result<Self, FlowError> {
        Self::from_fn(width, height, |x, y| source.sample(x, y))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `height / width`; the canvas is [0, 1] x [0, aspect].
    pub fn aspect(&self) -> f64 {
        self.height as f64 / self.width as f64
    }

    pub fn integrator(&self) -> Integrator {
        self.integrator
    }

    pub fn set_integrator(&mut self, integrator: Integrator) {
        self.integrator = integrator;
    }

    /// Grid sample at column `i`, row `j`.
    pub fn vector(&self, i: usize, j: usize) -> DVec2 {
        self.data[j * self.width + i]
    }

    pub fn set_vector(&mut self, i: usize, j: usize, v: DVec2) {
        self.data[j * self.width + i] = v;
    }

    /// True when (x, y) lies on the canvas, borders included.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=1.0).contains(&x) && (0.0..=self.aspect()).contains(&y)
    }

    /// Bilinear vector at (x, y); zero off the canvas.
    pub fn value_at(&self, x: f64, y: f64) -> DVec2 {
        if !self.contains(x, y) {
            return DVec2::ZERO;
        }
        let (i0, i1, fx) = grid_cell(x, self.width);
        let (j0, j1, fy) = grid_cell(y / self.aspect(), self.height);
        let v00 = self.vector(i0, j0);
        let v01 = self.vector(i1, j0);
        let v10 = self.vector(i0, j1);
        let v11 = self.vector(i1, j1);
        let v0 = v00.lerp(v01, fx);
        let v1 = v10.lerp(v11, fx);
        v0.lerp(v1, fy)
    }

    /// Vector at (x, y), optionally scaled to unit length, with the magnitude
    /// it had before scaling.
    pub fn sample(&self, x: f64, y: f64, normalize: bool) -> (DVec2, f64) {
        let v = self.value_at(x, y);
        let len = v.length();
        if normalize && len != 0.0 {
            (v / len, len)
        } else {
            (v, len)
        }
    }

    /// One integration step of size `delta` from `p`.
    ///
    /// Returns the new position and the field magnitude seen by the step. A
    /// magnitude of 0 means the field vanished (or `p` left the canvas) and
    /// tracing should stop.
    pub fn integrate(&self, p: DVec2, delta: f64, normalize: bool) -> (DVec2, f64) {
        match self.integrator {
            Integrator::Euler => {
                let (v, len) = self.sample(p.x, p.y, normalize);
                (p + delta * v, len)
            }
            Integrator::Midpoint => {
                let (v, _) = self.sample(p.x, p.y, normalize);
                let half = p + 0.5 * delta * v;
                let (v, len) = self.sample(half.x, half.y, normalize);
                (p + delta * v, len)
            }
        }
    }

    /// Scales every non-zero vector to unit length.
    pub fn normalize(&mut self) {
        for v in &mut self.data {
            let len = v.length();
            if len != 0.0 {
                *v /= len;
            }
        }
    }

    /// Per-sample vector length.
    pub fn magnitude(&self) -> ScalarImage {
        let data = self.data.iter().map(|v| v.length()).collect();
        ScalarImage::from_raw(self.width, self.height, data)
    }

    /// Curl of the field resampled onto an `xs` x `ys` image.
    pub fn vorticity(&self, xs: usize, ys: usize) -> Result<ScalarImage, FlowError> {
        let d = 0.1 / self.width as f64;
        self.derivative_image(xs, ys, |f, i, j| {
            let dx = f.vector(i + 1, j).y - f.vector(i - 1, j).y;
            let dy = f.vector(i, j + 1).x - f.vector(i, j - 1).x;
            dx / d - dy / d
        })
    }

    /// Divergence of the field resampled onto an `xs` x `ys` image.
    pub fn divergence(&self, xs: usize, ys: usize) -> Result<ScalarImage, FlowError> {
        let d = 0.1 / self.width as f64;
        self.derivative_image(xs, ys, |f, i, j| {
            let dx = f.vector(i + 1, j).x - f.vector(i - 1, j).x;
            let dy = f.vector(i, j + 1).y - f.vector(i, j - 1).y;
            (dx + dy) / (2.0 * d)
        })
    }

    fn derivative_image(
        &self,
        xs: usize,
        ys: usize,
        op: impl Fn(&Self, usize, usize) -> f64,
    ) -> Result<ScalarImage, FlowError> {
        if self.width < 3 || self.height < 3 {
            return Err(FlowError::invalid(
                "field",
                "derivatives need at least 3x3 samples",
            ));
        }
        let mut inner = ScalarImage::new(self.width - 2, self.height - 2)?;
        for j in 1..self.height - 1 {
            for i in 1..self.width - 1 {
                inner.set_pixel(i - 1, j - 1, op(self, i, j));
            }
        }
        let mut out = ScalarImage::new(xs, ys)?;
        let aspect = inner.aspect();
        for j in 0..ys {
            for i in 0..xs {
                let x = (i as f64 + 0.5) / xs as f64;
                let y = (j as f64 + 0.5) / ys as f64 * aspect;
                out.set_pixel(i, j, inner.get_value(x, y));
            }
        }
        Ok(out)
    }

    // -- grid transforms --

    /// Mirrors rows top to bottom.
    pub fn flip_vertical(&mut self) {
        let w = self.width;
        for j in 0..self.height / 2 {
            let jj = self.height - j - 1;
            for i in 0..w {
                self.data.swap(j * w + i, jj * w + i);
            }
        }
    }

    /// Mirrors columns left to right.
    pub fn flip_horizontal(&mut self) {
        let w = self.width;
        for row in self.data.chunks_mut(w) {
            row.reverse();
        }
    }

    /// Exchanges the x and y components of every sample.
    pub fn swap_xy(&mut self) {
        for v in &mut self.data {
            *v = DVec2::new(v.y, v.x);
        }
    }

    /// Multiplies x components by `xs` and y components by `ys`.
    pub fn scale(&mut self, xs: f64, ys: f64) {
        let s = DVec2::new(xs, ys);
        for v in &mut self.data {
            *v *= s;
        }
    }

    /// Rotates every vector by `degrees` (clockwise in y-up coordinates).
    pub fn rotate(&mut self, degrees: f64) {
        let (sn, cs) = degrees.to_radians().sin_cos();
        for v in &mut self.data {
            *v = DVec2::new(cs * v.x + sn * v.y, -sn * v.x + cs * v.y);
        }
    }

    /// Extracts the `size` x `size` block whose corner is grid sample (x0, y0).
    pub fn cut(&self, x0: usize, y0: usize, size: usize) -> Result<Self, FlowError> {
        let fits = x0.checked_add(size).is_some_and(|e| e <= self.width)
            && y0.checked_add(size).is_some_and(|e| e <= self.height);
        if !fits {
            return Err(FlowError::invalid(
                "cut",
                format!(
                    "block ({x0}, {y0}) size {size} exceeds {}x{} field",
                    self.width, self.height
                ),
            ));
        }
        let mut out = Self::new(size, size)?;
        out.integrator = self.integrator;
        for j in 0..size {
            for i in 0..size {
                out.set_vector(i, j, self.vector(i + x0, j + y0));
            }
        }
        Ok(out)
    }

    /// Resamples onto a `floor(width * xmag)` x `width` grid, scaling the
    /// vertical lookup by `xmag` (values past the top read at 0.99).
    pub fn stretch(&self, xmag: f64) -> Result<Self, FlowError> {
        if xmag.is_nan() || xmag <= 0.0 {
            return Err(FlowError::invalid("stretch", "magnification must be positive"));
        }
        let new_w = (self.width as f64 * xmag) as usize;
        let new_h = self.width;
        let mut out = Self::new(new_w, new_h)?;
        out.integrator = self.integrator;
        let sx = (new_w.max(2) - 1) as f64;
        let sy = (new_h.max(2) - 1) as f64;
        for j in 0..new_h {
            for i in 0..new_w {
                let xx = i as f64 / sx;
                let mut yy = j as f64 / sy * xmag;
                if yy > 1.0 {
                    yy = 0.99;
                }
                out.set_vector(i, j, self.value_at(xx, yy));
            }
        }
        Ok(out)
    }

    /// Square `res` x `res` resampling at `(i / res, j / res)`, as written by
    /// `vsave`.
    pub fn resample(&self, res: usize) -> Result<Self, FlowError> {
        let mut out = Self::new(res, res)?;
        out.integrator = self.integrator;
        for j in 0..res {
            for i in 0..res {
                let s = i as f64 / res as f64;
                let t = j as f64 / res as f64;
                out.set_vector(i, j, self.value_at(s, t));
            }
        }
        Ok(out)
    }

    /// Multiplies each sample by the image value at its grid position.
    pub fn modulate(&mut self, image: &ScalarImage) {
        let aspect = image.aspect();
        for j in 0..self.height {
            for i in 0..self.width {
                let s = i as f64 / self.width as f64;
                let t = j as f64 / self.height as f64 * aspect;
                let mag = image.get_value(s, t);
                self.data[j * self.width + i] *= mag;
            }
        }
    }

    /// Normalized gradient of `image`, on the image's own grid.
    pub fn gradient_of(image: &ScalarImage) -> Result<Self, FlowError> {
        let (w, h) = (image.width(), image.height());
        let mut field = Self::new(w, h)?;
        let aspect = image.aspect();
        for j in 0..h {
            for i in 0..w {
                let x = i as f64 / w as f64;
                let y = j as f64 / h as f64 * aspect;
                let (gx, gy) = image.gradient(x, y);
                field.set_vector(i, j, DVec2::new(gx, gy));
            }
        }
        field.normalize();
        Ok(field)
    }

    // -- file i/o --

    /// Reads a VF file (`.vec` appended when missing).
    pub fn read(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = fileio::ensure_extension(path.as_ref(), "vec");
        let bytes = std::fs::read(&path).map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))?;
        let (header, payload) = fileio::split_header(&bytes, 3, "VF")?;
        let mut tokens = header.split_whitespace();
        if tokens.next() != Some("VF") {
            return Err(FlowError::Format("VF: missing magic".into()));
        }
        let dims = fileio::parse_dims(tokens, "VF")?;
        let [w, h, _z, _rank] = dims[..] else {
            return Err(FlowError::Format(
                "VF: expected xsize ysize zsize and rank".into(),
            ));
        };
        let mut field = Self::new(w, h)?;
        let values = fileio::decode_f32(payload, field.data.len() * 2, "VF")?;
        for (v, pair) in field.data.iter_mut().zip(values.chunks_exact(2)) {
            *v = DVec2::new(pair[0], pair[1]);
        }
        Ok(field)
    }

    /// Writes a VF file (`.vec` appended when missing) with zsize 1 and rank 2.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let path = fileio::ensure_extension(path.as_ref(), "vec");
        let mut out = format!("VF\n{} {} 1\n2\n", self.width, self.height).into_bytes();
        out.reserve(self.data.len() * 8);
        for v in &self.data {
            fileio::encode_f32(&mut out, v.x);
            fileio::encode_f32(&mut out, v.y);
        }
        std::fs::write(&path, out).map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn uniform(w: usize, h: usize, vx: f64, vy: f64) -> VectorField {
        VectorField::from_fn(w, h, |_, _| (vx, vy)).unwrap()
    }

    // -- lookup --

    #[test]
    fn off_canvas_is_zero() {
        let f = uniform(8, 8, 1.0, 0.0);
        assert_eq!(f.value_at(-0.01, 0.5), DVec2::ZERO);
        assert_eq!(f.value_at(0.5, 1.01), DVec2::ZERO);
        assert_eq!(f.value_at(1.0, 1.0), DVec2::new(1.0, 0.0));
    }

    #[test]
    fn bilinear_reproduces_linear_field() {
        let f = VectorField::from_fn(5, 5, |x, y| (x, 2.0 * y)).unwrap();
        let v = f.value_at(0.3, 0.7);
        assert!(approx(v.x, 0.3) && approx(v.y, 1.4), "got {v:?}");
    }

    #[test]
    fn non_square_field_spans_aspect() {
        let f = VectorField::from_fn(4, 8, |_, y| (0.0, y)).unwrap();
        assert!(approx(f.aspect(), 2.0));
        assert!(approx(f.value_at(0.5, 2.0).y, 2.0));
        assert!(approx(f.value_at(0.5, 1.0).y, 1.0));
    }

    #[test]
    fn sample_normalizes_but_reports_magnitude() {
        let f = uniform(4, 4, 3.0, 4.0);
        let (v, len) = f.sample(0.5, 0.5, true);
        assert!(approx(v.length(), 1.0));
        assert!(approx(len, 5.0));
    }

    // -- integration --

    #[test]
    fn euler_and_midpoint_agree_on_uniform_field() {
        let mut f = uniform(4, 4, 1.0, 0.0);
        let (p_mid, _) = f.integrate(DVec2::new(0.2, 0.5), 0.1, false);
        f.set_integrator(Integrator::Euler);
        let (p_eul, len) = f.integrate(DVec2::new(0.2, 0.5), 0.1, false);
        assert!(approx(p_mid.x, 0.3) && approx(p_eul.x, 0.3));
        assert!(approx(len, 1.0));
    }

    #[test]
    fn integration_off_canvas_stalls() {
        let f = uniform(4, 4, 1.0, 0.0);
        let (p, len) = f.integrate(DVec2::new(1.5, 0.5), 0.1, false);
        assert_eq!(len, 0.0);
        assert_eq!(p, DVec2::new(1.5, 0.5));
    }

    #[test]
    fn midpoint_tracks_rotation_better_than_euler() {
        let mut f = VectorField::from_fn(64, 64, |x, y| (-(y - 0.5), x - 0.5)).unwrap();
        let start = DVec2::new(0.8, 0.5);
        let radius = |p: DVec2| (p - DVec2::splat(0.5)).length();
        let trace = |f: &VectorField| {
            let mut p = start;
            for _ in 0..50 {
                p = f.integrate(p, 0.1, false).0;
            }
            (radius(p) - 0.3).abs()
        };
        let mid_err = trace(&f);
        f.set_integrator(Integrator::Euler);
        let euler_err = trace(&f);
        assert!(mid_err < euler_err, "midpoint {mid_err} vs euler {euler_err}");
    }

    // -- derived images --

    #[test]
    fn normalize_leaves_zero_vectors() {
        let mut f = VectorField::from_fn(3, 3, |x, _| (x * 4.0, 0.0)).unwrap();
        f.normalize();
        assert_eq!(f.vector(0, 0), DVec2::ZERO);
        assert!(approx(f.vector(2, 1).length(), 1.0));
    }

    #[test]
    fn magnitude_matches_vector_length() {
        let f = uniform(3, 2, 3.0, 4.0);
        let m = f.magnitude();
        assert!(m.data().iter().all(|&v| approx(v, 5.0)));
    }

    #[test]
    fn rotation_field_has_positive_vorticity_and_no_divergence() {
        let f = VectorField::from_fn(16, 16, |x, y| (-(y - 0.5), x - 0.5)).unwrap();
        let vort = f.vorticity(8, 8).unwrap();
        let div = f.divergence(8, 8).unwrap();
        assert!(vort.data().iter().all(|&v| v > 0.0));
        assert!(div.data().iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn derivatives_need_interior() {
        let f = uniform(2, 2, 1.0, 0.0);
        assert!(f.vorticity(4, 4).is_err());
    }

    // -- transforms --

    #[test]
    fn flips_mirror_the_grid() {
        let f = VectorField::from_fn(3, 3, |x, y| (x, y)).unwrap();
        let mut v = f.clone();
        v.flip_vertical();
        assert_eq!(v.vector(1, 0), f.vector(1, 2));
        let mut h = f.clone();
        h.flip_horizontal();
        assert_eq!(h.vector(0, 1), f.vector(2, 1));
    }

    #[test]
    fn rotate_quarter_turn() {
        let mut f = uniform(2, 2, 1.0, 0.0);
        f.rotate(90.0);
        let v = f.vector(0, 0);
        assert!(approx(v.x, 0.0) && approx(v.y, -1.0), "got {v:?}");
    }

    #[test]
    fn swap_and_scale() {
        let mut f = uniform(2, 2, 1.0, 2.0);
        f.swap_xy();
        f.scale(3.0, 0.5);
        assert_eq!(f.vector(1, 1), DVec2::new(6.0, 0.5));
    }

    #[test]
    fn cut_extracts_block_and_checks_bounds() {
        let f = VectorField::from_fn(6, 6, |x, y| (x, y)).unwrap();
        let c = f.cut(2, 1, 3).unwrap();
        assert_eq!(c.width(), 3);
        assert_eq!(c.vector(0, 0), f.vector(2, 1));
        assert!(f.cut(4, 0, 3).is_err());
    }

    #[test]
    fn stretch_widens_grid() {
        let f = uniform(8, 8, 1.0, 0.0);
        let s = f.stretch(2.0).unwrap();
        assert_eq!((s.width(), s.height()), (16, 8));
        assert!(s.stretch(0.0).is_err());
    }

    #[test]
    fn modulate_scales_by_image() {
        let mut f = uniform(4, 4, 1.0, 1.0);
        f.modulate(&ScalarImage::filled(4, 4, 0.5).unwrap());
        assert_eq!(f.vector(2, 2), DVec2::new(0.5, 0.5));
    }

    #[test]
    fn gradient_of_ramp_points_right() {
        let f = VectorField::gradient_of(&ScalarImage::ramp()).unwrap();
        let v = f.vector(10, 10);
        assert!(approx(v.x, 1.0) && approx(v.y, 0.0), "got {v:?}");
    }

    // -- file i/o --

    #[test]
    fn vf_round_trip_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let f = VectorField::from_fn(5, 3, |x, y| (x - 0.25, y + 0.5)).unwrap();
        f.write(dir.path().join("flow")).unwrap();
        let bytes = std::fs::read(dir.path().join("flow.vec")).unwrap();
        assert!(bytes.starts_with(b"VF\n5 3 1\n2\n"));
        let back = VectorField::read(dir.path().join("flow")).unwrap();
        assert_eq!((back.width(), back.height()), (5, 3));
        for j in 0..3 {
            for i in 0..5 {
                let d = (back.vector(i, j) - f.vector(i, j)).length();
                assert!(d < 1e-6, "sample ({i}, {j}) off by {d}");
            }
        }
    }

    #[test]
    fn vf_short_payload_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.vec");
        std::fs::write(&path, b"VF\n2 2 1\n2\n\0\0\0\0").unwrap();
        assert!(matches!(VectorField::read(&path), Err(FlowError::Format(_))));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integrate_is_finite(x in -0.5f64..1.5, y in -0.5f64..1.5, delta in -0.1f64..0.1) {
                let f = VectorField::from_fn(16, 16, |x, y| (y - 0.5, 0.5 - x)).unwrap();
                let (p, len) = f.integrate(DVec2::new(x, y), delta, false);
                prop_assert!(p.is_finite() && len.is_finite());
            }
        }
    }
}
