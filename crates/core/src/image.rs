//! Scalar raster with bilinear lookup in normalized coordinates.
//!
//! A `ScalarImage` covers x in [0, 1] and y in [0, aspect] where
//! `aspect = height / width`. It backs the lowpass raster, the separation,
//! width and arrow-length controls, and the interpreter's float register.

use std::path::Path;

use crate::error::FlowError;
use crate::fileio;
use crate::prng::Xorshift64;

/// Locates the pair of grid samples bracketing `t` (already in [0, 1]) on an
/// axis of `size` samples. Returns `(lo, hi, fract)`; the far edge clamps to
/// the last cell with `fract = 1`.
pub(crate) fn grid_cell(t: f64, size: usize) -> (usize, usize, f64) {
    if size < 2 {
        return (0, 0, 0.0);
    }
    let scaled = t * (size - 1) as f64;
    let i = scaled as usize;
    if i >= size - 1 {
        (size - 2, size - 1, 1.0)
    } else {
        (i, i + 1, scaled - i as f64)
    }
}

/// A 2D scalar raster addressed by pixel or by normalized position.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarImage {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl ScalarImage {
    /// Creates a zero-filled image.
    ///
    /// Returns `FlowError::InvalidDimensions` if either dimension is zero
    /// or if `width * height` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Result<Self, FlowError> {
        Self::filled(width, height, 0.0)
    }

    /// Creates an image with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: f64) -> Result<Self, FlowError> {
        if width == 0 || height == 0 {
            return Err(FlowError::InvalidDimensions);
        }
        let len = width
            .checked_mul(height)
            .ok_or(FlowError::InvalidDimensions)?;
        Ok(Self {
            width,
            height,
            data: vec![value; len],
        })
    }

    /// Wraps row-major `data`, validating its length.
    pub fn from_data(width: usize, height: usize, data: Vec<f64>) -> Result<Self, FlowError> {
        let mut img = Self::new(width, height)?;
        if data.len() != img.data.len() {
            return Err(FlowError::DimensionMismatch {
                lhs_w: width,
                lhs_h: height,
                rhs_w: data.len(),
                rhs_h: 1,
            });
        }
        img.data = data;
        Ok(img)
    }

    /// Wraps data whose dimensions the caller has already validated.
    pub(crate) fn from_raw(width: usize, height: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    /// The 20x20 all-ones register image.
    pub fn constant() -> Self {
        Self {
            width: 20,
            height: 20,
            data: vec![1.0; 400],
        }
    }

    /// A 20x20 left-to-right ramp from 0 to 1.
    pub fn ramp() -> Self {
        let size = 20;
        let data = (0..size * size)
            .map(|k| (k % size) as f64 / (size - 1) as f64)
            .collect();
        Self {
            width: size,
            height: size,
            data,
        }
    }

    /// Uniform random values on a `size` x `size` grid, smoothed by `blur_steps`
    /// diffusion steps.
    pub fn noise(size: usize, blur_steps: usize, rng: &mut Xorshift64) -> Result<Self, FlowError> {
        let mut img = Self::new(size, size)?;
        for v in &mut img.data {
            *v = rng.uniform();
        }
        img.blur(blur_steps);
        Ok(img)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `height / width`.
    pub fn aspect(&self) -> f64 {
        self.height as f64 / self.width as f64
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Pixel at column `i`, row `j`.
    ///
    /// # Panics
    /// Panics if the pixel is out of range.
    pub fn pixel(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.width + i]
    }

    pub fn set_pixel(&mut self, i: usize, j: usize, value: f64) {
        self.data[j * self.width + i] = value;
    }

    /// Sets every pixel to `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Bilinear value at (x, y) with x in [0, 1] and y in [0, aspect].
    ///
    /// Positions off the image read as 0.
    pub fn get_value(&self, x: f64, y: f64) -> f64 {
        let aspect = self.aspect();
        if !(0.0..=1.0).contains(&x) || !(0.0..=aspect).contains(&y) {
            return 0.0;
        }
        let (i0, i1, fx) = grid_cell(x, self.width);
        let (j0, j1, fy) = grid_cell(y / aspect, self.height);
        let x00 = self.pixel(i0, j0);
        let x01 = self.pixel(i1, j0);
        let x10 = self.pixel(i0, j1);
        let x11 = self.pixel(i1, j1);
        let x0 = x00 + fx * (x01 - x00);
        let x1 = x10 + fx * (x11 - x10);
        x0 + fy * (x1 - x0)
    }

    /// Minimum and maximum pixel values.
    pub fn extrema(&self) -> (f64, f64) {
        self.data
            .iter()
            .fold((self.data[0], self.data[0]), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Linearly maps the current value range onto [tmin, tmax].
    ///
    /// Reversed targets are swapped. A constant image maps to `tmax`.
    pub fn remap(&mut self, tmin: f64, tmax: f64) {
        let (tmin, tmax) = if tmin > tmax { (tmax, tmin) } else { (tmin, tmax) };
        let (mut min, max) = self.extrema();
        if min == max {
            min = max - 1.0;
        }
        for v in &mut self.data {
            let t = (*v - min) / (max - min);
            *v = tmin + t * (tmax - tmin);
        }
    }

    /// Perlin-style bias curve over the value range (`b = 0.5` is identity).
    pub fn bias(&mut self, b: f64) -> Result<(), FlowError> {
        if !(0.0..=1.0).contains(&b) {
            return Err(FlowError::invalid("bias", format!("{b} is outside [0, 1]")));
        }
        let expon = b.ln() / 0.5f64.ln();
        self.map_normalized(|t| t.powf(expon));
        Ok(())
    }

    /// Perlin-style gain curve over the value range (`g = 0.5` is identity).
    pub fn gain(&mut self, g: f64) -> Result<(), FlowError> {
        if !(0.0..=1.0).contains(&g) {
            return Err(FlowError::invalid("gain", format!("{g} is outside [0, 1]")));
        }
        let expon = (1.0 - g).ln() / 0.5f64.ln();
        self.map_normalized(|t| {
            if t < 0.5 {
                (2.0 * t).powf(expon) * 0.5
            } else {
                1.0 - (2.0 - 2.0 * t).powf(expon) * 0.5
            }
        });
        Ok(())
    }

    fn map_normalized(&mut self, f: impl Fn(f64) -> f64) {
        let (min, max) = self.extrema();
        if min == max {
            return;
        }
        for v in &mut self.data {
            let t = (*v - min) / (max - min);
            *v = min + f(t) * (max - min);
        }
    }

    /// Multiplies every pixel by -1.
    pub fn negate(&mut self) {
        self.data.iter_mut().for_each(|v| *v = -*v);
    }

    /// Diffusion blur: each step replaces a pixel with
    /// `(4 * centre + left + right + up + down) / 8`, edges clamped.
    pub fn blur(&mut self, steps: usize) {
        let (w, h) = (self.width, self.height);
        let mut next = vec![0.0; self.data.len()];
        for _ in 0..steps {
            for j in 0..h {
                let j0 = j.saturating_sub(1);
                let j1 = (j + 1).min(h - 1);
                for i in 0..w {
                    let i0 = i.saturating_sub(1);
                    let i1 = (i + 1).min(w - 1);
                    let sum = self.pixel(i0, j)
                        + self.pixel(i1, j)
                        + self.pixel(i, j0)
                        + self.pixel(i, j1)
                        + 4.0 * self.pixel(i, j);
                    next[j * w + i] = sum * 0.125;
                }
            }
            std::mem::swap(&mut self.data, &mut next);
        }
    }

    /// Central-difference gradient at the pixel containing (x, y).
    pub fn gradient(&self, x: f64, y: f64) -> (f64, f64) {
        let last_i = self.width as isize - 1;
        let last_j = self.height as isize - 1;
        let i = ((x * self.width as f64) as isize).clamp(0, last_i);
        let j = ((y * self.height as f64 / self.aspect()) as isize).clamp(0, last_j);
        let p = |a: isize, b: isize| self.pixel(a.clamp(0, last_i) as usize, b.clamp(0, last_j) as usize);
        (p(i + 1, j) - p(i - 1, j), p(i, j + 1) - p(i, j - 1))
    }

    /// Quantizes to 8-bit gray over [min, max], row-major.
    ///
    /// When both bounds are 0 the image's own extrema are used.
    pub fn to_gray_bytes(&self, min: f64, max: f64) -> Vec<u8> {
        let (mut lo, hi) = if min == 0.0 && max == 0.0 {
            self.extrema()
        } else {
            (min, max)
        };
        if lo == hi {
            lo = hi - 1.0;
        }
        self.data
            .iter()
            .map(|&v| ((255.0 * (v - lo) / (hi - lo)) as i64).clamp(0, 255) as u8)
            .collect()
    }

    /// Reads an FL file (`.flt` appended when missing).
    pub fn read(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = fileio::ensure_extension(path.as_ref(), "flt");
        let bytes = std::fs::read(&path).map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))?;
        let (header, payload) = fileio::split_header(&bytes, 2, "FL")?;
        let mut tokens = header.split_whitespace();
        if tokens.next() != Some("FL") {
            return Err(FlowError::Format("FL: missing magic".into()));
        }
        let dims = fileio::parse_dims(tokens, "FL")?;
        let [w, h] = dims[..] else {
            return Err(FlowError::Format("FL: expected width and height".into()));
        };
        let count = w.checked_mul(h).ok_or(FlowError::InvalidDimensions)?;
        let data = fileio::decode_f32(payload, count, "FL")?;
        Self::from_data(w, h, data)
    }

    /// Writes an FL file (`.flt` appended when missing).
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let path = fileio::ensure_extension(path.as_ref(), "flt");
        let mut out = format!("FL\n{} {}\n", self.width, self.height).into_bytes();
        out.reserve(self.data.len() * 4);
        for &v in &self.data {
            fileio::encode_f32(&mut out, v);
        }
        std::fs::write(&path, out).map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))
    }
}
