//! The live collection of streamlines.
//!
//! Removal swaps the last streamline into the vacated slot, so every
//! streamline's `list_index` always equals its position.

use std::cmp::Ordering;
use std::io::{BufRead, Write};

use crate::error::FlowError;
use crate::field::VectorField;
use crate::image::ScalarImage;
use crate::lowpass::LowpassField;
use crate::streamline::{Streamline, StreamlineStyle};

/// Target used when splatting a bundle into a standalone image.
const RENDER_TARGET: f64 = 0.6;

#[derive(Debug, Clone, Default)]
pub struct Bundle {
    lines: Vec<Streamline>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends a streamline and returns its index.
    pub fn add(&mut self, mut st: Streamline) -> usize {
        let index = self.lines.len();
        st.list_index = index;
        self.lines.push(st);
        index
    }

    /// Swap-removes the streamline at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn remove(&mut self, index: usize) -> Streamline {
        let st = self.lines.swap_remove(index);
        if let Some(moved) = self.lines.get_mut(index) {
            moved.list_index = index;
        }
        st
    }

    pub fn get(&self, index: usize) -> Option<&Streamline> {
        self.lines.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Streamline> {
        self.lines.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Streamline> {
        self.lines.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Streamline> {
        self.lines.iter_mut()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Retraces every streamline into a new bundle.
    pub fn copy(&self, field: &VectorField) -> Self {
        let mut out = Self::new();
        for st in &self.lines {
            out.add(st.copy(field));
        }
        out
    }

    fn reindex(&mut self) {
        for (i, st) in self.lines.iter_mut().enumerate() {
            st.list_index = i;
        }
    }

    // -- ordering by quality --

    /// Sorts by descending quality so index 0 needs change the most.
    pub fn quality_sort(&mut self) {
        self.lines
            .sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
        self.reindex();
    }

    /// Runs up to `passes` cocktail bubble-sort passes towards descending
    /// quality, stopping early once a sweep makes no swap.
    pub fn sort_passes(&mut self, passes: usize) {
        let n = self.lines.len();
        if n >= 2 {
            'passes: for _ in 0..passes {
                let mut changed = false;
                for i in 0..n - 1 {
                    if self.lines[i].quality < self.lines[i + 1].quality {
                        self.lines.swap(i, i + 1);
                        changed = true;
                    }
                }
                if !changed {
                    break 'passes;
                }
                changed = false;
                for i in (0..n - 1).rev() {
                    if self.lines[i].quality < self.lines[i + 1].quality {
                        self.lines.swap(i, i + 1);
                        changed = true;
                    }
                }
                if !changed {
                    break 'passes;
                }
            }
        }
        self.reindex();
    }

    pub fn freeze_all(&mut self) {
        for st in &mut self.lines {
            st.frozen = true;
        }
    }

    pub fn unfreeze_all(&mut self) {
        for st in &mut self.lines {
            st.frozen = false;
        }
    }

    /// Splats every segment through the radial filter into a fresh
    /// `xsize x ysize` image with a constant filter radius in pixels.
    pub fn filtered_render(
        &self,
        xsize: usize,
        ysize: usize,
        radius: f64,
    ) -> Result<ScalarImage, FlowError> {
        let mut low = LowpassField::with_radius(xsize, ysize, RENDER_TARGET, radius)?;
        for st in &self.lines {
            for pair in st.samples().windows(2) {
                let scale = 0.5 * (pair[0].intensity + pair[1].intensity);
                low.filter_segment(pair[0].pos, pair[1].pos, scale);
            }
        }
        Ok(low.into_image())
    }

    // -- ascii streamline sets --

    /// Writes the ascii streamline-set format.
    pub fn write_ascii<W: Write>(
        &self,
        mut w: W,
        delta_step: f64,
        with_taper: bool,
    ) -> Result<(), FlowError> {
        writeln!(w, "! this file contains {} streamlines", self.lines.len())?;
        writeln!(w)?;
        writeln!(w, "delta_step {delta_step}")?;
        writeln!(w)?;
        for st in &self.lines {
            let o = st.origin();
            let (l1, l2) = st.lengths();
            write!(w, "st {} {} {} {}", o.x, o.y, l1, l2)?;
            if with_taper {
                let (head, tail) = st.taper();
                write!(w, " {tail} {head}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Reads an ascii streamline set, tracing each line in `field`.
    ///
    /// Returns the bundle and the step in effect at the end of the file
    /// (`default_step` unless a `delta_step` line overrides it). Blank lines
    /// and `!`/`#` comments are skipped.
    pub fn read_ascii<R: BufRead>(
        r: R,
        field: &VectorField,
        default_step: f64,
    ) -> Result<(Self, f64), FlowError> {
        let mut bundle = Self::new();
        let mut step = default_step;
        for (lineno, line) in r.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let cmd = tokens.next().unwrap_or_default();
            let nums = tokens
                .map(|t| t.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    FlowError::Format(format!("streamline file line {}: {e}", lineno + 1))
                })?;
            match (cmd, nums.as_slice()) {
                ("delta_step", [v]) => step = *v,
                ("st" | "streamline", [x, y, l1, l2, rest @ ..]) if rest.len() <= 2 => {
                    let style = match rest {
                        [tail, head] => StreamlineStyle {
                            taper_head: *head,
                            taper_tail: *tail,
                            ..StreamlineStyle::default()
                        },
                        _ => StreamlineStyle::default(),
                    };
                    bundle.add(Streamline::new(field, *x, *y, *l1, *l2, step, style));
                }
                _ => {
                    return Err(FlowError::Format(format!(
                        "streamline file line {}: unexpected '{line}'",
                        lineno + 1
                    )))
                }
            }
        }
        Ok((bundle, step))
    }
}

impl IntoIterator for Bundle {
    type Item = Streamline;
    type IntoIter = std::vec::IntoIter<Streamline>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

impl<'a> IntoIterator for &'a Bundle {
    type Item = &'a Streamline;
    type IntoIter = std::slice::Iter<'a, Streamline>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> VectorField {
        let mut vf = VectorField::from_fn(32, 32, |x, y| (-(y - 0.5), x - 0.5)).unwrap();
        vf.normalize();
        vf
    }

    fn line_at(vf: &VectorField, x: f64, q: f64) -> Streamline {
        let mut st = Streamline::from_length(vf, x, 0.5, 0.1, 0.01, StreamlineStyle::default());
        st.quality = q;
        st
    }

    fn indices_consistent(b: &Bundle) -> bool {
        b.iter().enumerate().all(|(i, st)| st.list_index() == i)
    }

    // -- swap-remove --

    #[test]
    fn remove_moves_last_into_slot() {
        let vf = field();
        let mut b = Bundle::new();
        for k in 0..4 {
            b.add(line_at(&vf, 0.2 + 0.1 * k as f64, k as f64));
        }
        let gone = b.remove(1);
        assert_eq!(gone.quality, 1.0);
        assert_eq!(b.len(), 3);
        assert_eq!(b.get(1).unwrap().quality, 3.0);
        assert!(indices_consistent(&b));
        b.remove(2);
        assert!(indices_consistent(&b));
    }

    // -- sorting --

    #[test]
    fn quality_sort_is_descending() {
        let vf = field();
        let mut b = Bundle::new();
        for q in [0.3, 2.0, 0.1, 1.5] {
            b.add(line_at(&vf, 0.3, q));
        }
        b.quality_sort();
        let qs: Vec<f64> = b.iter().map(|s| s.quality).collect();
        assert_eq!(qs, vec![2.0, 1.5, 0.3, 0.1]);
        assert!(indices_consistent(&b));
    }

    #[test]
    fn one_cocktail_pass_moves_extremes() {
        let vf = field();
        let mut b = Bundle::new();
        for q in [1.0, 2.0, 3.0, 4.0, 5.0] {
            b.add(line_at(&vf, 0.3, q));
        }
        b.sort_passes(1);
        assert_eq!(b.get(0).unwrap().quality, 5.0);
        assert_eq!(b.get(4).unwrap().quality, 1.0);
        assert!(indices_consistent(&b));
    }

    #[test]
    fn freeze_and_unfreeze() {
        let vf = field();
        let mut b = Bundle::new();
        b.add(line_at(&vf, 0.3, 0.0));
        b.add(line_at(&vf, 0.4, 0.0));
        b.freeze_all();
        assert!(b.iter().all(|s| s.frozen));
        let c = b.copy(&vf);
        assert!(c.iter().all(|s| s.frozen));
        b.unfreeze_all();
        assert!(b.iter().all(|s| !s.frozen));
    }

    // -- rendering --

    #[test]
    fn filtered_render_darkens_only_near_lines() {
        let vf = VectorField::from_fn(16, 16, |_, _| (1.0, 0.0)).unwrap();
        let mut b = Bundle::new();
        b.add(Streamline::from_length(&vf, 0.5, 0.5, 0.6, 0.005, StreamlineStyle::default()));
        let img = b.filtered_render(32, 32, 2.0).unwrap();
        assert!(img.pixel(16, 15) > 0.5, "on-line value {}", img.pixel(16, 15));
        assert_eq!(img.pixel(16, 2), 0.0);
    }

    // -- ascii format --

    #[test]
    fn ascii_round_trip_with_taper() {
        let vf = field();
        let mut b = Bundle::new();
        let style = StreamlineStyle {
            taper_head: 0.2,
            taper_tail: 0.1,
            ..StreamlineStyle::default()
        };
        b.add(Streamline::new(&vf, 0.3, 0.5, 0.05, 0.05, 0.005, style));
        b.add(Streamline::new(&vf, 0.6, 0.4, 0.08, 0.08, 0.005, StreamlineStyle::default()));

        let mut out = Vec::new();
        b.write_ascii(&mut out, 0.004, true).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("! this file contains 2 streamlines"));
        assert!(text.contains("delta_step 0.004"));

        let (back, step) = Bundle::read_ascii(out.as_slice(), &vf, 0.005).unwrap();
        assert_eq!(step, 0.004);
        assert_eq!(back.len(), 2);
        assert_eq!(back.get(0).unwrap().taper(), (0.2, 0.1));
        let (l1, l2) = back.get(1).unwrap().lengths();
        assert!((l1 + l2 - 0.16).abs() < 1e-9);
    }

    #[test]
    fn ascii_rejects_garbage() {
        let vf = field();
        let err = Bundle::read_ascii("st 0.5 nope 0.1 0.1\n".as_bytes(), &vf, 0.005).unwrap_err();
        assert!(matches!(err, FlowError::Format(_)), "got {err:?}");
        let err = Bundle::read_ascii("bogus 1\n".as_bytes(), &vf, 0.005).unwrap_err();
        assert!(err.to_string().contains("line 1"), "got {err}");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn list_index_tracks_position(ops in proptest::collection::vec(0usize..10, 1..40)) {
                let vf = field();
                let mut b = Bundle::new();
                for op in ops {
                    if op < 6 || b.is_empty() {
                        b.add(line_at(&vf, 0.3, op as f64));
                    } else {
                        let idx = op % b.len();
                        b.remove(idx);
                    }
                    prop_assert!(indices_consistent(&b));
                }
            }
        }
    }
}
