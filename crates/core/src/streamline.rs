//! Streamlines: polylines traced through a [`VectorField`] from an origin.
//!
//! A streamline is integrated `length1` forward (towards the head) and
//! `length2` backward (towards the tail) at a uniform arclength step. Tracing
//! stops where the field vanishes or the curve leaves the canvas; in the
//! latter case the last sample is clipped onto the border and the end is
//! marked as clipped. Samples are stored tail first.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::clip::{clamp_to_screen, ClipRect};
use crate::estimate::Change;
use crate::field::VectorField;

/// Field magnitude below which tracing stops. Fields are expected to be
/// normalized, so this only triggers where the flow vanishes.
const MIN_STEP: f64 = 0.2;

/// Step used when a caller passes a non-positive one.
const FALLBACK_DELTA: f64 = 0.005;

/// One end of a streamline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum End {
    /// The forward end, last sample.
    Head,
    /// The backward end, first sample.
    Tail,
}

impl End {
    pub fn opposite(self) -> Self {
        match self {
            End::Head => End::Tail,
            End::Tail => End::Head,
        }
    }
}

/// Arrowhead drawn at a streamline's head.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArrowStyle {
    #[default]
    None,
    Open { length: f64, width: f64 },
    Solid { length: f64, width: f64 },
}

/// Drawing attributes carried through copies and perturbations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamlineStyle {
    /// Draw brightness in [0, 1].
    pub intensity: f64,
    /// Fraction of the arclength over which the head fades out.
    pub taper_head: f64,
    /// Fraction of the arclength over which the tail fades in.
    pub taper_tail: f64,
    pub arrow: ArrowStyle,
}

impl Default for StreamlineStyle {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            taper_head: 0.0,
            taper_tail: 0.0,
            arrow: ArrowStyle::None,
        }
    }
}

impl StreamlineStyle {
    pub fn is_tapered(&self) -> bool {
        self.taper_head != 0.0 || self.taper_tail != 0.0
    }
}

/// A traced point with its taper factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub pos: DVec2,
    /// Taper intensity in [0, 1].
    pub intensity: f64,
}

/// One streamline's filtered contribution to a lowpass pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelValue {
    pub i: usize,
    pub j: usize,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Streamline {
    origin: DVec2,
    length1: f64,
    length2: f64,
    /// Requested step; `delta` is the uniform step actually used.
    step: f64,
    delta: f64,
    samples: Vec<SamplePoint>,
    head_clipped: bool,
    tail_clipped: bool,
    style: StreamlineStyle,
    /// Coalesced lowpass contributions, one entry per touched pixel.
    pub(crate) values: Vec<PixelValue>,
    pub(crate) list_index: usize,
    /// Frozen streamlines are never perturbed, joined or deleted.
    pub frozen: bool,
    /// Estimated need for change; larger is worse.
    pub quality: f64,
    /// Directed change recommended by the last quality estimate.
    pub change: Change,
}

impl Streamline {
    /// Traces a streamline `len1` forward and `len2` backward from (x, y).
    ///
    /// The origin is first advected by half the length difference so the
    /// stored origin is the true midpoint and both stored lengths are equal.
    pub fn new(
        field: &VectorField,
        x: f64,
        y: f64,
        len1: f64,
        len2: f64,
        delta: f64,
        style: StreamlineStyle,
    ) -> Self {
        let aspect = field.aspect();
        let step = if delta > 0.0 { delta } else { FALLBACK_DELTA };
        let len1 = if len1.is_finite() { len1.max(0.0) } else { 0.0 };
        let len2 = if len2.is_finite() { len2.max(0.0) } else { 0.0 };

        // advect to the midpoint
        let dl = 0.5 * (len1 - len2);
        let num = (dl / step).abs() as usize + 1;
        let dt = dl / num as f64;
        let mut p = DVec2::new(x, y);
        for _ in 0..num {
            p += dt * field.value_at(p.x, p.y);
        }
        let half = 0.5 * (len1 + len2);
        let origin = clamp_to_screen(p, aspect);

        let steps1 = (half / step) as usize;
        let steps2 = steps1;
        let delta = if steps1 + steps2 > 0 {
            (half + half) / (steps1 + steps2) as f64
        } else {
            step
        };

        let (forward, head_clipped) = trace(field, origin, delta, steps1);
        let (backward, tail_clipped) = trace(field, origin, -delta, steps2);

        let mut points = Vec::with_capacity(forward.len() + backward.len() + 1);
        points.extend(backward.iter().rev().copied());
        points.push(origin);
        points.extend(forward);

        let mut st = Self {
            origin,
            length1: half,
            length2: half,
            step,
            delta,
            samples: Vec::new(),
            head_clipped,
            tail_clipped,
            style,
            values: Vec::new(),
            list_index: 0,
            frozen: false,
            quality: 0.0,
            change: Change::default(),
        };
        st.samples = points
            .into_iter()
            .map(|pos| SamplePoint { pos, intensity: 1.0 })
            .collect();
        st.apply_taper();
        st
    }

    /// A streamline of total length `len` split evenly about (x, y).
    pub fn from_length(
        field: &VectorField,
        x: f64,
        y: f64,
        len: f64,
        delta: f64,
        style: StreamlineStyle,
    ) -> Self {
        Self::new(field, x, y, 0.5 * len, 0.5 * len, delta, style)
    }

    /// Retraces this streamline with identical parameters and attributes.
    pub fn copy(&self, field: &VectorField) -> Self {
        let mut st = Self::new(
            field,
            self.origin.x,
            self.origin.y,
            self.length1,
            self.length2,
            self.step,
            self.style,
        );
        st.frozen = self.frozen;
        st
    }

    fn apply_taper(&mut self) {
        let n = self.samples.len();
        if n < 2 {
            for s in &mut self.samples {
                s.intensity = 1.0;
            }
            return;
        }
        let (head, tail) = (self.style.taper_head, self.style.taper_tail);
        for (i, s) in self.samples.iter_mut().enumerate() {
            let t = i as f64 / (n - 1) as f64;
            s.intensity = if t < tail {
                t / tail
            } else if 1.0 - t < head {
                (1.0 - t) / head
            } else {
                1.0
            };
        }
    }

    // -- accessors --

    pub fn origin(&self) -> DVec2 {
        self.origin
    }

    /// Forward and backward lengths.
    pub fn lengths(&self) -> (f64, f64) {
        (self.length1, self.length2)
    }

    pub fn length(&self) -> f64 {
        self.length1 + self.length2
    }

    /// Step requested at construction.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Uniform arclength step between samples.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn samples(&self) -> &[SamplePoint] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn head(&self) -> DVec2 {
        self.samples.last().map_or(self.origin, |s| s.pos)
    }

    pub fn tail(&self) -> DVec2 {
        self.samples.first().map_or(self.origin, |s| s.pos)
    }

    /// Position of the given end.
    pub fn end(&self, end: End) -> DVec2 {
        match end {
            End::Head => self.head(),
            End::Tail => self.tail(),
        }
    }

    pub fn head_clipped(&self) -> bool {
        self.head_clipped
    }

    pub fn tail_clipped(&self) -> bool {
        self.tail_clipped
    }

    pub fn style(&self) -> &StreamlineStyle {
        &self.style
    }

    pub fn intensity(&self) -> f64 {
        self.style.intensity
    }

    /// Taper fractions as (head, tail).
    pub fn taper(&self) -> (f64, f64) {
        (self.style.taper_head, self.style.taper_tail)
    }

    pub fn list_index(&self) -> usize {
        self.list_index
    }

    /// Cached lowpass contributions from the last trial evaluation.
    pub fn contributions(&self) -> &[PixelValue] {
        &self.values
    }

    /// Cumulative polyline length at each sample, starting at 0.
    pub fn arc_lengths(&self) -> Vec<f64> {
        let mut lens = Vec::with_capacity(self.samples.len());
        let mut sum = 0.0;
        let mut prev = None;
        for s in &self.samples {
            if let Some(p) = prev {
                sum += s.pos.distance(p);
            }
            lens.push(sum);
            prev = Some(s.pos);
        }
        lens
    }

    /// Point at arclength `dist` from the tail, or `None` past either end.
    ///
    /// `lens` must come from [`Streamline::arc_lengths`].
    pub fn point_at_arclength(&self, lens: &[f64], dist: f64) -> Option<DVec2> {
        let total = *lens.last()?;
        if dist < 0.0 || dist > total || self.samples.len() < 2 {
            return None;
        }
        let pos = lens.partition_point(|&l| l < dist).max(1);
        if pos >= self.samples.len() {
            return None;
        }
        let span = lens[pos] - lens[pos - 1];
        let fract = if span > 0.0 { (dist - lens[pos - 1]) / span } else { 0.0 };
        let (a, b) = (self.samples[pos - 1].pos, self.samples[pos].pos);
        Some(a + fract * (b - a))
    }
}

/// Integrates up to `steps` samples from `start`, returning them in tracing
/// order and whether the canvas border cut the trace short.
fn trace(field: &VectorField, start: DVec2, delta: f64, steps: usize) -> (Vec<DVec2>, bool) {
    let aspect = field.aspect();
    let rect = ClipRect::canvas(aspect);
    let mut points = Vec::with_capacity(steps.min(4096));
    let mut p = start;
    for _ in 0..steps {
        let (next, speed) = field.integrate(p, delta, false);
        if speed < MIN_STEP {
            break;
        }
        if !rect.contains(next) {
            let hit = rect.clip_line(p, next).map_or(next, |(_, b)| b);
            points.push(clamp_to_screen(hit, aspect));
            return (points, true);
        }
        p = clamp_to_screen(next, aspect);
        points.push(p);
    }
    (points, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::CANVAS_EPSILON;

    fn rotation(n: usize) -> VectorField {
        let mut vf = VectorField::from_fn(n, n, |x, y| (-(y - 0.5), x - 0.5)).unwrap();
        vf.normalize();
        vf
    }

    fn uniform_x(n: usize) -> VectorField {
        VectorField::from_fn(n, n, |_, _| (1.0, 0.0)).unwrap()
    }

    // -- construction --

    #[test]
    fn sample_count_matches_uniform_step() {
        let vf = rotation(64);
        let d = 0.0078125;
        let l = 0.125;
        let st = Streamline::new(&vf, 0.7, 0.5, l, l, d, StreamlineStyle::default());
        let expected = 2 * (l / d).floor() as usize + 1;
        assert_eq!(st.sample_count(), expected);
        assert!((st.delta() - 2.0 * l / 32.0).abs() < 1e-15);
        assert!(!st.head_clipped() && !st.tail_clipped());
    }

    #[test]
    fn origin_moves_to_true_midpoint() {
        let vf = uniform_x(16);
        let st = Streamline::new(&vf, 0.5, 0.5, 0.2, 0.0, 0.01, StreamlineStyle::default());
        assert!((st.origin().x - 0.6).abs() < 1e-9, "origin {:?}", st.origin());
        let (a, b) = st.lengths();
        assert!((a - 0.1).abs() < 1e-12 && (b - 0.1).abs() < 1e-12);
    }

    #[test]
    fn head_clipped_at_right_border() {
        let vf = uniform_x(16);
        // the midpoint half-step stays inside, the full step crosses x = 1
        let st = Streamline::new(&vf, 0.903, 0.5, 0.2, 0.2, 0.01, StreamlineStyle::default());
        assert!(st.head_clipped());
        assert!(!st.tail_clipped());
        assert!((st.head().x - (1.0 - CANVAS_EPSILON)).abs() < 1e-12);
        assert_eq!(st.sample_count(), 31);
    }

    #[test]
    fn samples_never_leave_canvas() {
        let vf = VectorField::from_fn(24, 12, |x, y| (x + 0.3, y - 0.2)).unwrap();
        let aspect = vf.aspect();
        for k in 0..20 {
            let x = k as f64 / 19.0;
            let st = Streamline::new(&vf, x, 0.25, 0.8, 0.8, 0.01, StreamlineStyle::default());
            for s in st.samples() {
                assert!(
                    s.pos.x >= CANVAS_EPSILON && s.pos.x <= 1.0 - CANVAS_EPSILON,
                    "x out of range: {:?}",
                    s.pos
                );
                assert!(s.pos.y >= CANVAS_EPSILON && s.pos.y <= aspect - CANVAS_EPSILON);
            }
        }
    }

    #[test]
    fn vanishing_field_gives_single_sample() {
        let vf = VectorField::new(8, 8).unwrap();
        let st = Streamline::new(&vf, 0.5, 0.5, 0.1, 0.1, 0.01, StreamlineStyle::default());
        assert_eq!(st.sample_count(), 1);
        assert_eq!(st.head(), st.tail());
    }

    #[test]
    fn degenerate_inputs_are_guarded() {
        let vf = uniform_x(8);
        let st = Streamline::new(&vf, 2.0, -1.0, f64::NAN, -0.5, 0.0, StreamlineStyle::default());
        assert_eq!(st.sample_count(), 1);
        assert!(st.origin().x < 1.0 && st.origin().y > 0.0);
    }

    // -- taper --

    #[test]
    fn taper_ramps_both_ends() {
        let vf = rotation(64);
        let style = StreamlineStyle {
            taper_head: 0.25,
            taper_tail: 0.25,
            ..StreamlineStyle::default()
        };
        let st = Streamline::new(&vf, 0.7, 0.5, 0.125, 0.125, 0.0078125, style);
        let s = st.samples();
        assert_eq!(s[0].intensity, 0.0);
        assert!(s[s.len() - 1].intensity.abs() < 1e-12);
        assert_eq!(s[s.len() / 2].intensity, 1.0);
        assert!(s[4].intensity > 0.0 && s[4].intensity < 1.0);
    }

    #[test]
    fn copy_keeps_geometry_and_attributes() {
        let vf = rotation(32);
        let style = StreamlineStyle {
            intensity: 0.5,
            arrow: ArrowStyle::Open { length: 0.02, width: 0.01 },
            ..StreamlineStyle::default()
        };
        let mut st = Streamline::new(&vf, 0.3, 0.4, 0.1, 0.05, 0.005, style);
        st.frozen = true;
        let c = st.copy(&vf);
        assert!(c.frozen);
        assert_eq!(c.style(), st.style());
        assert_eq!(c.sample_count(), st.sample_count());
        assert!(c.origin().distance(st.origin()) < 1e-12);
    }

    // -- arclength --

    #[test]
    fn point_at_arclength_interpolates() {
        let vf = uniform_x(16);
        let st = Streamline::new(&vf, 0.5, 0.5, 0.1, 0.1, 0.01, StreamlineStyle::default());
        let lens = st.arc_lengths();
        let total = *lens.last().unwrap();
        assert!((total - 0.2).abs() < 1e-9);
        let p = st.point_at_arclength(&lens, 0.05).unwrap();
        assert!((p.x - (st.tail().x + 0.05)).abs() < 1e-9);
        assert!(st.point_at_arclength(&lens, total + 0.01).is_none());
        assert!(st.point_at_arclength(&lens, -0.01).is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn stored_lengths_are_balanced(
                x in 0.05f64..0.95, y in 0.05f64..0.95,
                l1 in 0.0f64..0.3, l2 in 0.0f64..0.3,
            ) {
                let vf = rotation(32);
                let st = Streamline::new(&vf, x, y, l1, l2, 0.01, StreamlineStyle::default());
                let (a, b) = st.lengths();
                prop_assert!((a - b).abs() < 1e-12);
                prop_assert!((st.length() - (l1 + l2)).abs() < 1e-9);
                prop_assert!(st.sample_count() >= 1);
            }
        }
    }
}
