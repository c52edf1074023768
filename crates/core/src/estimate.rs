//! Per-streamline quality estimates that steer the optimizer toward useful
//! changes.
//!
//! Three probes sample the lowpass raster around a streamline: past its ends
//! (is there a gap to grow into?), just inside its ends (is it crowding a
//! neighbour?) and to either side of its body (is it off-centre?). The
//! largest signal becomes the streamline's recommended [`Change`].

use glam::DVec2;

use crate::config::{OptimizerConfig, VisualizationParameters};
use crate::field::VectorField;
use crate::lowpass::LowpassField;
use crate::prng::Xorshift64;
use crate::streamline::{End, Streamline};

/// How the length of a streamline should change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// Grow one end, or a random end when `None`.
    Lengthen(Option<End>),
    /// Retract one end, or a random end when `None`.
    Shorten(Option<End>),
    LengthenBoth,
    ShortenBoth,
    /// Grow or shrink each end by an independent random amount.
    Random,
}

impl Resize {
    /// The same resize with any end preference dropped.
    pub fn without_end(self) -> Self {
        match self {
            Resize::Lengthen(_) => Resize::Lengthen(None),
            Resize::Shorten(_) => Resize::Shorten(None),
            other => other,
        }
    }
}

/// A perturbation: optional jitter of the origin plus an optional resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Change {
    pub reposition: bool,
    pub resize: Option<Resize>,
}

impl Change {
    pub const MOVE: Change = Change {
        reposition: true,
        resize: None,
    };

    pub fn resize(resize: Resize) -> Self {
        Self {
            reposition: false,
            resize: Some(resize),
        }
    }

    /// End named by the resize, if any.
    pub fn end(&self) -> Option<End> {
        match self.resize {
            Some(Resize::Lengthen(end)) | Some(Resize::Shorten(end)) => end,
            _ => None,
        }
    }
}

/// Side of a streamline, looking downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Probe settings: sample radius (in filter radii), samples per probe, and
/// how far past an end the probes reach (in sample radii).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub radius: f64,
    pub count: usize,
    pub endpoint_distance: f64,
}

impl From<&OptimizerConfig> for Sampling {
    fn from(cfg: &OptimizerConfig) -> Self {
        Self {
            radius: cfg.sample_radius,
            count: cfg.sample_number,
            endpoint_distance: cfg.sample_endpoint_distance,
        }
    }
}

/// Probes stay two lowpass pixels away from every edge.
struct Border {
    min: DVec2,
    max: DVec2,
}

impl Border {
    fn contains(&self, p: DVec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Which way a probe walks relative to the flow at the end it starts from.
#[derive(Clone, Copy, PartialEq)]
enum Probe {
    Inward,
    Outward,
}

impl LowpassField {
    fn border(&self) -> Border {
        let (xs, ys) = (self.xsize() as f64, self.ysize() as f64);
        Border {
            min: DVec2::new(2.0 / xs, 2.0 / ys),
            max: DVec2::new(1.0 - 2.0 / xs, self.image.aspect() - 2.0 / ys),
        }
    }

    /// Walks `count` steps from `start` along `sign * flow`, summing squared
    /// deviations above the target (inward) or below it (outward). Inward
    /// probes skip samples near the border; outward probes stop there.
    fn probe_end(
        &self,
        field: &VectorField,
        start: DVec2,
        sign: f64,
        probe: Probe,
        sampling: &Sampling,
    ) -> (f64, usize) {
        let border = self.border();
        let n = sampling.count.max(1);
        let rad = sampling.radius * self.radius_at(start.x, start.y) / self.xsize() as f64;
        let delta = sampling.endpoint_distance * rad / n as f64;
        let (mut sum, mut count) = (0.0, 0usize);
        let mut p = start;
        for _ in 0..n {
            if !border.contains(p) {
                match probe {
                    Probe::Inward => continue,
                    Probe::Outward => break,
                }
            }
            let value = self.image.get_value(p.x, p.y);
            let off = match probe {
                Probe::Inward => value > self.target,
                Probe::Outward => value < self.target,
            };
            if off {
                sum += (self.target - value) * (self.target - value);
            }
            count += 1;
            p += sign * delta * field.value_at(p.x, p.y);
        }
        (sum, count)
    }

    /// Combines tail and head probes into a quality and the end with the
    /// larger mean deviation.
    fn end_quality(tail: (f64, usize), head: (f64, usize)) -> (f64, End) {
        let (sum1, count1) = tail;
        let (sum2, count2) = head;
        let total = count1 + count2;
        let quality = if total > 0 {
            (sum1 + sum2) / total as f64
        } else {
            0.0
        };
        let mean1 = if count1 > 0 { sum1 / count1 as f64 } else { sum1 };
        let mean2 = if count2 > 0 { sum2 / count2 as f64 } else { sum2 };
        let end = if mean1 > mean2 { End::Tail } else { End::Head };
        (quality, end)
    }

    /// How much the streamline would gain from growing: under-covered
    /// raster just past each end. Returns the quality and the end to grow.
    pub fn lengthen_quality(
        &self,
        st: &Streamline,
        field: &VectorField,
        sampling: &Sampling,
    ) -> (f64, End) {
        let tail = self.probe_end(field, st.tail(), -1.0, Probe::Outward, sampling);
        let head = self.probe_end(field, st.head(), 1.0, Probe::Outward, sampling);
        Self::end_quality(tail, head)
    }

    /// How much the streamline would gain from retracting: over-covered
    /// raster just inside each end. Returns the quality and the end to cut.
    pub fn shorten_quality(
        &self,
        st: &Streamline,
        field: &VectorField,
        sampling: &Sampling,
    ) -> (f64, End) {
        let tail = self.probe_end(field, st.tail(), 1.0, Probe::Inward, sampling);
        let head = self.probe_end(field, st.head(), -1.0, Probe::Inward, sampling);
        Self::end_quality(tail, head)
    }

    /// Lateral imbalance: mean difference between the raster on the left and
    /// right of random body samples. Returns its magnitude and the more
    /// crowded side.
    pub fn main_body_quality(
        &self,
        st: &Streamline,
        field: &VectorField,
        sampling: &Sampling,
        rng: &mut Xorshift64,
    ) -> (f64, Side) {
        let border = self.border();
        let n = sampling.count.max(1);
        let samples = st.samples();
        let (mut sum, mut count) = (0.0, 0usize);
        for _ in 0..n {
            let p = samples[rng.index(samples.len())].pos;
            if !border.contains(p) {
                continue;
            }
            let rad = sampling.radius * self.radius_at(p.x, p.y) / self.xsize() as f64;
            let delta = 0.3 * rad / n as f64;
            let v = field.value_at(p.x, p.y);
            let d = DVec2::new(-delta * v.y, delta * v.x);
            let (a, b) = (p + d, p - d);
            sum += self.image.get_value(a.x, a.y) - self.image.get_value(b.x, b.y);
            count += 1;
        }
        if count == 0 {
            return (0.0, Side::Right);
        }
        let side = if sum > 0.0 { Side::Left } else { Side::Right };
        ((sum / count as f64).abs(), side)
    }

    /// Overall quality of `st` and the change its probes recommend.
    ///
    /// Frozen streamlines score 0 and keep their stored change. Where the
    /// local length step is 0, only moves are recommended.
    pub fn assess(
        &self,
        st: &Streamline,
        field: &VectorField,
        vis: &VisualizationParameters,
        sampling: &Sampling,
        rng: &mut Xorshift64,
    ) -> (f64, Change) {
        if st.frozen {
            return (0.0, st.change);
        }
        let origin = st.origin();
        let length_frozen = vis.delta_length(origin.x, origin.y) == 0.0;
        let ((lq, grow_end), (sq, cut_end)) = if length_frozen {
            ((0.0, End::Head), (0.0, End::Head))
        } else {
            (
                self.lengthen_quality(st, field, sampling),
                self.shorten_quality(st, field, sampling),
            )
        };
        let (mq, _side) = self.main_body_quality(st, field, sampling, rng);
        let mq = 4.0 * mq;

        let change = if lq > sq && lq > mq && !length_frozen {
            Change::resize(Resize::Lengthen(Some(grow_end)))
        } else if sq > lq && sq > mq && !length_frozen {
            Change::resize(Resize::Shorten(Some(cut_end)))
        } else {
            Change::MOVE
        };
        (lq + sq + mq, change)
    }

    /// Stores the result of [`LowpassField::assess`] on `st`.
    pub fn streamline_quality(
        &self,
        st: &mut Streamline,
        field: &VectorField,
        vis: &VisualizationParameters,
        sampling: &Sampling,
        rng: &mut Xorshift64,
    ) {
        let (quality, change) = self.assess(st, field, vis, sampling, rng);
        st.quality = quality;
        st.change = change;
    }
}

/// The change to try on a streamline: usually its stored recommendation,
/// sometimes (20%) a fully random move and resize, and half the time with
/// the end choice left to chance.
pub fn recommend_change(st: &Streamline, rng: &mut Xorshift64) -> Change {
    let mut change = st.change;
    if rng.chance(0.2) {
        change = Change {
            reposition: true,
            resize: Some(Resize::Random),
        };
    }
    if rng.chance(0.5) {
        change.resize = change.resize.map(Resize::without_end);
    }
    change
}
