//! Uniform-grid spatial hash over streamline samples, used for repulsion and
//! for finding endpoints that can be joined.
//!
//! Entries live in one arena and each cell holds the index of its newest
//! entry; entries chain to the one inserted before them. Neighbour queries
//! scan the 3x3 block of cells around a point with toroidal wraparound.
//! Entries refer to streamlines by bundle index, so the table is rebuilt
//! whenever the bundle changes shape.

use glam::DVec2;
use tracing::debug;

use crate::bundle::Bundle;
use crate::clip::clamp_to_screen;
use crate::dissolve::Dissolve;
use crate::error::FlowError;
use crate::field::VectorField;
use crate::lowpass::LowpassField;
use crate::prng::Xorshift64;
use crate::streamline::{End, Streamline};

/// Largest radius the table accepts; larger requests are capped so the grid
/// never collapses to a handful of cells.
pub const MAX_RADIUS: f64 = 0.125;

/// Join acceptance: a join that worsens quality is still kept when the loss
/// is under this fraction of what deleting both lines would cost.
const JOIN_RATIO: f64 = 0.25;

#[derive(Debug, Clone, Copy)]
struct CellEntry {
    pos: DVec2,
    line: usize,
    tag: Option<End>,
    next: Option<usize>,
}

/// A sample found by a table query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub pos: DVec2,
    /// Bundle index of the owning streamline.
    pub line: usize,
    /// Which end of its streamline the sample is, if it is one.
    pub tag: Option<End>,
}

#[derive(Debug, Clone)]
pub struct SpatialHashTable {
    radius: f64,
    scale: f64,
    x_wrap: usize,
    y_wrap: usize,
    dist_max: f64,
    cells: Vec<Option<usize>>,
    entries: Vec<CellEntry>,
}

impl SpatialHashTable {
    /// Empty table for a canvas of the given aspect and query radius.
    pub fn new(aspect: f64, radius: f64) -> Result<Self, FlowError> {
        if radius.is_nan() || radius <= 0.0 {
            return Err(FlowError::invalid("radius", format!("{radius} must be positive")));
        }
        let radius = radius.min(MAX_RADIUS);
        let scale = 0.5 / radius;
        let x_wrap = scale.ceil() as usize;
        let y_wrap = ((scale * aspect).ceil() as usize).max(1);
        Ok(Self {
            radius,
            scale,
            x_wrap,
            y_wrap,
            dist_max: radius * radius,
            cells: vec![None; x_wrap * y_wrap],
            entries: Vec::new(),
        })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Number of cells along x and y.
    pub fn dims(&self) -> (usize, usize) {
        (self.x_wrap, self.y_wrap)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
        self.entries.clear();
    }

    /// Adds one sample. Samples whose cell falls off the grid are dropped.
    pub fn insert(&mut self, pos: DVec2, line: usize, tag: Option<End>) {
        let a = (self.scale * pos.x).floor();
        let b = (self.scale * pos.y).floor();
        if a < 0.0 || b < 0.0 || a >= self.x_wrap as f64 || b >= self.y_wrap as f64 {
            return;
        }
        let cell = b as usize * self.x_wrap + a as usize;
        self.entries.push(CellEntry {
            pos,
            line,
            tag,
            next: self.cells[cell],
        });
        self.cells[cell] = Some(self.entries.len() - 1);
    }

    /// Adds the tail and head of streamline `line`.
    pub fn insert_endpoints(&mut self, st: &Streamline, line: usize) {
        self.insert(st.tail(), line, Some(End::Tail));
        self.insert(st.head(), line, Some(End::Head));
    }

    /// Adds every sample of streamline `line`, tagging its two ends.
    pub fn insert_all(&mut self, st: &Streamline, line: usize) {
        let last = st.sample_count().saturating_sub(1);
        for (k, s) in st.samples().iter().enumerate() {
            let tag = if k == 0 {
                Some(End::Tail)
            } else if k == last {
                Some(End::Head)
            } else {
                None
            };
            self.insert(s.pos, line, tag);
        }
    }

    /// Distinct cells of the 3x3 block around `p`, wrapping at the edges.
    fn neighbour_cells(&self, p: DVec2) -> impl Iterator<Item = usize> {
        let (xw, yw) = (self.x_wrap as i64, self.y_wrap as i64);
        let a = (self.scale * p.x).floor() as i64;
        let b = (self.scale * p.y).floor() as i64;
        let mut cells = [0usize; 9];
        let mut n = 0;
        for da in -1..=1 {
            for db in -1..=1 {
                let ca = (a + da).rem_euclid(xw) as usize;
                let cb = (b + db).rem_euclid(yw) as usize;
                let idx = cb * self.x_wrap + ca;
                if !cells[..n].contains(&idx) {
                    cells[n] = idx;
                    n += 1;
                }
            }
        }
        cells.into_iter().take(n)
    }

    fn chain(&self, cell: usize) -> impl Iterator<Item = &CellEntry> {
        std::iter::successors(self.cells[cell].map(|i| &self.entries[i]), |e| {
            e.next.map(|i| &self.entries[i])
        })
    }

    /// Every entry in the block of cells around `p`.
    fn nearby(&self, p: DVec2) -> impl Iterator<Item = &CellEntry> {
        self.neighbour_cells(p).flat_map(move |c| self.chain(c))
    }

    /// Closest entry in the 3x3 block around `p`, if any.
    pub fn find_nearest(&self, p: DVec2) -> Option<Neighbor> {
        self.nearby(p)
            .map(|e| (e, p.distance_squared(e.pos)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, _)| Neighbor {
                pos: e.pos,
                line: e.line,
                tag: e.tag,
            })
    }

    /// One repulsion step: every streamline is pushed away from the samples
    /// of other streamlines within the radius and retraced at its moved
    /// origin with the same length. Frozen streamlines stay put.
    ///
    /// The push weight `(r - d) / d` grows without bound as samples
    /// approach; coincident samples are skipped.
    pub fn repel(&mut self, bundle: &Bundle, field: &VectorField, delta: f64, rmove: f64) -> Bundle {
        self.clear();
        for (i, st) in bundle.iter().enumerate() {
            self.insert_all(st, i);
        }

        let aspect = field.aspect();
        let mut moved = Bundle::new();
        for (i, st) in bundle.iter().enumerate() {
            if st.frozen {
                moved.add(st.copy(field));
                continue;
            }
            let mut force = DVec2::ZERO;
            for s in st.samples() {
                for e in self.nearby(s.pos) {
                    if e.line == i {
                        continue;
                    }
                    let dxy = s.pos - e.pos;
                    let d2 = dxy.length_squared();
                    if d2 > self.dist_max || d2 == 0.0 {
                        continue;
                    }
                    let d = d2.sqrt();
                    force += dxy * ((self.radius - d) / d);
                }
            }
            let origin = clamp_to_screen(st.origin() + force * rmove, aspect);
            moved.add(Streamline::from_length(
                field,
                origin.x,
                origin.y,
                st.length(),
                delta,
                *st.style(),
            ));
        }
        moved
    }

    /// Looks for one pair of head-to-tail endpoints close enough to join and
    /// tries the join.
    ///
    /// Endpoints are inserted and visited in two independent dissolve
    /// orders, each covering the whole bundle. On the first candidate pair both streamlines are removed and
    /// a single streamline with their combined length is trialled. It is
    /// kept if quality improves, or worsens by less than a quarter of what
    /// deleting both would cost; otherwise both originals are restored.
    /// Returns true when a join was made. At most one join is attempted.
    pub fn identify_neighbors(
        &mut self,
        low: &mut LowpassField,
        field: &VectorField,
        delta: f64,
        quality: &mut f64,
        rng: &mut Xorshift64,
    ) -> bool {
        let n = low.bundle().len();
        let (Ok(mut insert_order), Ok(mut visit_order)) = (Dissolve::new(n, 1), Dissolve::new(n, 1))
        else {
            return false;
        };

        self.clear();
        insert_order.set_initial_value((n as f64 * rng.uniform()) as usize);
        for _ in 0..insert_order.period() {
            let j = insert_order.next_value();
            if let Some(st) = low.bundle().get(j) {
                self.insert_endpoints(st, j);
            }
        }

        visit_order.set_initial_value((n as f64 * rng.uniform()) as usize);
        let mut candidate = None;
        'search: for _ in 0..visit_order.period() {
            let k = visit_order.next_value();
            let Some(st) = low.bundle().get(k) else {
                continue;
            };
            if st.frozen {
                continue;
            }
            for end in [End::Tail, End::Head] {
                let p = st.end(end);
                for e in self.nearby(p) {
                    if e.line == k || e.tag == Some(end) {
                        continue;
                    }
                    let frozen = low.bundle().get(e.line).map_or(true, |s| s.frozen);
                    if frozen || p.distance_squared(e.pos) > self.dist_max {
                        continue;
                    }
                    candidate = Some((k, p, *e));
                    break 'search;
                }
            }
        }
        let Some((k, p, e)) = candidate else {
            return false;
        };
        self.try_join(low, field, delta, quality, k, p, e)
    }

    #[allow(clippy::too_many_arguments)]
    fn try_join(
        &self,
        low: &mut LowpassField,
        field: &VectorField,
        delta: f64,
        quality: &mut f64,
        k: usize,
        p: DVec2,
        e: CellEntry,
    ) -> bool {
        let (len_a, len_b) = match (low.bundle().get(k), low.bundle().get(e.line)) {
            (Some(a), Some(b)) => (a.length(), b.length()),
            _ => return false,
        };
        let total = len_a + len_b;
        let mid = if total > 0.0 {
            (len_a * p + len_b * e.pos) / total
        } else {
            0.5 * (p + e.pos)
        };
        let mid = clamp_to_screen(mid, field.aspect());
        // the line whose head meets the other's tail runs upstream
        let (forward, backward) = if e.tag == Some(End::Head) {
            (len_a, len_b)
        } else {
            (len_b, len_a)
        };

        let style = low
            .bundle()
            .get(k)
            .map(|s| *s.style())
            .unwrap_or_default();
        let (hi, lo) = (k.max(e.line), k.min(e.line));
        let first = low.delete_line(hi);
        let second = low.delete_line(lo);
        let delete_quality = low.quality();

        let mut joined = Streamline::new(field, mid.x, mid.y, forward, backward, delta, style);
        let new_quality = low.trial_quality(&mut joined);
        let diff_join = new_quality - *quality;
        let diff_delete = delete_quality - *quality;
        if new_quality < *quality || diff_join < JOIN_RATIO * diff_delete {
            low.add_line(joined);
            *quality = low.quality();
            debug!(forward, backward, quality = *quality, "joined streamlines");
            true
        } else {
            low.add_line(first);
            low.add_line(second);
            *quality = low.quality();
            false
        }
    }
}
