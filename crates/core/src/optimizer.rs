//! Stochastic streamline placement.
//!
//! The optimizer owns the vector field, the current bundle and every
//! setting. [`Optimizer::improve`] is the main loop: each iteration perturbs
//! one random streamline, tries one birth, tries one join and, when
//! quality guidance is on, applies a directed change to one of the worst
//! streamlines. Every change is trialled against the lowpass field and kept
//! only if quality does not get worse (joins get a little slack).
//!
//! The schedules ([`Optimizer::optimize`], [`Optimizer::cascade`],
//! [`Optimizer::tufts`], [`Optimizer::taper_optimize`]) are canned
//! parameter settings around `improve`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::bundle::Bundle;
use crate::clip::clamp_to_screen;
use crate::config::{OptimizerConfig, VisualizationParameters};
use crate::dissolve::Dissolve;
use crate::error::FlowError;
use crate::estimate::{recommend_change, Change, Resize, Sampling};
use crate::field::VectorField;
use crate::lowpass::LowpassField;
use crate::prng::Xorshift64;
use crate::spatial::SpatialHashTable;
use crate::streamline::{End, Streamline, StreamlineStyle};

/// Separation at which the coarse-to-fine schedules start.
const SCHEDULE_START_SEPARATION: f64 = 0.04;
/// Random picks tried before falling back to a scan for unfrozen lines.
const PICK_ATTEMPTS: usize = 32;

/// Cooperative cancellation flag, checked once per optimizer iteration.
///
/// Clones share the flag. Once cancelled it stays cancelled until
/// [`CancelToken::reset`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Counters for the last optimizer run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizerStats {
    pub iterations: usize,
    pub births: usize,
    /// Streamlines removed because deleting them improved quality.
    pub deaths: usize,
    pub joins: usize,
    pub moves_accepted: usize,
    pub initial_quality: f64,
    pub final_quality: f64,
    pub lines: usize,
}

/// What became of a streamline after a move attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    Deleted,
    /// The streamline (moved or restored) now sits at this index.
    Kept(usize),
}

/// Birth sites: a dissolve walk over a grid coarser than the lowpass raster.
struct BirthGrid {
    dissolve: Dissolve,
    xs: usize,
    ys: usize,
}

/// Streamline placement state and driver.
pub struct Optimizer {
    field: VectorField,
    vis: VisualizationParameters,
    cfg: OptimizerConfig,
    rng: Xorshift64,
    bundle: Bundle,
    style: StreamlineStyle,
    cancel: CancelToken,
    stats: OptimizerStats,
}

impl Optimizer {
    /// Creates an optimizer with an empty bundle.
    ///
    /// Returns `FlowError::InvalidParameter` if `cfg` does not validate.
    pub fn new(
        field: VectorField,
        vis: VisualizationParameters,
        cfg: OptimizerConfig,
    ) -> Result<Self, FlowError> {
        cfg.validate()?;
        Ok(Self {
            rng: Xorshift64::new(cfg.seed),
            field,
            vis,
            cfg,
            bundle: Bundle::new(),
            style: StreamlineStyle::default(),
            cancel: CancelToken::new(),
            stats: OptimizerStats::default(),
        })
    }

    // -- accessors --

    pub fn field(&self) -> &VectorField {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut VectorField {
        &mut self.field
    }

    /// Replaces the vector field. Existing streamlines are retraced in it.
    pub fn set_field(&mut self, field: VectorField) {
        self.field = field;
        self.bundle = self.bundle.copy(&self.field);
    }

    pub fn vis(&self) -> &VisualizationParameters {
        &self.vis
    }

    pub fn vis_mut(&mut self) -> &mut VisualizationParameters {
        &mut self.vis
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.cfg
    }

    pub fn config_mut(&mut self) -> &mut OptimizerConfig {
        &mut self.cfg
    }

    /// Restarts the random sequence from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.cfg.seed = seed;
        self.rng = Xorshift64::new(seed);
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }

    pub fn set_bundle(&mut self, bundle: Bundle) {
        self.bundle = bundle;
    }

    pub fn take_bundle(&mut self) -> Bundle {
        std::mem::take(&mut self.bundle)
    }

    /// Style given to every streamline the optimizer creates.
    pub fn style(&self) -> &StreamlineStyle {
        &self.style
    }

    pub fn set_style(&mut self, style: StreamlineStyle) {
        self.style = style;
    }

    /// A handle that stops the running (and any later) loop when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    /// Lowpass field holding a copy of the current bundle.
    pub fn lowpass(&self) -> Result<LowpassField, FlowError> {
        let mut low = LowpassField::new(&self.vis, self.field.aspect(), self.cfg.target_lowpass)?;
        for st in &self.bundle {
            low.insert(st.clone());
        }
        Ok(low)
    }

    // -- single streamlines and simple placement --

    /// Adds one streamline traced `len1` forward and `len2` backward from
    /// (x, y) and returns its index.
    pub fn add_streamline(&mut self, x: f64, y: f64, len1: f64, len2: f64) -> usize {
        let st = Streamline::new(&self.field, x, y, len1, len2, self.cfg.delta_step, self.style);
        self.bundle.add(st)
    }

    fn birth_line(&self, x: f64, y: f64) -> Streamline {
        let len = self.vis.birth_length(x, y);
        Streamline::from_length(&self.field, x, y, len, self.cfg.delta_step, self.style)
    }

    fn jitter(&mut self) -> f64 {
        self.cfg.jitter * self.rng.centered()
    }

    /// Replaces the bundle with streamlines on a jittered `steps x steps`
    /// grid (more rows on tall canvases).
    pub fn square_grid(&mut self, steps: usize) {
        let mut bundle = Bundle::new();
        let n = steps as f64;
        let rows = (n * self.field.aspect()).ceil() as usize;
        for i in 0..steps {
            for j in 0..rows {
                let jx = self.jitter();
                let jy = self.jitter();
                let x = (i as f64 + 0.5 + jx) / n;
                let y = (j as f64 + 0.5 + jy) / n;
                bundle.add(self.birth_line(x, y));
            }
        }
        debug!(lines = bundle.len(), "square grid placed");
        self.bundle = bundle;
    }

    /// Replaces the bundle with streamlines on a jittered hexagonal grid
    /// with spacing `1 / steps`.
    pub fn hexagonal_grid(&mut self, steps: usize) {
        let mut bundle = Bundle::new();
        let n = steps as f64;
        let dist = 1.0 / n;
        let dist3 = dist * 3f64.sqrt() / 2.0;
        let rows = (n * self.field.aspect()).ceil() as usize;
        for i in 0..2 * steps {
            for j in 0..rows {
                let jx = self.jitter();
                let jy = self.jitter();
                let x = dist3 * (0.5 + i as f64 + jx);
                if x >= 1.0 {
                    break;
                }
                let offset = if i % 2 == 1 { 0.25 } else { 0.75 };
                let y = dist * (j as f64 + offset + jy);
                bundle.add(self.birth_line(x, y));
            }
        }
        debug!(lines = bundle.len(), "hexagonal grid placed");
        self.bundle = bundle;
    }

    /// Adds `count` streamlines at uniformly random positions.
    pub fn random_lines(&mut self, count: usize) {
        let aspect = self.field.aspect();
        for _ in 0..count {
            let x = self.rng.uniform();
            let y = self.rng.uniform() * aspect;
            let st = self.birth_line(x, y);
            self.bundle.add(st);
        }
    }

    /// Replaces the bundle with up to `random_place_count` random
    /// streamlines, each kept only if it does not worsen quality.
    pub fn good_random_lines(&mut self) -> Result<OptimizerStats, FlowError> {
        let aspect = self.field.aspect();
        let mut low = LowpassField::new(&self.vis, aspect, self.cfg.target_lowpass)?;
        self.stats = OptimizerStats {
            initial_quality: low.quality(),
            ..OptimizerStats::default()
        };
        for _ in 0..self.cfg.random_place_count {
            let x = self.rng.uniform();
            let y = self.rng.uniform() * aspect;
            let mut st = self.birth_line(x, y);
            if low.trial_quality(&mut st) <= low.quality() {
                low.add_line(st);
                self.stats.births += 1;
            }
        }
        self.stats.final_quality = low.quality();
        self.stats.lines = low.bundle().len();
        self.bundle = low.into_bundle();
        info!(lines = self.stats.lines, quality = self.stats.final_quality, "random placement done");
        Ok(self.stats.clone())
    }

    // -- the main loop --

    /// Runs up to `iterations` rounds of improvement on the current bundle.
    ///
    /// Stops early when the cancel token is set. An empty or fully frozen
    /// bundle is fine: moves are skipped and births can still add lines.
    pub fn improve(&mut self, iterations: usize) -> Result<OptimizerStats, FlowError> {
        self.cfg.validate()?;
        let aspect = self.field.aspect();
        let mut low = LowpassField::new(&self.vis, aspect, self.cfg.target_lowpass)?;
        for st in self.take_bundle() {
            low.insert(st);
        }
        debug!(
            xsize = low.xsize(),
            ysize = low.ysize(),
            lines = low.bundle().len(),
            "lowpass ready"
        );
        self.stats = OptimizerStats {
            initial_quality: low.quality(),
            ..OptimizerStats::default()
        };

        let join_dist = self.vis.max_join_distance();
        let mut joins = if join_dist > 0.0 {
            debug!(join_dist, "join table enabled");
            Some(SpatialHashTable::new(aspect, join_dist)?)
        } else {
            None
        };

        for idx in 0..low.bundle().len() {
            self.estimate_line(&mut low, idx);
        }
        low.bundle_mut().quality_sort();

        let mut births = self.birth_grid(&low);
        if self.cfg.generation > 0 {
            if let Some(grid) = births.as_mut() {
                for _ in 0..grid.xs * grid.ys {
                    self.birth_trial(&mut low, grid);
                }
                debug!(births = self.stats.births, lines = low.bundle().len(), "initial births");
            }
        }

        for _ in 0..iterations {
            if self.cancel.is_cancelled() {
                info!(iterations = self.stats.iterations, "improve cancelled");
                break;
            }
            if let Some(mut pick) = self.pick_unfrozen(low.bundle()) {
                for _ in 0..self.cfg.move_times {
                    match self.move_streamline(&mut low, pick) {
                        MoveOutcome::Deleted => break,
                        MoveOutcome::Kept(idx) => pick = idx,
                    }
                }
            }
            if self.cfg.generation > 0 {
                if let Some(grid) = births.as_mut() {
                    self.birth_trial(&mut low, grid);
                }
            }
            if let Some(table) = joins.as_mut() {
                self.join_trial(&mut low, table);
            }
            if self.cfg.quality_guide {
                self.examine_quality(&mut low);
            }
            self.stats.iterations += 1;
        }

        self.stats.final_quality = low.quality();
        self.stats.lines = low.bundle().len();
        debug_assert!(
            (low.quality() - low.fresh_quality()).abs()
                <= 1e-4 * low.quality().abs().max(1.0),
            "lowpass sum drifted"
        );
        self.bundle = low.into_bundle();
        info!(
            iterations = self.stats.iterations,
            lines = self.stats.lines,
            births = self.stats.births,
            deaths = self.stats.deaths,
            joins = self.stats.joins,
            moves = self.stats.moves_accepted,
            quality = self.stats.final_quality,
            "improve finished"
        );
        Ok(self.stats.clone())
    }

    fn sampling(&self) -> Sampling {
        Sampling::from(&self.cfg)
    }

    /// Refreshes the stored quality and change of the line at `idx`.
    fn estimate_line(&mut self, low: &mut LowpassField, idx: usize) {
        let sampling = self.sampling();
        let Some(st) = low.bundle().get(idx) else {
            return;
        };
        let (quality, change) = low.assess(st, &self.field, &self.vis, &sampling, &mut self.rng);
        if let Some(st) = low.bundle_mut().get_mut(idx) {
            st.quality = quality;
            st.change = change;
        }
    }

    /// Random index of an unfrozen streamline, or `None` if there is none.
    fn pick_unfrozen(&mut self, bundle: &Bundle) -> Option<usize> {
        let n = bundle.len();
        if n == 0 {
            return None;
        }
        for _ in 0..PICK_ATTEMPTS {
            let idx = self.rng.index(n);
            if bundle.get(idx).is_some_and(|st| !st.frozen) {
                return Some(idx);
            }
        }
        let free: Vec<usize> = bundle
            .iter()
            .enumerate()
            .filter(|(_, st)| !st.frozen)
            .map(|(i, _)| i)
            .collect();
        if free.is_empty() {
            None
        } else {
            Some(free[self.rng.index(free.len())])
        }
    }

    fn birth_grid(&self, low: &LowpassField) -> Option<BirthGrid> {
        let xs = (self.cfg.birth_blur * low.xsize() as f64) as usize;
        let ys = (self.cfg.birth_blur * low.ysize() as f64) as usize;
        match Dissolve::new(xs, ys) {
            Ok(dissolve) => Some(BirthGrid { dissolve, xs, ys }),
            Err(err) => {
                debug!(xs, ys, %err, "births disabled");
                None
            }
        }
    }

    /// Tries to add a streamline at the next birth site.
    fn birth_trial(&mut self, low: &mut LowpassField, grid: &mut BirthGrid) -> bool {
        let (a, b) = grid.dissolve.next_position();
        let x = (a as f64 + 0.5) / grid.xs as f64;
        let y = (b as f64 + 0.5) / grid.ys as f64 * self.field.aspect();
        if !low.birth_test(x, y, self.cfg.birth_thresh) {
            return false;
        }
        let mut st = self.birth_line(x, y);
        if low.trial_quality(&mut st) > low.quality() {
            return false;
        }
        let idx = low.add_line(st);
        self.estimate_line(low, idx);
        self.stats.births += 1;
        true
    }

    fn join_trial(&mut self, low: &mut LowpassField, table: &mut SpatialHashTable) {
        let mut quality = low.quality();
        if table.identify_neighbors(low, &self.field, self.cfg.delta_step, &mut quality, &mut self.rng) {
            let idx = low.bundle().len() - 1;
            self.estimate_line(low, idx);
            self.stats.joins += 1;
        }
    }

    /// Directed change to one of the worst eighth of the streamlines, then
    /// a partial refresh of the quality ranking.
    fn examine_quality(&mut self, low: &mut LowpassField) {
        let n = low.bundle().len();
        if n == 0 {
            return;
        }
        let poor = (0.125 * n as f64 * self.rng.uniform()) as usize;
        let change = match low.bundle().get(poor) {
            Some(st) if !st.frozen => recommend_change(st, &mut self.rng),
            _ => return,
        };
        self.make_move(low, poor, change);
        for _ in 0..5 {
            let n = low.bundle().len();
            if n == 0 {
                break;
            }
            let idx = self.rng.index(n);
            self.estimate_line(low, idx);
        }
        low.bundle_mut().sort_passes(2);
    }

    /// Random perturbation of the streamline at `index`, with the kind of
    /// change drawn from the configured odds.
    fn move_streamline(&mut self, low: &mut LowpassField, index: usize) -> MoveOutcome {
        if low.bundle().get(index).map_or(true, |st| st.frozen) {
            return MoveOutcome::Kept(index);
        }
        let odds = self.cfg.odds;
        let pick = self.rng.uniform();
        let (reposition, resize) = if pick < odds.reposition {
            (true, false)
        } else if pick < odds.reposition + odds.resize {
            (false, true)
        } else {
            (true, true)
        };
        let resize = if resize {
            let l = self.cfg.length_odds;
            let pick = self.rng.uniform();
            Some(if pick < l.short_one {
                Resize::Shorten(None)
            } else if pick < l.short_one + l.long_one {
                Resize::Lengthen(None)
            } else if pick < l.short_one + l.long_one + l.short_both {
                Resize::ShortenBoth
            } else if pick < l.short_one + l.long_one + l.short_both + l.long_both {
                Resize::LengthenBoth
            } else {
                Resize::Random
            })
        } else {
            None
        };
        self.make_move(low, index, Change { reposition, resize })
    }

    /// New taper fraction and end length after nudging the taper length of
    /// one end about a random pivot inside the taper.
    fn taper_step(&mut self, taper: f64, len_orig: f64, total: f64) -> (f64, f64) {
        let pivot = self.rng.uniform();
        let mut taper_len = taper * total;
        let anchor = len_orig - pivot * taper_len;
        let dt = if taper_len == 0.0 {
            self.cfg.taper_delta * self.rng.uniform()
        } else {
            self.cfg.taper_delta * 2.0 * self.rng.centered()
        };
        taper_len += dt;
        if taper_len / total > self.cfg.taper_max {
            taper_len = self.cfg.taper_max * total;
        } else if taper_len < 0.0 {
            taper_len = 0.0;
        }
        (taper_len / total, anchor + pivot * taper_len)
    }

    /// Applies `change` to the streamline at `index`.
    ///
    /// The line is removed first; if that alone does not worsen quality it
    /// stays removed. Otherwise a replacement is traced and kept only if it
    /// is no worse than the original, which is restored if not.
    fn make_move(&mut self, low: &mut LowpassField, index: usize, change: Change) -> MoveOutcome {
        if index >= low.bundle().len() {
            return MoveOutcome::Kept(index);
        }
        let quality = low.quality();
        let old = low.delete_line(index);
        if low.quality() <= quality {
            self.stats.deaths += 1;
            return MoveOutcome::Deleted;
        }

        let aspect = self.field.aspect();
        let mut p = old.origin();
        if change.reposition {
            p.x += self.vis.delta_move(p.x, p.y) * self.rng.centered();
            p.y += self.vis.delta_move(p.x, p.y) * self.rng.centered();
        }
        let which_end = match change.end() {
            Some(end) => end,
            None if self.rng.chance(0.5) => End::Head,
            None => End::Tail,
        };

        let (len1_orig, len2_orig) = old.lengths();
        let (mut len1, mut len2) = (len1_orig, len2_orig);
        let head = old.head();
        let tail = old.tail();
        let dl1 = self.vis.delta_length(head.x, head.y);
        let dl2 = self.vis.delta_length(tail.x, tail.y);
        let (mut taper_head, mut taper_tail) = old.taper();
        let mut resize = change.resize;

        let total = len1_orig + len2_orig;
        if self.cfg.taper_max > 0.0 && total > 0.0 && self.rng.chance(0.5) {
            if !old.head_clipped() && self.rng.chance(0.5) {
                (taper_head, len1) = self.taper_step(taper_head, len1_orig, total);
            } else if !old.tail_clipped() {
                (taper_tail, len2) = self.taper_step(taper_tail, len2_orig, total);
            }
            resize = None;
        }

        let shrink = |rng: &mut Xorshift64, orig: f64, dl: f64| {
            let l = orig - dl * rng.uniform();
            if l < 0.0 {
                dl * rng.uniform()
            } else {
                l
            }
        };
        let wobble = |rng: &mut Xorshift64, orig: f64, dl: f64| {
            let l = orig + dl * 2.0 * rng.centered();
            if l < 0.0 {
                dl * rng.uniform()
            } else {
                l
            }
        };
        match resize {
            Some(Resize::LengthenBoth) => {
                len1 = len1_orig + dl1 * self.rng.uniform();
                len2 = len2_orig + dl2 * self.rng.uniform();
            }
            Some(Resize::Lengthen(_)) => match which_end {
                End::Head => len1 = len1_orig + dl1 * self.rng.uniform(),
                End::Tail => len2 = len2_orig + dl2 * self.rng.uniform(),
            },
            Some(Resize::ShortenBoth) => {
                len1 = shrink(&mut self.rng, len1_orig, dl1);
                len2 = shrink(&mut self.rng, len2_orig, dl2);
            }
            Some(Resize::Shorten(_)) => match which_end {
                End::Head => len1 = shrink(&mut self.rng, len1_orig, dl1),
                End::Tail => len2 = shrink(&mut self.rng, len2_orig, dl2),
            },
            Some(Resize::Random) => {
                len1 = wobble(&mut self.rng, len1_orig, dl1);
                len2 = wobble(&mut self.rng, len2_orig, dl2);
            }
            None => {}
        }

        let p = clamp_to_screen(p, aspect);
        let style = StreamlineStyle {
            taper_head,
            taper_tail,
            ..*old.style()
        };
        let mut candidate =
            Streamline::new(&self.field, p.x, p.y, len1, len2, self.cfg.delta_step, style);
        if low.trial_quality(&mut candidate) <= quality {
            let idx = low.add_line(candidate);
            self.estimate_line(low, idx);
            self.stats.moves_accepted += 1;
            MoveOutcome::Kept(idx)
        } else {
            MoveOutcome::Kept(low.add_line(old))
        }
    }

    // -- schedules --

    /// Settings shared by the coarse-to-fine schedules.
    fn schedule_settings(&mut self) {
        self.bundle = Bundle::new();
        self.cfg.quality_guide = true;
        self.cfg.birth_thresh = 0.02;
        self.cfg.birth_blur = 0.7;
        self.cfg.rmove = 0.01;
        self.cfg.taper_max = 0.0;
        self.cfg.taper_delta = 0.0;
        self.cfg.target_lowpass = 1.0;
        self.vis.join_factor = 1.0;
        self.vis.delta_length = 1.125;
    }

    /// Separation, birth length and generation per stage: separation starts
    /// at the target doubled up to the starting separation and halves down
    /// to the target, generation doubles and birth length halves alongside.
    fn stages(sep_target: f64) -> Vec<(f64, f64, i64)> {
        let mut sep = sep_target;
        while sep < SCHEDULE_START_SEPARATION {
            sep *= 2.0;
        }
        let mut gen = 100;
        let mut len = 2.5 * sep;
        let mut stages = vec![(sep, len, gen)];
        while (sep - sep_target).abs() > 1e-4 {
            gen *= 2;
            len *= 0.5;
            sep *= 0.5;
            stages.push((sep, len, gen));
        }
        stages
    }

    fn apply_stage(&mut self, (sep, len, gen): (f64, f64, i64)) -> Result<(), FlowError> {
        self.vis.set_separation(sep)?;
        self.vis.birth_length = len;
        self.cfg.generation = gen;
        Ok(())
    }

    /// Coarse-to-fine placement ending at `sep_target`, with a single
    /// improvement run at the final stage's settings.
    pub fn optimize(&mut self, sep_target: f64, iterations: usize) -> Result<OptimizerStats, FlowError> {
        self.vis.check_separation_range(sep_target, sep_target)?;
        self.schedule_settings();
        let stages = Self::stages(sep_target);
        for stage in &stages {
            self.apply_stage(*stage)?;
        }
        info!(sep_target, stages = stages.len(), "optimize");
        self.improve(iterations)
    }

    /// Coarse-to-fine placement ending at `sep_target`, improving after
    /// every stage.
    pub fn cascade(&mut self, sep_target: f64, iterations: usize) -> Result<OptimizerStats, FlowError> {
        self.vis.check_separation_range(sep_target, sep_target)?;
        self.schedule_settings();
        let mut stats = OptimizerStats::default();
        for stage in Self::stages(sep_target) {
            self.apply_stage(stage)?;
            info!(separation = stage.0, birth_length = stage.1, generation = stage.2, "cascade stage");
            stats = self.improve(iterations)?;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(stats)
    }

    /// Short, evenly spaced streamlines of fixed length: no joins, no
    /// length changes and a lighter target.
    pub fn tufts(&mut self, sep: f64, len: f64, iterations: usize) -> Result<OptimizerStats, FlowError> {
        self.vis.check_separation_range(sep, sep)?;
        self.bundle = Bundle::new();
        self.cfg.quality_guide = true;
        self.cfg.birth_thresh = 0.02;
        self.cfg.birth_blur = 0.7;
        self.cfg.generation = 400;
        self.cfg.rmove = 0.01;
        self.cfg.taper_max = 0.0;
        self.cfg.taper_delta = 0.0;
        self.cfg.target_lowpass = 0.6;
        self.vis.join_factor = 0.0;
        self.vis.delta_length = 0.0;
        self.vis.set_separation(sep)?;
        self.vis.birth_length = len;
        self.improve(iterations)
    }

    /// Improves the current bundle with taper moves enabled and joins off.
    pub fn taper_optimize(&mut self, iterations: usize) -> Result<OptimizerStats, FlowError> {
        self.cfg.taper_max = 0.3;
        self.cfg.taper_delta = 0.1;
        self.cfg.rmove = 0.0;
        self.vis.join_factor = 0.0;
        self.improve(iterations)
    }

    /// Runs `steps` repulsion steps on the current bundle.
    pub fn repel_pass(&mut self, steps: usize) -> Result<(), FlowError> {
        let radius = self.cfg.epsilon * self.cfg.radius_lowpass / self.vis.lowpass_xsize() as f64;
        let mut table = SpatialHashTable::new(self.field.aspect(), radius)?;
        for k in 0..steps {
            if self.cancel.is_cancelled() {
                info!(steps = k, "repel cancelled");
                break;
            }
            self.bundle = table.repel(&self.bundle, &self.field, self.cfg.delta_step, self.cfg.rmove);
        }
        debug!(steps, radius, lines = self.bundle.len(), "repel done");
        Ok(())
    }

    /// Sets every streamline's arrow and intensity from the current style,
    /// keeping each line's taper.
    pub fn restyle(&mut self) {
        let style = self.style;
        let field = &self.field;
        let mut out = Bundle::new();
        for st in self.bundle.iter() {
            let (origin, (l1, l2)) = (st.origin(), st.lengths());
            let mut fresh = Streamline::new(
                field,
                origin.x,
                origin.y,
                l1,
                l2,
                st.step(),
                StreamlineStyle {
                    taper_head: st.style().taper_head,
                    taper_tail: st.style().taper_tail,
                    ..style
                },
            );
            fresh.frozen = st.frozen;
            out.add(fresh);
        }
        self.bundle = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::CANVAS_EPSILON;
    use glam::DVec2;

    fn rotation(size: usize) -> VectorField {
        let mut vf = VectorField::from_fn(size, size, |x, y| (-(y - 0.5), x - 0.5)).unwrap();
        vf.normalize();
        vf
    }

    fn uniform_right() -> VectorField {
        VectorField::from_fn(32, 32, |_, _| (1.0, 0.0)).unwrap()
    }

    fn optimizer(field: VectorField) -> Optimizer {
        Optimizer::new(field, VisualizationParameters::default(), OptimizerConfig::default()).unwrap()
    }

    fn births_config() -> OptimizerConfig {
        OptimizerConfig {
            generation: 1,
            birth_thresh: 0.02,
            birth_blur: 0.7,
            quality_guide: true,
            seed: 17,
            ..OptimizerConfig::default()
        }
    }

    fn assert_on_canvas(b: &Bundle, aspect: f64) {
        for st in b {
            for s in st.samples() {
                let p = s.pos;
                assert!(
                    p.x >= CANVAS_EPSILON
                        && p.x <= 1.0 - CANVAS_EPSILON
                        && p.y >= CANVAS_EPSILON
                        && p.y <= aspect - CANVAS_EPSILON,
                    "sample {p} left the canvas"
                );
            }
        }
    }

    // -- construction --

    #[test]
    fn invalid_config_rejected() {
        let cfg = OptimizerConfig {
            delta_step: 0.0,
            ..OptimizerConfig::default()
        };
        assert!(Optimizer::new(uniform_right(), VisualizationParameters::default(), cfg).is_err());
    }

    #[test]
    fn cancel_token_is_shared() {
        let opt = optimizer(uniform_right());
        let token = opt.cancel_token();
        assert!(!opt.cancel.is_cancelled());
        token.cancel();
        assert!(opt.cancel.is_cancelled());
        token.reset();
        assert!(!opt.cancel.is_cancelled());
    }

    // -- placement --

    #[test]
    fn square_grid_fills_rows_and_columns() {
        let mut opt = optimizer(uniform_right());
        opt.square_grid(5);
        assert_eq!(opt.bundle().len(), 25);
        assert_on_canvas(opt.bundle(), 1.0);
    }

    #[test]
    fn hexagonal_grid_stays_inside() {
        let mut opt = optimizer(uniform_right());
        opt.hexagonal_grid(4);
        let n = opt.bundle().len();
        // columns spaced sqrt(3)/2 apart: 4 / 0.866 rounds up to 5 columns
        assert_eq!(n, 5 * 4);
        assert!(opt.bundle().iter().all(|st| st.origin().x < 1.0));
    }

    #[test]
    fn random_lines_appends() {
        let mut opt = optimizer(rotation(32));
        opt.random_lines(10);
        opt.random_lines(5);
        assert_eq!(opt.bundle().len(), 15);
    }

    #[test]
    fn good_random_lines_never_worsens() {
        let cfg = OptimizerConfig {
            random_place_count: 200,
            ..OptimizerConfig::default()
        };
        let mut opt = Optimizer::new(rotation(32), VisualizationParameters::default(), cfg).unwrap();
        let stats = opt.good_random_lines().unwrap();
        assert!(stats.births > 0);
        assert_eq!(stats.lines, opt.bundle().len());
        assert!(stats.final_quality < stats.initial_quality);
    }

    // -- improve --

    #[test]
    fn improve_on_empty_bundle_without_births_is_a_no_op() {
        let mut opt = optimizer(rotation(32));
        let stats = opt.improve(50).unwrap();
        assert_eq!(stats.iterations, 50);
        assert_eq!(stats.lines, 0);
        assert_eq!(stats.final_quality, stats.initial_quality);
    }

    #[test]
    fn improve_with_all_lines_frozen_keeps_them() {
        let mut opt = optimizer(uniform_right());
        opt.square_grid(3);
        opt.bundle_mut().freeze_all();
        let before: Vec<DVec2> = opt.bundle().iter().map(|st| st.origin()).collect();
        let stats = opt.improve(100).unwrap();
        assert_eq!(stats.moves_accepted + stats.deaths, 0);
        let mut after: Vec<DVec2> = opt.bundle().iter().map(|st| st.origin()).collect();
        let mut before = before;
        let key = |p: &DVec2| (p.x * 1e6) as i64 * 10_000_000 + (p.y * 1e6) as i64;
        before.sort_by_key(key);
        after.sort_by_key(key);
        assert_eq!(before, after);
    }

    #[test]
    fn cancelled_run_stops_immediately() {
        let mut opt = optimizer(rotation(32));
        opt.random_lines(20);
        opt.cancel_token().cancel();
        let stats = opt.improve(1000).unwrap();
        assert_eq!(stats.iterations, 0);
        assert_eq!(opt.bundle().len(), 20);
    }

    #[test]
    fn end_to_end_rotation_placement() {
        let mut opt = Optimizer::new(rotation(64), VisualizationParameters::default(), births_config()).unwrap();
        // the initial birth pass populates the canvas
        let seeded = opt.improve(0).unwrap();
        assert!(seeded.lines >= 20, "only {} lines after births", seeded.lines);
        let stats = opt.improve(2000).unwrap();
        assert_eq!(stats.iterations, 2000);
        assert!(
            stats.final_quality < seeded.final_quality,
            "{} should be below {}",
            stats.final_quality,
            seeded.final_quality
        );
        assert_on_canvas(opt.bundle(), 1.0);
        let low = opt.lowpass().unwrap();
        let rel = (low.quality() - stats.final_quality).abs() / stats.final_quality;
        assert!(rel < 1e-4, "rebuilt quality differs by {rel}");
    }

    #[test]
    fn same_seed_same_result() {
        let run = || {
            let mut opt =
                Optimizer::new(rotation(32), VisualizationParameters::default(), births_config()).unwrap();
            opt.improve(200).unwrap();
            opt.bundle().iter().map(|st| st.origin()).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn joins_happen_with_join_factor() {
        let mut opt = optimizer(uniform_right());
        opt.vis_mut().join_factor = 1.0;
        for k in 0..8 {
            let x = 0.1 + 0.1 * k as f64;
            opt.add_streamline(x, 0.5, 0.04, 0.04);
        }
        let stats = opt.improve(300).unwrap();
        assert!(stats.joins > 0, "{stats:?}");
    }

    // -- moves --

    #[test]
    fn move_never_worsens_quality() {
        let mut opt = optimizer(rotation(32));
        opt.random_lines(40);
        let mut low = opt.lowpass().unwrap();
        opt.bundle = Bundle::new();
        for _ in 0..200 {
            let n = low.bundle().len();
            if n == 0 {
                break;
            }
            let before = low.quality();
            let idx = opt.rng.index(n);
            opt.move_streamline(&mut low, idx);
            assert!(low.quality() <= before + 1e-9 * before.abs());
        }
    }

    #[test]
    fn taper_moves_respect_limit() {
        let mut opt = optimizer(rotation(32));
        opt.config_mut().taper_max = 0.3;
        opt.config_mut().taper_delta = 0.1;
        opt.square_grid(4);
        opt.improve(500).unwrap();
        for st in opt.bundle() {
            let (h, t) = st.taper();
            assert!((0.0..=0.3 + 1e-12).contains(&h) && (0.0..=0.3 + 1e-12).contains(&t), "{h} {t}");
        }
    }

    // -- schedules --

    #[test]
    fn stages_end_at_target() {
        let stages = Optimizer::stages(0.01);
        let seps: Vec<f64> = stages.iter().map(|s| s.0).collect();
        assert_eq!(seps, vec![0.04, 0.02, 0.01]);
        assert_eq!(stages[0].2, 100);
        assert_eq!(stages[2].2, 400);
        assert!((stages[0].1 - 0.1).abs() < 1e-12);
        assert!((stages[2].1 - 0.025).abs() < 1e-12);
        assert_eq!(Optimizer::stages(0.05).len(), 1);
    }

    #[test]
    fn optimize_sets_schedule_parameters() {
        let mut opt = optimizer(rotation(32));
        opt.optimize(0.04, 20).unwrap();
        assert!(opt.config().quality_guide);
        assert_eq!(opt.config().generation, 100);
        assert_eq!(opt.vis().join_factor, 1.0);
        assert!(!opt.bundle().is_empty());
        assert!(opt.optimize(0.0, 1).is_err());
    }

    #[test]
    fn tiny_schedule_target_fails_before_changing_anything() {
        let mut opt = optimizer(rotation(32));
        opt.square_grid(3);
        let before = (opt.config().clone(), opt.vis().separation_extrema());
        assert!(opt.optimize(1e-9, 10).is_err());
        assert!(opt.cascade(1e-9, 10).is_err());
        assert!(opt.tufts(1e-9, 0.05, 10).is_err());
        assert_eq!((opt.config().clone(), opt.vis().separation_extrema()), before);
        assert_eq!(opt.bundle().len(), 9);
    }

    #[test]
    fn tufts_use_fixed_lengths() {
        let mut opt = optimizer(rotation(32));
        opt.tufts(0.08, 0.05, 50).unwrap();
        assert_eq!(opt.config().target_lowpass, 0.6);
        assert_eq!(opt.vis().delta_length, 0.0);
        assert!(!opt.bundle().is_empty());
    }

    #[test]
    fn repel_pass_keeps_line_count() {
        let mut opt = optimizer(rotation(32));
        opt.square_grid(6);
        opt.repel_pass(3).unwrap();
        assert_eq!(opt.bundle().len(), 36);
        assert_on_canvas(opt.bundle(), 1.0);
    }

    #[test]
    fn restyle_applies_intensity() {
        let mut opt = optimizer(uniform_right());
        opt.square_grid(2);
        opt.set_style(StreamlineStyle {
            intensity: 0.4,
            ..StreamlineStyle::default()
        });
        opt.restyle();
        assert!(opt.bundle().iter().all(|st| st.intensity() == 0.4));
    }
}
