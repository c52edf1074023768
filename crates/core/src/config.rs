//! Run configuration: visualization parameters and optimizer settings.
//!
//! [`VisualizationParameters`] owns the separation image and the factors that
//! turn it into filter radii, move distances and lengths at any canvas
//! position. [`OptimizerConfig`] holds the search settings. Both are plain
//! values passed explicitly to the lowpass, estimators and optimizer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::FlowError;
use crate::image::ScalarImage;
use crate::params::{param_bool, param_f64, param_i64, param_usize};

/// Widest lowpass raster, in pixels, a separation may call for.
pub const MAX_LOWPASS_WIDTH: usize = 4096;

/// Spatially varying parameters derived from the separation image.
#[derive(Debug, Clone)]
pub struct VisualizationParameters {
    separation: ScalarImage,
    sep_min: f64,
    sep_max: f64,
    /// Lowpass filter radius (in lowpass pixels) where separation is smallest.
    pub blur_min: f64,
    /// Lowpass pixels per unit of separation, times `blur_min`.
    pub separation_to_blur: f64,
    pub birth_length: f64,
    /// Scale birth length with local separation.
    pub vary_birth_length: bool,
    /// Move jitter, in units of local separation.
    pub delta_move: f64,
    /// Length change, in units of local separation.
    pub delta_length: f64,
    /// Join radius, in units of local separation; 0 disables joins.
    pub join_factor: f64,
    draw_width: Option<ScalarImage>,
    constant_draw_width: f64,
    arrow_length: Option<ScalarImage>,
    constant_arrow_length: f64,
    max_arrow_length: f64,
    /// Pixel size of rendered output when none is given.
    pub image_size: usize,
}

impl Default for VisualizationParameters {
    fn default() -> Self {
        Self {
            separation: ScalarImage::from_raw(4, 40, vec![0.04; 160]),
            sep_min: 0.04,
            sep_max: 0.04,
            blur_min: 2.0,
            separation_to_blur: 1.2,
            birth_length: 0.1,
            vary_birth_length: false,
            delta_move: 0.5,
            delta_length: 1.125,
            join_factor: 0.0,
            draw_width: None,
            constant_draw_width: 1.0,
            arrow_length: None,
            constant_arrow_length: 1.0,
            max_arrow_length: 1.0,
            image_size: 512,
        }
    }
}

impl VisualizationParameters {
    /// Defaults overridden by any of `separation`, `blur_min`,
    /// `separation_to_blur`, `birth_length`, `vary_birth_length`,
    /// `delta_move`, `delta_length`, `join_factor`, `draw_width`,
    /// `arrow_length` and `image_size` present in `params`.
    pub fn from_json(params: &Value) -> Result<Self, FlowError> {
        let d = Self::default();
        let mut vis = Self {
            blur_min: param_f64(params, "blur_min", d.blur_min),
            separation_to_blur: param_f64(params, "separation_to_blur", d.separation_to_blur),
            birth_length: param_f64(params, "birth_length", d.birth_length),
            vary_birth_length: param_bool(params, "vary_birth_length", d.vary_birth_length),
            delta_move: param_f64(params, "delta_move", d.delta_move),
            delta_length: param_f64(params, "delta_length", d.delta_length),
            join_factor: param_f64(params, "join_factor", d.join_factor),
            image_size: param_usize(params, "image_size", d.image_size),
            ..d
        };
        vis.set_separation(param_f64(params, "separation", 0.04))?;
        vis.set_draw_width(param_f64(params, "draw_width", 1.0));
        vis.set_arrow_length(param_f64(params, "arrow_length", 1.0));
        if vis.blur_min <= 0.0 {
            return Err(FlowError::invalid("blur_min", "must be positive"));
        }
        Ok(vis)
    }

    /// Scalar settings as JSON (images are summarized by their extrema).
    pub fn to_json(&self) -> Value {
        json!({
            "separation_min": self.sep_min,
            "separation_max": self.sep_max,
            "blur_min": self.blur_min,
            "separation_to_blur": self.separation_to_blur,
            "birth_length": self.birth_length,
            "vary_birth_length": self.vary_birth_length,
            "delta_move": self.delta_move,
            "delta_length": self.delta_length,
            "join_factor": self.join_factor,
            "draw_width_varies": self.draw_width.is_some(),
            "arrow_length_varies": self.arrow_length.is_some(),
            "image_size": self.image_size,
        })
    }

    // -- separation --

    /// Constant separation everywhere.
    pub fn set_separation(&mut self, sep: f64) -> Result<(), FlowError> {
        self.check_separation_range(sep, sep)?;
        self.separation.fill(sep);
        self.sep_min = sep;
        self.sep_max = sep;
        Ok(())
    }

    /// Separation taken from an image covering the canvas.
    pub fn set_variable_separation(&mut self, image: &ScalarImage) -> Result<(), FlowError> {
        let (lo, hi) = image.extrema();
        self.check_separation_range(lo, hi)?;
        self.separation = image.clone();
        self.sep_min = lo;
        self.sep_max = hi;
        Ok(())
    }

    /// Rejects separations whose lowpass raster or filter radius would
    /// exceed [`MAX_LOWPASS_WIDTH`] pixels.
    pub fn check_separation_range(&self, lo: f64, hi: f64) -> Result<(), FlowError> {
        if lo.is_nan() || lo <= 0.0 {
            return Err(FlowError::invalid("separation", format!("minimum {lo} must be positive")));
        }
        if !hi.is_finite() {
            return Err(FlowError::invalid("separation", format!("maximum {hi} must be finite")));
        }
        let limit = MAX_LOWPASS_WIDTH as f64;
        let width = self.separation_to_blur * self.blur_min / lo;
        if !(width <= limit) {
            return Err(FlowError::invalid(
                "separation",
                format!("{lo} needs a {width:.0} pixel lowpass raster (limit {MAX_LOWPASS_WIDTH})"),
            ));
        }
        let radius = self.blur_min * hi / lo;
        if !(radius <= limit) {
            return Err(FlowError::invalid(
                "separation",
                format!("range {lo}..{hi} gives a {radius:.0} pixel filter radius (limit {MAX_LOWPASS_WIDTH})"),
            ));
        }
        Ok(())
    }

    pub fn separation(&self, x: f64, y: f64) -> f64 {
        self.separation.get_value(x, y)
    }

    /// Smallest and largest separation.
    pub fn separation_extrema(&self) -> (f64, f64) {
        (self.sep_min, self.sep_max)
    }

    // -- derived quantities --

    /// Lowpass raster width: `floor(separation_to_blur * blur_min / sep_min)`.
    pub fn lowpass_xsize(&self) -> usize {
        (self.separation_to_blur * self.blur_min / self.sep_min).floor().max(1.0) as usize
    }

    /// Lowpass raster height for a canvas of the given aspect.
    pub fn lowpass_ysize(&self, aspect: f64) -> usize {
        (self.separation_to_blur * self.blur_min / self.sep_min * aspect)
            .floor()
            .max(1.0) as usize
    }

    /// Lowpass filter radius in lowpass pixels at (x, y).
    pub fn blur_radius(&self, x: f64, y: f64) -> f64 {
        self.blur_min * self.separation(x, y) / self.sep_min
    }

    pub fn birth_length(&self, x: f64, y: f64) -> f64 {
        if self.vary_birth_length {
            self.birth_length * self.separation(x, y) / self.sep_min
        } else {
            self.birth_length
        }
    }

    pub fn delta_move(&self, x: f64, y: f64) -> f64 {
        self.delta_move * self.separation(x, y)
    }

    pub fn delta_length(&self, x: f64, y: f64) -> f64 {
        self.delta_length * self.separation(x, y)
    }

    pub fn join_distance(&self, x: f64, y: f64) -> f64 {
        self.separation(x, y) * self.join_factor * self.separation_to_blur
    }

    /// Largest join radius anywhere on the canvas; 0 disables joining.
    pub fn max_join_distance(&self) -> f64 {
        self.sep_max * self.join_factor * self.separation_to_blur
    }

    // -- drawing controls --

    pub fn set_draw_width(&mut self, w: f64) {
        self.draw_width = None;
        self.constant_draw_width = w;
    }

    /// Draw width from `image` remapped onto [min, max].
    pub fn set_variable_draw_width(&mut self, image: &ScalarImage, min: f64, max: f64) {
        let mut img = image.clone();
        img.remap(min, max);
        self.draw_width = Some(img);
    }

    pub fn draw_width(&self, x: f64, y: f64) -> f64 {
        match &self.draw_width {
            Some(img) => img.get_value(x, y),
            None => self.constant_draw_width,
        }
    }

    pub fn draw_width_varies(&self) -> bool {
        self.draw_width.is_some()
    }

    pub fn set_arrow_length(&mut self, len: f64) {
        self.arrow_length = None;
        self.constant_arrow_length = len;
        self.max_arrow_length = len;
    }

    /// Arrow length from `image` remapped onto [min, max].
    pub fn set_variable_arrow_length(&mut self, image: &ScalarImage, min: f64, max: f64) {
        let mut img = image.clone();
        img.remap(min, max);
        self.arrow_length = Some(img);
        self.max_arrow_length = max;
    }

    pub fn arrow_length(&self, x: f64, y: f64) -> f64 {
        match &self.arrow_length {
            Some(img) => img.get_value(x, y),
            None => self.constant_arrow_length,
        }
    }

    pub fn max_arrow_length(&self) -> f64 {
        self.max_arrow_length
    }

    pub fn arrow_length_varies(&self) -> bool {
        self.arrow_length.is_some()
    }
}

/// Relative odds of the three perturbation families.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeOdds {
    pub reposition: f64,
    pub resize: f64,
    pub both: f64,
}

impl Default for ChangeOdds {
    fn default() -> Self {
        Self {
            reposition: 0.0,
            resize: 0.0,
            both: 1.0,
        }
    }
}

impl ChangeOdds {
    /// Scales the odds to sum to 1. All-zero odds become the default.
    pub fn normalized(self) -> Self {
        let sum = self.reposition + self.resize + self.both;
        if !(sum > 0.0) {
            return Self::default();
        }
        Self {
            reposition: self.reposition / sum,
            resize: self.resize / sum,
            both: self.both / sum,
        }
    }
}

/// Relative odds of the length-change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LengthOdds {
    /// Random growth or shrink of both ends.
    pub all: f64,
    pub long_both: f64,
    pub short_both: f64,
    pub long_one: f64,
    pub short_one: f64,
}

impl Default for LengthOdds {
    fn default() -> Self {
        Self {
            all: 1.0,
            long_both: 0.0,
            short_both: 0.0,
            long_one: 0.0,
            short_one: 0.0,
        }
    }
}

impl LengthOdds {
    /// Scales the odds to sum to 1. All-zero odds become the default.
    pub fn normalized(self) -> Self {
        let sum = self.all + self.long_both + self.short_both + self.long_one + self.short_one;
        if !(sum > 0.0) {
            return Self::default();
        }
        Self {
            all: self.all / sum,
            long_both: self.long_both / sum,
            short_both: self.short_both / sum,
            long_one: self.long_one / sum,
            short_one: self.short_one / sum,
        }
    }
}

/// Search settings for the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Desired lowpass intensity everywhere.
    pub target_lowpass: f64,
    /// Lowpass filter radius used for repulsion.
    pub radius_lowpass: f64,
    /// Perturbation attempts per selected streamline per iteration.
    pub move_times: usize,
    /// Births are tried only where the lowpass is below this.
    pub birth_thresh: f64,
    /// Birth grid resolution relative to the lowpass raster.
    pub birth_blur: f64,
    /// Birth trials are enabled when positive.
    pub generation: i64,
    /// Repulsion step factor.
    pub rmove: f64,
    pub random_place_count: usize,
    /// Grid placement jitter, in cells.
    pub jitter: f64,
    /// Repulsion radius factor.
    pub epsilon: f64,
    /// Arclength step between streamline samples.
    pub delta_step: f64,
    pub quality_guide: bool,
    /// Largest taper, as a fraction of streamline length; 0 disables taper moves.
    pub taper_max: f64,
    pub taper_delta: f64,
    pub sample_number: usize,
    pub sample_radius: f64,
    pub sample_endpoint_distance: f64,
    pub odds: ChangeOdds,
    pub length_odds: LengthOdds,
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            target_lowpass: 1.0,
            radius_lowpass: 2.0,
            move_times: 1,
            birth_thresh: 0.0,
            birth_blur: 1.0,
            generation: -1,
            rmove: 0.01,
            random_place_count: 300,
            jitter: 0.0,
            epsilon: 0.1,
            delta_step: 0.005,
            quality_guide: false,
            taper_max: 0.0,
            taper_delta: 0.0,
            sample_number: 10,
            sample_radius: 1.0,
            sample_endpoint_distance: 3.0,
            odds: ChangeOdds::default(),
            length_odds: LengthOdds::default(),
            seed: 1,
        }
    }
}

impl OptimizerConfig {
    /// Defaults overridden per key by `params`; odds are read from the
    /// `odds_move`, `odds_len`, `odds_both` and `odds_all_len`,
    /// `odds_long_both`, `odds_short_both`, `odds_long_one`,
    /// `odds_short_one` keys and normalized.
    pub fn from_json(params: &Value) -> Result<Self, FlowError> {
        let d = Self::default();
        let cfg = Self {
            target_lowpass: param_f64(params, "target_lowpass", d.target_lowpass),
            radius_lowpass: param_f64(params, "radius_lowpass", d.radius_lowpass),
            move_times: param_usize(params, "move_times", d.move_times),
            birth_thresh: param_f64(params, "birth_thresh", d.birth_thresh),
            birth_blur: param_f64(params, "birth_blur", d.birth_blur),
            generation: param_i64(params, "generation", d.generation),
            rmove: param_f64(params, "rmove", d.rmove),
            random_place_count: param_usize(params, "random_place_count", d.random_place_count),
            jitter: param_f64(params, "jitter", d.jitter),
            epsilon: param_f64(params, "epsilon", d.epsilon),
            delta_step: param_f64(params, "delta_step", d.delta_step),
            quality_guide: param_bool(params, "quality_guide", d.quality_guide),
            taper_max: param_f64(params, "taper_max", d.taper_max),
            taper_delta: param_f64(params, "taper_delta", d.taper_delta),
            sample_number: param_usize(params, "sample_number", d.sample_number),
            sample_radius: param_f64(params, "sample_radius", d.sample_radius),
            sample_endpoint_distance: param_f64(
                params,
                "sample_endpoint_distance",
                d.sample_endpoint_distance,
            ),
            odds: ChangeOdds {
                reposition: param_f64(params, "odds_move", d.odds.reposition),
                resize: param_f64(params, "odds_len", d.odds.resize),
                both: param_f64(params, "odds_both", d.odds.both),
            }
            .normalized(),
            length_odds: LengthOdds {
                all: param_f64(params, "odds_all_len", d.length_odds.all),
                long_both: param_f64(params, "odds_long_both", d.length_odds.long_both),
                short_both: param_f64(params, "odds_short_both", d.length_odds.short_both),
                long_one: param_f64(params, "odds_long_one", d.length_odds.long_one),
                short_one: param_f64(params, "odds_short_one", d.length_odds.short_one),
            }
            .normalized(),
            seed: params
                .get("seed")
                .and_then(Value::as_u64)
                .unwrap_or(d.seed),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings the optimizer cannot run with.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.delta_step.is_nan() || self.delta_step <= 0.0 {
            return Err(FlowError::invalid("delta_step", "must be positive"));
        }
        if self.target_lowpass.is_nan() || self.target_lowpass < 0.0 {
            return Err(FlowError::invalid("target_lowpass", "must be non-negative"));
        }
        if self.birth_blur.is_nan() || self.birth_blur < 0.0 {
            return Err(FlowError::invalid("birth_blur", "must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- visualization parameters --

    #[test]
    fn default_lowpass_size_is_sixty() {
        let vis = VisualizationParameters::default();
        assert_eq!(vis.lowpass_xsize(), 60);
        assert_eq!(vis.lowpass_ysize(1.0), 60);
        assert_eq!(vis.lowpass_ysize(0.5), 30);
    }

    #[test]
    fn halving_separation_doubles_lowpass() {
        let mut vis = VisualizationParameters::default();
        vis.set_separation(0.02).unwrap();
        assert_eq!(vis.lowpass_xsize(), 120);
        assert!((vis.blur_radius(0.5, 0.5) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn non_positive_separation_rejected() {
        let mut vis = VisualizationParameters::default();
        assert!(vis.set_separation(0.0).is_err());
        assert!(vis.set_separation(-1.0).is_err());
        assert_eq!(vis.separation_extrema(), (0.04, 0.04));
    }

    #[test]
    fn tiny_separation_rejected() {
        let mut vis = VisualizationParameters::default();
        assert!(vis.set_separation(1e-9).is_err());
        assert!(vis.set_separation(1e-5).is_err());
        assert!(vis.set_separation(f64::INFINITY).is_err());
        assert_eq!(vis.separation_extrema(), (0.04, 0.04));
        assert_eq!(vis.lowpass_xsize(), 60);
    }

    #[test]
    fn separation_at_width_limit_accepted() {
        let mut vis = VisualizationParameters::default();
        let sep = 2.4 / MAX_LOWPASS_WIDTH as f64;
        vis.set_separation(sep * 1.001).unwrap();
        assert!(vis.lowpass_xsize() <= MAX_LOWPASS_WIDTH);
        assert!(vis.set_separation(sep * 0.999).is_err());
    }

    #[test]
    fn variable_separation_range_is_bounded() {
        let mut vis = VisualizationParameters::default();
        let mut img = ScalarImage::ramp();
        img.remap(1e-9, 0.04);
        assert!(vis.set_variable_separation(&img).is_err());
        // Lowpass width fits but the filter radius at the widest spot does not.
        img.remap(0.01, 1e5);
        assert!(vis.set_variable_separation(&img).is_err());
        assert_eq!(vis.separation_extrema(), (0.04, 0.04));
    }

    #[test]
    fn variable_separation_scales_blur_radius() {
        let mut vis = VisualizationParameters::default();
        let mut img = ScalarImage::ramp();
        img.remap(0.02, 0.04);
        vis.set_variable_separation(&img).unwrap();
        assert_eq!(vis.separation_extrema(), (0.02, 0.04));
        assert!((vis.blur_radius(1.0, 0.5) - 4.0).abs() < 1e-9);
        assert!((vis.max_join_distance() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn birth_length_varies_only_when_enabled() {
        let mut vis = VisualizationParameters::default();
        let mut img = ScalarImage::ramp();
        img.remap(0.02, 0.04);
        vis.set_variable_separation(&img).unwrap();
        assert!((vis.birth_length(1.0, 0.5) - 0.1).abs() < 1e-12);
        vis.vary_birth_length = true;
        assert!((vis.birth_length(1.0, 0.5) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn join_distance_uses_factor() {
        let mut vis = VisualizationParameters::default();
        vis.join_factor = 0.5;
        assert!((vis.join_distance(0.3, 0.3) - 0.04 * 0.5 * 1.2).abs() < 1e-12);
        assert!((vis.max_join_distance() - 0.024).abs() < 1e-12);
    }

    #[test]
    fn arrow_length_image_remaps() {
        let mut vis = VisualizationParameters::default();
        vis.set_variable_arrow_length(&ScalarImage::ramp(), 0.01, 0.05);
        assert!(vis.arrow_length_varies());
        assert!((vis.arrow_length(1.0, 0.5) - 0.05).abs() < 1e-9);
        assert!((vis.max_arrow_length() - 0.05).abs() < 1e-12);
        vis.set_arrow_length(0.03);
        assert!(!vis.arrow_length_varies());
    }

    #[test]
    fn vis_from_json_overrides() {
        let vis = VisualizationParameters::from_json(&json!({
            "separation": 0.05, "join_factor": 1.0, "vary_birth_length": true
        }))
        .unwrap();
        assert_eq!(vis.separation_extrema(), (0.05, 0.05));
        assert!(vis.vary_birth_length);
        assert_eq!(vis.to_json()["join_factor"], json!(1.0));
    }

    // -- optimizer config --

    #[test]
    fn optimizer_defaults() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.generation, -1);
        assert_eq!(cfg.random_place_count, 300);
        assert!((cfg.delta_step - 0.005).abs() < 1e-15);
        assert!(!cfg.quality_guide);
    }

    #[test]
    fn optimizer_from_json_normalizes_odds() {
        let cfg = OptimizerConfig::from_json(&json!({"odds_move": 2, "odds_len": 1, "odds_both": 1}))
            .unwrap();
        assert!((cfg.odds.reposition - 0.5).abs() < 1e-12);
        assert!((cfg.odds.both - 0.25).abs() < 1e-12);
    }

    #[test]
    fn zero_odds_fall_back_to_defaults() {
        let odds = ChangeOdds { reposition: 0.0, resize: 0.0, both: 0.0 }.normalized();
        assert_eq!(odds, ChangeOdds::default());
    }

    #[test]
    fn bad_delta_step_rejected() {
        let err = OptimizerConfig::from_json(&json!({"delta_step": 0.0})).unwrap_err();
        assert!(err.to_string().contains("delta_step"), "got: {err}");
    }

    #[test]
    fn config_serde_round_trip() {
        let mut cfg = OptimizerConfig::default();
        cfg.quality_guide = true;
        cfg.seed = 99;
        let text = serde_json::to_string(&cfg).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cfg);
        let partial: OptimizerConfig = serde_json::from_str(r#"{"jitter": 0.5}"#).unwrap();
        assert!((partial.jitter - 0.5).abs() < 1e-12);
        assert_eq!(partial.move_times, 1);
    }
}
