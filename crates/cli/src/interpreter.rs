//! Line-oriented command interpreter.
//!
//! One command per line with whitespace-separated arguments. `#` and `!`
//! start comments. Missing numeric arguments read as 0, which most commands
//! treat as "use the default". A malformed or failing line is reported and
//! skipped; the script keeps going.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::SplitWhitespace;

use flowline_core::field_source::FieldKind;
use flowline_core::{
    ArrowStyle, Bundle, DashStyle, FlowError, Integrator, LineDrawable, Optimizer, OptimizerConfig,
    OptimizerStats, ScalarImage, Streamline, StreamlineStyle, VectorField, VisualizationParameters,
    Xorshift64,
};
use flowline_render::{write_pgm, PostScriptPicture, RasterPicture};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::CliError;

/// Iterations or steps used when a command is given 0 or no count.
const RUN_UNTIL_DONE: usize = 999_999;
/// Repulsion steps run by a bare `repel`.
const DEFAULT_REPEL_STEPS: usize = 10;
/// Grid size used by `squares` and `hexagons` until one is given.
const DEFAULT_GRID: usize = 40;
/// Register size used by `fnoise` when none is given.
const DEFAULT_NOISE_SIZE: usize = 64;
/// Filter radius of `frender` and `pgm` renders.
const RENDER_RADIUS: f64 = 2.0;
/// Upper clamp of register and render PGMs.
const RENDER_MAX: f64 = 1.1;

/// Every command with its argument summary, for `list` and help output.
pub const COMMANDS: &[(&str, &str)] = &[
    ("vload", "file"),
    ("vsave", "file (resolution)"),
    ("vflip", ""),
    ("hflip", ""),
    ("xyswap", ""),
    ("vscale", "x y"),
    ("vrotate", "degrees"),
    ("vcut", "xorg yorg size"),
    ("vstretch", "xmag"),
    ("vnormalize", ""),
    ("vsource", "name (resolution) (json)"),
    ("gradient", ""),
    ("euler", ""),
    ("midpoint", ""),
    ("streamline", "x y len1 len2 (taper_tail taper_head)"),
    ("squares", "(num_across)"),
    ("hexagons", "(num_across)"),
    ("jitter", "value"),
    ("random_lines", "(count)"),
    ("good_lines", ""),
    ("improve_lines", "(iterations)"),
    ("optimize", "separation (iterations)"),
    ("cascade", "separation (iterations)"),
    ("tufts", "separation length (iterations)"),
    ("repel", "(steps)"),
    ("taper_optimize", "(iterations)"),
    ("target_lowpass", "value"),
    ("separation", "value"),
    ("radius", "value"),
    ("length", "value"),
    ("vlength", "off/on"),
    ("dlen", "value"),
    ("jtimes", "value"),
    ("birth_thresh", "value"),
    ("birth_blur", "value"),
    ("generation", "value"),
    ("join_factor", "value"),
    ("rmove", "value"),
    ("epsilon", "value"),
    ("rplace", "value"),
    ("sradius", "value"),
    ("end_dist", "value"),
    ("nsamples", "value"),
    ("mtaper", "max"),
    ("dtaper", "delta"),
    ("odds", "move length both"),
    ("lodds", "all long_both short_both long_one short_one"),
    ("seed", "value"),
    ("quality_guide", "off/on"),
    ("freeze", ""),
    ("unfreeze", ""),
    ("bclear", ""),
    ("intensity", "value"),
    ("taper", "tail head"),
    ("arrow", "type(0 none, 1 open, 2 solid) length width"),
    ("pgm", "file (size)"),
    ("png", "file (size)"),
    ("postscript", "file"),
    ("pdashes", "length separation arrow_length arrow_width file"),
    ("write_streamlines", "file"),
    ("read_streamlines", "file"),
    ("wlowpass", "min max file"),
    ("fload", "file"),
    ("fsave", "file"),
    ("fsavepgm", "file"),
    ("fconstant", ""),
    ("framp", ""),
    ("fnoise", "size blur_steps"),
    ("fmap", "min max"),
    ("fflip", ""),
    ("fbias", "value"),
    ("fgain", "value"),
    ("fblur", "steps"),
    ("fseparation", ""),
    ("fwidth", "min max"),
    ("flength", "min max"),
    ("fmagnitude", "file"),
    ("fcombine", ""),
    ("frender", "(radius)"),
    ("quit", ""),
];

/// Whether the script should keep going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Counts from a whole script run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptSummary {
    pub commands: usize,
    pub errors: usize,
    pub lines: usize,
    pub last_run: Option<OptimizerStats>,
}

/// Cursor over the arguments of one command line.
struct Args<'a> {
    command: &'a str,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn bad(&self, what: &str, token: &str) -> CliError {
        CliError::command(self.command, format!("bad {what} '{token}'"))
    }

    /// Next number, 0 when absent.
    fn real(&mut self) -> Result<f64, CliError> {
        match self.tokens.next() {
            None => Ok(0.0),
            Some(t) => t.parse().map_err(|_| self.bad("number", t)),
        }
    }

    /// Next non-negative integer, 0 when absent.
    fn count(&mut self) -> Result<usize, CliError> {
        match self.tokens.next() {
            None => Ok(0),
            Some(t) => t.parse().map_err(|_| self.bad("count", t)),
        }
    }

    fn integer(&mut self) -> Result<i64, CliError> {
        match self.tokens.next() {
            None => Ok(0),
            Some(t) => t.parse().map_err(|_| self.bad("integer", t)),
        }
    }

    /// `on`/`off` (also `1`/`0`, `true`/`false`); absent means off.
    fn flag(&mut self) -> Result<bool, CliError> {
        match self.tokens.next() {
            None => Ok(false),
            Some("on" | "1" | "true" | "yes") => Ok(true),
            Some("off" | "0" | "false" | "no") => Ok(false),
            Some(t) => Err(self.bad("flag", t)),
        }
    }

    fn word(&mut self, what: &str) -> Result<&'a str, CliError> {
        self.tokens
            .next()
            .ok_or_else(|| CliError::command(self.command, format!("missing {what}")))
    }

    /// Everything left on the line, joined by single spaces.
    fn rest(&mut self) -> String {
        self.tokens.by_ref().collect::<Vec<_>>().join(" ")
    }
}

fn or_default(n: usize, default: usize) -> usize {
    if n == 0 {
        default
    } else {
        n
    }
}

/// Interpreter state: the optimizer (which owns the field, bundle and
/// parameters) plus the scalar register and drawing settings.
pub struct Session {
    opt: Optimizer,
    has_field: bool,
    register: ScalarImage,
    dash: DashStyle,
    image_size: usize,
    grid_num: usize,
    rng: Xorshift64,
    last_run: Option<OptimizerStats>,
}

impl Session {
    pub fn new(vis: VisualizationParameters, cfg: OptimizerConfig) -> Result<Self, FlowError> {
        let seed = cfg.seed;
        let image_size = vis.image_size;
        Ok(Self {
            opt: Optimizer::new(VectorField::new(2, 2)?, vis, cfg)?,
            has_field: false,
            register: ScalarImage::constant(),
            dash: DashStyle::default(),
            image_size,
            grid_num: DEFAULT_GRID,
            rng: Xorshift64::new(seed),
            last_run: None,
        })
    }

    /// Session parameters from a `--params` JSON object.
    pub fn from_json(params: &Value) -> Result<Self, FlowError> {
        Self::new(
            VisualizationParameters::from_json(params)?,
            OptimizerConfig::from_json(params)?,
        )
    }

    /// Installs a vector field, retracing any existing streamlines in it.
    pub fn set_field(&mut self, field: VectorField) {
        self.opt.set_field(field);
        self.has_field = true;
    }

    #[cfg(test)]
    pub fn bundle(&self) -> &Bundle {
        self.opt.bundle()
    }

    #[cfg(test)]
    pub fn optimizer(&self) -> &Optimizer {
        &self.opt
    }

    #[cfg(test)]
    pub fn register(&self) -> &ScalarImage {
        &self.register
    }

    #[cfg(test)]
    pub fn last_run(&self) -> Option<&OptimizerStats> {
        self.last_run.as_ref()
    }

    fn require_field(&self) -> Result<(), CliError> {
        if self.has_field {
            Ok(())
        } else {
            Err(FlowError::EmptyField.into())
        }
    }

    fn aspect(&self) -> f64 {
        self.opt.field().aspect()
    }

    fn record(&mut self, stats: OptimizerStats) {
        info!(
            lines = stats.lines,
            quality = stats.final_quality,
            iterations = stats.iterations,
            "optimizer run"
        );
        self.last_run = Some(stats);
    }

    /// Runs every line of `reader`, skipping (and counting) failures.
    pub fn run_script<R: BufRead>(&mut self, reader: R) -> Result<ScriptSummary, CliError> {
        let mut summary = ScriptSummary::default();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            match self.execute(&line) {
                Ok(Flow::Quit) => {
                    summary.commands += 1;
                    break;
                }
                Ok(Flow::Continue) => {
                    if is_command(&line) {
                        summary.commands += 1;
                    }
                }
                Err(e) => {
                    warn!(line = n + 1, error = %e, "command skipped");
                    summary.errors += 1;
                }
            }
        }
        summary.lines = self.opt.bundle().len();
        summary.last_run = self.last_run.clone();
        Ok(summary)
    }

    /// Executes one command line.
    pub fn execute(&mut self, line: &str) -> Result<Flow, CliError> {
        let text = strip_comment(line);
        let mut tokens = text.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(Flow::Continue);
        };
        let mut args = Args { command, tokens };
        debug!(command, "execute");
        match command {
            // -- vector field --
            "vload" => {
                let mut field = VectorField::read(args.word("file name")?)?;
                self.register = field.magnitude();
                field.normalize();
                self.set_field(field);
            }
            "vsave" => {
                self.require_field()?;
                let path = args.word("file name")?;
                match args.count()? {
                    0 => self.opt.field().write(path)?,
                    res => self.opt.field().resample(res)?.write(path)?,
                }
            }
            "vflip" => {
                self.require_field()?;
                self.opt.field_mut().flip_vertical();
            }
            "hflip" => {
                self.require_field()?;
                self.opt.field_mut().flip_horizontal();
            }
            "xyswap" => {
                self.require_field()?;
                self.opt.field_mut().swap_xy();
            }
            "vscale" => {
                self.require_field()?;
                let (x, y) = (args.real()?, args.real()?);
                self.opt.field_mut().scale(x, y);
            }
            "vrotate" => {
                self.require_field()?;
                let degrees = args.real()?;
                self.opt.field_mut().rotate(degrees);
            }
            "vcut" => {
                self.require_field()?;
                let (x0, y0, size) = (args.count()?, args.count()?, args.count()?);
                let cut = self.opt.field().cut(x0, y0, size)?;
                self.set_field(cut);
            }
            "vstretch" => {
                self.require_field()?;
                let stretched = self.opt.field().stretch(args.real()?)?;
                self.set_field(stretched);
            }
            "vnormalize" => {
                self.require_field()?;
                self.opt.field_mut().normalize();
            }
            "vsource" => {
                let name = args.word("source name")?;
                let res = or_default(args.count()?, 64);
                let rest = args.rest();
                let params: Value = if rest.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&rest)
                        .map_err(|e| CliError::command("vsource", format!("invalid JSON: {e}")))?
                };
                let kind = FieldKind::from_name(name, &params, self.opt.config().seed)?;
                let mut field = VectorField::from_source(res, res, &kind)?;
                self.register = field.magnitude();
                field.normalize();
                self.set_field(field);
            }
            "gradient" => {
                let field = VectorField::gradient_of(&self.register)?;
                self.set_field(field);
            }
            "euler" => self.opt.field_mut().set_integrator(Integrator::Euler),
            "midpoint" => self.opt.field_mut().set_integrator(Integrator::Midpoint),

            // -- placement --
            "streamline" => {
                self.require_field()?;
                let (x, y, len1, len2) = (args.real()?, args.real()?, args.real()?, args.real()?);
                let (tail, head) = (args.real()?, args.real()?);
                let style = StreamlineStyle {
                    taper_head: head,
                    taper_tail: tail,
                    ..*self.opt.style()
                };
                let step = self.opt.config().delta_step;
                let st = Streamline::new(self.opt.field(), x, y, len1, len2, step, style);
                self.opt.bundle_mut().add(st);
            }
            "squares" | "hexagons" => {
                self.require_field()?;
                self.grid_num = or_default(args.count()?, self.grid_num);
                if command == "squares" {
                    self.opt.square_grid(self.grid_num);
                } else {
                    self.opt.hexagonal_grid(self.grid_num);
                }
            }
            "jitter" => self.opt.config_mut().jitter = args.real()?,
            "random_lines" => {
                self.require_field()?;
                let n = or_default(args.count()?, self.opt.config().random_place_count);
                self.opt.random_lines(n);
            }
            "good_lines" => {
                self.require_field()?;
                let stats = self.opt.good_random_lines()?;
                self.record(stats);
            }
            "improve_lines" => {
                self.require_field()?;
                let n = or_default(args.count()?, RUN_UNTIL_DONE);
                let stats = self.opt.improve(n)?;
                self.record(stats);
            }
            "optimize" | "cascade" => {
                self.require_field()?;
                let sep = args.real()?;
                let n = or_default(args.count()?, RUN_UNTIL_DONE);
                let stats = if command == "optimize" {
                    self.opt.optimize(sep, n)?
                } else {
                    self.opt.cascade(sep, n)?
                };
                self.record(stats);
            }
            "tufts" => {
                self.require_field()?;
                let (sep, len) = (args.real()?, args.real()?);
                let n = or_default(args.count()?, RUN_UNTIL_DONE);
                let stats = self.opt.tufts(sep, len, n)?;
                self.record(stats);
            }
            "repel" => {
                self.require_field()?;
                let n = or_default(args.count()?, DEFAULT_REPEL_STEPS);
                self.opt.repel_pass(n)?;
            }
            "taper_optimize" => {
                self.require_field()?;
                let n = or_default(args.count()?, RUN_UNTIL_DONE);
                let stats = self.opt.taper_optimize(n)?;
                self.record(stats);
            }

            // -- parameters --
            "target_lowpass" => self.opt.config_mut().target_lowpass = args.real()?,
            "separation" => self.opt.vis_mut().set_separation(args.real()?)?,
            "radius" => {
                let r = args.real()?;
                if !(r > 0.0) {
                    return Err(FlowError::invalid("radius", "must be positive").into());
                }
                self.opt.config_mut().radius_lowpass = r;
                self.opt.vis_mut().blur_min = r;
            }
            "length" => self.opt.vis_mut().birth_length = args.real()?,
            "vlength" => self.opt.vis_mut().vary_birth_length = args.flag()?,
            "dlen" => self.opt.vis_mut().delta_length = args.real()?,
            "jtimes" => self.opt.config_mut().move_times = args.count()?,
            "birth_thresh" => self.opt.config_mut().birth_thresh = args.real()?,
            "birth_blur" => self.opt.config_mut().birth_blur = args.real()?,
            "generation" => self.opt.config_mut().generation = args.integer()?,
            "join_factor" => self.opt.vis_mut().join_factor = args.real()?,
            "rmove" => self.opt.config_mut().rmove = args.real()?,
            "epsilon" => self.opt.config_mut().epsilon = args.real()?,
            "rplace" => self.opt.config_mut().random_place_count = args.count()?,
            "sradius" => self.opt.config_mut().sample_radius = args.real()?,
            "end_dist" => self.opt.config_mut().sample_endpoint_distance = args.real()?,
            "nsamples" => self.opt.config_mut().sample_number = args.count()?,
            "mtaper" => self.opt.config_mut().taper_max = args.real()?,
            "dtaper" => self.opt.config_mut().taper_delta = args.real()?,
            "odds" => {
                let odds = flowline_core::ChangeOdds {
                    reposition: args.real()?,
                    resize: args.real()?,
                    both: args.real()?,
                }
                .normalized();
                info!(?odds, "odds");
                self.opt.config_mut().odds = odds;
            }
            "lodds" => {
                let odds = flowline_core::LengthOdds {
                    all: args.real()?,
                    long_both: args.real()?,
                    short_both: args.real()?,
                    long_one: args.real()?,
                    short_one: args.real()?,
                }
                .normalized();
                info!(?odds, "length odds");
                self.opt.config_mut().length_odds = odds;
            }
            "seed" => {
                let seed = args.count()? as u64;
                self.opt.reseed(seed);
                self.rng = Xorshift64::new(seed);
            }
            "quality_guide" => self.opt.config_mut().quality_guide = args.flag()?,

            // -- bundle and style --
            "freeze" => self.opt.bundle_mut().freeze_all(),
            "unfreeze" => self.opt.bundle_mut().unfreeze_all(),
            "bclear" => self.opt.bundle_mut().clear(),
            "intensity" => {
                let style = StreamlineStyle {
                    intensity: args.real()?.clamp(0.0, 1.0),
                    ..*self.opt.style()
                };
                self.opt.set_style(style);
            }
            "taper" => {
                let (tail, head) = (args.real()?, args.real()?);
                let style = StreamlineStyle {
                    taper_head: head,
                    taper_tail: tail,
                    ..*self.opt.style()
                };
                self.opt.set_style(style);
            }
            "arrow" => {
                let kind = args.integer()?;
                let (length, width) = (args.real()?, args.real()?);
                let arrow = match kind {
                    0 => ArrowStyle::None,
                    1 => ArrowStyle::Open { length, width },
                    2 => ArrowStyle::Solid { length, width },
                    _ => return Err(CliError::command("arrow", format!("unknown type {kind}"))),
                };
                let style = StreamlineStyle {
                    arrow,
                    ..*self.opt.style()
                };
                self.opt.set_style(style);
                self.opt.restyle();
            }

            // -- output --
            "pgm" => {
                let path = args.word("file name")?;
                let size = or_default(args.count()?, self.image_size);
                let img = self.render_bundle(size, RENDER_RADIUS)?;
                write_pgm(&img, 0.0, RENDER_MAX, Path::new(path))?;
            }
            "png" => {
                let path = args.word("file name")?;
                let size = or_default(args.count()?, self.image_size);
                let mut pic = RasterPicture::new(size, self.aspect())?;
                self.opt.bundle().draw(&mut pic, self.opt.vis());
                pic.write_png(Path::new(path))?;
            }
            "postscript" => {
                let path = args.word("file name")?;
                let mut pic = PostScriptPicture::create(Path::new(path), self.aspect())?;
                self.opt.bundle().draw(&mut pic, self.opt.vis());
                pic.finish()?;
            }
            "pdashes" => {
                self.require_field()?;
                let dash = DashStyle {
                    dash_length: args.real()?,
                    separation: args.real()?,
                    head_length: args.real()?,
                    head_width: args.real()?,
                    step: self.opt.config().delta_step,
                    ..self.dash
                };
                let path = args.word("file name")?;
                self.dash = dash;
                let mut pic = PostScriptPicture::create(Path::new(path), self.aspect())?;
                pic.set_intensity(1.0);
                self.opt
                    .bundle()
                    .draw_dashes(self.opt.field(), self.opt.vis(), &mut pic, &dash);
                pic.finish()?;
            }
            "write_streamlines" => {
                let path = args.word("file name")?;
                let file = File::create(path).map_err(|e| CliError::io(path, e))?;
                let with_taper = self.opt.config().taper_max > 0.0;
                let mut out = BufWriter::new(file);
                self.opt
                    .bundle()
                    .write_ascii(&mut out, self.opt.config().delta_step, with_taper)?;
                out.flush()?;
            }
            "read_streamlines" => {
                self.require_field()?;
                let path = args.word("file name")?;
                let file = File::open(path).map_err(|e| CliError::io(path, e))?;
                let step = self.opt.config().delta_step;
                let (bundle, step) = Bundle::read_ascii(BufReader::new(file), self.opt.field(), step)?;
                self.opt.config_mut().delta_step = step;
                self.opt.set_bundle(bundle);
            }
            "wlowpass" => {
                let (min, max) = (args.real()?, args.real()?);
                let path = args.word("file name")?;
                let low = self.opt.lowpass()?;
                write_pgm(low.image(), min, max, Path::new(path))?;
            }

            // -- scalar register --
            "fload" => self.register = ScalarImage::read(args.word("file name")?)?,
            "fsave" => self.register.write(args.word("file name")?)?,
            "fsavepgm" => write_pgm(&self.register, 0.0, RENDER_MAX, Path::new(args.word("file name")?))?,
            "fconstant" => self.register = ScalarImage::constant(),
            "framp" => self.register = ScalarImage::ramp(),
            "fnoise" => {
                let size = or_default(args.count()?, DEFAULT_NOISE_SIZE);
                let steps = args.count()?;
                self.register = ScalarImage::noise(size, steps, &mut self.rng)?;
            }
            "fmap" => {
                let (min, max) = (args.real()?, args.real()?);
                self.register.remap(min, max);
            }
            "fflip" => self.register.negate(),
            "fbias" => self.register.bias(args.real()?)?,
            "fgain" => self.register.gain(args.real()?)?,
            "fblur" => self.register.blur(args.count()?),
            "fseparation" => self.opt.vis_mut().set_variable_separation(&self.register)?,
            "fwidth" => {
                let (min, max) = (args.real()?, args.real()?);
                if min == max || max == 0.0 {
                    self.opt.vis_mut().set_draw_width(min);
                } else {
                    self.opt.vis_mut().set_variable_draw_width(&self.register, min, max);
                }
            }
            "flength" => {
                let (min, max) = (args.real()?, args.real()?);
                if min == max || max == 0.0 {
                    self.opt.vis_mut().set_arrow_length(min);
                } else {
                    self.opt.vis_mut().set_variable_arrow_length(&self.register, min, max);
                }
            }
            "fmagnitude" => self.register = VectorField::read(args.word("file name")?)?.magnitude(),
            "fcombine" => {
                self.require_field()?;
                self.opt.field_mut().modulate(&self.register);
            }
            "frender" => {
                let radius = args.real()?;
                let radius = if radius == 0.0 { RENDER_RADIUS } else { radius };
                self.register = self.render_bundle(self.image_size, radius)?;
            }

            "quit" => return Ok(Flow::Quit),
            other => return Err(CliError::Command(format!("unknown command '{other}'"))),
        }
        Ok(Flow::Continue)
    }

    /// Splats the bundle through the lowpass filter at `size` pixels across.
    fn render_bundle(&self, size: usize, radius: f64) -> Result<ScalarImage, FlowError> {
        let height = ((size as f64 * self.aspect()).round() as usize).max(1);
        self.opt.bundle().filtered_render(size, height, radius)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(['#', '!']) {
        Some(i) => &line[..i],
        None => line,
    }
}

fn is_command(line: &str) -> bool {
    !strip_comment(line).trim().is_empty()
}
