#![deny(unsafe_code)]
//! CLI binary for the flowline streamline placer.
//!
//! Subcommands:
//! - `place` places streamlines in a field and writes the pictures
//! - `field` samples a named field source into a `.vec` file
//! - `run` executes a command script (stdin when no file is given)
//! - `list` prints the field sources and script commands

mod error;
mod interpreter;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use error::CliError;
use flowline_core::{
    FieldKind, Optimizer, OptimizerConfig, OptimizerStats, VectorField, VisualizationParameters,
};
use flowline_render::{write_pgm, PostScriptPicture, RasterPicture};
use interpreter::{Session, COMMANDS};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowline", about = "Image-guided streamline placement")]
struct Cli {
    /// Output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Placement and field parameters as a JSON object.
    #[arg(long, global = true, default_value = "{}")]
    params: String,

    #[command(subcommand)]
    command: Command,
}

/// How `place` drives the optimizer.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Schedule {
    /// One improvement run at the requested separation.
    Improve,
    /// Coarse-to-fine settings, then one improvement run.
    Optimize,
    /// Coarse-to-fine with an improvement run per stage.
    Cascade,
}

#[derive(Subcommand)]
enum Command {
    /// Place streamlines in a vector field and write the results.
    Place {
        /// Named field source (see `list`).
        #[arg(long, conflicts_with = "field", required_unless_present = "field")]
        source: Option<String>,

        /// Field file (`.vec`) to load instead of a named source.
        #[arg(long)]
        field: Option<PathBuf>,

        /// Grid resolution of a named source.
        #[arg(long, default_value_t = 64)]
        size: usize,

        /// Target separation between streamlines.
        #[arg(long, default_value_t = 0.04)]
        separation: f64,

        /// Improvement iterations (per stage for `cascade`).
        #[arg(short, long, default_value_t = 2000)]
        iterations: usize,

        #[arg(long, value_enum, default_value_t = Schedule::Improve)]
        schedule: Schedule,

        /// PRNG seed; overrides any `seed` in --params.
        #[arg(long)]
        seed: Option<u64>,

        /// PostScript output.
        #[arg(long)]
        ps: Option<PathBuf>,

        /// PNG output, black lines on white.
        #[arg(long)]
        png: Option<PathBuf>,

        /// Filtered PGM rendering of the lines.
        #[arg(long)]
        pgm: Option<PathBuf>,

        /// Ascii streamline-set output.
        #[arg(long)]
        streamlines: Option<PathBuf>,

        /// Width in pixels of raster outputs.
        #[arg(long, default_value_t = 512)]
        image_size: usize,
    },
    /// Sample a named field source and write it as a `.vec` file.
    Field {
        /// Field source name.
        name: String,

        /// Grid resolution.
        #[arg(long, default_value_t = 64)]
        size: usize,

        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Output file path (`.vec` appended when missing).
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run a command script.
    Run {
        /// Script file; stdin when absent.
        script: Option<PathBuf>,
    },
    /// List field sources and script commands.
    List,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (tests, embedding) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn parse_params(text: &str) -> Result<Value, CliError> {
    let params: Value = serde_json::from_str(text)
        .map_err(|e| CliError::command("--params", format!("invalid JSON: {e}")))?;
    if !params.is_object() {
        return Err(CliError::command("--params", "must be a JSON object"));
    }
    Ok(params)
}

fn load_field(
    source: Option<&str>,
    file: Option<&Path>,
    size: usize,
    params: &Value,
    seed: u64,
) -> Result<VectorField, CliError> {
    let mut field = match (source, file) {
        (_, Some(path)) => VectorField::read(path)?,
        (Some(name), None) => {
            let kind = FieldKind::from_name(name, params, seed)?;
            VectorField::from_source(size, size, &kind)?
        }
        (None, None) => return Err(CliError::command("place", "either --source or --field is required")),
    };
    field.normalize();
    Ok(field)
}

fn write_outputs(
    opt: &Optimizer,
    ps: Option<&Path>,
    png: Option<&Path>,
    pgm: Option<&Path>,
    streamlines: Option<&Path>,
    image_size: usize,
) -> Result<(), CliError> {
    let aspect = opt.field().aspect();
    if let Some(path) = ps {
        let mut pic = PostScriptPicture::create(path, aspect)?;
        opt.bundle().draw(&mut pic, opt.vis());
        pic.finish()?;
    }
    if let Some(path) = png {
        let mut pic = RasterPicture::new(image_size, aspect)?;
        opt.bundle().draw(&mut pic, opt.vis());
        pic.write_png(path)?;
    }
    if let Some(path) = pgm {
        let height = ((image_size as f64 * aspect).round() as usize).max(1);
        let img = opt.bundle().filtered_render(image_size, height, 2.0)?;
        write_pgm(&img, 0.0, 1.1, path)?;
    }
    if let Some(path) = streamlines {
        let file = File::create(path).map_err(|e| CliError::io(path.display(), e))?;
        let with_taper = opt.config().taper_max > 0.0;
        let mut out = BufWriter::new(file);
        opt.bundle()
            .write_ascii(&mut out, opt.config().delta_step, with_taper)?;
        out.flush()?;
    }
    Ok(())
}

fn report_placement(json: bool, stats: &OptimizerStats, outputs: &[Option<&Path>]) -> Result<(), CliError> {
    let written: Vec<String> = outputs
        .iter()
        .flatten()
        .map(|p| p.display().to_string())
        .collect();
    if json {
        let info = serde_json::json!({
            "stats": stats,
            "outputs": written,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!(
            "{} streamlines, quality {:.6} -> {:.6} ({} iterations, {} births, {} deaths, {} joins)",
            stats.lines,
            stats.initial_quality,
            stats.final_quality,
            stats.iterations,
            stats.births,
            stats.deaths,
            stats.joins,
        );
        for path in written {
            eprintln!("wrote {path}");
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), CliError> {
    let params = parse_params(&cli.params)?;
    match cli.command {
        Command::List => {
            let sources = FieldKind::list_sources();
            if cli.json {
                let commands: Vec<_> = COMMANDS
                    .iter()
                    .map(|(name, usage)| serde_json::json!({"name": name, "usage": usage}))
                    .collect();
                let info = serde_json::json!({
                    "sources": sources,
                    "commands": commands,
                });
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Field sources:");
                println!("  {}", sources.join(", "));
                println!("Script commands:");
                for (name, usage) in COMMANDS {
                    println!("  {name:<18}{usage}");
                }
            }
        }
        Command::Field {
            name,
            size,
            seed,
            output,
        } => {
            let kind = FieldKind::from_name(&name, &params, seed)?;
            let field = VectorField::from_source(size, size, &kind)?;
            field.write(&output)?;
            if cli.json {
                let info = serde_json::json!({
                    "source": name,
                    "size": size,
                    "seed": seed,
                    "output": output.display().to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                eprintln!("sampled {name} ({size}x{size}, seed {seed}) -> {}", output.display());
            }
        }
        Command::Place {
            source,
            field,
            size,
            separation,
            iterations,
            schedule,
            seed,
            ps,
            png,
            pgm,
            streamlines,
            image_size,
        } => {
            let vis = VisualizationParameters::from_json(&params)?;
            let mut cfg = OptimizerConfig::from_json(&params)?;
            if let Some(seed) = seed {
                cfg.seed = seed;
            }
            let vf = load_field(source.as_deref(), field.as_deref(), size, &params, cfg.seed)?;
            info!(width = vf.width(), height = vf.height(), ?schedule, "placing");
            let mut opt = Optimizer::new(vf, vis, cfg)?;
            let stats = match schedule {
                Schedule::Improve => {
                    opt.vis_mut().set_separation(separation)?;
                    opt.improve(iterations)?
                }
                Schedule::Optimize => opt.optimize(separation, iterations)?,
                Schedule::Cascade => opt.cascade(separation, iterations)?,
            };
            write_outputs(
                &opt,
                ps.as_deref(),
                png.as_deref(),
                pgm.as_deref(),
                streamlines.as_deref(),
                image_size,
            )?;
            report_placement(
                cli.json,
                &stats,
                &[ps.as_deref(), png.as_deref(), pgm.as_deref(), streamlines.as_deref()],
            )?;
        }
        Command::Run { script } => {
            let mut session = Session::from_json(&params)?;
            let summary = match &script {
                Some(path) => {
                    let file =
                        File::open(path).map_err(|e| CliError::io(path.display(), e))?;
                    session.run_script(BufReader::new(file))?
                }
                None => session.run_script(io::stdin().lock())?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                eprintln!(
                    "{} commands, {} skipped, {} streamlines",
                    summary.commands, summary.errors, summary.lines
                );
            }
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;
    if let Err(e) = run(cli) {
        if json_mode {
            let j = serde_json::json!({"error": e.to_string(), "exit_code": e.exit_code()});
            eprintln!("{}", serde_json::to_string_pretty(&j).unwrap_or_default());
        } else {
            eprintln!("error: {e}");
        }
        process::exit(e.exit_code());
    }
}
