//! Afforestation plot sampling.
//!
//! Draws the configured classes from every yearly land-cover raster, keeps the
//! plots observed in every year that were not forest throughout, flags the
//! year before each plot's first move into forest and writes the (plot, year)
//! rows as a CSV + GeoJSON pair. With `--quality-check` it instead draws a
//! small stratified sample from one change raster for visual inspection.
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use canopy_core::pipeline::{self, LandCover};
use canopy_core::{PipelineConfig, YearWindow};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "plot_sampler", about = "Sample afforestation plots from yearly land cover")]
struct Args {
    /// Pipeline configuration (defaults are used when the file is absent)
    #[arg(long, default_value = "data/pipeline.json")]
    config: PathBuf,

    /// First year (overrides config)
    #[arg(long)]
    first: Option<i32>,

    /// Last year (overrides config)
    #[arg(long)]
    last: Option<i32>,

    /// Pixels per class and year; omit to take every pixel (overrides config)
    #[arg(long)]
    cap: Option<usize>,

    /// Random seed (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Sample raw land cover instead of plantation-masked land cover
    #[arg(long)]
    raw: bool,

    /// Quality-check mode: stratified sample of this single raster
    #[arg(long)]
    quality_check: Option<PathBuf>,

    /// Output file stem relative to the processed directory (overrides config)
    #[arg(short, long)]
    output: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, cfg: &mut PipelineConfig) -> YearWindow {
        if self.cap.is_some() {
            cfg.sampling.options.cap_per_class = self.cap;
        }
        if let Some(seed) = self.seed {
            cfg.sampling.options.seed = seed;
        }
        YearWindow {
            first: self.first.unwrap_or(cfg.sampling.years.first),
            last: self.last.unwrap_or(cfg.sampling.years.last),
        }
    }

    fn land_cover(&self) -> LandCover {
        if self.raw {
            LandCover::Raw
        } else {
            LandCover::Masked
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default.as_str().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(args: &Args) -> Result<PathBuf> {
    let start = Instant::now();
    let mut cfg = PipelineConfig::load(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;
    let window = args.apply(&mut cfg);
    let output = args.output.as_deref();

    let mut manifest = match &args.quality_check {
        Some(path) => pipeline::quality_check(&cfg, path, output)
            .with_context(|| format!("Quality-check sampling failed for {}", path.display()))?,
        None => pipeline::sample_plots(&cfg, window, args.land_cover(), output)
            .with_context(|| format!("Plot sampling failed for {}..={}", window.first, window.last))?,
    };
    manifest.elapsed_secs = start.elapsed().as_secs_f64();
    let path = manifest.write(&cfg.dirs.processed)?;
    info!(elapsed_secs = manifest.elapsed_secs, "sampling complete");
    Ok(path)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(&args).map(|_| ())
}
