//! Per-year-pair change rasters.
//!
//! For every consecutive pair of yearly land-cover rasters writes three
//! GeoTIFFs into the intermediate directory: the transition raster
//! (0 no change, 1 gained, 2 lost), the class each gained pixel came from
//! (`..._reforest`) and the class each lost pixel went to (`..._deforest`).
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
#[command(name = "transitions", about = "Classify forest gain/loss for every consecutive year pair")]
struct Args {
    /// Pipeline configuration (defaults are used when the file is absent)
    #[arg(long, default_value = "data/pipeline.json")]
    config: PathBuf,

    /// First year of the window (overrides config)
    #[arg(long)]
    first: Option<i32>,

    /// Last year of the window (overrides config)
    #[arg(long)]
    last: Option<i32>,

    /// Output name variant, e.g. masked_cropped (overrides config)
    #[arg(long)]
    variant: Option<String>,

    /// Read plantation-masked land cover (`lc_original_{year}_masked.tiff`)
    /// from the intermediate directory instead of raw land cover
    #[arg(long)]
    masked: bool,

    /// Worker threads for year pairs
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, cfg: &mut PipelineConfig) -> YearWindow {
        if let Some(v) = &self.variant {
            cfg.naming.variant = Some(v.clone());
        }
        YearWindow {
            first: self.first.unwrap_or(cfg.change.years.first),
            last: self.last.unwrap_or(cfg.change.years.last),
        }
    }

    fn land_cover(&self) -> LandCover {
        if self.masked {
            LandCover::Masked
        } else {
            LandCover::Raw
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

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.max(1))
        .build()
        .context("Failed to build worker pool")?;
    let mut manifest = pool
        .install(|| pipeline::transitions(&cfg, window, args.land_cover()))
        .with_context(|| format!("Transition classification failed for {}..={}", window.first, window.last))?;

    manifest.elapsed_secs = start.elapsed().as_secs_f64();
    let path = manifest.write(&cfg.dirs.intermediate)?;
    info!(
        elapsed_secs = manifest.elapsed_secs,
        outputs = manifest.outputs.len(),
        manifest = %path.display(),
        "transitions complete"
    );
    Ok(path)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(&args).map(|_| ())
}
