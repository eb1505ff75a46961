//! Multi-year change summary.
//!
//! Folds the year-pair rasters written by `transitions` into three GeoTIFFs:
//! transition count per pixel, changed at least once, and changed more than
//! the configured threshold. Year-pair files are discovered by template and
//! must cover the whole window without gaps.
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use canopy_core::pipeline::{self, ChangeProduct};
use canopy_core::{PipelineConfig, YearWindow};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cumulative", about = "Aggregate year-pair change rasters into count/ever/multi rasters")]
struct Args {
    /// Pipeline configuration (defaults are used when the file is absent)
    #[arg(long, default_value = "data/pipeline.json")]
    config: PathBuf,

    /// Which year-pair rasters to aggregate: gained, lost, sources or destinations
    #[arg(long, default_value = "sources")]
    product: ChangeProduct,

    /// First land-cover year of the window (overrides config)
    #[arg(long)]
    first: Option<i32>,

    /// Last land-cover year of the window (overrides config)
    #[arg(long)]
    last: Option<i32>,

    /// Count above which a pixel is flagged as multi (overrides config)
    #[arg(long)]
    multi_threshold: Option<u32>,

    /// Output name variant of the year-pair rasters (overrides config)
    #[arg(long)]
    variant: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, cfg: &mut PipelineConfig) -> (YearWindow, u32) {
        if let Some(v) = &self.variant {
            cfg.naming.variant = Some(v.clone());
        }
        let window = YearWindow {
            first: self.first.unwrap_or(cfg.change.years.first),
            last: self.last.unwrap_or(cfg.change.years.last),
        };
        (window, self.multi_threshold.unwrap_or(cfg.change.multi_threshold))
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
    let (window, threshold) = args.apply(&mut cfg);

    let mut manifest = pipeline::cumulative(&cfg, window, args.product, threshold).with_context(|| {
        format!(
            "Cannot aggregate {} rasters in {}",
            args.product,
            cfg.dirs.intermediate.display()
        )
    })?;
    manifest.elapsed_secs = start.elapsed().as_secs_f64();
    let path = manifest.write(&cfg.dirs.intermediate)?;
    info!(elapsed_secs = manifest.elapsed_secs, "cumulative complete");
    Ok(path)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(&args).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::geotiff::{read_raster, write_raster};
    use canopy_core::manifest::RunManifest;
    use canopy_core::pipeline::CumulativePaths;
    use canopy_core::CategoricalRaster;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("cumulative").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn product_and_threshold_parse() {
        let mut cfg = PipelineConfig::default();
        let a = args(&["--product", "lost", "--multi-threshold", "3", "--last", "2005"]);
        let (window, threshold) = a.apply(&mut cfg);
        assert_eq!(a.product, ChangeProduct::Lost);
        assert_eq!(threshold, 3);
        assert_eq!(window.last, 2005);
        assert_eq!(args(&[]).product, ChangeProduct::Sources);
        assert!(Args::try_parse_from(["cumulative", "--product", "forest"]).is_err());
    }

    #[test]
    fn lost_counts_land_under_the_shared_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.dirs.intermediate = tmp.path().to_path_buf();
        // Year-pair transition rasters for 2017..=2019 (two pairs).
        for (year, row) in [(2017, [2, 0, 2]), (2018, [2, 1, 0])] {
            let layer = CategoricalRaster::from_rows(&[&row], Some(-1)).unwrap();
            write_raster(&cfg.naming.transition().path_in(tmp.path(), year), &layer).unwrap();
        }
        let config = tmp.path().join("pipeline.json");
        cfg.save(&config).unwrap();

        let config_arg = config.to_string_lossy().into_owned();
        let path = run(&args(&[
            "--config", &config_arg, "--product", "lost", "--first", "2017", "--last", "2019",
        ]))
        .unwrap();

        let window = YearWindow { first: 2017, last: 2019 };
        let paths = CumulativePaths::new(&cfg, ChangeProduct::Lost, window);
        assert!(paths.count.ends_with("deforested_17_19.tiff"));
        assert_eq!(read_raster(&paths.count).unwrap().data, vec![2, 0, 1]);
        assert_eq!(read_raster(&paths.multi).unwrap().data, vec![1, 0, 0]);
        assert_eq!(RunManifest::read(&path).unwrap().details["pairs"], 2);
    }

    #[test]
    fn missing_pair_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.dirs.intermediate = tmp.path().to_path_buf();
        let config = tmp.path().join("pipeline.json");
        cfg.save(&config).unwrap();
        let config_arg = config.to_string_lossy().into_owned();
        assert!(run(&args(&["--config", &config_arg, "--first", "2000", "--last", "2002"])).is_err());
    }
}
