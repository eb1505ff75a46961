//! Plantation masking.
//!
//! Pixels that were deforested at least once inside mapped plantations are
//! rotation harvest, not forest loss. They are set back to the forest class in
//! every yearly land-cover raster, written as `lc_original_{year}_masked.tiff`.
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use canopy_core::pipeline;
use canopy_core::{PipelineConfig, YearWindow};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mask_plantations", about = "Restore forest on deforested plantation pixels")]
struct Args {
    /// Pipeline configuration (defaults are used when the file is absent)
    #[arg(long, default_value = "data/pipeline.json")]
    config: PathBuf,

    /// Cumulative deforestation count raster
    /// (default: deforested_{first}_{last}.tiff from `cumulative --product lost`)
    #[arg(long)]
    deforest: Option<PathBuf>,

    /// Rasterised plantation polygons on the land-cover grid (overrides config)
    #[arg(long)]
    plantations: Option<PathBuf>,

    /// First year (overrides config)
    #[arg(long)]
    first: Option<i32>,

    /// Last year (overrides config)
    #[arg(long)]
    last: Option<i32>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default.as_str().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(args: &Args) -> Result<PathBuf> {
    let start = Instant::now();
    let cfg = PipelineConfig::load(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;
    let window = YearWindow {
        first: args.first.unwrap_or(cfg.change.years.first),
        last: args.last.unwrap_or(cfg.change.years.last),
    };

    let mut manifest = pipeline::mask_plantations(
        &cfg,
        window,
        args.deforest.as_deref(),
        args.plantations.as_deref(),
    )
    .context("Plantation masking failed")?;
    manifest.elapsed_secs = start.elapsed().as_secs_f64();
    let path = manifest.write(&cfg.dirs.intermediate)?;
    info!(elapsed_secs = manifest.elapsed_secs, "masking complete");
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
    use canopy_core::CategoricalRaster;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mask_plantations").chain(extra.iter().copied())).unwrap()
    }

    fn write(path: &std::path::Path, row: &[i32], nodata: Option<i32>) {
        write_raster(path, &CategoricalRaster::from_rows(&[row], nodata).unwrap()).unwrap();
    }

    fn setup(tmp: &std::path::Path) -> (PipelineConfig, String) {
        let mut cfg = PipelineConfig::default();
        cfg.dirs.raw = tmp.join("raw");
        cfg.dirs.intermediate = tmp.join("intermediate");
        cfg.dirs.plantations = tmp.join("plantations.tiff");
        for year in [2015, 2016] {
            write(&cfg.naming.land_cover().path_in(&cfg.dirs.raw, year), &[10, 30, 0], Some(0));
        }
        write(&cfg.dirs.plantations, &[1, 1, 1], None);
        let config = tmp.join("pipeline.json");
        cfg.save(&config).unwrap();
        (cfg, config.to_string_lossy().into_owned())
    }

    #[test]
    fn default_deforest_input_is_the_lost_count_raster() {
        let tmp = tempfile::tempdir().unwrap();
        let (cfg, config) = setup(tmp.path());
        write(&cfg.dirs.intermediate.join("deforested_15_16.tiff"), &[1, 0, 1], Some(-1));

        let path = run(&args(&["--config", &config, "--first", "2015", "--last", "2016"])).unwrap();

        let masked = cfg.dirs.intermediate.join("lc_original_2016_masked.tiff");
        // Pixel 2 is land-cover nodata and stays so.
        assert_eq!(read_raster(&masked).unwrap().data, vec![50, 30, 0]);
        let manifest = RunManifest::read(&path).unwrap();
        assert!(manifest.outputs[0].ends_with("deforested_15_16_plantation.tiff"));
        assert_eq!(manifest.details["masked_pixels"], 2);
    }

    #[test]
    fn explicit_deforest_path_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let (cfg, config) = setup(tmp.path());
        let custom = tmp.path().join("loss.tiff");
        write(&custom, &[0, 1, 0], None);
        let custom_arg = custom.to_string_lossy().into_owned();

        run(&args(&["--config", &config, "--first", "2015", "--last", "2016", "--deforest", &custom_arg]))
            .unwrap();

        let masked = cfg.dirs.intermediate.join("lc_original_2015_masked.tiff");
        assert_eq!(read_raster(&masked).unwrap().data, vec![10, 50, 0]);
        assert!(tmp.path().join("loss_plantation.tiff").exists());
    }
}
