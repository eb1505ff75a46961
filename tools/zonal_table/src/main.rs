//! Zonal class tables.
//!
//! Tabulates yearly land-cover rasters against the study-area zone raster into
//! a long (zone, year) CSV, then does the same for the source-class rasters of
//! every year pair and joins the land-cover totals to get a change rate.
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use canopy_core::pipeline::{self, LandCover, ZonalRun};
use canopy_core::{PipelineConfig, YearWindow};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "zonal_table", about = "Per-zone class counts and shares for every year")]
struct Args {
    /// Pipeline configuration (defaults are used when the file is absent)
    #[arg(long, default_value = "data/pipeline.json")]
    config: PathBuf,

    /// Zone-id raster on the land-cover grid (overrides config)
    #[arg(long)]
    zones: Option<PathBuf>,

    /// First year (overrides config)
    #[arg(long)]
    first: Option<i32>,

    /// Last year (overrides config)
    #[arg(long)]
    last: Option<i32>,

    /// Read plantation-masked land cover (`lc_original_{year}_masked.tiff`)
    /// from the intermediate directory instead of raw land cover
    #[arg(long)]
    masked: bool,

    /// Skip the change-source table
    #[arg(long)]
    no_changes: bool,

    /// Land-cover table file name inside the processed directory
    #[arg(long, default_value = "df_lc.csv")]
    land_cover_csv: String,

    /// Change-source table file name inside the processed directory
    #[arg(long, default_value = "df_lc_reforest.csv")]
    changes_csv: String,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn plan(&self, cfg: &PipelineConfig) -> (YearWindow, ZonalRun) {
        let window = YearWindow {
            first: self.first.unwrap_or(cfg.change.years.first),
            last: self.last.unwrap_or(cfg.change.years.last),
        };
        let run = ZonalRun {
            zones: self.zones.clone().unwrap_or_else(|| cfg.dirs.zones.clone()),
            land_cover: if self.masked { LandCover::Masked } else { LandCover::Raw },
            with_changes: !self.no_changes,
            land_cover_csv: self.land_cover_csv.clone(),
            changes_csv: self.changes_csv.clone(),
        };
        (window, run)
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
    let cfg = PipelineConfig::load(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;
    let (window, plan) = args.plan(&cfg);

    let mut manifest = pipeline::zonal_tables(&cfg, window, &plan)
        .with_context(|| format!("Zonal statistics failed against {}", plan.zones.display()))?;
    manifest.elapsed_secs = start.elapsed().as_secs_f64();
    let path = manifest.write(&cfg.dirs.processed)?;
    info!(elapsed_secs = manifest.elapsed_secs, "zonal tables complete");
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
    use canopy_core::geotiff::write_raster;
    use canopy_core::manifest::RunManifest;
    use canopy_core::CategoricalRaster;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("zonal_table").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn plan_follows_flags() {
        let cfg = PipelineConfig::default();
        let (window, plan) = args(&["--masked", "--no-changes", "--first", "2010"]).plan(&cfg);
        assert_eq!(window.first, 2010);
        assert_eq!(plan.land_cover, LandCover::Masked);
        assert!(!plan.with_changes);
        assert_eq!(plan.zones, cfg.dirs.zones);
        assert_eq!(plan.land_cover_csv, "df_lc.csv");
    }

    #[test]
    fn every_zone_gets_a_row_every_year() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = PipelineConfig::default();
        cfg.dirs.raw = tmp.path().join("raw");
        cfg.dirs.processed = tmp.path().join("processed");
        cfg.dirs.zones = tmp.path().join("zones.tiff");
        // Zone 3 only covers a nodata pixel.
        let zones = CategoricalRaster::from_rows(&[&[1, 2, 3]], None).unwrap();
        write_raster(&cfg.dirs.zones, &zones).unwrap();
        for year in [2000, 2001] {
            let lc = CategoricalRaster::from_rows(&[&[11, 50, 0]], Some(0)).unwrap();
            write_raster(&cfg.naming.land_cover().path_in(&cfg.dirs.raw, year), &lc).unwrap();
        }
        let config = tmp.path().join("pipeline.json");
        cfg.save(&config).unwrap();
        let config_arg = config.to_string_lossy().into_owned();

        let path = run(&args(&["--config", &config_arg, "--first", "2000", "--last", "2001", "--no-changes"]))
            .unwrap();

        assert_eq!(RunManifest::read(&path).unwrap().details["land_cover_rows"], 6);
        let text = std::fs::read_to_string(cfg.dirs.processed.join("df_lc.csv")).unwrap();
        let header: Vec<&str> = text.lines().next().unwrap().split(',').collect();
        let rainfed = header.iter().position(|c| *c == "cropland_rainfed").unwrap();
        let zone1: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
        assert_eq!(&zone1[..2], &["1", "2000"]);
        assert_eq!(zone1[rainfed], "1", "code 11 is counted as rainfed cropland");
        assert!(text.lines().any(|l| l.starts_with("3,2001,")));
    }
}
