//! Pipeline stages, in the order the tools run them:
//! transitions → cumulative → plantation masking → plot sampling, with zonal
//! tables reading both land cover and change sources.
//!
//! Each stage resolves its inputs from [`PipelineConfig`] by file template,
//! writes its rasters or tables, and returns a [`RunManifest`] for the caller
//! to time and save.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::aggregate::{Aggregator, Qualifying, YearPair};
use crate::batch::for_each_pair;
use crate::config::{PipelineConfig, YearWindow};
use crate::error::{CanopyError, Result};
use crate::export::write_point_dataset;
use crate::geotiff::{read_raster, write_raster};
use crate::manifest::RunManifest;
use crate::mask::{plantation_mask, restore_forest};
use crate::naming::NameTemplate;
use crate::sampler::{quality_check_sample, PlotSampler};
use crate::transition::{Transition, TransitionClassifier};
use crate::zonal::{ZonalStatistics, ZonalTable, ZoneRaster};

/// Name variant of plantation-masked land cover.
pub const MASKED_VARIANT: &str = "masked";

// ── Inputs ────────────────────────────────────────────────────────────────────

/// Which yearly land-cover series a stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandCover {
    /// `lc_original_{year}.tiff` in the raw directory.
    Raw,
    /// `lc_original_{year}_masked.tiff` written by [`mask_plantations`].
    Masked,
}

impl LandCover {
    pub fn locate(self, cfg: &PipelineConfig) -> (PathBuf, NameTemplate) {
        match self {
            LandCover::Raw => (cfg.dirs.raw.clone(), cfg.naming.land_cover()),
            LandCover::Masked => (
                cfg.dirs.intermediate.clone(),
                cfg.naming.land_cover().with_variant(Some(MASKED_VARIANT)),
            ),
        }
    }

    fn files(self, cfg: &PipelineConfig, window: YearWindow) -> Result<Vec<(i32, PathBuf)>> {
        let (dir, template) = self.locate(cfg);
        template.require_years(&dir, window.first, window.last)
    }
}

/// Year-pair product folded by [`cumulative`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeProduct {
    /// Transition rasters, counting GAINED pixels.
    Gained,
    /// Transition rasters, counting LOST pixels.
    Lost,
    /// Source-class rasters, counting any nonzero pixel.
    Sources,
    /// Destination-class rasters, counting any nonzero pixel.
    Destinations,
}

impl ChangeProduct {
    pub fn rule(self) -> Qualifying {
        match self {
            ChangeProduct::Gained => Qualifying::Kind(Transition::Gained),
            ChangeProduct::Lost => Qualifying::Kind(Transition::Lost),
            ChangeProduct::Sources | ChangeProduct::Destinations => Qualifying::AnyNonZero,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            ChangeProduct::Gained | ChangeProduct::Sources => "reforested",
            ChangeProduct::Lost | ChangeProduct::Destinations => "deforested",
        }
    }

    fn template(self, cfg: &PipelineConfig) -> NameTemplate {
        match self {
            ChangeProduct::Gained | ChangeProduct::Lost => cfg.naming.transition(),
            ChangeProduct::Sources => cfg.naming.change_source(),
            ChangeProduct::Destinations => cfg.naming.change_destination(),
        }
    }
}

impl FromStr for ChangeProduct {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gained" => Ok(ChangeProduct::Gained),
            "lost" => Ok(ChangeProduct::Lost),
            "sources" => Ok(ChangeProduct::Sources),
            "destinations" => Ok(ChangeProduct::Destinations),
            other => Err(format!(
                "unknown product {other:?} (expected gained, lost, sources or destinations)"
            )),
        }
    }
}

impl fmt::Display for ChangeProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeProduct::Gained => "gained",
            ChangeProduct::Lost => "lost",
            ChangeProduct::Sources => "sources",
            ChangeProduct::Destinations => "destinations",
        })
    }
}

/// Count, ever and multi rasters of one cumulative product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativePaths {
    pub count: PathBuf,
    pub ever: PathBuf,
    pub multi: PathBuf,
}

impl CumulativePaths {
    /// `{prefix}_{yy}_{yy}.tiff` plus `_ever` and `_multi`, e.g.
    /// `deforested_92_19.tiff`.
    pub fn new(cfg: &PipelineConfig, product: ChangeProduct, window: YearWindow) -> Self {
        let stem = format!(
            "{}_{:02}_{:02}",
            product.prefix(),
            window.first.rem_euclid(100),
            window.last.rem_euclid(100)
        );
        let dir = &cfg.dirs.intermediate;
        Self {
            count: dir.join(format!("{stem}.tiff")),
            ever: dir.join(format!("{stem}_ever.tiff")),
            multi: dir.join(format!("{stem}_multi.tiff")),
        }
    }

    fn all(&self) -> Vec<PathBuf> {
        vec![self.count.clone(), self.ever.clone(), self.multi.clone()]
    }
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// Transition, source-class and destination-class rasters for every
/// consecutive year pair of `window`. Pairs run through [`for_each_pair`], so
/// they spread over the current rayon pool when threading is enabled.
pub fn transitions(cfg: &PipelineConfig, window: YearWindow, source: LandCover) -> Result<RunManifest> {
    window.validate()?;
    let years = source.files(cfg, window)?;
    let pairs = YearPair::window(window.first, window.last)?;

    let classifier = TransitionClassifier::new(cfg.classes.target.clone(), cfg.sentinel()?)
        .with_remap(cfg.classes.remap.clone());
    let dir = &cfg.dirs.intermediate;
    let names = [
        cfg.naming.transition(),
        cfg.naming.change_source(),
        cfg.naming.change_destination(),
    ];
    let outputs_of = |pair: YearPair| names.clone().map(|n| n.path_in(dir, pair.start));

    info!(
        first = window.first,
        last = window.last,
        pairs = pairs.len(),
        target = ?classifier.target().codes,
        "classifying transitions"
    );

    for_each_pair(&pairs, |pair| {
        // `years` holds first..=last in order, so the offset is the index.
        let idx = (pair.start - window.first) as usize;
        let old = read_raster(&years[idx].1)?;
        let new = read_raster(&years[idx + 1].1)?;
        let products = classifier.classify_pair(&old, &new)?;
        drop((old, new));

        let count = |kind: Transition| {
            products
                .transitions
                .data
                .iter()
                .filter(|&&v| v == kind.code())
                .count()
        };
        let (gained, lost) = (count(Transition::Gained), count(Transition::Lost));

        let [t, s, d] = outputs_of(pair);
        write_raster(&t, &products.transitions)?;
        write_raster(&s, &products.sources)?;
        write_raster(&d, &products.destinations)?;
        info!(pair = %pair, gained, lost, "pair classified");
        Ok(())
    })?;

    let mut manifest = RunManifest::new("transitions");
    manifest.inputs = years.into_iter().map(|(_, p)| p).collect();
    manifest.outputs = pairs.iter().flat_map(|&p| outputs_of(p)).collect();
    manifest.detail("first_year", window.first);
    manifest.detail("last_year", window.last);
    manifest.detail("target", cfg.classes.target.name.clone());
    Ok(manifest)
}

/// Fold the year-pair rasters of `window` into count/ever/multi rasters.
pub fn cumulative(
    cfg: &PipelineConfig,
    window: YearWindow,
    product: ChangeProduct,
    multi_threshold: u32,
) -> Result<RunManifest> {
    window.validate()?;
    let dir = &cfg.dirs.intermediate;
    let files = product
        .template(cfg)
        .require_years(dir, window.first, window.last - 1)?;

    info!(%product, first = window.first, last = window.last, pairs = files.len(), multi_threshold, "aggregating");

    let mut agg = Aggregator::new(product.rule(), multi_threshold);
    for (year, path) in &files {
        let layer = read_raster(path)?;
        agg.push(YearPair::new(*year), &layer)?;
        debug!(year, "added");
    }
    let summary = agg.finish()?;

    let paths = CumulativePaths::new(cfg, product, window);
    write_raster(&paths.count, &summary.count)?;
    write_raster(&paths.ever, &summary.ever)?;
    write_raster(&paths.multi, &summary.multi)?;

    let ever = summary.ever.data.iter().filter(|&&v| v == 1).count();
    let multi = summary.multi.data.iter().filter(|&&v| v == 1).count();
    info!(max_count = summary.max_count(), ever, multi, "summary");

    let mut manifest = RunManifest::new(format!("cumulative_{product}"));
    manifest.inputs = files.into_iter().map(|(_, p)| p).collect();
    manifest.outputs = paths.all();
    manifest.detail("pairs", summary.pairs.len());
    manifest.detail("multi_threshold", multi_threshold);
    manifest.detail("max_count", summary.max_count());
    manifest.detail("ever_pixels", ever);
    manifest.detail("multi_pixels", multi);
    Ok(manifest)
}

/// Restore forest on plantation pixels deforested at least once in `window`.
///
/// `deforest` defaults to the LOST count raster written by [`cumulative`] and
/// `plantations` to the configured plantation raster. The mask goes next to
/// the count raster as `{stem}_plantation.tiff`; masked land cover goes to the
/// intermediate directory under the [`MASKED_VARIANT`] name.
pub fn mask_plantations(
    cfg: &PipelineConfig,
    window: YearWindow,
    deforest: Option<&Path>,
    plantations: Option<&Path>,
) -> Result<RunManifest> {
    window.validate()?;
    let forest = *cfg
        .classes
        .target
        .codes
        .iter()
        .next()
        .ok_or(CanopyError::Empty("target class group has no codes"))?;

    let deforest_path = deforest
        .map(Path::to_path_buf)
        .unwrap_or_else(|| CumulativePaths::new(cfg, ChangeProduct::Lost, window).count);
    let plantations_path = plantations
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cfg.dirs.plantations.clone());

    let mask = {
        let count = read_raster(&deforest_path)?;
        let planted = read_raster(&plantations_path)?;
        plantation_mask(&count, &planted)?
    };
    let masked_pixels = mask.data.iter().filter(|&&v| v != 0).count();
    let stem = deforest_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| ChangeProduct::Lost.prefix().to_string());
    let mask_path = deforest_path.with_file_name(format!("{stem}_plantation.tiff"));
    write_raster(&mask_path, &mask)?;
    info!(masked_pixels, forest, "plantation mask built");

    let files = LandCover::Raw.files(cfg, window)?;
    let (out_dir, output) = LandCover::Masked.locate(cfg);
    let mut outputs = vec![mask_path];
    for (year, path) in &files {
        let restored = restore_forest(&read_raster(path)?, &mask, forest)?;
        let out = output.path_in(&out_dir, *year);
        write_raster(&out, &restored)?;
        debug!(year, "masked");
        outputs.push(out);
    }

    let mut manifest = RunManifest::new("mask_plantations");
    manifest.inputs = vec![deforest_path, plantations_path];
    manifest.inputs.extend(files.into_iter().map(|(_, p)| p));
    manifest.outputs = outputs;
    manifest.detail("masked_pixels", masked_pixels);
    manifest.detail("forest_code", forest);
    Ok(manifest)
}

/// Where [`zonal_tables`] reads zones and writes its CSVs.
#[derive(Debug, Clone)]
pub struct ZonalRun {
    pub zones: PathBuf,
    pub land_cover: LandCover,
    /// Also tabulate the change-source rasters and join their change rate.
    pub with_changes: bool,
    /// File names inside the processed directory.
    pub land_cover_csv: String,
    pub changes_csv: String,
}

impl ZonalRun {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            zones: cfg.dirs.zones.clone(),
            land_cover: LandCover::Raw,
            with_changes: true,
            land_cover_csv: "df_lc.csv".to_string(),
            changes_csv: "df_lc_reforest.csv".to_string(),
        }
    }
}

/// Long (zone, year) land-cover table and, optionally, the change-source table
/// with its change rate. Land cover is remapped the same way as for
/// transitions so both tables share one code space.
pub fn zonal_tables(cfg: &PipelineConfig, window: YearWindow, run: &ZonalRun) -> Result<RunManifest> {
    window.validate()?;
    let zones = ZoneRaster::new(read_raster(&run.zones)?);
    info!(zones = zones.zone_ids().len(), first = window.first, last = window.last, "tabulating");

    let mut manifest = RunManifest::new("zonal_table");
    manifest.inputs.push(run.zones.clone());

    let lc_files = run.land_cover.files(cfg, window)?;
    let mut land_cover = ZonalTable::new(cfg.land_cover_layout());
    for (year, path) in &lc_files {
        let mut raster = read_raster(path)?;
        cfg.classes.remap.apply_in_place(&mut raster);
        land_cover.add_year(*year, &raster, &zones)?;
        debug!(year, "land cover tabulated");
    }
    let lc_csv = cfg.dirs.processed.join(&run.land_cover_csv);
    land_cover.write_csv(&lc_csv)?;
    manifest.inputs.extend(lc_files.into_iter().map(|(_, p)| p));
    manifest.outputs.push(lc_csv);
    manifest.detail("land_cover_rows", land_cover.rows().len());

    if run.with_changes {
        let dir = &cfg.dirs.intermediate;
        let src_files = cfg
            .naming
            .change_source()
            .require_years(dir, window.first, window.last - 1)?;

        let mut changes = ZonalTable::new(cfg.change_source_layout())
            .with_total_column(cfg.zonal.change_count_column.clone());
        for (year, path) in &src_files {
            changes.add_year(*year, &read_raster(path)?, &zones)?;
            debug!(year, "change sources tabulated");
        }
        changes.join_change_rate(&land_cover);

        let changes_csv = cfg.dirs.processed.join(&run.changes_csv);
        changes.write_csv(&changes_csv)?;
        manifest.inputs.extend(src_files.into_iter().map(|(_, p)| p));
        manifest.outputs.push(changes_csv);
        manifest.detail("change_rows", changes.rows().len());
    }
    Ok(manifest)
}

/// Plot sample over `window`, written as `{processed}/{stem}.csv` and
/// `.geojson`. `output_stem` defaults to the configured stem.
pub fn sample_plots(
    cfg: &PipelineConfig,
    window: YearWindow,
    source: LandCover,
    output_stem: Option<&str>,
) -> Result<RunManifest> {
    window.validate()?;
    let files = source.files(cfg, window)?;
    let options = &cfg.sampling.options;
    info!(
        first = window.first,
        last = window.last,
        classes = ?options.classes,
        cap = ?options.cap_per_class,
        seed = options.seed,
        "sampling plots"
    );

    let mut sampler = PlotSampler::new(cfg.classes.target.clone(), options.clone());
    let mut epsg = None;
    for (year, path) in &files {
        let mut raster = read_raster(path)?;
        cfg.classes.remap.apply_in_place(&mut raster);
        epsg = epsg.or(raster.srs.epsg());
        sampler.observe(*year, &raster)?;
    }
    let points = sampler.finish()?;

    let stem = cfg
        .dirs
        .processed
        .join(output_stem.unwrap_or(&cfg.sampling.output_stem));
    let (csv_path, geojson_path) = write_point_dataset(&stem, &points, epsg)?;

    let plots = points.last().map_or(0, |p| p.plot_id);
    let flagged = points.iter().filter(|p| p.afforestation == 1).count();
    info!(rows = points.len(), plots, flagged, "wrote {}", geojson_path.display());

    let mut manifest = RunManifest::new("plot_sampler");
    manifest.inputs = files.into_iter().map(|(_, p)| p).collect();
    manifest.outputs = vec![csv_path, geojson_path];
    manifest.detail("rows", points.len());
    manifest.detail("plots", plots);
    manifest.detail("flagged", flagged);
    manifest.detail("seed", options.seed);
    Ok(manifest)
}

/// Small stratified sample of one raster for visual inspection.
pub fn quality_check(cfg: &PipelineConfig, raster_path: &Path, output_stem: Option<&str>) -> Result<RunManifest> {
    let per_class = cfg.sampling.quality_check_per_class;
    let raster = read_raster(raster_path)?;
    let points = quality_check_sample(&raster, per_class, cfg.sampling.options.seed);

    let stem_rel = output_stem
        .map(str::to_string)
        .unwrap_or_else(|| format!("sample_points/sample_points_quality_check_{per_class}"));
    let stem = cfg.dirs.processed.join(stem_rel);
    let (csv_path, geojson_path) = write_point_dataset(&stem, &points, raster.srs.epsg())?;
    info!(points = points.len(), per_class, "wrote {}", geojson_path.display());

    let mut manifest = RunManifest::new("plot_sampler_quality_check");
    manifest.inputs = vec![raster_path.to_path_buf()];
    manifest.outputs = vec![csv_path, geojson_path];
    manifest.detail("points", points.len());
    manifest.detail("per_class", per_class);
    Ok(manifest)
}
