//! Pipeline configuration, loaded once from JSON and passed to every step.
//!
//! Every field has a default mirroring the basin study, so a missing file or a
//! partial file both work.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CanopyError, Result};
use crate::naming::NameTemplate;
use crate::raster::ClassCode;
use crate::reclassify::{ClassGroup, ClassMap};
use crate::sampler::SamplerOptions;
use crate::transition::SentinelOffset;
use crate::zonal::TableLayout;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataDirs {
    /// Yearly land-cover rasters.
    pub raw: PathBuf,
    /// Change rasters, masks and masked land cover.
    pub intermediate: PathBuf,
    /// Tables and point datasets.
    pub processed: PathBuf,
    /// Study-area polygons rasterised to zone ids on the land-cover grid.
    pub zones: PathBuf,
    /// Plantation polygons rasterised on the land-cover grid.
    pub plantations: PathBuf,
}

impl Default for DataDirs {
    fn default() -> Self {
        Self {
            raw: PathBuf::from("data/01_raw/LC_CCI_ESA_COL"),
            intermediate: PathBuf::from("data/02_intermediate/lc_change"),
            processed: PathBuf::from("data/03_processed"),
            zones: PathBuf::from("data/02_intermediate/study_area/study_area_zones.tiff"),
            plantations: PathBuf::from("data/02_intermediate/study_area/plantations.tiff"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Naming {
    pub land_cover: NameTemplate,
    pub transition: NameTemplate,
    /// Class a pixel came from when it gained the target.
    pub change_source: NameTemplate,
    /// Class a pixel went to when it lost the target.
    pub change_destination: NameTemplate,
    /// Variant appended to change rasters, e.g. `masked_cropped`.
    pub variant: Option<String>,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            land_cover: NameTemplate::builtin("lc_original_{year}{variant}.tiff"),
            transition: NameTemplate::builtin("landcover_change_{year}_{next}_transition{variant}.tiff"),
            change_source: NameTemplate::builtin("landcover_change_{year}_{next}_reforest{variant}.tiff"),
            change_destination: NameTemplate::builtin("landcover_change_{year}_{next}_deforest{variant}.tiff"),
            variant: None,
        }
    }
}

impl Naming {
    pub fn land_cover(&self) -> NameTemplate {
        self.land_cover.clone()
    }

    pub fn transition(&self) -> NameTemplate {
        self.transition.with_variant(self.variant.as_deref())
    }

    pub fn change_source(&self) -> NameTemplate {
        self.change_source.with_variant(self.variant.as_deref())
    }

    pub fn change_destination(&self) -> NameTemplate {
        self.change_destination.with_variant(self.variant.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearWindow {
    pub first: i32,
    pub last: i32,
}

impl YearWindow {
    pub fn validate(&self) -> Result<()> {
        if self.last <= self.first {
            return Err(CanopyError::InvalidYearRange {
                start: self.first,
                end: self.last,
            });
        }
        Ok(())
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.first..=self.last
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub target: ClassGroup,
    pub convertible: ClassGroup,
    /// Applied to every raster before transitions are detected.
    pub remap: ClassMap,
    /// Column label per class code.
    pub legend: BTreeMap<ClassCode, String>,
}

impl Default for ClassConfig {
    fn default() -> Self {
        let legend = [
            (0, "no_data"),
            (10, "cropland_rainfed"),
            (11, "herbaceous_cover"),
            (30, "mosaic_cropland"),
            (40, "mosaic_natural_vegetation"),
            (50, "tree_cover"),
            (60, "tree_cover_deciduous"),
            (100, "mosaic_tree_shrub"),
            (110, "mosaic_herbaceous"),
            (120, "shrubland"),
            (130, "grassland"),
            (160, "tree_cover_flooded_fresh"),
            (170, "tree_cover_flooded_saline"),
            (180, "shrub_herbaceous_cover_flooded"),
            (190, "urban_areas"),
            (210, "water_bodies"),
        ]
        .into_iter()
        .map(|(c, n)| (c, n.to_string()))
        .collect();
        Self {
            target: ClassGroup::new("forest", [50]),
            convertible: ClassGroup::new("convertible", [10, 30, 40, 120]),
            remap: ClassMap::from_pairs([(11, 10)]).unwrap_or_default(),
            legend,
        }
    }
}

/// Explicit offset/threshold, or derived from the legend code range when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelConfig {
    pub offset: i64,
    pub threshold: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeConfig {
    pub years: YearWindow,
    pub sentinel: Option<SentinelConfig>,
    /// Pixels with more than this many transitions are flagged as multi.
    pub multi_threshold: u32,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            years: YearWindow { first: 1992, last: 2019 },
            sentinel: Some(SentinelConfig {
                offset: 5000,
                threshold: 4000,
            }),
            multi_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub years: YearWindow,
    #[serde(flatten)]
    pub options: SamplerOptions,
    pub quality_check_per_class: usize,
    pub output_stem: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            years: YearWindow { first: 2003, last: 2019 },
            options: SamplerOptions::default(),
            quality_check_per_class: 20,
            output_stem: "sample_points/sample_points_v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonalConfig {
    pub land_cover: TableLayout,
    pub change_sources: TableLayout,
    pub change_count_column: String,
}

impl Default for ZonalConfig {
    fn default() -> Self {
        let mut land_cover =
            TableLayout::new([0, 10, 30, 40, 50, 60, 100, 110, 120, 130, 160, 170, 180, 190, 210]);
        land_cover.excluded.insert(0);
        let mut change_sources = TableLayout::new([10, 30, 40, 110, 120, 130, 180, 210]);
        change_sources.share_suffix = "reforest".to_string();
        Self {
            land_cover,
            change_sources,
            change_count_column: "reforest_count".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dirs: DataDirs,
    pub naming: Naming,
    pub classes: ClassConfig,
    pub change: ChangeConfig,
    pub sampling: SamplingConfig,
    pub zonal: ZonalConfig,
}

impl PipelineConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| CanopyError::io(path, e))?;
        let cfg: Self = serde_json::from_str(&text).map_err(|source| CanopyError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.change.years.validate()?;
        cfg.sampling.years.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| CanopyError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|e| CanopyError::io(path, e))
    }

    /// Configured sentinel, or the tightest safe one for the legend codes.
    pub fn sentinel(&self) -> Result<SentinelOffset> {
        match self.change.sentinel {
            Some(s) => SentinelOffset::new(s.offset, s.threshold),
            None => {
                let lo = self.classes.legend.keys().next().copied().unwrap_or(0);
                let hi = self.classes.legend.keys().next_back().copied().unwrap_or(0);
                Ok(SentinelOffset::for_codes(lo, hi))
            }
        }
    }

    /// Land-cover layout with legend labels filled in.
    pub fn land_cover_layout(&self) -> TableLayout {
        self.labelled(&self.zonal.land_cover)
    }

    pub fn change_source_layout(&self) -> TableLayout {
        self.labelled(&self.zonal.change_sources)
    }

    fn labelled(&self, layout: &TableLayout) -> TableLayout {
        let mut layout = layout.clone();
        for &code in &layout.classes {
            if let Some(name) = self.classes.legend.get(&code) {
                layout.labels.entry(code).or_insert_with(|| name.clone());
            }
        }
        layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = PipelineConfig::load(Path::new("no/such/pipeline.json")).unwrap();
        assert_eq!(cfg.change.years, YearWindow { first: 1992, last: 2019 });
        assert_eq!(cfg.classes.remap.map(11), 10);
        assert_eq!(cfg.sentinel().unwrap().offset(), 5000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{ "change": { "years": { "first": 2000, "last": 2005 }, "sentinel": null },
                 "naming": { "variant": "masked_cropped" } }"#,
        )
        .unwrap();
        let cfg = PipelineConfig::load(&path).unwrap();

        assert_eq!(cfg.change.years.first, 2000);
        assert_eq!(cfg.change.multi_threshold, 1);
        assert_eq!(
            cfg.naming.change_source().render(2000),
            "landcover_change_2000_2001_reforest_masked_cropped.tiff"
        );
        let s = cfg.sentinel().unwrap();
        assert!(s.validate(0, 210).is_ok(), "derived sentinel must cover the legend");
    }

    #[test]
    fn inverted_year_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "sampling": { "years": { "first": 2019, "last": 2003 } } }"#)
            .unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(CanopyError::InvalidYearRange { .. })
        ));
    }

    #[test]
    fn layouts_pick_up_legend_labels() {
        let cfg = PipelineConfig::default();
        let layout = cfg.change_source_layout();
        assert_eq!(layout.label(10), "cropland_rainfed");
        assert!(layout.excluded.is_empty());
        assert!(cfg.land_cover_layout().excluded.contains(&0));
    }

    #[test]
    fn land_cover_layout_uses_remapped_codes() {
        let cfg = PipelineConfig::default();
        let layout = cfg.land_cover_layout();
        assert_eq!(cfg.classes.remap.map(11), 10);
        assert!(!layout.classes.contains(&11), "remapped code must not be a column");
        assert!(layout.classes.contains(&60));
        assert_eq!(layout.label(60), "tree_cover_deciduous");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut cfg = PipelineConfig::default();
        cfg.sampling.options.cap_per_class = Some(500);
        cfg.save(&path).unwrap();
        let back = PipelineConfig::load(&path).unwrap();
        assert_eq!(back.sampling.options.cap_per_class, Some(500));
        assert_eq!(back.sampling.options.classes, vec![10, 30, 40, 120, 50]);
    }
}
