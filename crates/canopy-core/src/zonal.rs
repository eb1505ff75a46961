//! Zonal class tabulation reshaped into a long (zone, year) table.
//!
//! The pixel-in-polygon work sits behind [`ZonalStatistics`]; this module only
//! fills missing classes, derives shares and `total_count`, joins change
//! tables against land-cover tables and writes CSV.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CanopyError, Result};
use crate::raster::{CategoricalRaster, ClassCode};

pub type ZoneId = i32;
pub type ClassCounts = BTreeMap<ClassCode, u64>;

/// Per-zone `{class_code: pixel_count}` for one raster.
pub trait ZonalStatistics {
    /// Every zone of the study area, whether or not it has valid pixels.
    fn zone_ids(&self) -> BTreeSet<ZoneId>;

    fn class_counts(&self, raster: &CategoricalRaster) -> Result<BTreeMap<ZoneId, ClassCounts>>;
}

/// Zones given as a raster of zone ids on the same grid as the class rasters,
/// i.e. study-area polygons rasterised by the vector collaborator.
#[derive(Debug, Clone)]
pub struct ZoneRaster {
    zones: CategoricalRaster,
    ids: BTreeSet<ZoneId>,
}

impl ZoneRaster {
    pub fn new(zones: CategoricalRaster) -> Self {
        let ids = zones.class_counts().into_keys().collect();
        Self { zones, ids }
    }
}

impl ZonalStatistics for ZoneRaster {
    fn zone_ids(&self) -> BTreeSet<ZoneId> {
        self.ids.clone()
    }

    fn class_counts(&self, raster: &CategoricalRaster) -> Result<BTreeMap<ZoneId, ClassCounts>> {
        self.zones.ensure_same_grid(raster)?;
        let mut out: BTreeMap<ZoneId, ClassCounts> = BTreeMap::new();
        for (&zone, &code) in self.zones.data.iter().zip(raster.data.iter()) {
            if self.zones.is_nodata(zone) || raster.is_nodata(code) {
                continue;
            }
            *out.entry(zone).or_default().entry(code).or_insert(0) += 1;
        }
        Ok(out)
    }
}

/// Which classes become columns, and which of them stay out of the share
/// denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLayout {
    pub classes: Vec<ClassCode>,
    #[serde(default)]
    pub excluded: BTreeSet<ClassCode>,
    /// Column label per class; `class_{code}` when absent.
    #[serde(default)]
    pub labels: BTreeMap<ClassCode, String>,
    /// Suffix of share columns, e.g. `share` → `tree_cover_share`.
    #[serde(default = "default_share_suffix")]
    pub share_suffix: String,
}

fn default_share_suffix() -> String {
    "share".to_string()
}

impl TableLayout {
    pub fn new(classes: impl IntoIterator<Item = ClassCode>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
            excluded: BTreeSet::new(),
            labels: BTreeMap::new(),
            share_suffix: default_share_suffix(),
        }
    }

    pub fn label(&self, code: ClassCode) -> String {
        self.labels
            .get(&code)
            .cloned()
            .unwrap_or_else(|| format!("class_{code}"))
    }

    /// Classes entering `total_count` and owning a share column.
    pub fn share_classes(&self) -> impl Iterator<Item = ClassCode> + '_ {
        self.classes.iter().copied().filter(|c| !self.excluded.contains(c))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRow {
    pub zone: ZoneId,
    pub year: i32,
    /// One entry per layout class, 0 when the zone had none.
    pub counts: BTreeMap<ClassCode, u64>,
    pub total_count: u64,
    pub shares: BTreeMap<ClassCode, f64>,
    /// `total_count` of this row over `total_count` of the matching land-cover
    /// row; only set by [`ZonalTable::join_change_rate`].
    pub change_rate: Option<f64>,
}

impl ZonalRow {
    fn build(zone: ZoneId, year: i32, raw: &ClassCounts, layout: &TableLayout) -> Self {
        let counts: BTreeMap<ClassCode, u64> = layout
            .classes
            .iter()
            .map(|&c| (c, raw.get(&c).copied().unwrap_or(0)))
            .collect();
        let total_count: u64 = layout.share_classes().map(|c| counts[&c]).sum();
        let shares = layout
            .share_classes()
            .map(|c| {
                let share = if total_count == 0 {
                    0.0
                } else {
                    counts[&c] as f64 / total_count as f64
                };
                (c, share)
            })
            .collect();
        Self {
            zone,
            year,
            counts,
            total_count,
            shares,
            change_rate: None,
        }
    }
}

/// Long-format (zone × year) class table.
#[derive(Debug, Clone)]
pub struct ZonalTable {
    layout: TableLayout,
    /// Name of the `total_count` column in CSV output.
    total_column: String,
    rows: Vec<ZonalRow>,
}

impl ZonalTable {
    pub fn new(layout: TableLayout) -> Self {
        Self {
            layout,
            total_column: "total_count".to_string(),
            rows: Vec::new(),
        }
    }

    /// Rename the total column (e.g. `change_count` for change-source tables).
    pub fn with_total_column(mut self, name: impl Into<String>) -> Self {
        self.total_column = name.into();
        self
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn rows(&self) -> &[ZonalRow] {
        &self.rows
    }

    /// Tabulate one year's raster through `stats` and append one row per
    /// zone. Zones without a valid pixel that year get an all-zero row.
    pub fn add_year(
        &mut self,
        year: i32,
        raster: &CategoricalRaster,
        stats: &dyn ZonalStatistics,
    ) -> Result<()> {
        let mut per_zone = stats.class_counts(raster)?;
        for zone in stats.zone_ids() {
            per_zone.entry(zone).or_default();
        }
        self.push_counts(year, &per_zone);
        Ok(())
    }

    pub fn push_counts(&mut self, year: i32, per_zone: &BTreeMap<ZoneId, ClassCounts>) {
        for (&zone, raw) in per_zone {
            let unlisted: Vec<ClassCode> = raw
                .keys()
                .copied()
                .filter(|c| !self.layout.classes.contains(c))
                .collect();
            if !unlisted.is_empty() {
                debug!(zone, year, ?unlisted, "classes outside the table layout ignored");
            }
            self.rows.push(ZonalRow::build(zone, year, raw, &self.layout));
        }
    }

    /// Set `change_rate` on every row from the land-cover row with the same
    /// (zone, year). Rows with no match or an empty land-cover total get 0.
    pub fn join_change_rate(&mut self, land_cover: &ZonalTable) {
        let totals: BTreeMap<(ZoneId, i32), u64> = land_cover
            .rows
            .iter()
            .map(|r| ((r.zone, r.year), r.total_count))
            .collect();
        let mut unmatched = 0usize;
        for row in &mut self.rows {
            let rate = match totals.get(&(row.zone, row.year)) {
                Some(&t) if t > 0 => row.total_count as f64 / t as f64,
                Some(_) => 0.0,
                None => {
                    unmatched += 1;
                    0.0
                }
            };
            row.change_rate = Some(rate);
        }
        if unmatched > 0 {
            warn!(unmatched, "change rows without a land-cover row for the same zone and year");
        }
    }

    pub fn header(&self) -> Vec<String> {
        let mut h = vec!["zone".to_string(), "year".to_string()];
        h.extend(self.layout.classes.iter().map(|&c| self.layout.label(c)));
        h.push(self.total_column.clone());
        h.extend(
            self.layout
                .share_classes()
                .map(|c| format!("{}_{}", self.layout.label(c), self.layout.share_suffix)),
        );
        if self.rows.iter().any(|r| r.change_rate.is_some()) {
            h.push("change_rate".to_string());
        }
        h
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CanopyError::io(parent, e))?;
        }
        let csv_err = |source: csv::Error| CanopyError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        let header = self.header();
        let with_rate = header.last().map(String::as_str) == Some("change_rate");
        wtr.write_record(&header).map_err(csv_err)?;

        for row in &self.rows {
            let mut rec = vec![row.zone.to_string(), row.year.to_string()];
            rec.extend(self.layout.classes.iter().map(|c| row.counts[c].to_string()));
            rec.push(row.total_count.to_string());
            rec.extend(self.layout.share_classes().map(|c| row.shares[&c].to_string()));
            if with_rate {
                rec.push(row.change_rate.unwrap_or(0.0).to_string());
            }
            wtr.write_record(&rec).map_err(csv_err)?;
        }
        wtr.flush().map_err(|e| CanopyError::io(path, e))?;
        debug!(path = %path.display(), rows = self.rows.len(), "wrote zonal table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn zones() -> ZoneRaster {
        ZoneRaster::new(
            CategoricalRaster::from_rows(&[&[1, 1, 2], &[1, 2, 0]], Some(0)).unwrap(),
        )
    }

    #[test]
    fn zone_raster_counts_per_zone() {
        let lc = CategoricalRaster::from_rows(&[&[10, 50, 50], &[10, 30, 10]], None).unwrap();
        let counts = zones().class_counts(&lc).unwrap();
        assert_eq!(counts[&1], BTreeMap::from([(10, 2), (50, 1)]));
        assert_eq!(counts[&2], BTreeMap::from([(30, 1), (50, 1)]));
        assert!(!counts.contains_key(&0), "nodata zone must be skipped");
    }

    #[test]
    fn zone_without_valid_pixels_still_gets_a_row() {
        let zones = ZoneRaster::new(CategoricalRaster::from_rows(&[&[1, 2]], None).unwrap());
        let lc = CategoricalRaster::from_rows(&[&[10, 0]], Some(0)).unwrap();
        let mut table = ZonalTable::new(TableLayout::new([10, 50]));
        table.add_year(2000, &lc, &zones).unwrap();

        let keys: Vec<(ZoneId, i32, u64)> =
            table.rows().iter().map(|r| (r.zone, r.year, r.total_count)).collect();
        assert_eq!(keys, vec![(1, 2000, 1), (2, 2000, 0)]);
        let empty = &table.rows()[1];
        assert!(empty.counts.values().all(|&c| c == 0));
        assert!(empty.shares.values().all(|&s| s == 0.0));
    }

    #[test]
    fn shares_sum_to_one_or_zero() {
        let mut table = ZonalTable::new(TableLayout::new([10, 30, 50, 120]));
        let per_zone = BTreeMap::from([
            (1, BTreeMap::from([(10, 3), (50, 7), (999, 4)])),
            (2, BTreeMap::from([(30, 1), (50, 1), (120, 1)])),
            (3, BTreeMap::new()),
        ]);
        table.push_counts(2000, &per_zone);

        for row in table.rows() {
            let sum: f64 = row.shares.values().sum();
            if row.total_count > 0 {
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
            } else {
                assert!(row.shares.values().all(|&s| s == 0.0), "empty zone must have zero shares");
            }
        }
        let first = &table.rows()[0];
        assert_eq!(first.total_count, 10, "unlisted class must not enter the total");
        assert_eq!(first.counts[&30], 0, "missing class must be filled with 0");
    }

    #[test]
    fn excluded_classes_leave_denominator() {
        let mut layout = TableLayout::new([0, 10, 50]);
        layout.excluded.insert(0);
        let mut table = ZonalTable::new(layout);
        table.push_counts(2005, &BTreeMap::from([(7, BTreeMap::from([(0, 5), (10, 1), (50, 3)]))]));

        let row = &table.rows()[0];
        assert_eq!(row.counts[&0], 5);
        assert_eq!(row.total_count, 4);
        assert!(!row.shares.contains_key(&0));
        assert_abs_diff_eq!(row.shares[&50], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn change_rate_joins_on_zone_and_year() {
        let mut lc = ZonalTable::new(TableLayout::new([10, 50]));
        lc.push_counts(2001, &BTreeMap::from([(1, BTreeMap::from([(10, 60), (50, 40)]))]));

        let mut change = ZonalTable::new(TableLayout::new([10, 30])).with_total_column("change_count");
        change.push_counts(2001, &BTreeMap::from([(1, BTreeMap::from([(10, 4), (30, 1)]))]));
        change.push_counts(2002, &BTreeMap::from([(1, BTreeMap::from([(10, 2)]))]));
        change.join_change_rate(&lc);

        assert_abs_diff_eq!(change.rows()[0].change_rate.unwrap(), 0.05, epsilon = 1e-12);
        assert_eq!(change.rows()[1].change_rate, Some(0.0));
        assert_eq!(change.header().last().map(String::as_str), Some("change_rate"));
        assert!(change.header().contains(&"change_count".to_string()));
    }

    #[test]
    fn csv_has_one_line_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables").join("df_lc.csv");

        let mut layout = TableLayout::new([10, 50]);
        layout.labels.insert(50, "tree_cover".to_string());
        let mut table = ZonalTable::new(layout);
        table.push_counts(2000, &BTreeMap::from([(1, BTreeMap::from([(10, 1), (50, 3)]))]));
        table.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "zone,year,class_10,tree_cover,total_count,class_10_share,tree_cover_share"
        );
        assert_eq!(lines[1], "1,2000,1,3,4,0.25,0.75");
        assert_eq!(lines.len(), 2);
    }
}
