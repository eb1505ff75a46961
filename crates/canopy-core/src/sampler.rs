//! Stratified plot sampling over a window of yearly land-cover rasters.
//!
//! Every sampled pixel position is a plot. A plot survives only when it was
//! observed in every year of the window and was not target class throughout.
//! Classes are ranked (target high, everything else low); the year before the
//! first rank increase carries the afforestation flag. Later upward moves of
//! the same plot are ignored.
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CanopyError, Result};
use crate::raster::{CategoricalRaster, ClassCode, GeoTransform, GridSpec};
use crate::reclassify::ClassGroup;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    /// Class codes drawn from each year; the target codes must be among them.
    pub classes: Vec<ClassCode>,
    /// At most this many pixels per class and year; all of them when unset.
    pub cap_per_class: Option<usize>,
    pub seed: u64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            classes: vec![10, 30, 40, 120, 50],
            cap_per_class: None,
            seed: 42,
        }
    }
}

/// One exported (plot, year) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub plot_id: u32,
    pub row: usize,
    pub col: usize,
    pub year: i32,
    pub class: ClassCode,
    pub x: f64,
    pub y: f64,
    pub afforestation: u8,
}

/// One quality-check sample on a single raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckPoint {
    pub row: usize,
    pub col: usize,
    pub class: ClassCode,
    pub x: f64,
    pub y: f64,
}

/// Positions holding `code`, all of them or a uniform subset of `cap` drawn
/// without replacement. Output is in (row, col) order either way.
pub fn draw_positions<R: Rng + ?Sized>(
    raster: &CategoricalRaster,
    code: ClassCode,
    cap: Option<usize>,
    rng: &mut R,
) -> Vec<(usize, usize)> {
    let positions = raster.positions_of(code);
    match cap {
        Some(n) if n < positions.len() => {
            let mut picked: Vec<(usize, usize)> = rand::seq::index::sample(rng, positions.len(), n)
                .into_iter()
                .map(|i| positions[i])
                .collect();
            picked.sort_unstable();
            picked
        }
        _ => positions,
    }
}

/// Year carrying the afforestation flag: the year before the first upward
/// rank step in a chronologically ordered `(year, class)` series.
pub fn afforestation_year(series: &[(i32, ClassCode)], target: &ClassGroup) -> Option<i32> {
    let rank = |c: ClassCode| u8::from(target.contains(c));
    series
        .windows(2)
        .find(|w| rank(w[1].1) > rank(w[0].1))
        .map(|w| w[0].0)
}

/// Accumulates yearly draws, then resolves plots and flags in [`PlotSampler::finish`].
pub struct PlotSampler {
    target: ClassGroup,
    options: SamplerOptions,
    rng: StdRng,
    grid: Option<GridSpec>,
    years: Vec<i32>,
    plots: BTreeMap<(usize, usize), Vec<(i32, ClassCode)>>,
}

impl PlotSampler {
    pub fn new(target: ClassGroup, options: SamplerOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        Self {
            target,
            options,
            rng,
            grid: None,
            years: Vec::new(),
            plots: BTreeMap::new(),
        }
    }

    /// Draw this year's positions. Years must arrive ascending and contiguous,
    /// all on one grid.
    pub fn observe(&mut self, year: i32, raster: &CategoricalRaster) -> Result<()> {
        if let Some(&last) = self.years.last() {
            if year == last {
                return Err(CanopyError::DuplicateYear { year });
            }
            if year != last + 1 {
                return Err(CanopyError::GapInYearSequence { prev: last, next: year });
            }
        }
        let grid = raster.grid();
        let expected = self.grid.get_or_insert_with(|| grid.clone());
        if *expected != grid {
            return Err(CanopyError::GridMismatch {
                expected: expected.clone(),
                actual: grid,
            });
        }

        let mut drawn = 0usize;
        for &code in &self.options.classes {
            let positions = draw_positions(raster, code, self.options.cap_per_class, &mut self.rng);
            drawn += positions.len();
            for pos in positions {
                self.plots.entry(pos).or_default().push((year, code));
            }
        }
        debug!(year, drawn, "sampled year");
        self.years.push(year);
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<SamplePoint>> {
        let n_years = self.years.len();
        let transform: GeoTransform = match &self.grid {
            Some(g) if n_years > 0 => g.transform,
            _ => return Err(CanopyError::Empty("no yearly rasters sampled")),
        };

        let mut points = Vec::new();
        let (mut incomplete, mut always_target, mut flagged) = (0usize, 0usize, 0usize);
        let mut plot_id = 0u32;
        for ((row, col), series) in self.plots {
            if series.len() != n_years {
                incomplete += 1;
                continue;
            }
            if series.iter().all(|&(_, c)| self.target.contains(c)) {
                always_target += 1;
                continue;
            }
            plot_id += 1;
            let flag_year = afforestation_year(&series, &self.target);
            flagged += usize::from(flag_year.is_some());
            let (x, y) = transform.pixel_center(row, col);
            points.extend(series.into_iter().map(|(year, class)| SamplePoint {
                plot_id,
                row,
                col,
                year,
                class,
                x,
                y,
                afforestation: u8::from(Some(year) == flag_year),
            }));
        }
        info!(
            plots = plot_id,
            flagged, incomplete, always_target, "resolved sample plots"
        );
        Ok(points)
    }
}

/// Up to `per_class` random pixels of every class present in `raster`, except
/// 0 and nodata.
pub fn quality_check_sample(
    raster: &CategoricalRaster,
    per_class: usize,
    seed: u64,
) -> Vec<QualityCheckPoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for &code in raster.class_counts().keys().filter(|&&c| c != 0) {
        for (row, col) in draw_positions(raster, code, Some(per_class), &mut rng) {
            let (x, y) = raster.transform.pixel_center(row, col);
            out.push(QualityCheckPoint { row, col, class: code, x, y });
        }
    }
    out
}
