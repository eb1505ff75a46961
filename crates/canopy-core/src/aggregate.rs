//! Multi-year aggregation of year-pair change rasters.
//!
//! Produces three distinct products from an ordered, contiguous sequence of
//! year-pair rasters: a per-pixel count of qualifying transitions, a binary
//! "changed at least once" raster and a binary "changed more than
//! `multi_threshold` times" raster.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CanopyError, Result};
use crate::raster::{CategoricalRaster, ClassCode};
use crate::transition::{Transition, TRANSITION_NODATA};

/// Consecutive years `(start, start + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearPair {
    pub start: i32,
}

impl YearPair {
    pub fn new(start: i32) -> Self {
        Self { start }
    }

    pub fn end(&self) -> i32 {
        self.start + 1
    }

    /// Every pair inside `first..=last`, i.e. `last - first` pairs.
    pub fn window(first: i32, last: i32) -> Result<Vec<YearPair>> {
        if last <= first {
            return Err(CanopyError::InvalidYearRange { start: first, end: last });
        }
        Ok((first..last).map(YearPair::new).collect())
    }
}

impl std::fmt::Display for YearPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.start, self.end())
    }
}

/// Which pixel values count as one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifying {
    /// Transition rasters: only pixels holding this transition code.
    Kind(Transition),
    /// Source/destination-class rasters: any nonzero class code.
    AnyNonZero,
}

impl Qualifying {
    #[inline]
    fn matches(self, v: ClassCode) -> bool {
        match self {
            Qualifying::Kind(t) => v == t.code(),
            Qualifying::AnyNonZero => v != 0,
        }
    }
}

/// Count, ever and multi products of one aggregation run.
#[derive(Debug, Clone)]
pub struct CumulativeChange {
    /// Qualifying transitions per pixel; nodata = [`TRANSITION_NODATA`].
    pub count: CategoricalRaster,
    /// 1 where `count > 0`.
    pub ever: CategoricalRaster,
    /// 1 where `count > multi_threshold`.
    pub multi: CategoricalRaster,
    pub pairs: Vec<YearPair>,
}

impl CumulativeChange {
    pub fn max_count(&self) -> ClassCode {
        self.count
            .data
            .iter()
            .copied()
            .filter(|&v| !self.count.is_nodata(v))
            .max()
            .unwrap_or(0)
    }
}

/// Sorts `layers` by year and rejects duplicates or gaps.
pub fn order_layers(
    mut layers: Vec<(YearPair, CategoricalRaster)>,
) -> Result<Vec<(YearPair, CategoricalRaster)>> {
    layers.sort_by_key(|(pair, _)| *pair);
    validate_sequence(layers.iter().map(|(p, _)| *p))?;
    Ok(layers)
}

/// A sequence of year pairs must be strictly consecutive with no repeats.
pub fn validate_sequence(pairs: impl IntoIterator<Item = YearPair>) -> Result<()> {
    let mut prev: Option<YearPair> = None;
    for pair in pairs {
        if let Some(p) = prev {
            if pair.start == p.start {
                return Err(CanopyError::DuplicateYear { year: pair.start });
            }
            if pair.start != p.end() {
                return Err(CanopyError::GapInYearSequence {
                    prev: p.start,
                    next: pair.start,
                });
            }
        }
        prev = Some(pair);
    }
    Ok(())
}

/// Streaming accumulator: rasters are folded in one at a time so the caller
/// can drop each one before reading the next.
#[derive(Debug)]
pub struct Aggregator {
    rule: Qualifying,
    multi_threshold: u32,
    count: Option<CategoricalRaster>,
    pairs: Vec<YearPair>,
}

impl Aggregator {
    pub fn new(rule: Qualifying, multi_threshold: u32) -> Self {
        Self {
            rule,
            multi_threshold,
            count: None,
            pairs: Vec::new(),
        }
    }

    /// Pairs must arrive in ascending, contiguous year order.
    pub fn push(&mut self, pair: YearPair, layer: &CategoricalRaster) -> Result<()> {
        if let Some(&last) = self.pairs.last() {
            validate_sequence([last, pair])?;
        }
        if let Some(c) = &self.count {
            c.ensure_same_grid(layer)?;
        }
        let count = self
            .count
            .get_or_insert_with(|| layer.filled_like(0, Some(TRANSITION_NODATA)));
        for (c, &v) in count.data.iter_mut().zip(layer.data.iter()) {
            if *c == TRANSITION_NODATA {
                continue;
            }
            if layer.is_nodata(v) {
                *c = TRANSITION_NODATA;
            } else if self.rule.matches(v) {
                *c += 1;
            }
        }
        debug!(pair = %pair, "accumulated layer");
        self.pairs.push(pair);
        Ok(())
    }

    pub fn finish(self) -> Result<CumulativeChange> {
        let count = self.count.ok_or(CanopyError::Empty("no year-pair rasters to aggregate"))?;
        let threshold = self.multi_threshold as ClassCode;
        let flag = |pred: &dyn Fn(ClassCode) -> bool| {
            let mut out = count.filled_like(0, Some(TRANSITION_NODATA));
            for (o, &c) in out.data.iter_mut().zip(count.data.iter()) {
                *o = if c == TRANSITION_NODATA {
                    TRANSITION_NODATA
                } else {
                    pred(c) as ClassCode
                };
            }
            out
        };
        let ever = flag(&|c| c > 0);
        let multi = flag(&|c| c > threshold);
        Ok(CumulativeChange {
            count,
            ever,
            multi,
            pairs: self.pairs,
        })
    }
}

/// Aggregates a whole in-memory sequence (sorted and validated first).
pub fn aggregate(
    layers: Vec<(YearPair, CategoricalRaster)>,
    rule: Qualifying,
    multi_threshold: u32,
) -> Result<CumulativeChange> {
    let layers = order_layers(layers)?;
    let mut agg = Aggregator::new(rule, multi_threshold);
    for (pair, raster) in &layers {
        agg.push(*pair, raster)?;
    }
    agg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(values: &[ClassCode]) -> CategoricalRaster {
        CategoricalRaster::from_rows(&[values], Some(TRANSITION_NODATA)).unwrap()
    }

    #[test]
    fn count_is_bounded_and_ever_matches() {
        let layers = vec![
            (YearPair::new(2002), layer(&[1, 0, 2, 1])),
            (YearPair::new(2000), layer(&[1, 0, 0, 0])),
            (YearPair::new(2001), layer(&[1, 1, 0, 0])),
        ];
        let n = layers.len() as ClassCode;
        let out = aggregate(layers, Qualifying::Kind(Transition::Gained), 1).unwrap();

        assert_eq!(out.count.data, vec![3, 1, 0, 1]);
        assert!(out.max_count() <= n, "count exceeds number of pairs");
        for (&c, &e) in out.count.data.iter().zip(out.ever.data.iter()) {
            assert_eq!(e, (c > 0) as ClassCode);
        }
        assert_eq!(out.multi.data, vec![1, 0, 0, 0]);
        assert_eq!(
            out.pairs,
            vec![YearPair::new(2000), YearPair::new(2001), YearPair::new(2002)]
        );
    }

    #[test]
    fn any_nonzero_counts_class_codes() {
        let layers = vec![
            (YearPair::new(2000), layer(&[10, 0, 30])),
            (YearPair::new(2001), layer(&[40, 0, 0])),
        ];
        let out = aggregate(layers, Qualifying::AnyNonZero, 1).unwrap();
        assert_eq!(out.count.data, vec![2, 0, 1]);
        assert_eq!(out.multi.data, vec![1, 0, 0]);
    }

    #[test]
    fn nodata_in_any_year_propagates() {
        let layers = vec![
            (YearPair::new(2000), layer(&[1, TRANSITION_NODATA])),
            (YearPair::new(2001), layer(&[TRANSITION_NODATA, 1])),
        ];
        let out = aggregate(layers, Qualifying::Kind(Transition::Gained), 1).unwrap();
        assert_eq!(out.count.data, vec![TRANSITION_NODATA, TRANSITION_NODATA]);
        assert_eq!(out.ever.data, vec![TRANSITION_NODATA, TRANSITION_NODATA]);
    }

    #[test]
    fn gap_is_rejected() {
        let layers = vec![
            (YearPair::new(2000), layer(&[1])),
            (YearPair::new(2002), layer(&[1])),
        ];
        assert!(matches!(
            aggregate(layers, Qualifying::AnyNonZero, 1),
            Err(CanopyError::GapInYearSequence { prev: 2000, next: 2002 })
        ));
    }

    #[test]
    fn duplicate_is_rejected() {
        let layers = vec![
            (YearPair::new(2000), layer(&[1])),
            (YearPair::new(2000), layer(&[0])),
        ];
        assert!(matches!(
            aggregate(layers, Qualifying::AnyNonZero, 1),
            Err(CanopyError::DuplicateYear { year: 2000 })
        ));
    }

    #[test]
    fn empty_sequence_is_an_error() {
        assert!(matches!(
            aggregate(Vec::new(), Qualifying::AnyNonZero, 1),
            Err(CanopyError::Empty(_))
        ));
    }

    #[test]
    fn window_counts_pairs() {
        let w = YearPair::window(2000, 2020).unwrap();
        assert_eq!(w.len(), 20);
        assert_eq!(w[19].to_string(), "2019_2020");
        assert!(YearPair::window(2020, 2020).is_err());
    }
}
