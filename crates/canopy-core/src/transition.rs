//! Per-pixel transition into / out of a target class between two years.
//!
//! Target codes are lifted to a sentinel offset in both rasters before
//! differencing, so that any move into the target class produces a difference
//! of at least `threshold` and any move out of it at most `-threshold`, while
//! moves between other classes stay strictly inside `(-threshold, threshold)`.
//! The offset/threshold pair is only trusted after it has been checked against
//! the class codes actually present in the inputs.
use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};
use crate::raster::{CategoricalRaster, ClassCode};
use crate::reclassify::{ClassGroup, ClassMap};

/// Nodata value of every raster produced by this module.
pub const TRANSITION_NODATA: ClassCode = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    NoChange,
    Gained,
    Lost,
}

impl Transition {
    pub const fn code(self) -> ClassCode {
        match self {
            Transition::NoChange => 0,
            Transition::Gained => 1,
            Transition::Lost => 2,
        }
    }

    pub fn from_code(code: ClassCode) -> Option<Self> {
        match code {
            0 => Some(Transition::NoChange),
            1 => Some(Transition::Gained),
            2 => Some(Transition::Lost),
            _ => None,
        }
    }
}

/// Offset substituted for target codes, and the band that separates target
/// transitions from every other class-code difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelOffset {
    offset: i64,
    threshold: i64,
}

impl SentinelOffset {
    /// Explicit constants (e.g. 5000 / 4000). Range safety is checked later by
    /// [`SentinelOffset::validate`].
    pub fn new(offset: i64, threshold: i64) -> Result<Self> {
        if threshold <= 0 || offset < threshold {
            return Err(CanopyError::InvalidSentinel { offset, threshold });
        }
        Ok(Self { offset, threshold })
    }

    /// Smallest safe pair for codes in `min_code..=max_code`.
    pub fn for_codes(min_code: ClassCode, max_code: ClassCode) -> Self {
        let (lo, hi) = (min_code.min(max_code) as i64, min_code.max(max_code) as i64);
        let threshold = hi - lo + 1;
        Self {
            offset: hi + threshold,
            threshold,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Non-target differences span at most `max - min`; they must stay below
    /// the threshold. A move into the target yields `offset - code`, which must
    /// reach it for the largest code.
    pub fn validate(&self, min_code: ClassCode, max_code: ClassCode) -> Result<()> {
        let (lo, hi) = (min_code as i64, max_code as i64);
        if self.threshold > hi - lo && self.offset - hi >= self.threshold {
            Ok(())
        } else {
            Err(CanopyError::UnsafeSentinel {
                offset: self.offset,
                threshold: self.threshold,
                min_code,
                max_code,
            })
        }
    }
}

/// Transition, source-class and destination-class rasters of one year pair.
#[derive(Debug, Clone)]
pub struct PairProducts {
    pub transitions: CategoricalRaster,
    pub sources: CategoricalRaster,
    pub destinations: CategoricalRaster,
}

/// Classifies year-pair transitions with respect to one target class group.
#[derive(Debug, Clone)]
pub struct TransitionClassifier {
    target: ClassGroup,
    sentinel: SentinelOffset,
    remap: ClassMap,
}

impl TransitionClassifier {
    pub fn new(target: ClassGroup, sentinel: SentinelOffset) -> Self {
        Self {
            target,
            sentinel,
            remap: ClassMap::default(),
        }
    }

    /// Remap applied to both years before lifting target codes.
    pub fn with_remap(mut self, remap: ClassMap) -> Self {
        self.remap = remap;
        self
    }

    pub fn target(&self) -> &ClassGroup {
        &self.target
    }

    /// TransitionRaster with values from [`Transition::code`] and
    /// [`TRANSITION_NODATA`] wherever either year is nodata.
    pub fn classify(
        &self,
        old: &CategoricalRaster,
        new: &CategoricalRaster,
    ) -> Result<CategoricalRaster> {
        self.map_pairs(old, new, |_, _, _, diff| Ok(self.transition_code(diff)))
    }

    /// Class each pixel came from when it gained the target, 0 elsewhere.
    ///
    /// Differences below the threshold are zeroed, the rest are inverted
    /// against the offset (`offset - diff` is the previous code), and the
    /// offset left behind by zeroed pixels is zeroed again.
    pub fn source_classes(
        &self,
        old: &CategoricalRaster,
        new: &CategoricalRaster,
    ) -> Result<CategoricalRaster> {
        self.map_pairs(old, new, |row, col, _, diff| self.source_code(row, col, diff))
    }

    /// Class each pixel moved to when it lost the target, 0 elsewhere.
    pub fn destination_classes(
        &self,
        old: &CategoricalRaster,
        new: &CategoricalRaster,
    ) -> Result<CategoricalRaster> {
        self.map_pairs(old, new, |row, col, n, diff| self.destination_code(row, col, n, diff))
    }

    /// All three products of one year pair from a single remap and pass.
    pub fn classify_pair(
        &self,
        old: &CategoricalRaster,
        new: &CategoricalRaster,
    ) -> Result<PairProducts> {
        let (old, new) = self.prepare(old, new)?;
        let mut transitions = old.filled_like(0, Some(TRANSITION_NODATA));
        let mut sources = transitions.clone();
        let mut destinations = transitions.clone();

        for (i, (&o, &n)) in old.data.iter().zip(new.data.iter()).enumerate() {
            if old.is_nodata(o) || new.is_nodata(n) {
                transitions.data[i] = TRANSITION_NODATA;
                sources.data[i] = TRANSITION_NODATA;
                destinations.data[i] = TRANSITION_NODATA;
                continue;
            }
            let (row, col) = (i / old.width, i % old.width);
            let diff = self.lift(n) - self.lift(o);
            transitions.data[i] = self.transition_code(diff);
            sources.data[i] = self.source_code(row, col, diff)?;
            destinations.data[i] = self.destination_code(row, col, n, diff)?;
        }
        Ok(PairProducts {
            transitions,
            sources,
            destinations,
        })
    }

    fn transition_code(&self, diff: i64) -> ClassCode {
        let threshold = self.sentinel.threshold;
        if diff >= threshold {
            Transition::Gained.code()
        } else if diff <= -threshold {
            Transition::Lost.code()
        } else {
            Transition::NoChange.code()
        }
    }

    fn source_code(&self, row: usize, col: usize, diff: i64) -> Result<ClassCode> {
        let offset = self.sentinel.offset;
        let kept = if diff < self.sentinel.threshold { 0 } else { diff };
        let inverted = offset - kept;
        if inverted == offset {
            Ok(0)
        } else if inverted == 0 {
            Err(CanopyError::ReservedSourceCode { row, col })
        } else {
            Ok(inverted as ClassCode)
        }
    }

    fn destination_code(&self, row: usize, col: usize, n: ClassCode, diff: i64) -> Result<ClassCode> {
        if diff > -self.sentinel.threshold {
            Ok(0)
        } else if n == 0 {
            Err(CanopyError::ReservedSourceCode { row, col })
        } else {
            Ok(n)
        }
    }

    fn lift(&self, code: ClassCode) -> i64 {
        if self.target.contains(code) {
            self.sentinel.offset
        } else {
            code as i64
        }
    }

    /// Remaps both rasters and validates the sentinel against their
    /// non-target codes.
    fn prepare(
        &self,
        old: &CategoricalRaster,
        new: &CategoricalRaster,
    ) -> Result<(CategoricalRaster, CategoricalRaster)> {
        old.ensure_same_grid(new)?;
        let old = self.remap.apply(old);
        let new = self.remap.apply(new);

        let non_target = |c: ClassCode| !self.target.contains(c);
        let range = match (old.code_range(non_target), new.code_range(non_target)) {
            (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
            (r, None) | (None, r) => r,
        };
        if let Some((lo, hi)) = range {
            self.sentinel.validate(lo, hi)?;
        }
        Ok((old, new))
    }

    /// Calls `f(row, col, new, diff)` for every valid pixel pair.
    fn map_pairs<F>(
        &self,
        old: &CategoricalRaster,
        new: &CategoricalRaster,
        f: F,
    ) -> Result<CategoricalRaster>
    where
        F: Fn(usize, usize, ClassCode, i64) -> Result<ClassCode>,
    {
        let (old, new) = self.prepare(old, new)?;
        let mut out = old.filled_like(0, Some(TRANSITION_NODATA));
        for (i, (&o, &n)) in old.data.iter().zip(new.data.iter()).enumerate() {
            out.data[i] = if old.is_nodata(o) || new.is_nodata(n) {
                TRANSITION_NODATA
            } else {
                let diff = self.lift(n) - self.lift(o);
                f(i / old.width, i % old.width, n, diff)?
            };
        }
        Ok(out)
    }
}
