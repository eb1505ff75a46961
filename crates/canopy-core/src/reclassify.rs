//! Class-code remapping applied before any comparison between years.
//!
//! Raw land-cover products split categories into sub-classes (e.g. rainfed
//! cropland 10 vs. rainfed herbaceous crops 11) that must be merged for change
//! detection to be meaningful.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};
use crate::raster::{CategoricalRaster, ClassCode};

/// A named set of class codes treated as equivalent in one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassGroup {
    pub name: String,
    pub codes: BTreeSet<ClassCode>,
}

impl ClassGroup {
    pub fn new(name: impl Into<String>, codes: impl IntoIterator<Item = ClassCode>) -> Self {
        Self {
            name: name.into(),
            codes: codes.into_iter().collect(),
        }
    }

    #[inline]
    pub fn contains(&self, code: ClassCode) -> bool {
        self.codes.contains(&code)
    }
}

/// `{old → new}` table; unlisted codes pass through unchanged.
///
/// No target code may also be a source code, so applying the map twice gives
/// the same raster as applying it once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<ClassCode, ClassCode>", into = "BTreeMap<ClassCode, ClassCode>")]
pub struct ClassMap {
    table: BTreeMap<ClassCode, ClassCode>,
}

impl ClassMap {
    pub fn new(table: BTreeMap<ClassCode, ClassCode>) -> Result<Self> {
        // Identity entries are dropped: they would otherwise count as a clash.
        let table: BTreeMap<_, _> = table.into_iter().filter(|(k, v)| k != v).collect();
        if let Some(&code) = table.values().find(|&&v| table.contains_key(&v)) {
            return Err(CanopyError::NonIdempotentMapping { code });
        }
        Ok(Self { table })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (ClassCode, ClassCode)>) -> Result<Self> {
        Self::new(pairs.into_iter().collect())
    }

    /// Extend the map so every code of `group` except `into` maps to `into`.
    pub fn merge_group(self, group: &ClassGroup, into: ClassCode) -> Result<Self> {
        let mut table = self.table;
        for &code in &group.codes {
            table.insert(code, into);
        }
        Self::new(table)
    }

    #[inline]
    pub fn map(&self, code: ClassCode) -> ClassCode {
        self.table.get(&code).copied().unwrap_or(code)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Remap every valid pixel. Nodata pixels are left untouched.
    pub fn apply(&self, raster: &CategoricalRaster) -> CategoricalRaster {
        let mut out = raster.clone();
        self.apply_in_place(&mut out);
        out
    }

    pub fn apply_in_place(&self, raster: &mut CategoricalRaster) {
        if self.table.is_empty() {
            return;
        }
        let nodata = raster.nodata;
        for v in raster.data.iter_mut() {
            if Some(*v) != nodata {
                *v = self.map(*v);
            }
        }
    }
}

impl TryFrom<BTreeMap<ClassCode, ClassCode>> for ClassMap {
    type Error = CanopyError;

    fn try_from(table: BTreeMap<ClassCode, ClassCode>) -> Result<Self> {
        Self::new(table)
    }
}

impl From<ClassMap> for BTreeMap<ClassCode, ClassCode> {
    fn from(map: ClassMap) -> Self {
        map.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CategoricalRaster {
        CategoricalRaster::from_rows(&[&[10, 11, 50], &[0, 30, 11]], Some(0)).unwrap()
    }

    #[test]
    fn unlisted_codes_pass_through() {
        let map = ClassMap::from_pairs([(11, 10)]).unwrap();
        let out = map.apply(&sample());
        assert_eq!(out.data, vec![10, 10, 50, 0, 30, 10]);
    }

    #[test]
    fn remap_is_idempotent() {
        let map = ClassMap::from_pairs([(11, 10), (12, 10), (61, 60), (62, 60)]).unwrap();
        let once = map.apply(&sample());
        let twice = map.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn chained_mapping_is_rejected() {
        let err = ClassMap::from_pairs([(11, 10), (10, 5)]).unwrap_err();
        assert!(matches!(err, CanopyError::NonIdempotentMapping { code: 10 }));
    }

    #[test]
    fn nodata_is_never_remapped() {
        let map = ClassMap::from_pairs([(0, 99)]).unwrap();
        let out = map.apply(&sample());
        assert_eq!(out.get(1, 0), 0);
    }

    #[test]
    fn merge_group_keeps_representative() {
        let crops = ClassGroup::new("crops", [10, 11, 12]);
        let map = ClassMap::default().merge_group(&crops, 10).unwrap();
        assert_eq!(map.map(11), 10);
        assert_eq!(map.map(12), 10);
        assert_eq!(map.map(10), 10);
        assert_eq!(map.map(50), 50);
    }

    #[test]
    fn deserialize_validates() {
        let ok: ClassMap = serde_json::from_str(r#"{"11": 10}"#).unwrap();
        assert_eq!(ok.map(11), 10);
        assert!(serde_json::from_str::<ClassMap>(r#"{"11": 10, "10": 5}"#).is_err());
    }
}
