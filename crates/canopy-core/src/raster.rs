use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

/// An integer land-cover category.
pub type ClassCode = i32;

/// Affine pixel → map transform in GDAL order `[x0, a, b, y0, d, e]`:
///   x = x0 + a·col + b·row
///   y = y0 + d·col + e·row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with square or rectangular pixels.
    pub fn north_up(x0: f64, y0: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([x0, pixel_width, 0.0, y0, 0.0, -pixel_height.abs()])
    }

    /// Map coordinate of the centre of pixel (row, col).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let [x0, a, b, y0, d, e] = self.0;
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (x0 + a * c + b * r, y0 + d * c + e * r)
    }

    pub fn is_rotated(&self) -> bool {
        self.0[2] != 0.0 || self.0[4] != 0.0
    }

    /// Component-wise comparison with a relative tolerance of 1e-9.
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0))
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0, 1.0)
    }
}

/// GeoTIFF spatial reference payload, carried verbatim from inputs to outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialRef {
    pub geo_keys: Vec<u16>,
    pub geo_doubles: Vec<f64>,
    pub geo_ascii: String,
}

const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

impl SpatialRef {
    pub fn is_empty(&self) -> bool {
        self.geo_keys.is_empty()
    }

    /// EPSG code from the GeoKey directory (projected CRS first, then geographic).
    pub fn epsg(&self) -> Option<u16> {
        if self.geo_keys.len() < 4 {
            return None;
        }
        let n_keys = self.geo_keys[3] as usize;
        let entries: Vec<&[u16]> = self.geo_keys[4..].chunks_exact(4).take(n_keys).collect();
        let lookup = |key: u16| {
            entries
                .iter()
                .find(|e| e[0] == key && e[1] == 0)
                .map(|e| e[3])
                .filter(|&code| code != 0 && code != 32767)
        };
        lookup(PROJECTED_CS_TYPE_KEY).or_else(|| lookup(GEOGRAPHIC_TYPE_KEY))
    }
}

/// Dimensions, transform and reference of a raster: everything that must agree
/// before two rasters can be compared pixel by pixel.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub srs: SpatialRef,
}

impl PartialEq for GridSpec {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.transform.approx_eq(&other.transform)
            && self.srs == other.srs
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} px, transform {:?}", self.width, self.height, self.transform.0)?;
        match self.srs.epsg() {
            Some(code) => write!(f, ", EPSG:{code}"),
            None if self.srs.is_empty() => write!(f, ", no CRS"),
            None => write!(f, ", custom CRS"),
        }
    }
}

/// A 2D grid of class codes, row-major, row 0 = first row of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalRaster {
    pub data: Vec<ClassCode>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub srs: SpatialRef,
    pub nodata: Option<ClassCode>,
}

impl CategoricalRaster {
    /// Create a raster filled with the given value.
    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        srs: SpatialRef,
        nodata: Option<ClassCode>,
        fill: ClassCode,
    ) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            transform,
            srs,
            nodata,
        }
    }

    /// Wrap row-major data; the length must equal `width * height`.
    pub fn from_data(
        grid: GridSpec,
        nodata: Option<ClassCode>,
        data: Vec<ClassCode>,
    ) -> Result<Self> {
        if data.len() != grid.width * grid.height {
            return Err(CanopyError::DataLength {
                len: data.len(),
                width: grid.width,
                height: grid.height,
            });
        }
        Ok(Self {
            data,
            width: grid.width,
            height: grid.height,
            transform: grid.transform,
            srs: grid.srs,
            nodata,
        })
    }

    /// Raster on an identity grid with no CRS, handy for small in-memory grids.
    pub fn from_rows(rows: &[&[ClassCode]], nodata: Option<ClassCode>) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, |r| r.len());
        let data: Vec<ClassCode> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_data(
            GridSpec {
                width,
                height,
                transform: GeoTransform::default(),
                srs: SpatialRef::default(),
            },
            nodata,
            data,
        )
    }

    /// New raster on the same grid, filled with `fill`.
    pub fn filled_like(&self, fill: ClassCode, nodata: Option<ClassCode>) -> Self {
        Self::new(self.width, self.height, self.transform, self.srs.clone(), nodata, fill)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> ClassCode {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: ClassCode) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn is_nodata(&self, val: ClassCode) -> bool {
        self.nodata == Some(val)
    }

    pub fn grid(&self) -> GridSpec {
        GridSpec {
            width: self.width,
            height: self.height,
            transform: self.transform,
            srs: self.srs.clone(),
        }
    }

    /// Fails with `GridMismatch` unless `other` lies on exactly this grid.
    pub fn ensure_same_grid(&self, other: &CategoricalRaster) -> Result<()> {
        let (expected, actual) = (self.grid(), other.grid());
        if expected != actual {
            return Err(CanopyError::GridMismatch { expected, actual });
        }
        Ok(())
    }

    /// Pixel count per class code, nodata excluded.
    pub fn class_counts(&self) -> BTreeMap<ClassCode, u64> {
        let mut counts = BTreeMap::new();
        for &v in &self.data {
            if !self.is_nodata(v) {
                *counts.entry(v).or_insert(0u64) += 1;
            }
        }
        counts
    }

    /// Smallest and largest valid code for which `keep` holds.
    pub fn code_range(&self, keep: impl Fn(ClassCode) -> bool) -> Option<(ClassCode, ClassCode)> {
        self.data
            .iter()
            .copied()
            .filter(|&v| !self.is_nodata(v) && keep(v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// All (row, col) positions holding `code`, in row-major order.
    pub fn positions_of(&self, code: ClassCode) -> Vec<(usize, usize)> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == code && !self.is_nodata(v))
            .map(|(i, _)| (i / self.width, i % self.width))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_center_north_up() {
        let t = GeoTransform::north_up(-74.0, 7.0, 0.5, 0.25);
        let (x, y) = t.pixel_center(0, 0);
        assert!((x - -73.75).abs() < 1e-12);
        assert!((y - 6.875).abs() < 1e-12);
        let (x, y) = t.pixel_center(3, 2);
        assert!((x - -72.75).abs() < 1e-12);
        assert!((y - 6.125).abs() < 1e-12);
    }

    #[test]
    fn grid_mismatch_on_shape() {
        let a = CategoricalRaster::from_rows(&[&[1, 2], &[3, 4]], None).unwrap();
        let b = CategoricalRaster::from_rows(&[&[1, 2, 3]], None).unwrap();
        assert!(matches!(a.ensure_same_grid(&b), Err(CanopyError::GridMismatch { .. })));
    }

    #[test]
    fn grid_mismatch_on_transform() {
        let a = CategoricalRaster::from_rows(&[&[1, 2], &[3, 4]], None).unwrap();
        let mut b = a.clone();
        b.transform = GeoTransform::north_up(10.0, 0.0, 1.0, 1.0);
        assert!(a.ensure_same_grid(&b).is_err());
        assert!(a.ensure_same_grid(&a.clone()).is_ok());
    }

    #[test]
    fn class_counts_skip_nodata() {
        let r = CategoricalRaster::from_rows(&[&[10, 10, 0], &[50, 0, 10]], Some(0)).unwrap();
        let counts = r.class_counts();
        assert_eq!(counts.get(&10), Some(&3));
        assert_eq!(counts.get(&50), Some(&1));
        assert!(!counts.contains_key(&0));
    }

    #[test]
    fn from_data_rejects_bad_length() {
        let grid = CategoricalRaster::from_rows(&[&[1, 2]], None).unwrap().grid();
        assert!(matches!(
            CategoricalRaster::from_data(grid, None, vec![1, 2, 3]),
            Err(CanopyError::DataLength { .. })
        ));
    }

    #[test]
    fn epsg_from_geo_keys() {
        let srs = SpatialRef {
            // header + GTModelType + GeographicType = 4326
            geo_keys: vec![1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326],
            ..SpatialRef::default()
        };
        assert_eq!(srs.epsg(), Some(4326));
        assert_eq!(SpatialRef::default().epsg(), None);
    }
}
