//! Plantation masking: pixels that lost forest inside mapped plantations are
//! harvest rotation rather than deforestation, so they are put back to forest
//! in every yearly land-cover raster before sampling.
use crate::error::Result;
use crate::raster::{CategoricalRaster, ClassCode};

/// 1 where the pixel was deforested at least once and lies inside a
/// plantation (nonzero, non-nodata mask value), 0 elsewhere.
pub fn plantation_mask(
    deforest_count: &CategoricalRaster,
    plantations: &CategoricalRaster,
) -> Result<CategoricalRaster> {
    deforest_count.ensure_same_grid(plantations)?;
    let mut out = deforest_count.filled_like(0, None);
    for ((o, &count), &plant) in out
        .data
        .iter_mut()
        .zip(deforest_count.data.iter())
        .zip(plantations.data.iter())
    {
        let deforested = !deforest_count.is_nodata(count) && count > 0;
        let planted = !plantations.is_nodata(plant) && plant != 0;
        *o = ClassCode::from(deforested && planted);
    }
    Ok(out)
}

/// Copy of `land_cover` with every masked pixel set to `forest_code`.
/// Nodata pixels stay nodata.
pub fn restore_forest(
    land_cover: &CategoricalRaster,
    mask: &CategoricalRaster,
    forest_code: ClassCode,
) -> Result<CategoricalRaster> {
    land_cover.ensure_same_grid(mask)?;
    let mut out = land_cover.clone();
    for (v, &m) in out.data.iter_mut().zip(mask.data.iter()) {
        if m != 0 && !land_cover.is_nodata(*v) {
            *v = forest_code;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_deforested_plantation_pixels_are_masked() {
        let count = CategoricalRaster::from_rows(&[&[0, 1, 3, -1]], Some(-1)).unwrap();
        let plant = CategoricalRaster::from_rows(&[&[1, 1, 0, 1]], None).unwrap();
        let mask = plantation_mask(&count, &plant).unwrap();
        assert_eq!(mask.data, vec![0, 1, 0, 0]);
    }

    #[test]
    fn restore_sets_forest_and_keeps_nodata() {
        let lc = CategoricalRaster::from_rows(&[&[10, 30, 0]], Some(0)).unwrap();
        let mask = CategoricalRaster::from_rows(&[&[0, 1, 1]], None).unwrap();
        let out = restore_forest(&lc, &mask, 50).unwrap();
        assert_eq!(out.data, vec![10, 50, 0]);
        assert_eq!(out.nodata, Some(0));
    }
}
