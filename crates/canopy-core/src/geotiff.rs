//! GeoTIFF read/write for single-band integer class rasters.
//!
//! Georeferencing is taken from ModelPixelScale + ModelTiepoint, or from
//! ModelTransformation when the grid is rotated. GeoKey tags are carried
//! through unchanged so outputs keep the CRS of their inputs. Nodata uses the
//! GDAL_NODATA ASCII tag.
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::GrayI32;
use tiff::encoder::compression::{Deflate, DeflateLevel};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{CanopyError, Result};
use crate::raster::{CategoricalRaster, ClassCode, GeoTransform, GridSpec, SpatialRef};

// ── GeoTIFF tag ids ───────────────────────────────────────────────────────────

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

/// TIFF Predictor value for horizontal differencing.
const PREDICTOR_HORIZONTAL: u16 = 2;
/// Rows per Deflate strip, matching the usual 256-pixel GDAL block edge.
const STRIP_ROWS: u32 = 256;

fn tag(id: u16) -> Tag {
    Tag::from_u16_exhaustive(id)
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Read band 1 of an integer GeoTIFF fully into memory.
pub fn read_raster(path: &Path) -> Result<CategoricalRaster> {
    let file = File::open(path).map_err(|e| CanopyError::io(path, e))?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| CanopyError::tiff(path, e))?;
    let (width, height) = decoder.dimensions().map_err(|e| CanopyError::tiff(path, e))?;

    let transform = read_transform(&mut decoder, path)?;
    let srs = SpatialRef {
        geo_keys: optional_u16_vec(&mut decoder, GEO_KEY_DIRECTORY, path)?.unwrap_or_default(),
        geo_doubles: optional_f64_vec(&mut decoder, GEO_DOUBLE_PARAMS, path)?.unwrap_or_default(),
        geo_ascii: optional_ascii(&mut decoder, GEO_ASCII_PARAMS, path)?.unwrap_or_default(),
    };
    let nodata = optional_ascii(&mut decoder, GDAL_NODATA, path)?
        .and_then(|s| parse_nodata(&s));

    let image = decoder.read_image().map_err(|e| CanopyError::tiff(path, e))?;
    let data = widen(image, path)?;

    debug!(path = %path.display(), width, height, ?nodata, "read raster");
    CategoricalRaster::from_data(
        GridSpec {
            width: width as usize,
            height: height as usize,
            transform,
            srs,
        },
        nodata,
        data,
    )
}

fn widen(image: DecodingResult, path: &Path) -> Result<Vec<ClassCode>> {
    let unsupported = |kind: &str| CanopyError::UnsupportedSampleType {
        path: path.to_path_buf(),
        kind: kind.to_string(),
    };
    Ok(match image {
        DecodingResult::U8(v) => v.into_iter().map(ClassCode::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(ClassCode::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(ClassCode::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(ClassCode::from).collect(),
        DecodingResult::I32(v) => v,
        DecodingResult::U32(v) => v
            .into_iter()
            .map(ClassCode::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| unsupported("u32 values above i32::MAX"))?,
        DecodingResult::U64(_) | DecodingResult::I64(_) => return Err(unsupported("64-bit integer")),
        DecodingResult::F32(_) | DecodingResult::F64(_) => return Err(unsupported("floating point")),
        #[allow(unreachable_patterns)]
        _ => return Err(unsupported("unknown")),
    })
}

/// GDAL writes nodata as text; integer rasters may still carry "0.0" or "-1e+00".
fn parse_nodata(s: &str) -> Option<ClassCode> {
    let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    s.parse::<ClassCode>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= ClassCode::MIN as f64 && *v <= ClassCode::MAX as f64)
            .map(|v| v as ClassCode)
    })
}

fn read_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<GeoTransform> {
    if let Some(m) = optional_f64_vec(decoder, MODEL_TRANSFORMATION, path)? {
        if m.len() >= 8 {
            return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }
    let scale = optional_f64_vec(decoder, MODEL_PIXEL_SCALE, path)?;
    let tie = optional_f64_vec(decoder, MODEL_TIEPOINT, path)?;
    match (scale, tie) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            // Tiepoint (i, j, k) → (x, y, z); pixel scale (sx, sy, sz).
            let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
            let (sx, sy) = (s[0], s[1]);
            Ok(GeoTransform([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
        }
        _ => Err(CanopyError::MissingGeoreference { path: path.to_path_buf() }),
    }
}

fn optional_f64_vec<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    id: u16,
    path: &Path,
) -> Result<Option<Vec<f64>>> {
    decoder
        .find_tag(tag(id))
        .and_then(|v| v.map(|v| v.into_f64_vec()).transpose())
        .map_err(|e| CanopyError::tiff(path, e))
}

fn optional_u16_vec<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    id: u16,
    path: &Path,
) -> Result<Option<Vec<u16>>> {
    decoder
        .find_tag(tag(id))
        .and_then(|v| v.map(|v| v.into_u16_vec()).transpose())
        .map_err(|e| CanopyError::tiff(path, e))
}

fn optional_ascii<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    id: u16,
    path: &Path,
) -> Result<Option<String>> {
    decoder
        .find_tag(tag(id))
        .and_then(|v| v.map(|v| v.into_string()).transpose())
        .map_err(|e| CanopyError::tiff(path, e))
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Row-wise horizontal differencing, undone by any reader honouring
/// `Predictor = 2`.
fn horizontal_differences(data: &[ClassCode], width: usize) -> Vec<ClassCode> {
    let mut out = Vec::with_capacity(data.len());
    for row in data.chunks(width.max(1)) {
        let mut prev = 0i32;
        for &v in row {
            out.push(v.wrapping_sub(prev));
            prev = v;
        }
    }
    out
}

/// Write a raster as a Deflate-compressed Int32 GeoTIFF with the horizontal
/// predictor and 256-row strips.
pub fn write_raster(path: &Path, raster: &CategoricalRaster) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CanopyError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| CanopyError::io(path, e))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(|e| CanopyError::tiff(path, e))?;
    let mut image = encoder
        .new_image_with_compression::<GrayI32, _>(
            raster.width as u32,
            raster.height as u32,
            Deflate::with_level(DeflateLevel::Balanced),
        )
        .map_err(|e| CanopyError::tiff(path, e))?;
    image
        .rows_per_strip(STRIP_ROWS.min(raster.height.max(1) as u32))
        .map_err(|e| CanopyError::tiff(path, e))?;

    {
        let dir = image.encoder();
        dir.write_tag(Tag::Predictor, PREDICTOR_HORIZONTAL)
            .map_err(|e| CanopyError::tiff(path, e))?;
        let [x0, a, b, y0, d, e] = raster.transform.0;
        let georef = if raster.transform.is_rotated() {
            let m: [f64; 16] = [
                a, b, 0.0, x0, //
                d, e, 0.0, y0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(tag(MODEL_TRANSFORMATION), &m[..])
        } else {
            dir.write_tag(tag(MODEL_PIXEL_SCALE), &[a, -e, 0.0][..])
                .and_then(|_| dir.write_tag(tag(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, x0, y0, 0.0][..]))
        };
        georef.map_err(|e| CanopyError::tiff(path, e))?;

        if !raster.srs.geo_keys.is_empty() {
            dir.write_tag(tag(GEO_KEY_DIRECTORY), &raster.srs.geo_keys[..])
                .map_err(|e| CanopyError::tiff(path, e))?;
        }
        if !raster.srs.geo_doubles.is_empty() {
            dir.write_tag(tag(GEO_DOUBLE_PARAMS), &raster.srs.geo_doubles[..])
                .map_err(|e| CanopyError::tiff(path, e))?;
        }
        if !raster.srs.geo_ascii.is_empty() {
            dir.write_tag(tag(GEO_ASCII_PARAMS), raster.srs.geo_ascii.as_str())
                .map_err(|e| CanopyError::tiff(path, e))?;
        }
        if let Some(nd) = raster.nodata {
            dir.write_tag(tag(GDAL_NODATA), nd.to_string().as_str())
                .map_err(|e| CanopyError::tiff(path, e))?;
        }
    }

    let encoded = horizontal_differences(&raster.data, raster.width);
    image.write_data(&encoded).map_err(|e| CanopyError::tiff(path, e))?;
    debug!(path = %path.display(), "wrote raster");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nodata_variants() {
        assert_eq!(parse_nodata("0"), Some(0));
        assert_eq!(parse_nodata("-1\0"), Some(-1));
        assert_eq!(parse_nodata("255.0"), Some(255));
        assert_eq!(parse_nodata("nan"), None);
        assert_eq!(parse_nodata("0.5"), None);
    }

    #[test]
    fn written_raster_reads_back_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lc_2000.tiff");

        let srs = SpatialRef {
            geo_keys: vec![1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326],
            geo_doubles: Vec::new(),
            geo_ascii: "WGS 84|".to_string(),
        };
        let mut raster = CategoricalRaster::new(
            4,
            3,
            GeoTransform::north_up(-73.5, 7.25, 0.0027, 0.0027),
            srs,
            Some(0),
            10,
        );
        raster.set(1, 2, 50);
        raster.set(2, 3, 0);

        write_raster(&path, &raster).unwrap();
        let back = read_raster(&path).unwrap();

        assert_eq!(back.width, 4);
        assert_eq!(back.height, 3);
        assert_eq!(back.data, raster.data);
        assert_eq!(back.nodata, Some(0));
        assert_eq!(back.srs.epsg(), Some(4326));
        assert!(back.transform.approx_eq(&raster.transform));
        assert!(raster.ensure_same_grid(&back).is_ok());
    }

    #[test]
    fn predictor_rows_decode_to_original_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.tiff");
        let rows: [&[ClassCode]; 3] = [
            &[10, 50, 50, 220],
            &[i32::MAX, i32::MIN, -1, 0],
            &[120, 10, 0, 5000],
        ];
        let raster = CategoricalRaster::from_rows(&rows, Some(-1)).unwrap();
        write_raster(&path, &raster).unwrap();

        let mut decoder = Decoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(
            decoder.get_tag_u32(Tag::Predictor).unwrap(),
            u32::from(PREDICTOR_HORIZONTAL)
        );
        assert_eq!(read_raster(&path).unwrap().data, raster.data);
    }

    #[test]
    fn differences_restart_every_row() {
        assert_eq!(horizontal_differences(&[5, 7, 4, 10, 10, 1], 3), vec![5, 2, -3, 10, 0, -9]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_raster(Path::new("does/not/exist.tiff")).unwrap_err();
        assert!(matches!(err, CanopyError::Io { .. }));
    }
}
