//! Point dataset export: a CSV table and a GeoJSON FeatureCollection sharing
//! one file stem.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value as GeoValue};
use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tracing::debug;

use crate::error::{CanopyError, Result};
use crate::sampler::{QualityCheckPoint, SamplePoint};

/// Map coordinate of an exported record.
pub trait Located {
    fn location(&self) -> (f64, f64);
}

impl Located for SamplePoint {
    fn location(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl Located for QualityCheckPoint {
    fn location(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CanopyError::io(parent, e))?;
    }
    Ok(())
}

pub fn write_points_csv<T: Serialize>(path: &Path, points: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let csv_err = |source: csv::Error| CanopyError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
    for p in points {
        wtr.serialize(p).map_err(csv_err)?;
    }
    wtr.flush().map_err(|e| CanopyError::io(path, e))?;
    Ok(())
}

/// Every record becomes a Point feature whose properties are its serialized
/// fields. A known EPSG code is written as a legacy `crs` member.
pub fn feature_collection<T: Serialize + Located>(
    points: &[T],
    epsg: Option<u16>,
) -> serde_json::Result<FeatureCollection> {
    let mut features = Vec::with_capacity(points.len());
    for p in points {
        let properties = match serde_json::to_value(p)? {
            JsonValue::Object(map) => map,
            other => {
                let mut map = JsonMap::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let (x, y) = p.location();
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Point(vec![x, y]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    let foreign_members = epsg.map(|code| {
        let mut members = JsonMap::new();
        members.insert(
            "crs".to_string(),
            json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{code}") }
            }),
        );
        members
    });

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    })
}

pub fn write_points_geojson<T: Serialize + Located>(
    path: &Path,
    points: &[T],
    epsg: Option<u16>,
) -> Result<()> {
    ensure_parent(path)?;
    let fc = feature_collection(points, epsg).map_err(|source| CanopyError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let file = File::create(path).map_err(|e| CanopyError::io(path, e))?;
    let mut w = BufWriter::new(file);
    w.write_all(GeoJson::FeatureCollection(fc).to_string().as_bytes())
        .and_then(|_| w.flush())
        .map_err(|e| CanopyError::io(path, e))?;
    Ok(())
}

/// Write `{stem}.csv` and `{stem}.geojson`; returns both paths.
pub fn write_point_dataset<T: Serialize + Located>(
    stem: &Path,
    points: &[T],
    epsg: Option<u16>,
) -> Result<(PathBuf, PathBuf)> {
    let csv_path = stem.with_extension("csv");
    let geojson_path = stem.with_extension("geojson");
    write_points_csv(&csv_path, points)?;
    write_points_geojson(&geojson_path, points, epsg)?;
    debug!(stem = %stem.display(), points = points.len(), "wrote point dataset");
    Ok((csv_path, geojson_path))
}
