//! Land-cover change detection: reclassification, per-year-pair transitions,
//! multi-year aggregation, zonal class tables and stratified plot sampling
//! over categorical GeoTIFF rasters.

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod geotiff;
pub mod manifest;
pub mod mask;
pub mod naming;
pub mod pipeline;
pub mod raster;
pub mod reclassify;
pub mod sampler;
pub mod transition;
pub mod zonal;

pub use aggregate::{aggregate, Aggregator, CumulativeChange, Qualifying, YearPair};
pub use config::{PipelineConfig, YearWindow};
pub use error::{CanopyError, Result};
pub use raster::{CategoricalRaster, ClassCode, GeoTransform, GridSpec, SpatialRef};
pub use reclassify::{ClassGroup, ClassMap};
pub use transition::{SentinelOffset, Transition, TransitionClassifier, TRANSITION_NODATA};
