use std::path::PathBuf;

use thiserror::Error;

use crate::raster::GridSpec;

pub type Result<T> = std::result::Result<T, CanopyError>;

#[derive(Debug, Error)]
pub enum CanopyError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF error in {path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("unsupported sample type in {path}: {kind}")]
    UnsupportedSampleType { path: PathBuf, kind: String },

    #[error("{path} has no georeferencing (ModelPixelScale/ModelTiepoint or ModelTransformation)")]
    MissingGeoreference { path: PathBuf },

    #[error("grid mismatch: expected {expected}, got {actual}")]
    GridMismatch { expected: GridSpec, actual: GridSpec },

    #[error("raster data length {len} does not match {width}x{height}")]
    DataLength { len: usize, width: usize, height: usize },

    #[error("no file for year {year} matching {pattern} in {dir}")]
    MissingYear {
        year: i32,
        pattern: String,
        dir: PathBuf,
    },

    #[error("year sequence is not contiguous: {prev} is followed by {next}")]
    GapInYearSequence { prev: i32, next: i32 },

    #[error("year {year} appears more than once")]
    DuplicateYear { year: i32 },

    #[error("empty input: {0}")]
    Empty(&'static str),

    #[error("invalid year range {start}..={end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("sentinel threshold {threshold} must be positive and not exceed offset {offset}")]
    InvalidSentinel { offset: i64, threshold: i64 },

    #[error(
        "sentinel offset {offset}/threshold {threshold} is unsafe for class codes {min_code}..={max_code}"
    )]
    UnsafeSentinel {
        offset: i64,
        threshold: i64,
        min_code: i32,
        max_code: i32,
    },

    #[error("class map is not idempotent: code {code} is both a source and a target")]
    NonIdempotentMapping { code: i32 },

    #[error("pixel ({row}, {col}) gained the target class from reserved code 0")]
    ReservedSourceCode { row: usize, col: usize },

    #[error("template {template:?} is missing placeholder {placeholder}")]
    BadTemplate {
        template: String,
        placeholder: &'static str,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CanopyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CanopyError::Io { path: path.into(), source }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        CanopyError::Tiff { path: path.into(), source }
    }
}
