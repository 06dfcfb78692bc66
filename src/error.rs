use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ClimprojError {
    #[error("missing ESGF credentials (set username/password in config or ESGF_USERNAME/ESGF_PASSWORD)")]
    MissingCredentials,

    #[error("choose either 'bbox' or 'points', not both")]
    ConflictingSpatialMode,

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid bounding box: {0}")]
    InvalidBbox(String),

    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("variable '{variable}' not available for source '{source_name}' and product '{product}'")]
    UnknownVariable {
        variable: String,
        product: String,
        source_name: String,
    },

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("catalog response could not be decoded: {0}")]
    CatalogDecode(String),

    #[error("malformed catalog file record: {0}")]
    MalformedRecord(String),

    #[error("download failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("cannot extract date range from filename: {0}")]
    InvalidDateRange(String),

    #[error("dataset has no 'time' coordinate; cannot export CSV: {0}")]
    MissingTimeAxis(String),

    #[error("unsupported time encoding: {0}")]
    TimeEncoding(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("NetCDF error: {0}")]
    Netcdf(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
