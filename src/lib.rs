pub mod app;
pub mod assemble;
pub mod catalog;
pub mod cftime;
pub mod config;
pub mod dataset;
pub mod discovery;
pub mod domain;
pub mod download;
pub mod error;
pub mod http;
pub mod metadata;
pub mod netcdf_io;
pub mod output;
pub mod postprocess;
pub mod store;
