//! File format adapters for the repository browser
//!
//! Each module binds one family of formats to the adapter traits of
//! `dv-core`; [`plugins`] puts them in a registry.

pub mod arrow_io;
pub mod attributes;
pub mod config;
pub mod exdir;
#[cfg(feature = "hdf5")]
pub mod hdf5_io;
pub mod image_io;
pub mod json_io;
#[cfg(feature = "matlab")]
pub mod matlab;
#[cfg(feature = "netcdf")]
pub mod netcdf_io;
pub mod numpy;
pub mod plugins;
pub mod records;
pub mod table;
pub mod wav_io;

use std::sync::Arc;

use arrow::error::ArrowError;
use dv_core::{IndexError, RtiError};
use thiserror::Error;

// Re-exports
pub use config::{CsvTableConfig, NullConfig, RegistryConfig, RegistryEntryConfig};
pub use plugins::{default_registry, registry_from_config};

/// Errors raised while reading a file format
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("NumPy error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    #[error("NumPy archive error: {0}")]
    Npz(#[from] ndarray_npy::ReadNpzError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[cfg(feature = "matlab")]
    #[error("MATLAB error: {0}")]
    Matlab(String),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Item(#[from] RtiError),

    #[error("{0}")]
    Format(String),
}

impl From<csv::Error> for DataError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(io_err) => DataError::Io(std::io::Error::new(io_err.kind(), error.to_string())),
            _ => DataError::Csv(error.to_string()),
        }
    }
}

impl From<IndexError> for DataError {
    fn from(error: IndexError) -> Self {
        DataError::Item(error.into())
    }
}

impl From<ArrowError> for DataError {
    fn from(error: ArrowError) -> Self {
        DataError::Arrow(error)
    }
}

#[cfg(feature = "matlab")]
impl From<matfile::Error> for DataError {
    fn from(error: matfile::Error) -> Self {
        DataError::Matlab(format!("{error:?}"))
    }
}

impl From<DataError> for RtiError {
    fn from(error: DataError) -> Self {
        match error {
            DataError::Io(e) => RtiError::Io(Arc::new(e)),
            DataError::Item(e) => e,
            other => RtiError::Format(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(RtiError::from(DataError::from(io)), RtiError::Io(_)));

        let item = RtiError::NotOpen("x".into());
        assert!(matches!(RtiError::from(DataError::from(item)), RtiError::NotOpen(_)));

        let format: RtiError = DataError::Format("bad header".into()).into();
        assert_eq!(format.to_string(), "Format error: bad header");
    }
}
