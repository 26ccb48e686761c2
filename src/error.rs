// Error taxonomy shared by the loader, the query path and the front end.
//
// Every variant renders to the single human-readable string the UI shows;
// nothing here carries a backtrace or a nested cause the user would need to
// unpack.
use crate::filters::Dimension;
use std::path::PathBuf;
use thiserror::Error;

/// Generic tail appended to every filter validation failure.
pub const ADJUST_FILTERS: &str = "please adjust filters and retry";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to fetch data manifest from {url}: {reason}")]
    ManifestUnreachable { url: String, reason: String },

    #[error("Data manifest at {url} is not a JSON list of file names: {reason}")]
    ManifestMalformed { url: String, reason: String },

    #[error("Failed to fetch data file {file}: {reason}")]
    FileFetch { file: String, reason: String },

    #[error("Failed to read data file {file}: {reason}")]
    FileDecode { file: String, reason: String },

    #[error("Unsupported data file format: {file} (expected .parquet or .csv)")]
    UnsupportedFormat { file: String },

    #[error("Failed to write manifest {path}: {reason}")]
    ManifestWrite { path: PathBuf, reason: String },

    #[error("Data directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Data loading was interrupted: {0}")]
    Interrupted(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid {dimension} filter value {token:?} ({reason}): please adjust filters and retry")]
    InvalidFilter {
        dimension: Dimension,
        token: String,
        reason: String,
    },

    #[error("Query failed while computing {shape}: {reason}")]
    Execution { shape: &'static str, reason: String },

    #[error("Dataset is not loaded yet")]
    NotReady,

    #[error("Background query worker stopped unexpectedly")]
    WorkerGone,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to encode worker message: {0}")]
    Encode(serde_json::Error),

    #[error("Received a malformed worker message: {0}")]
    Decode(serde_json::Error),

    #[error("Value {value} is not representable as an integer count")]
    Unrepresentable { value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed login: password is required and must be a non-empty string")]
    MissingPassword,

    #[error("Wrong password")]
    Rejected,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
