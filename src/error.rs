//! Error taxonomy for the pipeline: configuration, step execution, catalog.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config already exists at {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("config key not found: {0}")]
    KeyNotFound(String),

    #[error("malformed value for {key}: {reason}")]
    MalformedValue { key: String, reason: String },

    #[error("config does not parse as TOML ({path}): {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("unknown step: {0}")]
    UnknownStep(String),

    #[error("step {step}: {source}")]
    Config {
        step: String,
        #[source]
        source: ConfigError,
    },

    #[error("step {step}: missing required input: {detail}")]
    MissingInput { step: String, detail: String },

    #[error("step {step} failed: {detail}")]
    Invocation { step: String, detail: String },

    #[error("step {step} finished but did not produce {artifact}")]
    MissingArtifact { step: String, artifact: String },

    #[error("step {step} cancelled: {detail}")]
    Cancelled { step: String, detail: String },

    #[error("step {step} I/O error: {source}")]
    Io {
        step: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid geometry {aoi:?}: {reason}")]
    InvalidGeometry { aoi: String, reason: String },

    #[error("missing or empty asset {role}: {path}")]
    MissingAsset { role: String, path: PathBuf },

    #[error("invalid asset declaration {0:?} (expected role=path)")]
    InvalidAsset(String),

    #[error("item id {item_id:?} does not match a {collection_id} naming convention")]
    InvalidItemId {
        collection_id: String,
        item_id: String,
    },

    #[error("invalid temporal extent: {0}")]
    InvalidTemporalExtent(String),

    #[error("existing collection at {path} has id {found:?}, expected {expected:?}")]
    CollectionMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
}
