//! Error types for the Street Trees persistence stack.

use crate::record::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Object model loading errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Object model '{name}' not found at {path}")]
    NotFound { name: String, path: PathBuf },

    #[error("Failed to parse object model '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("Invalid object model '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Backing store provisioning and reset errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to create store at {location}: {reason}")]
    UnableToCreateStoreAt { location: PathBuf, reason: String },

    #[error("Store not found at {0}")]
    StoreNotFoundAt(PathBuf),

    #[error("In-memory store missing")]
    InMemoryStoreMissing,

    #[error("No store is attached to this stack")]
    StoreUnavailable,

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn unable_to_create(location: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::UnableToCreateStoreAt {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by unit-of-work operations on a context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("Type mismatch for {entity}.{attribute}: expected {expected}")]
    TypeMismatch {
        entity: String,
        attribute: String,
        expected: String,
    },

    #[error("Missing required attribute {entity}.{attribute}")]
    MissingAttribute { entity: String, attribute: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Saving parent context '{parent}' failed: {source}")]
    Propagation {
        parent: String,
        #[source]
        source: Box<ContextError>,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

pub(crate) fn to_store_io(err: sled::Error) -> StoreError {
    StoreError::IoError(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

pub(crate) fn to_store_data(err: serde_json::Error) -> StoreError {
    StoreError::IoError(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    ))
}
