//! Error types for the recommendation framework

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZeroError {
    #[error("No algorithm named \"{0}\" in the registry. Was it registered? A typo?")]
    UnknownAlgorithm(String),

    #[error("Algorithm \"{0}\" is already registered")]
    DuplicateAlgorithm(String),

    #[error("Dimensions of {0} are not set, call set_parameters(nb_users, nb_works) before fit")]
    DimensionsNotSet(String),

    #[error("Model {0} is not trained")]
    ModelNotTrained(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Model {0} is not serializable")]
    NotSerializable(String),

    #[error("Metric \"{0}\" is not implemented (available: rmse, mae, dcg, ndcg)")]
    UnknownMetric(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{kind} index {index} out of range (bound {bound})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        bound: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("Singular system: {0}")]
    SingularSystem(String),

    #[error("Snapshot not found: {}", .0.display())]
    SnapshotNotFound(PathBuf),

    #[error("Incompatible snapshot: {0}")]
    IncompatibleSnapshot(String),

    #[error("External solver failed: {0}")]
    Solver(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, ZeroError>;
