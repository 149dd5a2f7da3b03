//! Error types for the similarity engine and the community subdivider.
//!
//! Similarity errors are local to a single call and are never retried.
//! Subdivider errors leave every round completed before the failure intact,
//! so the caller can resume from the preserved frontier.

use std::path::PathBuf;

use thiserror::Error;

use crate::community::Label;

/// Which input sequence a vector came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => write!(f, "a"),
            Side::B => write!(f, "b"),
        }
    }
}

/// Errors raised by the similarity engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    /// Two vectors do not share the same dimensionality
    #[error("dimension mismatch: expected {expected}, found {found} ({side}[{index}])")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        side: Side,
        index: usize,
    },

    /// A vector has zero norm, cosine is undefined for it
    #[error("zero-norm vector at {side}[{index}]")]
    ZeroNormVector { side: Side, index: usize },

    /// A vector holds a NaN or infinite element
    #[error("non-finite element in {side}[{index}]")]
    NonFiniteElement { side: Side, index: usize },

    /// More matches were requested than cells are available
    #[error("requested {requested} matches but only {available} cells are available")]
    InsufficientData { requested: usize, available: usize },

    /// Not enough vectors to compute the requested statistic
    #[error("empty input: needs at least {required} vector(s), got {found}")]
    EmptyInput { required: usize, found: usize },
}

/// Errors raised by a partition oracle
#[derive(Error, Debug)]
pub enum OracleError {
    /// The oracle could not be reached or started
    #[error("oracle unreachable: {0}")]
    Unreachable(String),

    /// The oracle did not answer in time; nothing from the call is applied
    #[error("oracle timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The oracle ran and reported a failure
    #[error("oracle failed: {0}")]
    Failed(String),

    /// The oracle answered with something that is not a valid partition
    #[error("malformed oracle output: {0}")]
    Malformed(String),

    #[error("oracle i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors raised by the recursive community subdivider
#[derive(Error, Debug)]
pub enum SubdivideError {
    /// The partition oracle failed for the round working on `label`
    /// (`None` for the initial round). No partial result was applied.
    #[error("partition oracle unavailable for {}: {source}", label_name(.label))]
    OracleUnavailable {
        label: Option<Label>,
        #[source]
        source: OracleError,
    },

    #[error(transparent)]
    Similarity(#[from] SimilarityError),

    /// The vector store has no vector for a document in the assignment
    #[error("no vector stored for document {0}")]
    MissingVector(String),

    /// `initialize` was called on a subdivider that already ran its first round
    #[error("subdivider already initialized ({rounds} round(s) completed)")]
    AlreadyInitialized { rounds: usize },

    /// Subdividing was requested before the first round
    #[error("subdivider not initialized")]
    NotInitialized,

    /// The same document id was passed twice to `initialize`
    #[error("document {0} appears more than once")]
    DuplicateDocument(String),

    /// The matrix handed to `initialize` does not match the id list
    #[error("matrix is {rows}x{cols} but {ids} document ids were given")]
    MatrixShape { rows: usize, cols: usize, ids: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] serde_cbor::Error),
}

fn label_name(label: &Option<Label>) -> String {
    match label {
        Some(label) => format!("community {label}"),
        None => "initial round".to_string(),
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("min_population ({min}) is greater than max_population ({max})")]
    PopulationBand { min: usize, max: usize },

    #[error("max_population must be at least 1")]
    ZeroMaxPopulation,

    #[error("similarity_threshold {0} is outside [-1, 1]")]
    Threshold(f64),

    #[error("parallel_batch must be at least 1")]
    ZeroBatch,

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

pub type SimilarityResult<T> = Result<T, SimilarityError>;
pub type SubdivideResult<T> = Result<T, SubdivideError>;
