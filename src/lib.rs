/// This crate ranks documents by cosine similarity and splits a document
/// collection into communities of a target size.
pub mod similarity;
pub mod community;
pub mod config;
pub mod error;

/// Document Vector
/// A document key paired with its fixed-dimensional vector.
/// Immutable once built.
///
/// `DocumentVector<K, N>` has the following generic parameters:
/// - `K`: Document key type (e.g., String, usize)
/// - `N`: Vector element type (f16, f32, f64)
pub use similarity::DocumentVector;

/// Similarity Matrix
/// Row-major matrix of cosine similarities between two vector sequences.
/// Rows follow the second sequence, columns the first.
/// A set compared against itself can have its diagonal zeroed.
pub use similarity::SimilarityMatrix;

/// Similarity Engine
/// Stateless numerical routines. Every matrix returned is a fresh value.
/// - `cosine_matrix`: full cosine matrix between two sets
/// - `cosine_matrix_self`: set against itself, diagonal forced to zero
/// - `cosine`: a single pair
/// - `mean_vector`: component-wise mean of a set
///
/// Zero-norm vectors raise `ZeroNormVector` and NaN/infinite elements raise
/// `NonFiniteElement`, so no cell is ever NaN.
pub use similarity::{cosine, cosine_matrix, cosine_matrix_self, mean_vector};

/// Ranking
/// - `top_k_matches`: highest similarity cells, self pairs excluded when both sides are equal
/// - `keyed_top_matches`: same, with document keys instead of indices
/// - `average_similarity`: mean similarity within a set or across two sets
pub use similarity::ranking::{average_similarity, keyed_top_matches, top_k_matches, KeyedMatch, KeyedMatches, Match};

/// Element Comparison Trait
/// Scaled dot product and norm per element type.
/// `DefaultCompare` implements it for:
/// - f16
/// - f32
/// - f64
pub use similarity::compare::{Compare, DefaultCompare, VectorScale};

/// Community Assignment
/// Maps each document to its path of community labels, one label per
/// subdivision round it went through. The last label is the current community.
pub use community::{BucketState, CommunityAssignment, CommunityBucket, FrontierEntry, Label, LabelCounter, SubdivisionFrontier};

/// Partition Oracle
/// External modularity-based community detection, used as a black box.
/// Any `Fn(&PartitionRequest<K>) -> Result<Partition<K>, OracleError>` is an oracle.
/// `CommandOracle` drives an external program through GEXF/CSV files.
pub use community::oracle::{Edge, Partition, PartitionOracle, PartitionRequest, WeightedGraph};
pub use community::command::CommandOracle;

/// Document Vector Store
/// Looks up document vectors by key for each subdivision round.
pub use community::store::{MemoryVectorStore, VectorStore};

/// Recursive Community Subdivider
/// Partitions a collection, then keeps re-partitioning every community above
/// `max_population` until none is left, tracking the community path of every
/// document.
///
/// # Failure
/// A failed oracle call leaves all completed rounds intact; call `resume`
/// (or restore a `checkpoint`) to continue.
pub use community::subdivider::{Phase, StepOutcome, SubdivisionReport, Subdivider};

/// Subdivision Config
/// Population band, similarity threshold and community budget.
/// Loadable from TOML and `DOC_COMMUNITY_*` environment variables.
pub use config::SubdivisionConfig;

pub use error::{ConfigError, OracleError, Side, SimilarityError, SubdivideError};
