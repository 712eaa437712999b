//! Error types for the archive access core.

use thiserror::Error;

use crate::lazy::array::DType;

/// Errors arising from categorical timeline construction and mutation.
#[derive(Error, Debug)]
pub enum CategoricalError {
    /// A value is required but the sample stream is empty and the policy
    /// provides no initial value to fall back on.
    #[error("no samples and no initial value to cover dump 0")]
    InvalidSample,

    /// Sample timestamps decrease beyond what the resolver tolerates.
    #[error("sample timestamps are not monotonic at sample {index}")]
    NonMonotonicSamples { index: usize },

    #[error("dump grid is empty")]
    EmptyDumpGrid,

    /// A construction or mutation would leave the segment partition of
    /// `[0, N)` broken. This is a programming error, surfaced immediately
    /// rather than silently repaired.
    #[error("{op} would break the segment partition: {reason}")]
    InvariantViolation { op: &'static str, reason: String },
}

/// Errors arising from sensor cache resolution.
#[derive(Error, Debug)]
pub enum SensorError {
    /// The name resolved through neither alias, raw data nor the virtual
    /// registry.
    #[error("sensor '{0}' not found in cache, raw data or virtual registry")]
    NotFound(String),

    /// A virtual sensor transitively requested its own unresolved name.
    /// Fatal configuration error, never retried.
    #[error("virtual sensor cycle while computing '{name}': {chain}")]
    VirtualSensorCycle { name: String, chain: String },

    #[error("sensor '{name}' has an empty sample stream")]
    InvalidSample { name: String },

    /// A sensor forced continuous by policy carries non-numeric values.
    #[error("sensor '{name}' has non-numeric values but resolved as continuous")]
    NotNumeric { name: String },

    /// A name pattern contains more than one wildcard.
    #[error("sensor name pattern '{0}' contains more than one wildcard")]
    BadPattern(String),

    #[error("sensor '{name}': {source}")]
    Categorical {
        name: String,
        #[source]
        source: CategoricalError,
    },
}

/// Errors arising from lazy indexing and materialisation.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// The selection has more significant axes than the indexer exposes
    /// after padding/truncation rules are applied.
    #[error("selection has {got} significant axes but the indexer exposes {ndim}")]
    SelectionShapeMismatch { got: usize, ndim: usize },

    #[error("selection index {index} out of range for axis {axis} of length {len}")]
    SelectionOutOfBounds {
        axis: usize,
        index: usize,
        len: usize,
    },

    #[error("selection mask length {got} does not match axis {axis} length {len}")]
    MaskLengthMismatch { axis: usize, got: usize, len: usize },

    #[error("selection indices for axis {axis} are not ascending")]
    UnorderedSelection { axis: usize },

    /// A transform received data it cannot apply to (wrong element type
    /// or shape).
    #[error("transform '{name}' cannot apply to {dtype:?} data: {reason}")]
    TransformFailed {
        name: &'static str,
        dtype: DType,
        reason: String,
    },

    /// The underlying array's indexing operation failed. Propagated from
    /// the storage collaborator, not interpreted.
    #[error("storage read failed: {0}")]
    StorageRead(String),
}

/// Errors arising from timestamp reconciliation.
#[derive(Error, Debug)]
pub enum TimeError {
    #[error("no timestamps to reconcile")]
    EmptyTimestamps,

    #[error("dump period {0} is not positive")]
    BadDumpPeriod(f64),
}
