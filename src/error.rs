//! Error and warning types shared by the whole crate.

use std::fmt;

use thiserror::Error;

use crate::config::Algorithm;

/// Fatal failures. Every fallible operation returns `KnnResult<T>`.
#[derive(Error, Debug)]
pub enum KnnError {
    /// Fewer training vectors than requested neighbors.
    #[error("number of training samples ({n_samples}) must be at least `k`={k}")]
    InsufficientSamples { n_samples: usize, k: usize },

    #[error("invalid algorithm '{0}' (expected 'brute' or 'kd_tree')")]
    InvalidAlgorithm(String),

    #[error("invalid weights '{0}' (expected 'uniform' or 'distance')")]
    InvalidWeights(String),

    /// A scalar configuration field is out of range.
    #[error("invalid `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("got {features} feature vectors but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("expected vectors with {expected} features, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("unknown kernel '{0}' (expected one of 'linear', 'poly', 'rbf', 'sigmoid')")]
    UnknownKernel(String),

    #[error("classifier is not fitted, call fit() first")]
    NotFitted,

    /// The effective algorithm is `kd_tree` but no index was built by the last fit.
    #[error("`algorithm`=='kd_tree' is in effect but no k-d tree was built, call fit() again")]
    IndexNotBuilt,

    /// A loaded index does not describe the training data passed to fit.
    #[error("loaded k-d tree does not match the training data: {0}")]
    IndexMismatch(String),

    /// Custom callables have no persisted form.
    #[error("`{0}` holds a custom function and cannot be saved")]
    NotPersistable(&'static str),

    #[error("k-d tree blob could not be decoded: {0}")]
    IndexCodec(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type KnnResult<T> = Result<T, KnnError>;

/// Non-fatal advisories produced while resolving the configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum KnnWarning {
    /// A custom metric or kernel forced the search from `requested` to brute force.
    AlgorithmDowngrade {
        requested: Algorithm,
        reason: DowngradeReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowngradeReason {
    CustomMetric,
    Kernel,
}

impl fmt::Display for KnnWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnnWarning::AlgorithmDowngrade { requested, reason } => {
                let source = match reason {
                    DowngradeReason::CustomMetric => "custom metric function",
                    DowngradeReason::Kernel => "kernel-induced metric",
                };
                write!(
                    f,
                    "`algorithm`=='{}' cannot be used with a {}. Switching to `algorithm`=='brute'",
                    requested, source
                )
            }
        }
    }
}
