//! Estimator configuration: the requested settings, stored as given.
//!
//! Nothing in here is rewritten by validation. The effective metric and
//! algorithm are derived from a `KnnConfig` on every call by
//! [`crate::metric::resolve`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KnnError, KnnResult};
use crate::kernels::{KernelParams, KernelSpec};
use crate::metric::DistanceFn;

/// Voting rule used to turn neighbor labels into a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Weights {
    /// Every neighbor counts once.
    #[default]
    Uniform,
    /// Neighbors count `1 / distance`.
    Distance,
}

/// Neighbor search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Exact search over every training vector.
    Brute,
    /// Delegate to the k-d tree. Only valid with the native Minkowski metric.
    #[default]
    #[serde(alias = "indexed")]
    KdTree,
}

impl FromStr for Weights {
    type Err = KnnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Weights::Uniform),
            "distance" => Ok(Weights::Distance),
            other => Err(KnnError::InvalidWeights(other.to_string())),
        }
    }
}

impl FromStr for Algorithm {
    type Err = KnnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brute" => Ok(Algorithm::Brute),
            "kd_tree" | "indexed" => Ok(Algorithm::KdTree),
            other => Err(KnnError::InvalidAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Weights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Weights::Uniform => "uniform",
            Weights::Distance => "distance",
        })
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Brute => "brute",
            Algorithm::KdTree => "kd_tree",
        })
    }
}

/// Requested estimator settings.
///
/// `kernel` takes priority over `metric` when both are set. Either one being
/// set makes the k-d tree unusable; see [`crate::metric::resolve`].
#[derive(Clone)]
pub struct KnnConfig {
    /// Neighbors consulted at prediction time.
    pub k: usize,
    /// Minkowski order, `1 <= p <= inf`.
    pub p: f64,
    pub weights: Weights,
    pub algorithm: Algorithm,
    /// Maximum number of points stored in one k-d tree leaf.
    pub leaf_size: usize,
    pub metric: Option<DistanceFn>,
    pub kernel: Option<KernelSpec>,
    pub kernel_params: KernelParams,
}

impl KnnConfig {
    pub const DEFAULT_K: usize = 5;
    pub const DEFAULT_P: f64 = 2.0;
    pub const DEFAULT_LEAF_SIZE: usize = 30;

    pub fn new() -> Self {
        Self {
            k: Self::DEFAULT_K,
            p: Self::DEFAULT_P,
            weights: Weights::default(),
            algorithm: Algorithm::default(),
            leaf_size: Self::DEFAULT_LEAF_SIZE,
            metric: None,
            kernel: None,
            kernel_params: KernelParams::default(),
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_p(mut self, p: f64) -> Self {
        self.p = p;
        self
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    /// Use a custom pairwise distance instead of Minkowski.
    pub fn with_metric<M>(mut self, metric: M) -> Self
    where
        M: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        let metric: DistanceFn = Arc::new(metric);
        self.metric = Some(metric);
        self
    }

    pub fn with_kernel(mut self, kernel: KernelSpec) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn with_kernel_params(mut self, kernel_params: KernelParams) -> Self {
        self.kernel_params = kernel_params;
        self
    }

    /// Checks the scalar fields. Enumerated fields are valid by construction.
    pub fn validate(&self) -> KnnResult<()> {
        if self.k == 0 {
            return Err(KnnError::InvalidParameter {
                name: "k",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.p.is_nan() || self.p < 1.0 {
            return Err(KnnError::InvalidParameter {
                name: "p",
                reason: format!("must satisfy 1 <= p <= inf, got {}", self.p),
            });
        }
        if self.leaf_size == 0 {
            return Err(KnnError::InvalidParameter {
                name: "leaf_size",
                reason: "must be a positive integer".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KnnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnnConfig")
            .field("k", &self.k)
            .field("p", &self.p)
            .field("weights", &self.weights)
            .field("algorithm", &self.algorithm)
            .field("leaf_size", &self.leaf_size)
            .field("metric", &self.metric.as_ref().map(|_| "<custom>"))
            .field("kernel", &self.kernel)
            .field("kernel_params", &self.kernel_params)
            .finish()
    }
}
