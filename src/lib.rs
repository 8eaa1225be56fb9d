//! Kernelized k-nearest neighbors classification.
//!
//! ```
//! use kernel_knn::{Algorithm, KnnClassifier, KnnConfig, Weights};
//!
//! let x = vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
//! let y = vec![0, 1, 1, 0];
//!
//! let mut knn = KnnClassifier::new(KnnConfig::new().with_k(3).with_algorithm(Algorithm::Brute))?;
//! knn.fit(x, y)?;
//! assert_eq!(knn.predict(&[vec![0.9, 0.99]])?, vec![1]);
//!
//! knn.config_mut().weights = Weights::Distance;
//! assert_eq!(knn.predict(&[vec![0.9, 0.99]])?, vec![0]);
//! # Ok::<(), kernel_knn::KnnError>(())
//! ```

pub mod config;
pub mod error;
pub mod kernels;
pub mod knn;
pub mod metric;
pub mod persistence;

#[cfg(feature = "python")]
mod python;

pub use config::{Algorithm, KnnConfig, Weights};
pub use error::{DowngradeReason, KnnError, KnnResult, KnnWarning};
pub use kernels::{get_kernel, Kernel, KernelParams, KernelSpec};
pub use knn::kd_tree::KdTree;
pub use knn::search::Neighbors;
pub use knn::KnnClassifier;
pub use metric::{minkowski, resolve, PairwiseDistance, Resolution, ResolvedMetric};
pub use persistence::PersistedModel;
