//! Turns a [`KnnConfig`] into one pairwise distance function and the
//! algorithm that can actually serve it.

use std::fmt;
use std::sync::Arc;

use num_traits::{AsPrimitive, Float};

use crate::config::{Algorithm, KnnConfig};
use crate::error::{DowngradeReason, KnnResult, KnnWarning};
use crate::kernels::{get_kernel, Kernel, KernelFn, KernelSpec};

/// A user-supplied pairwise distance.
pub type DistanceFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// Anything that can measure how far apart two vectors are.
pub trait PairwiseDistance {
    fn distance(&self, x: &[f64], y: &[f64]) -> f64;
}

impl<D: Fn(&[f64], &[f64]) -> f64> PairwiseDistance for D {
    fn distance(&self, x: &[f64], y: &[f64]) -> f64 {
        self(x, y)
    }
}

/// Minkowski distance of order `p`; `p = inf` gives the Chebyshev distance.
pub fn minkowski<F>(a: &[F], b: &[F], p: f64) -> f64
where
    F: Float + AsPrimitive<f64>,
{
    let diffs = a.iter().zip(b.iter()).map(|(&x, &y)| (x - y).abs().as_());
    if p.is_infinite() {
        return diffs.fold(0.0, f64::max);
    }
    if p == 1.0 {
        return diffs.sum();
    }
    if p == 2.0 {
        return diffs.map(|d| d * d).sum::<f64>().sqrt();
    }
    diffs.map(|d| d.powf(p)).sum::<f64>().powf(1.0 / p)
}

/// Squared distance in the feature space induced by a kernel:
/// `K(x,x) - 2 K(x,y) + K(y,y)`.
#[derive(Clone)]
pub enum KernelDistance {
    Builtin(Kernel),
    Custom(KernelFn),
}

impl KernelDistance {
    fn similarity(&self, x: &[f64], y: &[f64]) -> f64 {
        match self {
            KernelDistance::Builtin(kernel) => kernel.evaluate(x, y),
            KernelDistance::Custom(kernel) => kernel(x, y),
        }
    }
}

impl PairwiseDistance for KernelDistance {
    fn distance(&self, x: &[f64], y: &[f64]) -> f64 {
        self.similarity(x, x) - 2.0 * self.similarity(x, y) + self.similarity(y, y)
    }
}

/// The concrete distance in effect for one call.
#[derive(Clone)]
pub enum ResolvedMetric {
    Minkowski { p: f64 },
    Kernel(KernelDistance),
    Custom(DistanceFn),
}

impl PairwiseDistance for ResolvedMetric {
    fn distance(&self, x: &[f64], y: &[f64]) -> f64 {
        match self {
            ResolvedMetric::Minkowski { p } => minkowski(x, y, *p),
            ResolvedMetric::Kernel(kernel) => kernel.distance(x, y),
            ResolvedMetric::Custom(metric) => metric(x, y),
        }
    }
}

impl fmt::Debug for ResolvedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedMetric::Minkowski { p } => f.debug_struct("Minkowski").field("p", p).finish(),
            ResolvedMetric::Kernel(KernelDistance::Builtin(kernel)) => {
                f.debug_tuple("Kernel").field(kernel).finish()
            }
            ResolvedMetric::Kernel(KernelDistance::Custom(_)) => f.write_str("Kernel(<function>)"),
            ResolvedMetric::Custom(_) => f.write_str("Custom(<function>)"),
        }
    }
}

/// Effective settings derived from a configuration.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub metric: ResolvedMetric,
    pub algorithm: Algorithm,
    pub warnings: Vec<KnnWarning>,
}

/// Resolves the distance function and the usable algorithm.
///
/// Pure with respect to `config`: a downgrade from `kd_tree` to `brute` is
/// reported through `Resolution::warnings` (and logged), never written back.
pub fn resolve(config: &KnnConfig) -> KnnResult<Resolution> {
    let (metric, downgrade_reason) = match (&config.kernel, &config.metric) {
        (Some(spec), _) => {
            let kernel = match spec {
                KernelSpec::Named(name) => {
                    KernelDistance::Builtin(get_kernel(name, &config.kernel_params)?)
                }
                KernelSpec::Custom(kernel) => KernelDistance::Custom(Arc::clone(kernel)),
            };
            (ResolvedMetric::Kernel(kernel), Some(DowngradeReason::Kernel))
        }
        (None, Some(metric)) => (
            ResolvedMetric::Custom(Arc::clone(metric)),
            Some(DowngradeReason::CustomMetric),
        ),
        (None, None) => (ResolvedMetric::Minkowski { p: config.p }, None),
    };

    let mut warnings = Vec::new();
    let algorithm = match (config.algorithm, downgrade_reason) {
        (Algorithm::KdTree, Some(reason)) => {
            let warning = KnnWarning::AlgorithmDowngrade {
                requested: Algorithm::KdTree,
                reason,
            };
            log::warn!("{}", warning);
            warnings.push(warning);
            Algorithm::Brute
        }
        (algorithm, _) => algorithm,
    };

    Ok(Resolution {
        metric,
        algorithm,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnnConfig;
    use crate::error::KnnError;
    use approx::assert_relative_eq;

    #[test]
    fn test_minkowski_distance() {
        let vec_a = vec![1.0, 2.0, 3.0];
        let vec_b = vec![4.0, 5.0, 6.0];

        // |1-4| + |2-5| + |3-6| = 9
        assert_relative_eq!(minkowski(&vec_a, &vec_b, 1.0), 9.0, epsilon = 1e-9);
        assert_relative_eq!(minkowski(&vec_a, &vec_b, 2.0), 27.0_f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(minkowski(&vec_a, &vec_b, 3.0), 81.0_f64.cbrt(), epsilon = 1e-9);
        assert_relative_eq!(minkowski(&vec_a, &vec_b, f64::INFINITY), 3.0, epsilon = 1e-9);

        let empty: Vec<f64> = vec![];
        assert_relative_eq!(minkowski(&empty, &empty, 2.0), 0.0);
    }

    #[test]
    fn test_minkowski_accepts_f32_features() {
        let a: [f32; 2] = [0.0, 0.0];
        let b: [f32; 2] = [3.0, 4.0];
        assert_relative_eq!(minkowski(&a, &b, 2.0), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_default_resolves_to_minkowski_without_warnings() {
        let resolution = resolve(&KnnConfig::new().with_p(3.0)).unwrap();
        assert!(matches!(resolution.metric, ResolvedMetric::Minkowski { p } if p == 3.0));
        assert_eq!(resolution.algorithm, Algorithm::KdTree);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_custom_metric_downgrades_kd_tree() {
        let config = KnnConfig::new()
            .with_algorithm(Algorithm::KdTree)
            .with_metric(|x: &[f64], y: &[f64]| (x[0] - y[0]).abs().powi(2));
        let resolution = resolve(&config).unwrap();

        assert_eq!(resolution.algorithm, Algorithm::Brute);
        assert_eq!(
            resolution.warnings,
            vec![KnnWarning::AlgorithmDowngrade {
                requested: Algorithm::KdTree,
                reason: DowngradeReason::CustomMetric,
            }]
        );
        assert_relative_eq!(resolution.metric.distance(&[3.0, 9.0], &[1.0, -9.0]), 4.0);
        // the stored configuration keeps what was asked for
        assert_eq!(config.algorithm, Algorithm::KdTree);
    }

    #[test]
    fn test_kernel_takes_priority_over_metric() {
        let config = KnnConfig::new()
            .with_algorithm(Algorithm::Brute)
            .with_metric(|_: &[f64], _: &[f64]| 42.0)
            .with_kernel(KernelSpec::named("linear"));
        let resolution = resolve(&config).unwrap();

        assert!(matches!(resolution.metric, ResolvedMetric::Kernel(_)));
        // linear kernel distance is the squared euclidean distance
        assert_relative_eq!(resolution.metric.distance(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert!(resolution.warnings.is_empty(), "brute needs no downgrade");
    }

    #[test]
    fn test_custom_kernel_is_used_directly() {
        let config = KnnConfig::new()
            .with_kernel(KernelSpec::custom(|x: &[f64], y: &[f64]| {
                x.iter().zip(y).map(|(a, b)| a * b).sum::<f64>() * 2.0
            }));
        let resolution = resolve(&config).unwrap();
        assert_eq!(resolution.algorithm, Algorithm::Brute);
        assert_eq!(resolution.warnings.len(), 1);
        assert_relative_eq!(resolution.metric.distance(&[1.0], &[0.0]), 2.0);
    }

    #[test]
    fn test_unknown_kernel_name_fails_resolution() {
        let config = KnnConfig::new().with_kernel(KernelSpec::named("nope"));
        assert!(matches!(resolve(&config), Err(KnnError::UnknownKernel(_))));
    }

    #[test]
    fn test_kernel_distance_is_zero_on_identical_vectors() {
        let x = [0.3, -1.2, 4.0];
        for name in ["linear", "poly", "rbf", "sigmoid"] {
            let config = KnnConfig::new().with_kernel(KernelSpec::named(name));
            let metric = resolve(&config).unwrap().metric;
            assert_relative_eq!(metric.distance(&x, &x), 0.0, epsilon = 1e-9);
        }
    }
}
