//! Named similarity kernels and the registry that builds them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KnnError, KnnResult};

/// A user-supplied similarity function.
pub type KernelFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// Optional kernel hyperparameters. Unset fields take per-kernel defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    /// Scale; defaults to `1 / n_features`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    /// Polynomial degree; defaults to 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<i32>,
    /// Additive offset for `poly` and `sigmoid`; defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coef0: Option<f64>,
}

/// How a kernel was configured: by registry name or as a callable.
#[derive(Clone)]
pub enum KernelSpec {
    Named(String),
    Custom(KernelFn),
}

impl KernelSpec {
    pub fn named(name: impl Into<String>) -> Self {
        KernelSpec::Named(name.into())
    }

    pub fn custom<K>(kernel: K) -> Self
    where
        K: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        KernelSpec::Custom(Arc::new(kernel))
    }
}

impl fmt::Debug for KernelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelSpec::Named(name) => f.debug_tuple("Named").field(name).finish(),
            KernelSpec::Custom(_) => f.write_str("Custom(<function>)"),
        }
    }
}

/// Built-in kernels. Parameters left as `None` are filled in at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    Linear,
    Poly {
        degree: i32,
        gamma: Option<f64>,
        coef0: f64,
    },
    Rbf {
        gamma: Option<f64>,
    },
    Sigmoid {
        gamma: Option<f64>,
        coef0: f64,
    },
}

impl Kernel {
    const DEFAULT_DEGREE: i32 = 3;
    const DEFAULT_COEF0: f64 = 1.0;

    pub fn evaluate(&self, x: &[f64], y: &[f64]) -> f64 {
        match *self {
            Kernel::Linear => dot_product(x, y),
            Kernel::Poly { degree, gamma, coef0 } => {
                (resolve_gamma(gamma, x) * dot_product(x, y) + coef0).powi(degree)
            }
            Kernel::Rbf { gamma } => (-resolve_gamma(gamma, x) * squared_l2(x, y)).exp(),
            Kernel::Sigmoid { gamma, coef0 } => {
                (resolve_gamma(gamma, x) * dot_product(x, y) + coef0).tanh()
            }
        }
    }
}

/// Looks up a kernel by name and applies `params`.
pub fn get_kernel(name: &str, params: &KernelParams) -> KnnResult<Kernel> {
    let kernel = match name {
        "linear" => Kernel::Linear,
        "poly" => Kernel::Poly {
            degree: params.degree.unwrap_or(Kernel::DEFAULT_DEGREE),
            gamma: params.gamma,
            coef0: params.coef0.unwrap_or(Kernel::DEFAULT_COEF0),
        },
        "rbf" => Kernel::Rbf { gamma: params.gamma },
        "sigmoid" => Kernel::Sigmoid {
            gamma: params.gamma,
            coef0: params.coef0.unwrap_or(Kernel::DEFAULT_COEF0),
        },
        other => return Err(KnnError::UnknownKernel(other.to_string())),
    };
    Ok(kernel)
}

fn resolve_gamma(gamma: Option<f64>, x: &[f64]) -> f64 {
    gamma.unwrap_or_else(|| if x.is_empty() { 1.0 } else { 1.0 / x.len() as f64 })
}

fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn squared_l2(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
