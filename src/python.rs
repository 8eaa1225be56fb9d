//! Python bindings, built with the `python` feature.

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::{Algorithm, KernelParams, KernelSpec, KnnClassifier, KnnConfig, KnnError, Weights};

fn to_py_err(err: KnnError) -> PyErr {
    match err {
        KnnError::Io(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

/// k-NN classifier over integer labels.
#[pyclass(name = "KnnClassifier")]
struct PyKnnClassifier {
    classifier: KnnClassifier<i64>,
}

#[pymethods]
impl PyKnnClassifier {
    #[new]
    #[pyo3(signature = (
        k = 5,
        p = 2.0,
        weights = "uniform",
        algorithm = "kd_tree",
        leaf_size = 30,
        kernel = None,
        gamma = None,
        degree = None,
        coef0 = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        k: usize,
        p: f64,
        weights: &str,
        algorithm: &str,
        leaf_size: usize,
        kernel: Option<String>,
        gamma: Option<f64>,
        degree: Option<i32>,
        coef0: Option<f64>,
    ) -> PyResult<Self> {
        let weights: Weights = weights.parse().map_err(to_py_err)?;
        let algorithm: Algorithm = algorithm.parse().map_err(to_py_err)?;
        let mut config = KnnConfig::new()
            .with_k(k)
            .with_p(p)
            .with_weights(weights)
            .with_algorithm(algorithm)
            .with_leaf_size(leaf_size)
            .with_kernel_params(KernelParams { gamma, degree, coef0 });
        if let Some(name) = kernel {
            config = config.with_kernel(KernelSpec::Named(name));
        }
        let classifier = KnnClassifier::new(config).map_err(to_py_err)?;
        Ok(PyKnnClassifier { classifier })
    }

    fn fit(&mut self, x: Vec<Vec<f64>>, y: Vec<i64>) -> PyResult<()> {
        self.classifier.fit(x, y).map_err(to_py_err)?;
        Ok(())
    }

    fn predict(&self, x: Vec<Vec<f64>>) -> PyResult<Vec<i64>> {
        self.classifier.predict(&x).map_err(to_py_err)
    }

    /// Neighbor indices per query, plus distances when `return_distances` is true.
    #[pyo3(signature = (x, k = None, return_distances = false))]
    fn k_neighbors(
        &self,
        py: Python<'_>,
        x: Vec<Vec<f64>>,
        k: Option<usize>,
        return_distances: bool,
    ) -> PyResult<PyObject> {
        let batch = self.classifier.k_neighbors(&x, k).map_err(to_py_err)?;
        let (indices, distances): (Vec<Vec<usize>>, Vec<Vec<f64>>) =
            batch.into_iter().map(|n| (n.indices, n.distances)).unzip();
        if return_distances {
            Ok((indices, distances).into_py(py))
        } else {
            Ok(indices.into_py(py))
        }
    }

    fn set_weights(&mut self, weights: &str) -> PyResult<()> {
        self.classifier.config_mut().weights = weights.parse().map_err(to_py_err)?;
        Ok(())
    }

    #[pyo3(signature = (kernel = None))]
    fn set_kernel(&mut self, kernel: Option<String>) {
        self.classifier.config_mut().kernel = kernel.map(KernelSpec::Named);
    }

    #[pyo3(signature = (path, pretty = false))]
    fn save(&self, path: &str, pretty: bool) -> PyResult<()> {
        self.classifier.save(path, pretty).map_err(to_py_err)
    }

    #[staticmethod]
    fn load(path: &str) -> PyResult<Self> {
        let classifier = KnnClassifier::load(path).map_err(to_py_err)?;
        Ok(PyKnnClassifier { classifier })
    }

    /// The algorithm in effect after resolving kernel/metric settings.
    #[getter]
    fn algorithm(&self) -> PyResult<String> {
        let algorithm = self.classifier.effective_algorithm().map_err(to_py_err)?;
        Ok(algorithm.to_string())
    }

    #[getter]
    fn index_build_count(&self) -> usize {
        self.classifier.index_build_count()
    }
}

#[pymodule]
fn kernel_knn(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyKnnClassifier>()?;
    Ok(())
}
