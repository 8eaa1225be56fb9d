//! Saving and restoring a classifier's configuration and k-d tree.
//!
//! The document is JSON with the keys `k`, `p`, `weights`, `algorithm`,
//! `leaf_size`, `metric`, `kernel`, `kernel_params` and `kd_tree_`. The tree is
//! stored as a hex string of its versioned binary encoding
//! ([`KdTree::to_bytes`]), or `null` when no tree has been built. Training
//! data is not stored: call `fit` after loading. That first `fit` reuses the
//! stored tree instead of building a new one.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::{Algorithm, KnnConfig, Weights};
use crate::error::{KnnError, KnnResult};
use crate::kernels::{KernelParams, KernelSpec};
use crate::knn::kd_tree::KdTree;
use crate::knn::KnnClassifier;

/// On-disk form of a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedModel {
    pub k: usize,
    #[serde(with = "minkowski_order")]
    pub p: f64,
    pub weights: String,
    pub algorithm: String,
    pub leaf_size: usize,
    /// Always `null`: custom metrics have no persisted form.
    #[serde(default)]
    pub metric: Option<String>,
    /// Registry name of the kernel, if any.
    #[serde(default)]
    pub kernel: Option<String>,
    #[serde(default)]
    pub kernel_params: KernelParams,
    #[serde(rename = "kd_tree_", default)]
    pub kd_tree: Option<String>,
}

impl PersistedModel {
    fn from_classifier<L>(classifier: &KnnClassifier<L>) -> KnnResult<Self>
    where
        L: Clone + PartialEq,
    {
        let config = classifier.config();
        if config.metric.is_some() {
            return Err(KnnError::NotPersistable("metric"));
        }
        let kernel = match &config.kernel {
            None => None,
            Some(KernelSpec::Named(name)) => Some(name.clone()),
            Some(KernelSpec::Custom(_)) => return Err(KnnError::NotPersistable("kernel")),
        };
        let kd_tree = classifier
            .kd_tree()
            .map(|tree| tree.to_bytes().map(hex::encode))
            .transpose()?;

        Ok(Self {
            k: config.k,
            p: config.p,
            weights: config.weights.to_string(),
            algorithm: config.algorithm.to_string(),
            leaf_size: config.leaf_size,
            metric: None,
            kernel,
            kernel_params: config.kernel_params.clone(),
            kd_tree,
        })
    }

    fn into_classifier<L>(self) -> KnnResult<KnnClassifier<L>>
    where
        L: Clone + PartialEq,
    {
        if self.metric.is_some() {
            return Err(KnnError::InvalidParameter {
                name: "metric",
                reason: "custom metric functions cannot be restored from a saved model".to_string(),
            });
        }
        let weights: Weights = self.weights.parse()?;
        let algorithm: Algorithm = self.algorithm.parse()?;

        let mut config = KnnConfig::new()
            .with_k(self.k)
            .with_p(self.p)
            .with_weights(weights)
            .with_algorithm(algorithm)
            .with_leaf_size(self.leaf_size)
            .with_kernel_params(self.kernel_params);
        if let Some(name) = self.kernel {
            config = config.with_kernel(KernelSpec::Named(name));
        }

        let kd_tree = match self.kd_tree {
            Some(encoded) => {
                let bytes = hex::decode(encoded).map_err(|e| KnnError::IndexCodec(e.to_string()))?;
                Some(KdTree::from_bytes(&bytes)?)
            }
            None => None,
        };

        KnnClassifier::from_parts(config, kd_tree)
    }
}

impl<L> KnnClassifier<L>
where
    L: Clone + PartialEq,
{
    pub fn to_persisted(&self) -> KnnResult<PersistedModel> {
        PersistedModel::from_classifier(self)
    }

    pub fn from_persisted(model: PersistedModel) -> KnnResult<Self> {
        model.into_classifier()
    }

    pub fn to_json(&self, pretty: bool) -> KnnResult<String> {
        let model = self.to_persisted()?;
        let json = if pretty {
            serde_json::to_string_pretty(&model)?
        } else {
            serde_json::to_string(&model)?
        };
        Ok(json)
    }

    pub fn from_json(json: &str) -> KnnResult<Self> {
        Self::from_persisted(serde_json::from_str(json)?)
    }

    /// Writes the model to `path` through a uniquely named temporary file in
    /// the same directory, then renames it over `path`.
    pub fn save(&self, path: impl AsRef<Path>, pretty: bool) -> KnnResult<()> {
        let path = path.as_ref();
        let json = self.to_json(pretty)?;
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(json.as_bytes())?;
        file.persist(path).map_err(|e| e.error)?;
        log::debug!("saved k-NN model to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> KnnResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        log::debug!("loading k-NN model from {}", path.display());
        Self::from_json(&json)
    }
}

/// `p` as a JSON number, or the string `"inf"` for infinity.
mod minkowski_order {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(p: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if p.is_infinite() && p.is_sign_positive() {
            Repr::Text("inf".to_string()).serialize(serializer)
        } else {
            Repr::Number(*p).serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(p) => Ok(p),
            Repr::Text(text) if matches!(text.as_str(), "inf" | "infinity") => Ok(f64::INFINITY),
            Repr::Text(text) => Err(serde::de::Error::custom(format!("invalid Minkowski order '{}'", text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_data() -> (Vec<Vec<f64>>, Vec<i32>) {
        (
            vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
            vec![0, 1, 1, 0],
        )
    }

    #[test]
    fn test_save_leaves_sibling_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knn.json");
        let sibling = dir.path().join("knn.tmp");
        fs::write(&sibling, "unrelated").unwrap();

        let (x, y) = reference_data();
        let mut knn = KnnClassifier::new(KnnConfig::new().with_k(3)).unwrap();
        knn.fit(x, y).unwrap();
        knn.save(&path, false).unwrap();
        knn.save(&path, true).unwrap();

        assert_eq!(fs::read_to_string(&sibling).unwrap(), "unrelated");
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["knn.json", "knn.tmp"]);

        let restored: KnnClassifier<i32> = KnnClassifier::load(&path).unwrap();
        assert_eq!(restored.kd_tree(), knn.kd_tree());
    }

    #[test]
    fn test_document_keys() {
        let knn: KnnClassifier<i32> =
            KnnClassifier::new(KnnConfig::new().with_k(3).with_algorithm(Algorithm::Brute)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&knn.to_json(false).unwrap()).unwrap();

        assert_eq!(value["k"], 3);
        assert_eq!(value["p"], 2.0);
        assert_eq!(value["weights"], "uniform");
        assert_eq!(value["algorithm"], "brute");
        assert_eq!(value["leaf_size"], 30);
        assert!(value["metric"].is_null());
        assert!(value["kernel"].is_null());
        assert!(value["kernel_params"].is_object());
        assert!(value["kd_tree_"].is_null(), "no tree is an explicit null");
    }

    #[test]
    fn test_fitted_tree_is_embedded_and_restored() {
        let (x, y) = reference_data();
        let mut knn = KnnClassifier::new(KnnConfig::new().with_k(3).with_leaf_size(1)).unwrap();
        knn.fit(x, y).unwrap();

        let model = knn.to_persisted().unwrap();
        assert!(model.kd_tree.is_some());

        let restored: KnnClassifier<i32> = KnnClassifier::from_persisted(model).unwrap();
        assert_eq!(restored.kd_tree(), knn.kd_tree());
        assert!(!restored.is_fitted());
        assert_eq!(restored.index_build_count(), 0);
    }

    #[test]
    fn test_named_kernel_and_params_round_trip() {
        let params = KernelParams { gamma: Some(0.25), degree: Some(2), coef0: None };
        let knn: KnnClassifier<i32> = KnnClassifier::new(
            KnnConfig::new()
                .with_kernel(KernelSpec::named("poly"))
                .with_kernel_params(params.clone())
                .with_weights(Weights::Distance),
        )
        .unwrap();

        let restored: KnnClassifier<i32> = KnnClassifier::from_json(&knn.to_json(true).unwrap()).unwrap();
        let config = restored.config();
        assert!(matches!(&config.kernel, Some(KernelSpec::Named(name)) if name == "poly"));
        assert_eq!(config.kernel_params, params);
        assert_eq!(config.weights, Weights::Distance);
    }

    #[test]
    fn test_infinite_p_round_trips() {
        let knn: KnnClassifier<i32> = KnnClassifier::new(KnnConfig::new().with_p(f64::INFINITY)).unwrap();
        let json = knn.to_json(false).unwrap();
        assert!(json.contains("\"p\":\"inf\""));
        let restored: KnnClassifier<i32> = KnnClassifier::from_json(&json).unwrap();
        assert!(restored.config().p.is_infinite());
    }

    #[test]
    fn test_custom_functions_are_not_persistable() {
        let with_metric: KnnClassifier<i32> =
            KnnClassifier::new(KnnConfig::new().with_metric(|_: &[f64], _: &[f64]| 0.0)).unwrap();
        assert!(matches!(with_metric.to_json(false), Err(KnnError::NotPersistable("metric"))));

        let with_kernel: KnnClassifier<i32> =
            KnnClassifier::new(KnnConfig::new().with_kernel(KernelSpec::custom(|_: &[f64], _: &[f64]| 1.0)))
                .unwrap();
        assert!(matches!(with_kernel.to_json(false), Err(KnnError::NotPersistable("kernel"))));
    }

    #[test]
    fn test_invalid_enumerations_are_rejected_on_load() {
        let json = r#"{"k":3,"p":2.0,"weights":"uniform","algorithm":"ball_tree","leaf_size":30,
                       "metric":null,"kernel":null,"kernel_params":{},"kd_tree_":null}"#;
        assert!(matches!(
            KnnClassifier::<i32>::from_json(json),
            Err(KnnError::InvalidAlgorithm(value)) if value == "ball_tree"
        ));

        let json = json.replace("ball_tree", "brute").replace("uniform", "gaussian");
        assert!(matches!(
            KnnClassifier::<i32>::from_json(&json),
            Err(KnnError::InvalidWeights(value)) if value == "gaussian"
        ));
    }

    #[test]
    fn test_corrupt_tree_blob_is_rejected() {
        let json = r#"{"k":3,"p":2.0,"weights":"uniform","algorithm":"kd_tree","leaf_size":30,
                       "kd_tree_":"not-hex"}"#;
        assert!(matches!(KnnClassifier::<i32>::from_json(json), Err(KnnError::IndexCodec(_))));
    }

    #[test]
    fn test_out_of_range_values_are_rejected_on_load() {
        let json = r#"{"k":0,"p":2.0,"weights":"uniform","algorithm":"brute","leaf_size":30}"#;
        assert!(matches!(
            KnnClassifier::<i32>::from_json(json),
            Err(KnnError::InvalidParameter { name: "k", .. })
        ));
    }
}
