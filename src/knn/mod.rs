pub mod aggregate;
pub mod heap_utils;
pub mod kd_tree;
pub mod search;

use crate::config::{Algorithm, KnnConfig};
use crate::error::{KnnError, KnnResult};
use crate::metric::{resolve, Resolution};
use kd_tree::KdTree;
use search::{NeighborSearch, Neighbors, SearchStrategy};

/// The (kernelized) k-nearest neighbors classifier.
///
/// Holds the requested [`KnnConfig`], the training set, and an optional k-d
/// tree. The effective metric and algorithm are re-resolved from the
/// configuration on every `fit`, `k_neighbors` and `predict` call, so the
/// configuration may be edited between calls through [`config_mut`].
///
/// [`config_mut`]: KnnClassifier::config_mut
#[derive(Debug, Clone)]
pub struct KnnClassifier<L> {
    config: KnnConfig,
    training_features: Vec<Vec<f64>>,
    training_labels: Vec<L>,
    kd_tree: Option<KdTree>,
    fitted: bool,
    index_builds: usize,
}

impl<L> KnnClassifier<L>
where
    L: Clone + PartialEq,
{
    pub fn new(config: KnnConfig) -> KnnResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            training_features: Vec::new(),
            training_labels: Vec::new(),
            kd_tree: None,
            fitted: false,
            index_builds: 0,
        })
    }

    /// Restores an unfitted classifier around a previously built tree.
    /// The next `fit` reuses `kd_tree` instead of building a new one.
    pub(crate) fn from_parts(config: KnnConfig, kd_tree: Option<KdTree>) -> KnnResult<Self> {
        let mut classifier = Self::new(config)?;
        classifier.kd_tree = kd_tree;
        Ok(classifier)
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut KnnConfig {
        &mut self.config
    }

    pub fn kd_tree(&self) -> Option<&KdTree> {
        self.kd_tree.as_ref()
    }

    pub fn n_samples(&self) -> usize {
        self.training_features.len()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// How many k-d trees this instance has built. Loaded trees are not counted.
    pub fn index_build_count(&self) -> usize {
        self.index_builds
    }

    /// The algorithm the current configuration actually runs with.
    pub fn effective_algorithm(&self) -> KnnResult<Algorithm> {
        Ok(resolve(&self.config)?.algorithm)
    }

    /// Attaches the training set and, for `kd_tree`, builds or reuses the index.
    ///
    /// A tree is built unless one was loaded and this is the first fit since;
    /// a loaded tree must describe exactly `features` or `IndexMismatch` is returned.
    /// When brute force is in effect the tree is dropped, except for a loaded
    /// tree that matches `features`. A kept tree always describes the training set.
    pub fn fit(&mut self, features: Vec<Vec<f64>>, labels: Vec<L>) -> KnnResult<&mut Self> {
        self.config.validate()?;
        if features.len() != labels.len() {
            return Err(KnnError::LengthMismatch {
                features: features.len(),
                labels: labels.len(),
            });
        }
        let n_features = features.first().map_or(0, |row| row.len());
        if let Some(row) = features.iter().find(|row| row.len() != n_features) {
            return Err(KnnError::DimensionMismatch {
                expected: n_features,
                found: row.len(),
            });
        }

        let resolution = resolve(&self.config)?;
        let loaded_matches = match self.kd_tree.as_ref() {
            Some(loaded) if !self.fitted => match loaded.verify_points(&features) {
                Ok(()) => true,
                Err(err) if resolution.algorithm == Algorithm::KdTree => return Err(err),
                Err(err) => {
                    log::debug!("discarding loaded k-d tree: {}", err);
                    false
                }
            },
            _ => false,
        };

        match resolution.algorithm {
            Algorithm::KdTree if loaded_matches => {
                log::debug!("reusing loaded k-d tree over {} points", features.len());
            }
            Algorithm::KdTree => {
                log::debug!(
                    "building k-d tree over {} points (leaf_size={})",
                    features.len(),
                    self.config.leaf_size
                );
                self.kd_tree = Some(KdTree::new(&features, self.config.leaf_size)?);
                self.index_builds += 1;
            }
            Algorithm::Brute if loaded_matches => {}
            Algorithm::Brute => self.kd_tree = None,
        }

        self.training_features = features;
        self.training_labels = labels;
        self.fitted = true;
        Ok(self)
    }

    fn ensure_ready(&self) -> KnnResult<()> {
        if !self.fitted {
            return Err(KnnError::NotFitted);
        }
        self.config.validate()
    }

    fn check_k(&self, k: usize) -> KnnResult<()> {
        if self.n_samples() < k {
            return Err(KnnError::InsufficientSamples {
                n_samples: self.n_samples(),
                k,
            });
        }
        Ok(())
    }

    fn searcher<'a>(&'a self, resolution: &'a Resolution) -> KnnResult<NeighborSearch<'a>> {
        let strategy = match resolution.algorithm {
            Algorithm::Brute => SearchStrategy::Brute {
                metric: &resolution.metric,
            },
            Algorithm::KdTree => SearchStrategy::Indexed {
                tree: self.kd_tree.as_ref().ok_or(KnnError::IndexNotBuilt)?,
                p: self.config.p,
            },
        };
        Ok(NeighborSearch::new(&self.training_features, strategy))
    }

    /// Neighbors of each query, one block per query. `k` defaults to the configured one.
    pub fn k_neighbors(&self, queries: &[Vec<f64>], k: Option<usize>) -> KnnResult<Vec<Neighbors>> {
        self.ensure_ready()?;
        let k = k.unwrap_or(self.config.k);
        self.check_k(k)?;
        let resolution = resolve(&self.config)?;
        self.searcher(&resolution)?.k_neighbors(queries, k)
    }

    /// Neighbors of a single query.
    pub fn find_k_nearest(&self, query: &[f64], k: Option<usize>) -> KnnResult<Neighbors> {
        self.ensure_ready()?;
        let k = k.unwrap_or(self.config.k);
        self.check_k(k)?;
        let resolution = resolve(&self.config)?;
        self.searcher(&resolution)?.find_k_nearest(query, k)
    }

    /// Predicted label for each query.
    pub fn predict(&self, queries: &[Vec<f64>]) -> KnnResult<Vec<L>> {
        self.ensure_ready()?;
        self.check_k(self.config.k)?;
        let resolution = resolve(&self.config)?;
        let search = self.searcher(&resolution)?;

        search
            .k_neighbors(queries, self.config.k)?
            .into_iter()
            .map(|neighbors| self.vote(&neighbors))
            .collect()
    }

    pub fn predict_single(&self, query: &[f64]) -> KnnResult<L> {
        let mut predictions = self.predict(&[query.to_vec()])?;
        predictions.pop().ok_or(KnnError::NotFitted)
    }

    fn vote(&self, neighbors: &Neighbors) -> KnnResult<L> {
        let labels: Vec<&L> = neighbors
            .indices
            .iter()
            .map(|&index| &self.training_labels[index])
            .collect();
        aggregate::aggregate(&labels, &neighbors.distances, self.config.weights)
            .cloned()
            .ok_or_else(|| KnnError::InvalidParameter {
                name: "k",
                reason: "no neighbors were found to vote".to_string(),
            })
    }
}
