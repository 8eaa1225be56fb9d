//! Finding the k nearest training vectors to a query.

use ordered_float::OrderedFloat;

use super::kd_tree::KdTree;
use crate::error::{KnnError, KnnResult};
use crate::metric::PairwiseDistance;

/// The neighbors of one query: row indices into the training set and their
/// distances, closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub indices: Vec<usize>,
    pub distances: Vec<f64>,
}

impl Neighbors {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Concatenates per-query results into two flat sequences. Query
    /// boundaries are only recoverable when every block has the same length.
    pub fn flatten(batch: &[Neighbors]) -> (Vec<usize>, Vec<f64>) {
        let indices = batch.iter().flat_map(|n| n.indices.iter().copied()).collect();
        let distances = batch.iter().flat_map(|n| n.distances.iter().copied()).collect();
        (indices, distances)
    }
}

/// Exact k-NN by evaluating `metric` against every row.
///
/// The k smallest distances are selected with an O(n) partition around the
/// (k-1)-th order statistic and only those k are then sorted.
pub fn brute_force<M>(query: &[f64], features: &[Vec<f64>], metric: &M, k: usize) -> KnnResult<Neighbors>
where
    M: PairwiseDistance + ?Sized,
{
    if features.len() < k {
        return Err(KnnError::InsufficientSamples {
            n_samples: features.len(),
            k,
        });
    }
    if k == 0 {
        return Ok(Neighbors::default());
    }

    let mut scored: Vec<(OrderedFloat<f64>, usize)> = features
        .iter()
        .enumerate()
        .map(|(index, row)| (OrderedFloat(metric.distance(query, row)), index))
        .collect();

    if k < scored.len() {
        scored.select_nth_unstable(k - 1);
        scored.truncate(k);
    }
    scored.sort_unstable();

    let (distances, indices) = scored.into_iter().map(|(d, i)| (d.0, i)).unzip();
    Ok(Neighbors { indices, distances })
}

/// How a [`NeighborSearch`] answers queries.
#[derive(Clone, Copy)]
pub enum SearchStrategy<'a> {
    Brute { metric: &'a dyn PairwiseDistance },
    Indexed { tree: &'a KdTree, p: f64 },
}

/// Nearest-neighbor lookups over a fixed training set.
pub struct NeighborSearch<'a> {
    features: &'a [Vec<f64>],
    strategy: SearchStrategy<'a>,
}

impl<'a> NeighborSearch<'a> {
    pub fn new(features: &'a [Vec<f64>], strategy: SearchStrategy<'a>) -> Self {
        Self { features, strategy }
    }

    fn check_k(&self, k: usize) -> KnnResult<()> {
        if k == 0 {
            return Err(KnnError::InvalidParameter {
                name: "k",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.features.len() < k {
            return Err(KnnError::InsufficientSamples {
                n_samples: self.features.len(),
                k,
            });
        }
        Ok(())
    }

    fn check_query(&self, query: &[f64]) -> KnnResult<()> {
        match self.features.first() {
            Some(row) if row.len() != query.len() => Err(KnnError::DimensionMismatch {
                expected: row.len(),
                found: query.len(),
            }),
            _ => Ok(()),
        }
    }

    /// The `k` nearest rows to `query`.
    pub fn find_k_nearest(&self, query: &[f64], k: usize) -> KnnResult<Neighbors> {
        self.check_k(k)?;
        self.check_query(query)?;
        let neighbors = match self.strategy {
            SearchStrategy::Brute { metric } => brute_force(query, self.features, metric, k)?,
            SearchStrategy::Indexed { tree, p } => tree.query(query, k, p)?,
        };
        debug_assert_eq!(neighbors.len(), k);
        Ok(neighbors)
    }

    /// One [`Neighbors`] block per query, in query order.
    ///
    /// `k` and every query's dimensionality are validated before any distance
    /// is computed, so a failure never leaves partial output behind.
    pub fn k_neighbors(&self, queries: &[Vec<f64>], k: usize) -> KnnResult<Vec<Neighbors>> {
        self.check_k(k)?;
        for query in queries {
            self.check_query(query)?;
        }
        queries.iter().map(|query| self.find_k_nearest(query, k)).collect()
    }
}
