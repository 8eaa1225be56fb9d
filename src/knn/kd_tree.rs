//! k-d tree over the training vectors, answering k-NN queries under any
//! Minkowski order `p`.
//!
//! Points live in leaf buckets of at most `leaf_size` rows. Internal nodes
//! split on the median coordinate of a dimension chosen cyclically by depth.

use serde::{Deserialize, Serialize};

use super::heap_utils::KBestNeighbors;
use super::search::Neighbors;
use crate::error::{KnnError, KnnResult};
use crate::metric::minkowski;

/// Bumped whenever the serialized layout of [`KdTree`] changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdTree {
    points: Vec<Vec<f64>>,
    n_features: usize,
    leaf_size: usize,
    root: Option<Box<TreeNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        indices: Vec<usize>,
    },
    Split {
        splitting_dimension: usize,
        split_value: f64,
        /// Rows with coordinate `<= split_value`.
        left: Box<TreeNode>,
        /// Rows with coordinate `>= split_value`.
        right: Box<TreeNode>,
    },
}

impl KdTree {
    /// Builds a tree over `points`, keeping its own copy of the coordinates.
    pub fn new(points: &[Vec<f64>], leaf_size: usize) -> KnnResult<Self> {
        if leaf_size == 0 {
            return Err(KnnError::InvalidParameter {
                name: "leaf_size",
                reason: "must be a positive integer".to_string(),
            });
        }
        let n_features = points.first().map_or(0, |p| p.len());
        for p in points {
            if p.len() != n_features {
                return Err(KnnError::DimensionMismatch {
                    expected: n_features,
                    found: p.len(),
                });
            }
        }

        let points = points.to_vec();
        let root = if points.is_empty() {
            None
        } else {
            let mut indices: Vec<usize> = (0..points.len()).collect();
            Some(Self::build_recursive(&points, &mut indices, n_features, leaf_size, 0))
        };

        Ok(KdTree {
            points,
            n_features,
            leaf_size,
            root,
        })
    }

    fn build_recursive(
        points: &[Vec<f64>],
        indices: &mut [usize],
        n_features: usize,
        leaf_size: usize,
        depth: usize,
    ) -> Box<TreeNode> {
        if indices.len() <= leaf_size || n_features == 0 {
            return Box::new(TreeNode::Leaf {
                indices: indices.to_vec(),
            });
        }

        let splitting_dimension = depth % n_features;
        let median_idx = indices.len() / 2;
        indices.select_nth_unstable_by(median_idx, |&a, &b| {
            points[a][splitting_dimension]
                .partial_cmp(&points[b][splitting_dimension])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let split_value = points[indices[median_idx]][splitting_dimension];

        let (left_indices, right_indices) = indices.split_at_mut(median_idx);
        let left = Self::build_recursive(points, left_indices, n_features, leaf_size, depth + 1);
        let right = Self::build_recursive(points, right_indices, n_features, leaf_size, depth + 1);

        Box::new(TreeNode::Split {
            splitting_dimension,
            split_value,
            left,
            right,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// The `k` rows closest to `target` under Minkowski order `p`, closest first.
    pub fn query(&self, target: &[f64], k: usize, p: f64) -> KnnResult<Neighbors> {
        if self.points.len() < k {
            return Err(KnnError::InsufficientSamples {
                n_samples: self.points.len(),
                k,
            });
        }
        if target.len() != self.n_features {
            return Err(KnnError::DimensionMismatch {
                expected: self.n_features,
                found: target.len(),
            });
        }

        let mut best_k = KBestNeighbors::new(k);
        if let Some(root) = &self.root {
            self.search_recursive(root, target, p, &mut best_k);
        }
        Ok(best_k.into_neighbors())
    }

    fn search_recursive(&self, node: &TreeNode, target: &[f64], p: f64, best_k: &mut KBestNeighbors) {
        match node {
            TreeNode::Leaf { indices } => {
                for &index in indices {
                    best_k.add(minkowski(target, &self.points[index], p), index);
                }
            }
            TreeNode::Split {
                splitting_dimension,
                split_value,
                left,
                right,
            } => {
                let offset = target[*splitting_dimension] - split_value;
                let (primary_child, secondary_child) = if offset < 0.0 {
                    (left, right)
                } else {
                    (right, left)
                };

                self.search_recursive(primary_child, target, p, best_k);

                // |offset| bounds every Minkowski distance to the far side from below.
                if best_k
                    .current_farthest_distance()
                    .map_or(true, |radius| offset.abs() <= radius)
                {
                    self.search_recursive(secondary_child, target, p, best_k);
                }
            }
        }
    }

    /// Checks that the tree was built over exactly `features`.
    pub fn verify_points(&self, features: &[Vec<f64>]) -> KnnResult<()> {
        if self.points.len() != features.len() {
            return Err(KnnError::IndexMismatch(format!(
                "tree holds {} points but {} training vectors were given",
                self.points.len(),
                features.len()
            )));
        }
        if let Some(row) = self.points.iter().zip(features).position(|(a, b)| a != b) {
            return Err(KnnError::IndexMismatch(format!(
                "training vector {} differs from the indexed point",
                row
            )));
        }
        Ok(())
    }

    /// Versioned binary encoding: a little-endian `u32` format version followed by the tree.
    pub fn to_bytes(&self) -> KnnResult<Vec<u8>> {
        bincode::serialize(&(INDEX_FORMAT_VERSION, self)).map_err(|e| KnnError::IndexCodec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> KnnResult<Self> {
        let version: u32 = bincode::deserialize(bytes).map_err(|e| KnnError::IndexCodec(e.to_string()))?;
        if version != INDEX_FORMAT_VERSION {
            return Err(KnnError::IndexCodec(format!(
                "unsupported k-d tree format version {} (expected {})",
                version, INDEX_FORMAT_VERSION
            )));
        }
        let (_, tree): (u32, KdTree) =
            bincode::deserialize(bytes).map_err(|e| KnnError::IndexCodec(e.to_string()))?;
        tree.check_integrity()?;
        Ok(tree)
    }

    /// Every row must sit in exactly one leaf.
    fn check_integrity(&self) -> KnnResult<()> {
        let mut seen = vec![false; self.points.len()];
        let mut stack: Vec<&TreeNode> = self.root.iter().map(|node| node.as_ref()).collect();
        while let Some(node) = stack.pop() {
            match node {
                TreeNode::Leaf { indices } => {
                    for &index in indices {
                        match seen.get_mut(index) {
                            Some(slot) if !*slot => *slot = true,
                            _ => {
                                return Err(KnnError::IndexCodec(format!(
                                    "leaf references invalid or repeated row {}",
                                    index
                                )));
                            }
                        }
                    }
                }
                TreeNode::Split {
                    splitting_dimension,
                    left,
                    right,
                    ..
                } => {
                    if *splitting_dimension >= self.n_features {
                        return Err(KnnError::IndexCodec(format!(
                            "split on dimension {} of {}-dimensional data",
                            splitting_dimension, self.n_features
                        )));
                    }
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        if seen.iter().any(|slot| !slot) {
            return Err(KnnError::IndexCodec("some rows are missing from the tree".to_string()));
        }
        if self.points.iter().any(|p| p.len() != self.n_features) {
            return Err(KnnError::IndexCodec("points have inconsistent dimensionality".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn brute_force_indices(points: &[Vec<f64>], target: &[f64], k: usize, p: f64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| {
            minkowski(target, &points[a], p)
                .partial_cmp(&minkowski(target, &points[b], p))
                .unwrap()
                .then(a.cmp(&b))
        });
        order.truncate(k);
        order
    }

    fn unit_square() -> Vec<Vec<f64>> {
        vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]]
    }

    #[test]
    fn test_empty_input_builds_empty_tree() {
        let tree = KdTree::new(&[], 30).unwrap();
        assert!(tree.is_empty());
        assert!(tree.root.is_none());
        assert!(matches!(
            tree.query(&[1.0], 1, 2.0),
            Err(KnnError::InsufficientSamples { n_samples: 0, k: 1 })
        ));
    }

    #[test]
    fn test_zero_leaf_size_is_rejected() {
        assert!(matches!(
            KdTree::new(&unit_square(), 0),
            Err(KnnError::InvalidParameter { name: "leaf_size", .. })
        ));
    }

    #[test]
    fn test_inconsistent_dimensionality() {
        let points = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            KdTree::new(&points, 1),
            Err(KnnError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_single_leaf_when_points_fit_in_bucket() {
        let tree = KdTree::new(&unit_square(), 30).unwrap();
        match tree.root.as_deref() {
            Some(TreeNode::Leaf { indices }) => assert_eq!(indices.len(), 4),
            other => panic!("expected a single leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_median_split_with_unit_leaves() {
        let points = vec![vec![1.0], vec![2.0], vec![3.0]];
        let tree = KdTree::new(&points, 1).unwrap();
        match tree.root.as_deref() {
            Some(TreeNode::Split { splitting_dimension, split_value, .. }) => {
                assert_eq!(*splitting_dimension, 0);
                assert_eq!(*split_value, 2.0);
            }
            other => panic!("expected a split root, got {:?}", other),
        }
    }

    #[test]
    fn test_query_reference_square() {
        let tree = KdTree::new(&unit_square(), 1).unwrap();
        let neighbors = tree.query(&[0.9, 0.99], 3, 2.0).unwrap();
        assert_eq!(neighbors.indices, vec![3, 1, 2]);
        let expected = [0.10049876, 0.90005555, 0.99503769];
        for (got, want) in neighbors.distances.iter().zip(expected) {
            assert!((got - want).abs() < 1e-8, "expected {}, got {}", want, got);
        }
    }

    #[test]
    fn test_query_rejects_wrong_dimensionality() {
        let tree = KdTree::new(&unit_square(), 1).unwrap();
        assert!(matches!(
            tree.query(&[0.5], 1, 2.0),
            Err(KnnError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_query_matches_brute_force_on_random_data() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Vec<f64>> = (0..300)
            .map(|_| (0..3).map(|_| rng.gen_range(-10.0..10.0)).collect())
            .collect();

        for leaf_size in [1, 5, 40] {
            let tree = KdTree::new(&points, leaf_size).unwrap();
            for p in [1.0, 2.0, 3.5, f64::INFINITY] {
                for _ in 0..20 {
                    let target: Vec<f64> = (0..3).map(|_| rng.gen_range(-12.0..12.0)).collect();
                    let got = tree.query(&target, 7, p).unwrap();
                    assert_eq!(got.indices, brute_force_indices(&points, &target, 7, p));
                }
            }
        }
    }

    #[test]
    fn test_duplicate_points_are_all_reachable() {
        let points = vec![vec![1.0, 1.0]; 10];
        let tree = KdTree::new(&points, 2).unwrap();
        let neighbors = tree.query(&[1.0, 1.0], 10, 2.0).unwrap();
        let mut indices = neighbors.indices.clone();
        indices.sort();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        assert!(neighbors.distances.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_verify_points() {
        let tree = KdTree::new(&unit_square(), 1).unwrap();
        assert!(tree.verify_points(&unit_square()).is_ok());

        let mut moved = unit_square();
        moved[2][0] = 5.0;
        match tree.verify_points(&moved) {
            Err(KnnError::IndexMismatch(msg)) => assert!(msg.contains("2")),
            other => panic!("expected IndexMismatch, got {:?}", other),
        }
        assert!(matches!(
            tree.verify_points(&unit_square()[..3]),
            Err(KnnError::IndexMismatch(_))
        ));
    }

    #[test]
    fn test_bytes_round_trip_preserves_structure() {
        let tree = KdTree::new(&unit_square(), 1).unwrap();
        let decoded = KdTree::from_bytes(&tree.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn test_from_bytes_rejects_other_versions_and_garbage() {
        let tree = KdTree::new(&unit_square(), 1).unwrap();
        let mut bytes = tree.to_bytes().unwrap();
        bytes[0] = bytes[0].wrapping_add(1);
        match KdTree::from_bytes(&bytes) {
            Err(KnnError::IndexCodec(msg)) => assert!(msg.contains("version")),
            other => panic!("expected IndexCodec, got {:?}", other),
        }
        assert!(matches!(KdTree::from_bytes(&[1, 0]), Err(KnnError::IndexCodec(_))));
    }
}
