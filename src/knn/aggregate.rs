//! Combining neighbor labels into one prediction.
//!
//! Tie-break: the highest score wins; among labels with equal scores the one
//! whose closest neighbor is nearer wins; if that also ties, the label that
//! appears first in neighbor order wins.
//!
//! Under [`Weights::Distance`] a neighbor at distance 0 would get an infinite
//! weight. When any neighbor is an exact match, only the exact matches vote,
//! each with weight 1. Distances below 0, which kernels that are not positive
//! semi-definite (such as `sigmoid`) can produce, count as exact matches.

use crate::config::Weights;

struct Tally<'a, L> {
    label: &'a L,
    score: f64,
    nearest: f64,
}

/// Predicted label for one neighbor set, or `None` if the set is empty.
///
/// `labels[i]` and `distances[i]` describe the same neighbor.
pub fn aggregate<L>(labels: &[L], distances: &[f64], weights: Weights) -> Option<L>
where
    L: PartialEq + Clone,
{
    debug_assert_eq!(labels.len(), distances.len());

    let is_exact = |distance: f64| distance <= 0.0;
    let exact_matches_only = weights == Weights::Distance && distances.iter().any(|&d| is_exact(d));

    let mut tallies: Vec<Tally<'_, L>> = Vec::new();
    for (label, &distance) in labels.iter().zip(distances) {
        let weight = match weights {
            Weights::Uniform => 1.0,
            Weights::Distance if exact_matches_only => {
                if is_exact(distance) {
                    1.0
                } else {
                    continue;
                }
            }
            Weights::Distance => 1.0 / distance,
        };
        match tallies.iter_mut().find(|t| t.label == label) {
            Some(tally) => {
                tally.score += weight;
                tally.nearest = tally.nearest.min(distance);
            }
            None => tallies.push(Tally {
                label,
                score: weight,
                nearest: distance,
            }),
        }
    }

    let mut best: Option<&Tally<'_, L>> = None;
    for tally in &tallies {
        let better = match best {
            None => true,
            Some(current) => {
                tally.score > current.score
                    || (tally.score == current.score && tally.nearest < current.nearest)
            }
        };
        if better {
            best = Some(tally);
        }
    }
    best.map(|tally| tally.label.clone())
}
