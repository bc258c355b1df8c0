//! Isolation forest outlier scorer.
//!
//! Each tree recursively partitions a random sub-sample of the training set
//! on a random feature at a random threshold. Points that end up alone after
//! few splits are easy to isolate and score high. Trees are stored as flat
//! node arrays so the whole forest serializes as plain data.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_COUNT;

// ---

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

pub(crate) type Point = [f64; FEATURE_COUNT];

/// Forest shape parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    // ---
    fn grow(data: &[Point], sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut nodes = Vec::new();
        grow_node(&mut nodes, data, sample, 0, height_limit, rng);
        Self { nodes }
    }

    fn path_length(&self, point: &Point) -> f64 {
        // ---
        let mut at = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes[at] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if point[feature] < threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(size),
            }
        }
    }
}

fn grow_node(
    nodes: &mut Vec<Node>,
    data: &[Point],
    sample: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> usize {
    // ---
    let slot = nodes.len();
    nodes.push(Node::Leaf { size: sample.len() });

    if depth >= height_limit || sample.len() <= 1 {
        return slot;
    }

    // Only features that still vary inside this node can split it.
    let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
        .filter_map(|feature| {
            let (min, max) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, &i| {
                (acc.0.min(data[i][feature]), acc.1.max(data[i][feature]))
            });
            (max > min).then_some((feature, min, max))
        })
        .collect();

    if candidates.is_empty() {
        return slot;
    }

    let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(min..max);
    let (left_sample, right_sample): (Vec<usize>, Vec<usize>) = sample
        .into_iter()
        .partition(|&i| data[i][feature] < threshold);

    let left = grow_node(nodes, data, left_sample, depth + 1, height_limit, rng);
    let right = grow_node(nodes, data, right_sample, depth + 1, height_limit, rng);
    nodes[slot] = Node::Split {
        feature,
        threshold,
        left,
        right,
    };
    slot
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    // ---
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Fitted forest plus the decision threshold calibrated on training scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    // ---
    /// Fit on standardized, non-empty data.
    ///
    /// `contamination` is the expected outlier fraction; the threshold is the
    /// `1 - contamination` quantile of the training scores.
    pub(crate) fn fit(data: &[Point], params: &ForestParams, contamination: f64) -> Self {
        // ---
        let mut rng = StdRng::seed_from_u64(params.seed);
        let sample_size = params.max_samples.min(data.len()).max(1);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..params.n_trees.max(1))
            .map(|_| {
                let sample = index::sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::grow(data, sample, height_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };

        let mut scores: Vec<f64> = data.iter().map(|p| forest.score(p)).collect();
        scores.sort_by(f64::total_cmp);
        forest.threshold = quantile(&scores, 1.0 - contamination);
        forest
    }

    /// Anomaly score in `(0, 1]`; higher means easier to isolate.
    pub(crate) fn score(&self, point: &Point) -> f64 {
        // ---
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;

        let normalizer = average_path_length(self.sample_size);
        if normalizer == 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / normalizer)
    }

    pub(crate) fn is_anomalous(&self, point: &Point) -> bool {
        self.score(point) > self.threshold
    }

    pub(crate) fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Linear-interpolated quantile of ascending `sorted` values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    // ---
    if sorted.is_empty() {
        return f64::INFINITY;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn grid_with_outlier() -> Vec<Point> {
        // ---
        let mut data: Vec<Point> = (0..200)
            .map(|i| {
                let x = (i % 20) as f64 * 0.05;
                let y = (i / 20) as f64 * 0.05;
                [x, y, x + y]
            })
            .collect();
        data.push([25.0, -25.0, 0.0]);
        data
    }

    #[test]
    fn test_average_path_length() {
        // ---
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is roughly 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_quantile_interpolates() {
        // ---
        let sorted = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.5), 2.0);
        assert!((quantile(&sorted, 0.9) - 3.6).abs() < 1e-12);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn test_outlier_scores_highest() {
        // ---
        let data = grid_with_outlier();
        let forest = IsolationForest::fit(&data, &ForestParams::default(), 0.05);

        let outlier = forest.score(&[25.0, -25.0, 0.0]);
        let inlier = forest.score(&[0.5, 0.2, 0.7]);
        assert!(outlier > inlier, "outlier {outlier} <= inlier {inlier}");
        assert!(forest.is_anomalous(&[25.0, -25.0, 0.0]));
        assert!(!forest.is_anomalous(&[0.5, 0.2, 0.7]));
    }

    #[test]
    fn test_same_seed_same_forest() {
        // ---
        let data = grid_with_outlier();
        let params = ForestParams {
            n_trees: 20,
            ..ForestParams::default()
        };

        let a = IsolationForest::fit(&data, &params, 0.1);
        let b = IsolationForest::fit(&data, &params, 0.1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_data_does_not_split() {
        // ---
        let data = vec![[1.0, 1.0, 1.0]; 16];
        let forest = IsolationForest::fit(&data, &ForestParams::default(), 0.1);

        assert!(forest.trees.iter().all(|t| t.nodes.len() == 1));
        assert!(!forest.is_anomalous(&[1.0, 1.0, 1.0]));
    }
}
