//! CART decision trees over dense `f64` rows.
//!
//! Nodes live in a flat arena indexed from the root at 0. Classification
//! trees store class proportions in their leaves, regression trees the mean
//! target.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::TreeParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    /// Impurity decrease per feature, normalised to sum to 1 (all zero for a stump).
    importances: Vec<f64>,
}

/// What the tree is fitted against.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Classes { labels: &'a [usize], n_classes: usize },
    Values(&'a [f64]),
}

impl DecisionTree {
    /// Fits a tree on the rows listed in `samples` (duplicates allowed).
    ///
    /// At each node `max_features` features are drawn at random; more are
    /// examined only if none of those admits a valid split.
    pub fn fit(
        x: &[Vec<f64>],
        target: Target<'_>,
        samples: &[usize],
        params: &TreeParams,
        max_features: usize,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut builder = Builder {
            x,
            target,
            params,
            max_features: max_features.clamp(1, n_features.max(1)),
            n_features,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        let mut samples = samples.to_vec();
        builder.grow(&mut samples, 0, rng);

        let total: f64 = builder.importances.iter().sum();
        if total > 0.0 {
            for value in builder.importances.iter_mut() {
                *value /= total;
            }
        }

        DecisionTree {
            nodes: builder.nodes,
            importances: builder.importances,
        }
    }

    pub fn leaf_value(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict_value(&self, row: &[f64]) -> f64 {
        self.leaf_value(row).first().copied().unwrap_or(0.0)
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

struct Builder<'a> {
    x: &'a [Vec<f64>],
    target: Target<'a>,
    params: &'a TreeParams,
    max_features: usize,
    n_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    /// Weighted child impurity, `n_left * imp_left + n_right * imp_right`.
    children: f64,
}

impl Builder<'_> {
    fn grow(&mut self, samples: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let stats = Stats::over(self.target, samples);
        let impurity = stats.impurity(self.target);
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: stats.leaf_value(self.target),
        });

        let n = samples.len();
        if depth >= self.params.max_depth
            || n < self.params.min_samples_split.max(2)
            || n < 2 * self.params.min_samples_leaf.max(1)
            || impurity <= 1e-12
        {
            return idx;
        }

        let Some(best) = self.best_split(samples, &stats, rng) else {
            return idx;
        };
        // zero-gain splits are still taken; deeper levels may separate
        self.importances[best.feature] += (n as f64 * impurity - best.children).max(0.0);

        let x = self.x;
        let mid = partition(samples, |row| x[row][best.feature] <= best.threshold);
        let (left_rows, right_rows) = samples.split_at_mut(mid);
        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, samples: &[usize], total: &Stats, rng: &mut StdRng) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(rng);

        let min_leaf = self.params.min_samples_leaf.max(1) as f64;
        let mut sorted = samples.to_vec();
        let mut best: Option<BestSplit> = None;

        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            let x = self.x;
            sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

            let mut left = Stats::empty(self.target);
            let mut right = total.clone();
            for pos in 0..sorted.len() - 1 {
                let row = sorted[pos];
                left.add(self.target, row);
                right.remove(self.target, row);

                let here = x[row][feature];
                let next = x[sorted[pos + 1]][feature];
                if here >= next || left.n < min_leaf || right.n < min_leaf {
                    continue;
                }

                let children = left.n * left.impurity(self.target) + right.n * right.impurity(self.target);
                if best.as_ref().map_or(true, |b| children < b.children) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        children,
                    });
                }
            }
        }
        best
    }
}

/// Moves rows satisfying `pred` to the front; returns how many there are.
fn partition(rows: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if pred(rows[i]) {
            rows.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

#[derive(Debug, Clone)]
struct Stats {
    n: f64,
    counts: Vec<f64>,
    sum: f64,
    sum_sq: f64,
}

impl Stats {
    fn empty(target: Target<'_>) -> Self {
        let classes = match target {
            Target::Classes { n_classes, .. } => n_classes,
            Target::Values(_) => 0,
        };
        Stats {
            n: 0.0,
            counts: vec![0.0; classes],
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn over(target: Target<'_>, samples: &[usize]) -> Self {
        let mut stats = Stats::empty(target);
        for &row in samples {
            stats.add(target, row);
        }
        stats
    }

    fn add(&mut self, target: Target<'_>, row: usize) {
        self.n += 1.0;
        match target {
            Target::Classes { labels, .. } => self.counts[labels[row]] += 1.0,
            Target::Values(values) => {
                self.sum += values[row];
                self.sum_sq += values[row] * values[row];
            }
        }
    }

    fn remove(&mut self, target: Target<'_>, row: usize) {
        self.n -= 1.0;
        match target {
            Target::Classes { labels, .. } => self.counts[labels[row]] -= 1.0,
            Target::Values(values) => {
                self.sum -= values[row];
                self.sum_sq -= values[row] * values[row];
            }
        }
    }

    /// Gini index for classes, variance for values.
    fn impurity(&self, target: Target<'_>) -> f64 {
        if self.n <= 0.0 {
            return 0.0;
        }
        match target {
            Target::Classes { .. } => {
                1.0 - self.counts.iter().map(|c| (c / self.n).powi(2)).sum::<f64>()
            }
            Target::Values(_) => {
                let mean = self.sum / self.n;
                (self.sum_sq / self.n - mean * mean).max(0.0)
            }
        }
    }

    fn leaf_value(&self, target: Target<'_>) -> Vec<f64> {
        match target {
            Target::Classes { n_classes, .. } => {
                if self.n <= 0.0 {
                    return vec![1.0 / n_classes.max(1) as f64; n_classes];
                }
                self.counts.iter().map(|c| c / self.n).collect()
            }
            Target::Values(_) => {
                vec![if self.n > 0.0 { self.sum / self.n } else { 0.0 }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }

    #[test]
    fn separates_a_single_threshold() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 0.0]).collect();
        let labels: Vec<usize> = (0..10).map(|i| usize::from(i >= 5)).collect();
        let samples: Vec<usize> = (0..10).collect();
        let tree = DecisionTree::fit(
            &x,
            Target::Classes {
                labels: &labels,
                n_classes: 2,
            },
            &samples,
            &params(),
            2,
            &mut StdRng::seed_from_u64(0),
        );

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_value(&[2.0, 0.0]), &[1.0, 0.0]);
        assert_eq!(tree.leaf_value(&[7.0, 0.0]), &[0.0, 1.0]);
        assert_eq!(tree.feature_importances(), &[1.0, 0.0]);
    }

    #[test]
    fn learns_xor_with_depth_two() {
        let x = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let labels = vec![0, 1, 1, 0];
        let samples: Vec<usize> = (0..4).flat_map(|i| [i, i]).collect();
        let tree = DecisionTree::fit(
            &x,
            Target::Classes {
                labels: &labels,
                n_classes: 2,
            },
            &samples,
            &params(),
            2,
            &mut StdRng::seed_from_u64(3),
        );
        for (row, &label) in x.iter().zip(&labels) {
            let proba = tree.leaf_value(row);
            assert_eq!(proba[label], 1.0);
        }
    }

    #[test]
    fn regression_leaves_hold_means() {
        let x: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
        let y = vec![1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 7.0, 7.0];
        let samples: Vec<usize> = (0..8).collect();
        let tree = DecisionTree::fit(
            &x,
            Target::Values(&y),
            &samples,
            &TreeParams {
                max_depth: 1,
                ..params()
            },
            1,
            &mut StdRng::seed_from_u64(0),
        );
        assert!((tree.predict_value(&[0.0]) - 1.0).abs() < 1e-12);
        assert!((tree.predict_value(&[6.5]) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn min_samples_leaf_is_respected() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![0.0, 0.0, 0.0, 0.0, 0.0, 10.0];
        let samples: Vec<usize> = (0..6).collect();
        let tree = DecisionTree::fit(
            &x,
            Target::Values(&y),
            &samples,
            &TreeParams {
                max_depth: 3,
                min_samples_split: 2,
                min_samples_leaf: 2,
            },
            1,
            &mut StdRng::seed_from_u64(0),
        );
        // the outlier cannot be isolated in a leaf of one
        assert!((tree.predict_value(&[5.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn pure_node_stays_a_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![1, 1, 1];
        let tree = DecisionTree::fit(
            &x,
            Target::Classes {
                labels: &labels,
                n_classes: 2,
            },
            &[0, 1, 2],
            &params(),
            1,
            &mut StdRng::seed_from_u64(0),
        );
        assert_eq!(tree.n_nodes(), 1);
        assert!(tree.feature_importances().iter().all(|&v| v == 0.0));
    }
}
