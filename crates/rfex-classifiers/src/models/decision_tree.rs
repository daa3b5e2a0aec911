//! CART tree used by the random forest.

use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::Rng;

#[derive(Debug, Clone)]
enum TreeNode {
    /// Class distribution for classification, `[mean]` for regression.
    Leaf(Vec<f64>),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    max_depth: Option<usize>,
    min_samples_split: usize,
    max_features: Option<usize>,
    /// Zero means regression.
    n_classes: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    pub fn classifier(n_classes: usize) -> Self {
        DecisionTree {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
            n_classes: n_classes.max(1),
        }
    }

    pub fn regressor() -> Self {
        DecisionTree {
            n_classes: 0,
            ..Self::classifier(1)
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    /// Number of randomly chosen candidate features per split.
    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    fn is_classification(&self) -> bool {
        self.n_classes > 0
    }

    /// Grow the tree on the given rows (duplicates allowed, for bootstraps).
    pub fn fit<R: Rng>(&mut self, x: &Array2<f64>, y: &Array1<f64>, rows: &[usize], rng: &mut R) {
        self.root = Some(self.grow(x, y, rows.to_vec(), 0, rng));
    }

    /// Leaf vector for a single sample; empty before fitting.
    pub fn predict_row(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut node = match &self.root {
            Some(root) => root,
            None => return &[],
        };
        loop {
            match node {
                TreeNode::Leaf(value) => return value,
                TreeNode::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn leaf_value(&self, y: &Array1<f64>, rows: &[usize]) -> Vec<f64> {
        if self.is_classification() {
            let mut dist = vec![0.0; self.n_classes];
            for &r in rows {
                let c = y[r].round().max(0.0) as usize;
                if c < self.n_classes {
                    dist[c] += 1.0;
                }
            }
            let n = rows.len().max(1) as f64;
            dist.iter_mut().for_each(|v| *v /= n);
            dist
        } else {
            let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len().max(1) as f64;
            vec![mean]
        }
    }

    fn grow<R: Rng>(&self, x: &Array2<f64>, y: &Array1<f64>, rows: Vec<usize>, depth: usize, rng: &mut R) -> TreeNode {
        let depth_reached = self.max_depth.map_or(false, |d| depth >= d);
        if depth_reached || rows.len() < self.min_samples_split || self.is_pure(y, &rows) {
            return TreeNode::Leaf(self.leaf_value(y, &rows));
        }

        let n_features = x.ncols();
        let n_candidates = self.max_features.unwrap_or(n_features).clamp(1, n_features.max(1));
        let candidates: Vec<usize> = if n_candidates >= n_features {
            (0..n_features).collect()
        } else {
            sample(rng, n_features, n_candidates).into_vec()
        };

        let parent = self.impurity_of(y, &rows);
        let best = candidates
            .iter()
            .filter_map(|&f| self.best_split(x, y, &rows, f))
            .fold(None::<SplitCandidate>, |best, cand| match best {
                Some(b) if b.impurity <= cand.impurity => Some(b),
                _ => Some(cand),
            });

        match best {
            Some(split) if split.impurity < parent - 1e-12 => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                    .iter()
                    .partition(|&&r| x[[r, split.feature]] <= split.threshold);
                TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: Box::new(self.grow(x, y, left_rows, depth + 1, rng)),
                    right: Box::new(self.grow(x, y, right_rows, depth + 1, rng)),
                }
            }
            _ => TreeNode::Leaf(self.leaf_value(y, &rows)),
        }
    }

    fn is_pure(&self, y: &Array1<f64>, rows: &[usize]) -> bool {
        match rows.first() {
            Some(&first) => rows.iter().all(|&r| y[r] == y[first]),
            None => true,
        }
    }

    fn impurity_of(&self, y: &Array1<f64>, rows: &[usize]) -> f64 {
        if self.is_classification() {
            let dist = self.leaf_value(y, rows);
            1.0 - dist.iter().map(|p| p * p).sum::<f64>()
        } else {
            let n = rows.len().max(1) as f64;
            let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / n;
            rows.iter().map(|&r| (y[r] - mean).powi(2)).sum::<f64>() / n
        }
    }

    /// Lowest weighted child impurity over all thresholds of `feature`.
    fn best_split(&self, x: &Array2<f64>, y: &Array1<f64>, rows: &[usize], feature: usize) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, f64)> = rows.iter().map(|&r| (x[[r, feature]], y[r])).collect();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let n = sorted.len();
        if n < 2 {
            return None;
        }
        let mut best: Option<SplitCandidate> = None;

        if self.is_classification() {
            let mut left = vec![0.0; self.n_classes];
            let mut right = vec![0.0; self.n_classes];
            for &(_, label) in &sorted {
                right[class_of(label, self.n_classes)] += 1.0;
            }
            for i in 0..n - 1 {
                let c = class_of(sorted[i].1, self.n_classes);
                left[c] += 1.0;
                right[c] -= 1.0;
                if sorted[i].0 == sorted[i + 1].0 {
                    continue;
                }
                let n_left = (i + 1) as f64;
                let n_right = (n - i - 1) as f64;
                let impurity = (n_left * gini(&left, n_left) + n_right * gini(&right, n_right)) / n as f64;
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: 0.5 * (sorted[i].0 + sorted[i + 1].0),
                        impurity,
                    });
                }
            }
        } else {
            let total: f64 = sorted.iter().map(|s| s.1).sum();
            let total_sq: f64 = sorted.iter().map(|s| s.1 * s.1).sum();
            let (mut sum_left, mut sq_left) = (0.0, 0.0);
            for i in 0..n - 1 {
                sum_left += sorted[i].1;
                sq_left += sorted[i].1 * sorted[i].1;
                if sorted[i].0 == sorted[i + 1].0 {
                    continue;
                }
                let n_left = (i + 1) as f64;
                let n_right = (n - i - 1) as f64;
                let sse_left = sq_left - sum_left * sum_left / n_left;
                let sum_right = total - sum_left;
                let sse_right = (total_sq - sq_left) - sum_right * sum_right / n_right;
                let impurity = (sse_left + sse_right) / n as f64;
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: 0.5 * (sorted[i].0 + sorted[i + 1].0),
                        impurity,
                    });
                }
            }
        }
        best
    }
}

fn class_of(label: f64, n_classes: usize) -> usize {
    (label.round().max(0.0) as usize).min(n_classes - 1)
}

fn gini(counts: &[f64], n: f64) -> f64 {
    if n <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / n) * (c / n)).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn splits_on_informative_column() {
        let x = array![[0.0, 3.0], [1.0, 1.0], [2.0, 2.0], [3.0, 0.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut tree = DecisionTree::classifier(2);
        tree.fit(&x, &y, &[0, 1, 2, 3], &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.predict_row(array![0.5, 9.0].view()), &[1.0, 0.0]);
        assert_eq!(tree.predict_row(array![2.5, 9.0].view()), &[0.0, 1.0]);
    }

    #[test]
    fn regression_tree_fits_step_function() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 5.0, 5.0];
        let mut tree = DecisionTree::regressor().with_max_depth(Some(1));
        tree.fit(&x, &y, &[0, 1, 2, 3], &mut StdRng::seed_from_u64(0));
        assert_eq!(tree.predict_row(array![0.2].view()), &[1.0]);
        assert_eq!(tree.predict_row(array![2.7].view()), &[5.0]);
    }

    #[test]
    fn unfitted_tree_predicts_nothing() {
        let tree = DecisionTree::classifier(2);
        assert!(tree.predict_row(array![1.0].view()).is_empty());
    }
}
