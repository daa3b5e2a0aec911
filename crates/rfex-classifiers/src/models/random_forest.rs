use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::ForestConfig;
use crate::error::{Result, RfexError};
use crate::models::adapter::ModelAdapter;
use crate::models::decision_tree::DecisionTree;
use crate::table::FeatureTable;

/// Bagged CART ensemble; probabilities are averaged leaf distributions.
pub struct RandomForestAdapter {
    name: String,
    config: ForestConfig,
    trees: Vec<DecisionTree>,
    /// Output columns of the fitted forest.
    width: usize,
    n_features: usize,
}

impl RandomForestAdapter {
    pub fn new(name: impl Into<String>, config: ForestConfig) -> Self {
        RandomForestAdapter {
            name: name.into(),
            config,
            trees: Vec::new(),
            width: 0,
            n_features: 0,
        }
    }
}

impl ModelAdapter for RandomForestAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&mut self, train: &FeatureTable) -> Result<()> {
        let n_rows = train.n_rows();
        if n_rows == 0 {
            return Err(RfexError::EmptyTable("training rows"));
        }
        let x = train.joined();
        let y = train.labels();
        let n_features = x.ncols();
        let classification = train.task().is_classification();
        let n_classes = train.num_classes().max(1);
        let max_features = if classification {
            Some(((n_features as f64).sqrt().floor() as usize).max(1))
        } else {
            None
        };

        log::debug!(
            "[{}] growing {} trees on {} rows x {} features",
            self.name,
            self.config.n_trees,
            n_rows,
            n_features
        );

        let config = &self.config;
        self.trees = (0..config.n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let mut tree = if classification {
                    DecisionTree::classifier(n_classes)
                } else {
                    DecisionTree::regressor()
                }
                .with_max_depth(config.max_depth)
                .with_min_samples_split(config.min_samples_split)
                .with_max_features(max_features);
                tree.fit(&x, y, &bootstrap, &mut rng);
                tree
            })
            .collect();
        self.width = if classification { n_classes } else { 1 };
        self.n_features = n_features;
        Ok(())
    }

    fn predict_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.trees.is_empty() {
            return Err(RfexError::Model(format!("{} used before training", self.name)));
        }
        if x.ncols() != self.n_features {
            return Err(RfexError::FeatureCountMismatch {
                expected: self.n_features,
                found: x.ncols(),
                context: "random forest query".into(),
            });
        }
        let width = self.width;
        let n_trees = self.trees.len() as f64;
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let mut acc = vec![0.0; width];
                for tree in &self.trees {
                    for (a, v) in acc.iter_mut().zip(tree.predict_row(x.row(i))) {
                        *a += v;
                    }
                }
                acc.iter_mut().for_each(|a| *a /= n_trees);
                acc
            })
            .collect();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((x.nrows(), width), flat).map_err(|e| RfexError::Model(e.to_string()))
    }

    fn release(&mut self) {
        self.trees.clear();
    }
}
