//! Model-agnostic Shapley relevance by permutation sampling.
//!
//! For every explained instance a number of random feature orderings is
//! drawn. Walking an ordering, features are switched one at a time from a
//! random background row to the instance value and the change in model
//! output is credited to the switched feature. All coalitions of one
//! instance are scored with a single batched prediction.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::config::{ExplainConfig, Task};
use crate::error::{Result, RfexError};

#[derive(Debug, Clone)]
pub struct ShapleyExplainer {
    n_permutations: usize,
    background_rows: usize,
    max_explain_rows: usize,
    seed: u64,
}

impl ShapleyExplainer {
    pub fn new(n_permutations: usize, background_rows: usize, max_explain_rows: usize, seed: u64) -> Self {
        Self {
            n_permutations: n_permutations.max(1),
            background_rows: background_rows.max(1),
            max_explain_rows: max_explain_rows.max(1),
            seed,
        }
    }

    pub fn from_config(config: &ExplainConfig) -> Self {
        Self::new(
            config.n_permutations,
            config.background_rows,
            config.max_explain_rows,
            config.seed,
        )
    }

    /// Draws up to `background_rows` distinct rows of `x` with the seeded RNG.
    pub fn sample_background(&self, x: &Array2<f64>) -> Array2<f64> {
        if x.nrows() <= self.background_rows {
            return x.clone();
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut rows = rand::seq::index::sample(&mut rng, x.nrows(), self.background_rows).into_vec();
        rows.sort_unstable();
        x.select(Axis(0), &rows)
    }

    /// The leading rows of `x` that will be explained.
    pub fn explained_rows(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows().min(self.max_explain_rows);
        x.slice(ndarray::s![..n, ..]).to_owned()
    }

    /// Unsigned relevance, `instances.nrows()` × `instances.ncols()`.
    ///
    /// `predict_fn` maps a batch of joined rows to per-class probabilities
    /// (classification) or a single prediction column (regression). For
    /// classification the explained output is the probability of the class
    /// predicted for the instance itself.
    pub fn explain<F>(
        &self,
        predict_fn: F,
        background: &Array2<f64>,
        instances: &Array2<f64>,
        task: Task,
    ) -> Result<Array2<f64>>
    where
        F: Fn(&Array2<f64>) -> Result<Array2<f64>> + Sync,
    {
        if background.nrows() == 0 {
            return Err(RfexError::EmptyTable("background rows"));
        }
        if background.ncols() != instances.ncols() {
            return Err(RfexError::FeatureCountMismatch {
                expected: instances.ncols(),
                found: background.ncols(),
                context: "explainer background".into(),
            });
        }
        let n_features = instances.ncols();
        if instances.nrows() == 0 || n_features == 0 {
            return Ok(Array2::zeros((instances.nrows(), n_features)));
        }

        let own_scores = predict_fn(instances)?;
        let targets: Vec<usize> = own_scores
            .rows()
            .into_iter()
            .map(|row| if task.is_classification() { argmax(row) } else { 0 })
            .collect();

        log::debug!(
            "[ShapleyExplainer] explaining {} rows x {} features ({} permutations, {} background rows)",
            instances.nrows(),
            n_features,
            self.n_permutations,
            background.nrows()
        );

        let rows: Vec<Vec<f64>> = (0..instances.nrows())
            .into_par_iter()
            .map(|i| {
                self.explain_instance(&predict_fn, background, instances.row(i), targets[i], i)
            })
            .collect::<Result<Vec<_>>>()?;

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((instances.nrows(), n_features), flat)
            .map_err(|e| RfexError::Model(e.to_string()))
    }

    fn explain_instance<F>(
        &self,
        predict_fn: &F,
        background: &Array2<f64>,
        instance: ArrayView1<f64>,
        target: usize,
        instance_index: usize,
    ) -> Result<Vec<f64>>
    where
        F: Fn(&Array2<f64>) -> Result<Array2<f64>> + Sync,
    {
        let n_features = instance.len();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(instance_index as u64));
        let steps = n_features + 1;

        let mut coalitions = Array2::<f64>::zeros((self.n_permutations * steps, n_features));
        let mut orders = Vec::with_capacity(self.n_permutations);
        for p in 0..self.n_permutations {
            let mut order: Vec<usize> = (0..n_features).collect();
            order.shuffle(&mut rng);
            let bg = background.row(rng.gen_range(0..background.nrows()));

            let mut current: Array1<f64> = bg.to_owned();
            coalitions.row_mut(p * steps).assign(&current);
            for (step, &feature) in order.iter().enumerate() {
                current[feature] = instance[feature];
                coalitions.row_mut(p * steps + step + 1).assign(&current);
            }
            orders.push(order);
        }

        let scores = predict_fn(&coalitions)?;
        if target >= scores.ncols() {
            return Err(RfexError::Model(format!(
                "prediction has {} outputs, cannot explain output {}",
                scores.ncols(),
                target
            )));
        }
        let output = scores.column(target);

        let mut contributions = vec![0.0; n_features];
        for (p, order) in orders.iter().enumerate() {
            for (step, &feature) in order.iter().enumerate() {
                let before = output[p * steps + step];
                let after = output[p * steps + step + 1];
                contributions[feature] += after - before;
            }
        }
        Ok(contributions
            .into_iter()
            .map(|c| (c / self.n_permutations as f64).abs())
            .collect())
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear(x: &Array2<f64>) -> Result<Array2<f64>> {
        let w = array![2.0, 0.0, -1.0];
        Ok(x.dot(&w).insert_axis(Axis(1)))
    }

    #[test]
    fn linear_model_gets_exact_contributions() {
        let explainer = ShapleyExplainer::new(5, 1, 10, 7);
        let background = array![[0.0, 0.0, 0.0]];
        let instances = array![[1.0, 5.0, 3.0], [-2.0, 1.0, 0.5]];
        let rel = explainer
            .explain(linear, &background, &instances, Task::Regression)
            .unwrap();
        assert_eq!(rel.shape(), &[2, 3]);
        assert!((rel[[0, 0]] - 2.0).abs() < 1e-12);
        assert!(rel[[0, 1]].abs() < 1e-12);
        assert!((rel[[0, 2]] - 3.0).abs() < 1e-12);
        assert!((rel[[1, 0]] - 4.0).abs() < 1e-12);
        assert!((rel[[1, 2]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn contributions_sum_to_prediction_gap() {
        // interaction term: f = x0 * x1
        let f = |x: &Array2<f64>| -> Result<Array2<f64>> {
            Ok(x.map_axis(Axis(1), |r| r[0] * r[1]).insert_axis(Axis(1)))
        };
        let explainer = ShapleyExplainer::new(20, 1, 10, 3);
        let rel = explainer
            .explain(f, &array![[0.0, 0.0]], &array![[2.0, 3.0]], Task::Regression)
            .unwrap();
        assert!((rel[[0, 0]] + rel[[0, 1]] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn classification_explains_predicted_class() {
        // class 1 probability depends only on feature 1
        let f = |x: &Array2<f64>| -> Result<Array2<f64>> {
            let p1 = x.column(1).mapv(|v| if v > 0.5 { 0.9 } else { 0.1 });
            let p0 = p1.mapv(|p| 1.0 - p);
            Ok(ndarray::stack(Axis(1), &[p0.view(), p1.view()]).unwrap())
        };
        let explainer = ShapleyExplainer::new(4, 2, 10, 1);
        let bg = array![[0.0, 0.0], [1.0, 0.0]];
        let rel = explainer.explain(f, &bg, &array![[0.3, 1.0]], Task::Binary).unwrap();
        assert!(rel[[0, 0]].abs() < 1e-12);
        assert!((rel[[0, 1]] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_result() {
        let f = |x: &Array2<f64>| -> Result<Array2<f64>> {
            Ok(x.map_axis(Axis(1), |r| r[0] * r[1] + r[2]).insert_axis(Axis(1)))
        };
        let bg = array![[0.0, 1.0, 0.0], [1.0, 0.0, 2.0], [0.5, 0.5, 0.5]];
        let x = array![[1.0, 2.0, 3.0]];
        let a = ShapleyExplainer::new(3, 3, 5, 11).explain(f, &bg, &x, Task::Regression).unwrap();
        let b = ShapleyExplainer::new(3, 3, 5, 11).explain(f, &bg, &x, Task::Regression).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn background_sampling_is_capped() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i * 2 + j) as f64);
        let explainer = ShapleyExplainer::new(1, 10, 7, 0);
        assert_eq!(explainer.sample_background(&x).nrows(), 10);
        assert_eq!(explainer.explained_rows(&x).nrows(), 7);
    }

    #[test]
    fn argmax_prefers_first_tie() {
        assert_eq!(argmax(array![0.2, 0.4, 0.4].view()), 1);
        assert_eq!(argmax(array![0.5].view()), 0);
    }
}
