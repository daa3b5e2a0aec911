//! The recursive feature elimination loop.
//!
//! One engine drives a single (model, direction, fold) run:
//!
//! ```text
//! Active(train, test, round)
//!     train -> evaluate(test) -> explain(test) -> normalize -> select -> remove
//!     reduced count >= floor ? Active(reduced, round + 1) : Done
//! ```

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::config::ExplainConfig;
use crate::error::{Result, RfexError};
use crate::models::ModelAdapter;
use crate::relevance::normalize_round;
use crate::table::FeatureTable;

/// Which end of the relevance ranking is removed each round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Remove the least relevant feature.
    Ascending,
    /// Remove the most relevant feature.
    Descending,
}

impl Direction {
    /// Index of the feature to remove; the lowest index wins ties.
    pub fn select(&self, relevance: &Array1<f64>) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, &v) in relevance.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => match self {
                    Direction::Ascending => v < relevance[b],
                    Direction::Descending => v > relevance[b],
                },
            };
            if better {
                best = Some(i);
            }
        }
        best
    }
}

/// Smallest feature count still evaluated: `n - floor(0.75 n)`.
pub fn feature_floor(n_features: usize) -> usize {
    n_features - (n_features * 3) / 4
}

/// Rounds per run, from `n_features` down to the floor inclusive.
pub fn round_count(n_features: usize) -> usize {
    n_features - feature_floor(n_features) + 1
}

/// Measurements of one completed round.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub round: usize,
    pub n_features: usize,
    pub accuracy: f64,
    /// Active feature names, aligned with `relevance`.
    pub feature_names: Vec<String>,
    pub relevance: Array1<f64>,
    pub removed: usize,
    pub removed_name: String,
}

impl RoundOutcome {
    pub fn relevance_pairs(&self) -> Vec<(String, f64)> {
        self.feature_names
            .iter()
            .cloned()
            .zip(self.relevance.iter().cloned())
            .collect()
    }
}

enum EliminationState {
    Active {
        train: FeatureTable,
        test: FeatureTable,
        round: usize,
    },
    Done,
}

pub struct EliminationEngine<'a> {
    adapter: &'a mut dyn ModelAdapter,
    direction: Direction,
    floor: usize,
    explain: &'a ExplainConfig,
    state: EliminationState,
}

impl<'a> EliminationEngine<'a> {
    pub fn new(
        adapter: &'a mut dyn ModelAdapter,
        direction: Direction,
        floor: usize,
        explain: &'a ExplainConfig,
        train: FeatureTable,
        test: FeatureTable,
    ) -> Result<Self> {
        check_aligned(&train, &test)?;
        let state = if train.n_features() >= floor && train.n_features() > 0 {
            EliminationState::Active { train, test, round: 0 }
        } else {
            EliminationState::Done
        };
        Ok(EliminationEngine {
            adapter,
            direction,
            floor,
            explain,
            state,
        })
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, EliminationState::Done)
    }

    /// Runs one round; `None` once the floor has been passed.
    pub fn step(&mut self) -> Result<Option<RoundOutcome>> {
        let (train, test, round) = match std::mem::replace(&mut self.state, EliminationState::Done) {
            EliminationState::Active { train, test, round } => (train, test, round),
            EliminationState::Done => return Ok(None),
        };
        check_aligned(&train, &test)?;

        let n_features = train.n_features();
        let feature_names = train.feature_names();

        self.adapter.train(&train)?;
        let accuracy = self.adapter.evaluate(&test)?;
        let matrix = self.adapter.explain(&train, &test, self.explain)?;
        let relevance = normalize_round(&matrix, n_features)?;

        let removed = self
            .direction
            .select(&relevance)
            .ok_or(RfexError::EmptyTable("features to remove"))?;
        let removed_name = feature_names[removed].clone();

        log::info!(
            "[{}] round {} ({} features): metric {:.4}, removing {:?}",
            self.adapter.name(),
            round,
            n_features,
            accuracy,
            removed_name
        );
        log::debug!(
            "[{}] relevance {:?}",
            self.adapter.name(),
            feature_names.iter().zip(relevance.iter()).collect::<Vec<_>>()
        );

        let reduced_train = train.without_feature(removed)?;
        let reduced_test = test.without_feature(removed)?;
        if reduced_train.n_features() >= self.floor {
            self.state = EliminationState::Active {
                train: reduced_train,
                test: reduced_test,
                round: round + 1,
            };
        }

        Ok(Some(RoundOutcome {
            round,
            n_features,
            accuracy,
            feature_names,
            relevance,
            removed,
            removed_name,
        }))
    }

    /// Drives the engine to `Done`, handing every round to `on_round`.
    /// Returns the number of rounds produced.
    pub fn run<F>(mut self, mut on_round: F) -> Result<usize>
    where
        F: FnMut(&RoundOutcome) -> Result<()>,
    {
        let mut rounds = 0;
        while let Some(outcome) = self.step()? {
            on_round(&outcome)?;
            rounds += 1;
        }
        Ok(rounds)
    }
}

fn check_aligned(train: &FeatureTable, test: &FeatureTable) -> Result<()> {
    if !train.same_features(test) {
        return Err(RfexError::FeatureCountMismatch {
            expected: train.n_features(),
            found: test.n_features(),
            context: "train/test descriptor lists".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Task;
    use crate::table::ContDescriptor;
    use ndarray::{array, Array2};

    /// Relevance is a fixed weight per named feature: the model output is the
    /// weighted sum, so permutation Shapley recovers `|w_i * x_i|` exactly.
    struct WeightedSum {
        weights: Vec<(String, f64)>,
        active: Vec<f64>,
        trained: usize,
    }

    impl WeightedSum {
        fn new(weights: &[(&str, f64)]) -> Self {
            WeightedSum {
                weights: weights.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
                active: Vec::new(),
                trained: 0,
            }
        }
    }

    impl ModelAdapter for WeightedSum {
        fn name(&self) -> &str {
            "weighted"
        }

        fn train(&mut self, train: &FeatureTable) -> Result<()> {
            self.active = train
                .feature_names()
                .iter()
                .map(|n| self.weights.iter().find(|(w, _)| w == n).map(|(_, v)| *v).unwrap_or(0.0))
                .collect();
            self.trained += 1;
            Ok(())
        }

        fn predict_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
            let w = Array1::from_vec(self.active.clone());
            Ok(x.dot(&w).insert_axis(ndarray::Axis(1)))
        }
    }

    fn table(n_features: usize) -> FeatureTable {
        let rows = 6;
        FeatureTable::new(
            "synthetic",
            Task::Regression,
            1,
            Array2::zeros((rows, 0)),
            Array2::from_elem((rows, n_features), 1.0),
            Array1::zeros(rows),
            vec![],
            (0..n_features)
                .map(|i| ContDescriptor { index: i, name: format!("f{}", i) })
                .collect(),
        )
        .unwrap()
    }

    fn explain_config() -> ExplainConfig {
        ExplainConfig {
            n_permutations: 2,
            background_rows: 1,
            max_explain_rows: 3,
            seed: 0,
        }
    }

    #[test]
    fn floor_keeps_a_quarter() {
        assert_eq!(feature_floor(20), 5);
        assert_eq!(round_count(20), 16);
        assert_eq!(feature_floor(4), 1);
        assert_eq!(feature_floor(7), 2);
        assert_eq!(round_count(1), 1);
    }

    #[test]
    fn selection_follows_direction() {
        let r = array![0.2, 0.9, 0.05];
        assert_eq!(Direction::Ascending.select(&r), Some(2));
        assert_eq!(Direction::Descending.select(&r), Some(1));
    }

    #[test]
    fn ties_remove_lowest_index() {
        let r = array![0.5, 0.0, 1.0, 0.0, 1.0];
        assert_eq!(Direction::Ascending.select(&r), Some(1));
        assert_eq!(Direction::Descending.select(&r), Some(2));
        assert_eq!(Direction::Ascending.select(&Array1::zeros(0)), None);
    }

    fn run_engine(direction: Direction, n: usize) -> Vec<RoundOutcome> {
        let weights: Vec<(String, f64)> = (0..n).map(|i| (format!("f{}", i), (i + 1) as f64)).collect();
        let weight_refs: Vec<(&str, f64)> = weights.iter().map(|(n, w)| (n.as_str(), *w)).collect();
        let mut model = WeightedSum::new(&weight_refs);
        let config = explain_config();
        let shape = table(n);
        // zero background so every feature's contribution is its weight
        let background = FeatureTable::new(
            "synthetic",
            Task::Regression,
            1,
            Array2::zeros((6, 0)),
            Array2::zeros((6, n)),
            Array1::zeros(6),
            shape.cat_features().to_vec(),
            shape.cont_features().to_vec(),
        )
        .unwrap();
        let engine = EliminationEngine::new(
            &mut model,
            direction,
            feature_floor(n),
            &config,
            background,
            table(n),
        )
        .unwrap();
        let mut outcomes = Vec::new();
        let rounds = engine
            .run(|o| {
                outcomes.push(o.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(rounds, outcomes.len());
        outcomes
    }

    #[test]
    fn twenty_features_give_sixteen_rounds() {
        let outcomes = run_engine(Direction::Ascending, 20);
        assert_eq!(outcomes.len(), 16);
        let counts: Vec<usize> = outcomes.iter().map(|o| o.n_features).collect();
        assert_eq!(counts, (5..=20).rev().collect::<Vec<_>>());
        for o in &outcomes {
            assert_eq!(o.feature_names.len(), o.n_features);
            assert!(o.relevance.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn ascending_drops_weakest_first() {
        let outcomes = run_engine(Direction::Ascending, 8);
        let removed: Vec<&str> = outcomes.iter().map(|o| o.removed_name.as_str()).collect();
        assert_eq!(removed, vec!["f0", "f1", "f2", "f3", "f4", "f5", "f6"]);
    }

    #[test]
    fn descending_drops_strongest_first() {
        let outcomes = run_engine(Direction::Descending, 8);
        let removed: Vec<&str> = outcomes.iter().map(|o| o.removed_name.as_str()).collect();
        assert_eq!(removed, vec!["f7", "f6", "f5", "f4", "f3", "f2", "f1"]);
    }

    #[test]
    fn misaligned_tables_are_rejected() {
        let mut model = WeightedSum::new(&[]);
        let config = explain_config();
        let result = EliminationEngine::new(
            &mut model,
            Direction::Ascending,
            1,
            &config,
            table(3),
            table(3).without_feature(0).unwrap(),
        );
        assert!(matches!(result, Err(RfexError::FeatureCountMismatch { .. })));
    }

    #[test]
    fn done_engine_yields_nothing() {
        let mut model = WeightedSum::new(&[("f0", 1.0)]);
        let config = explain_config();
        let mut engine =
            EliminationEngine::new(&mut model, Direction::Ascending, 1, &config, table(1), table(1)).unwrap();
        assert!(engine.step().unwrap().is_some());
        assert!(engine.is_done());
        assert!(engine.step().unwrap().is_none());
    }
}
