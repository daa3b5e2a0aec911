//! Fold × round result matrices per model entry.

use ndarray::Array2;
use std::collections::HashMap;

use crate::elimination::{feature_floor, round_count};
use crate::error::{Result, RfexError};
use crate::stats::mean_std;

/// Accuracy and relevance cells of one model entry, indexed `[fold, round]`.
#[derive(Debug, Clone)]
struct ModelResults {
    name: String,
    accuracy: Array2<Option<f64>>,
    /// One matrix per feature, in the original feature order. `None` marks
    /// a round in which the feature had already been removed.
    relevance: Vec<Array2<Option<f64>>>,
    removed: Array2<Option<String>>,
}

/// A labelled round × fold matrix ready for export.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledMatrix {
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    /// `values[row][column]`.
    pub values: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub label: String,
    pub n_features: usize,
    pub mean: f64,
    pub std: f64,
}

pub struct ResultAccumulator {
    feature_names: Vec<String>,
    feature_index: HashMap<String, usize>,
    n_folds: usize,
    n_rounds: usize,
    models: Vec<ModelResults>,
}

impl ResultAccumulator {
    pub fn new(feature_names: Vec<String>, n_folds: usize) -> Self {
        let n_rounds = round_count(feature_names.len());
        let feature_index = feature_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        ResultAccumulator {
            feature_names,
            feature_index,
            n_folds,
            n_rounds,
            models: Vec::new(),
        }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    pub fn n_rounds(&self) -> usize {
        self.n_rounds
    }

    pub fn floor(&self) -> usize {
        feature_floor(self.feature_names.len())
    }

    /// Registered entries, in registration order.
    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    /// `nfeat{n}` from the original count down to the floor.
    pub fn row_labels(&self) -> Vec<String> {
        let n = self.feature_names.len();
        (0..self.n_rounds).map(|r| format!("nfeat{}", n - r)).collect()
    }

    pub fn column_labels(&self) -> Vec<String> {
        (0..self.n_folds).map(|k| format!("particion{}", k)).collect()
    }

    /// Adds an empty slot for `model`; registering twice is a no-op.
    pub fn register(&mut self, model: &str) {
        if self.models.iter().any(|m| m.name == model) {
            return;
        }
        let shape = (self.n_folds, self.n_rounds);
        self.models.push(ModelResults {
            name: model.to_string(),
            accuracy: Array2::from_elem(shape, None),
            relevance: vec![Array2::from_elem(shape, None); self.feature_names.len()],
            removed: Array2::from_elem(shape, None),
        });
    }

    fn model(&self, model: &str) -> Result<&ModelResults> {
        self.models
            .iter()
            .find(|m| m.name == model)
            .ok_or_else(|| RfexError::UnknownModel(model.to_string()))
    }

    /// Stores one round. Each `(model, fold, round)` cell is written once.
    pub fn record(
        &mut self,
        model: &str,
        fold: usize,
        round: usize,
        accuracy: f64,
        relevance: &[(String, f64)],
        removed: &str,
    ) -> Result<()> {
        if fold >= self.n_folds || round >= self.n_rounds {
            return Err(RfexError::FeatureCountMismatch {
                expected: self.n_rounds,
                found: round + 1,
                context: format!("result cell (fold {} of {})", fold, self.n_folds),
            });
        }
        let expected_active = self.feature_names.len() - round;
        if relevance.len() != expected_active {
            return Err(RfexError::FeatureCountMismatch {
                expected: expected_active,
                found: relevance.len(),
                context: format!("relevance of {} round {}", model, round),
            });
        }
        let indices = relevance
            .iter()
            .map(|(name, _)| {
                self.feature_index
                    .get(name)
                    .copied()
                    .ok_or_else(|| RfexError::UnknownFeature(name.clone()))
            })
            .collect::<Result<Vec<usize>>>()?;

        let entry = self
            .models
            .iter_mut()
            .find(|m| m.name == model)
            .ok_or_else(|| RfexError::UnknownModel(model.to_string()))?;
        if entry.accuracy[[fold, round]].is_some() {
            return Err(RfexError::DuplicateCell {
                model: model.to_string(),
                fold,
                round,
            });
        }
        entry.accuracy[[fold, round]] = Some(accuracy);
        entry.removed[[fold, round]] = Some(removed.to_string());
        for (&idx, (_, value)) in indices.iter().zip(relevance) {
            entry.relevance[idx][[fold, round]] = Some(*value);
        }
        Ok(())
    }

    fn check_populated(&self, entry: &ModelResults) -> Result<()> {
        for ((fold, round), cell) in entry.accuracy.indexed_iter() {
            if cell.is_none() {
                return Err(RfexError::UnpopulatedCell {
                    model: entry.name.clone(),
                    fold,
                    round,
                });
            }
        }
        Ok(())
    }

    /// Fails on the first model with a cell that was never written.
    pub fn check_complete(&self) -> Result<()> {
        self.models.iter().try_for_each(|m| self.check_populated(m))
    }

    /// Accuracy as rounds × folds.
    pub fn accuracy_table(&self, model: &str) -> Result<LabelledMatrix> {
        let entry = self.model(model)?;
        self.check_populated(entry)?;
        Ok(self.labelled(&entry.accuracy))
    }

    /// One rounds × folds relevance matrix per original feature, absent
    /// cells left as `None`.
    pub fn relevance_tables(&self, model: &str) -> Result<Vec<(String, LabelledMatrix)>> {
        let entry = self.model(model)?;
        self.check_populated(entry)?;
        Ok(self
            .feature_names
            .iter()
            .zip(&entry.relevance)
            .map(|(name, cells)| (name.clone(), self.labelled(cells)))
            .collect())
    }

    /// Names of the removed features, rounds × folds.
    pub fn removed_features(&self, model: &str) -> Result<Vec<Vec<String>>> {
        let entry = self.model(model)?;
        self.check_populated(entry)?;
        Ok((0..self.n_rounds)
            .map(|r| {
                (0..self.n_folds)
                    .map(|k| entry.removed[[k, r]].clone().unwrap_or_default())
                    .collect()
            })
            .collect())
    }

    /// Mean and standard deviation of accuracy across folds, per round.
    pub fn summary(&self, model: &str) -> Result<Vec<RoundSummary>> {
        let entry = self.model(model)?;
        self.check_populated(entry)?;
        let n = self.feature_names.len();
        Ok(self
            .row_labels()
            .into_iter()
            .enumerate()
            .map(|(r, label)| {
                let values: Vec<f64> = entry.accuracy.column(r).iter().flatten().copied().collect();
                let (mean, std) = mean_std(&values);
                RoundSummary {
                    label,
                    n_features: n - r,
                    mean,
                    std,
                }
            })
            .collect())
    }

    fn labelled(&self, cells: &Array2<Option<f64>>) -> LabelledMatrix {
        let values = (0..self.n_rounds)
            .map(|r| (0..self.n_folds).map(|k| cells[[k, r]]).collect())
            .collect();
        LabelledMatrix {
            row_labels: self.row_labels(),
            column_labels: self.column_labels(),
            values,
        }
    }
}
