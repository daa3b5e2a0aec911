//! Runs every model entry over every fold and collects the results.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::config::{ExperimentConfig, Task};
use crate::elimination::{Direction, EliminationEngine};
use crate::error::{Result, RfexError};
use crate::io::Folds;
use crate::models::ModelAdapter;
use crate::report;
use crate::results::ResultAccumulator;

pub type AdapterFactory = Box<dyn Fn(&ExperimentConfig) -> Result<Box<dyn ModelAdapter>> + Send + Sync>;

/// A named (model family, direction) pair, e.g. `SVM` or `SVM_INVERSE`.
pub struct ModelEntry {
    pub name: String,
    pub direction: Direction,
    factory: AdapterFactory,
}

impl ModelEntry {
    pub fn new<F>(name: impl Into<String>, direction: Direction, factory: F) -> Self
    where
        F: Fn(&ExperimentConfig) -> Result<Box<dyn ModelAdapter>> + Send + Sync + 'static,
    {
        ModelEntry {
            name: name.into(),
            direction,
            factory: Box::new(factory),
        }
    }

    pub fn build(&self, config: &ExperimentConfig) -> Result<Box<dyn ModelAdapter>> {
        (self.factory)(config)
    }
}

pub struct ExperimentOutcome {
    pub dataset_name: String,
    pub task: Task,
    pub results: ResultAccumulator,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
}

impl ExperimentOutcome {
    pub fn export(&self, result_root: &Path) -> Result<Vec<PathBuf>> {
        report::export(&self.results, result_root, self.task, &self.dataset_name, &self.started)
    }
}

pub struct ExperimentDriver {
    config: ExperimentConfig,
    entries: Vec<ModelEntry>,
}

impl ExperimentDriver {
    pub fn new(config: ExperimentConfig, entries: Vec<ModelEntry>) -> Self {
        ExperimentDriver { config, entries }
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Entries run sequentially, folds in order. An entry's adapter is
    /// rebuilt for every fold and released when the fold finishes.
    pub fn run(&self, folds: &Folds) -> Result<ExperimentOutcome> {
        let started = Local::now();
        let first = folds.first_train()?;
        let feature_names = first.feature_names();
        for (k, (train, test)) in folds.train.iter().zip(&folds.test).enumerate() {
            if train.feature_names() != feature_names || test.feature_names() != feature_names {
                return Err(RfexError::FeatureCountMismatch {
                    expected: feature_names.len(),
                    found: train.n_features(),
                    context: format!("feature list of fold {}", k),
                });
            }
        }
        if self.entries.is_empty() {
            return Err(RfexError::InvalidConfig("no model entries selected".into()));
        }

        let config = self.config.adjusted_for(feature_names.len());
        let mut results = ResultAccumulator::new(feature_names, folds.len());
        let floor = results.floor();

        log::info!(
            "[Experiment] {}: {} entries x {} folds, {} features down to {}",
            first.name(),
            self.entries.len(),
            folds.len(),
            first.n_features(),
            floor
        );

        for entry in &self.entries {
            results.register(&entry.name);
            for (fold, (train, test)) in folds.train.iter().zip(&folds.test).enumerate() {
                log::info!("[Experiment] {} fold {}", entry.name, fold);
                let mut adapter = entry.build(&config)?;
                let engine = EliminationEngine::new(
                    adapter.as_mut(),
                    entry.direction,
                    floor,
                    &config.explain,
                    train.clone(),
                    test.clone(),
                )?;
                let rounds = engine.run(|outcome| {
                    results.record(
                        &entry.name,
                        fold,
                        outcome.round,
                        outcome.accuracy,
                        &outcome.relevance_pairs(),
                        &outcome.removed_name,
                    )
                })?;
                adapter.release();
                if rounds != results.n_rounds() {
                    return Err(RfexError::Model(format!(
                        "{} fold {} produced {} rounds, expected {}",
                        entry.name,
                        fold,
                        rounds,
                        results.n_rounds()
                    )));
                }
                log::debug!("[Experiment] {} fold {} finished after {} rounds", entry.name, fold, rounds);
            }
        }

        results.check_complete()?;
        let finished = Local::now();
        log::info!(
            "[Experiment] finished in {}s",
            (finished - started).num_seconds()
        );
        Ok(ExperimentOutcome {
            dataset_name: first.name().to_string(),
            task: first.task(),
            results,
            started,
            finished,
        })
    }
}
