use anyhow::{Context, Result};
use std::path::PathBuf;

use rfex_classifiers::config::{ExperimentConfig, Mode};
use rfex_classifiers::experiment::ExperimentDriver;
use rfex_classifiers::io::{build_folds, source_for, FoldCache};

use crate::input::RunConfig;
use crate::registry;

/// Acquires and encodes the dataset, splits it and stores the folds.
pub fn load_data(config: &ExperimentConfig) -> Result<PathBuf> {
    let cache = FoldCache::from_config(&config.data);
    if cache.exists() {
        anyhow::bail!("fold cache already exists at {:?}", cache.dir());
    }
    let source = source_for(&config.data)?;
    let folds = build_folds(source.as_ref(), &config.data).context("building folds")?;
    cache.store(&folds)?;
    log::info!(
        "[rfex::loadData] {} folds of {} ({} features) stored in {:?}",
        folds.len(),
        folds.first_train()?.name(),
        folds.first_train()?.n_features(),
        cache.dir()
    );
    Ok(cache.dir().to_path_buf())
}

/// Runs every selected entry over the cached folds and exports the results.
pub fn run_experiment(config: &ExperimentConfig) -> Result<Vec<PathBuf>> {
    let cache = FoldCache::from_config(&config.data);
    let folds = cache
        .load()
        .context("loading folds (run with --mode loadData first)")?;
    let entries = registry::entries(&config.families)?;
    let driver = ExperimentDriver::new(config.clone(), entries);
    let outcome = driver.run(&folds)?;
    let written = outcome.export(&config.data.result_root)?;
    log::info!(
        "[rfex] {} finished in {}s, wrote {} files",
        outcome.dataset_name,
        (outcome.finished - outcome.started).num_seconds(),
        written.len()
    );
    Ok(written)
}

pub fn run(params: &RunConfig) -> Result<()> {
    match params.mode {
        Mode::LoadData => load_data(&params.experiment).map(|_| ()),
        Mode::Train | Mode::Explain => run_experiment(&params.experiment).map(|_| ()),
    }
}
