//! The model family entries run by the command line tool.

use anyhow::{bail, Result};

use rfex_classifiers::config::ExperimentConfig;
use rfex_classifiers::elimination::Direction;
use rfex_classifiers::error::RfexError;
use rfex_classifiers::experiment::ModelEntry;
use rfex_classifiers::models::knn::KnnAdapter;
use rfex_classifiers::models::random_forest::RandomForestAdapter;
use rfex_classifiers::models::svm::SvmAdapter;
use rfex_classifiers::models::ModelAdapter;
use rfex_deep::models::{AttentionAdapter, MlpAdapter};

pub const FAMILIES: [&str; 5] = ["Transformer", "SVM", "KNN", "MLP", "RandomForest"];

/// Name of the descending entry of a family.
fn inverse_name(family: &str) -> String {
    match family {
        "SVM" | "KNN" | "MLP" => format!("{}_INVERSE", family),
        _ => format!("{}INVERSE", family),
    }
}

fn adapter(family: &str, name: &str, config: &ExperimentConfig) -> rfex_classifiers::Result<Box<dyn ModelAdapter>> {
    let deep = |e: anyhow::Error| RfexError::Model(format!("{}: {:#}", name, e));
    let adapter: Box<dyn ModelAdapter> = match family {
        "Transformer" => Box::new(AttentionAdapter::new(name, config).map_err(deep)?),
        "SVM" => Box::new(SvmAdapter::new(name, config.models.svm_c, config.models.svm_eps)),
        "KNN" => Box::new(KnnAdapter::new(name, config.models.knn_neighbors)),
        "MLP" => Box::new(
            MlpAdapter::new(name, &config.models.mlp, config.training.seed, &config.device).map_err(deep)?,
        ),
        "RandomForest" => Box::new(RandomForestAdapter::new(name, config.models.forest.clone())),
        other => return Err(RfexError::UnknownModel(other.to_string())),
    };
    Ok(adapter)
}

/// Canonical family name for a user-supplied one, compared case-insensitively.
pub fn resolve_family(requested: &str) -> Result<&'static str> {
    match FAMILIES.iter().copied().find(|f| f.eq_ignore_ascii_case(requested)) {
        Some(f) => Ok(f),
        None => bail!(
            "Unknown model family: {}. Valid options are: {}",
            requested,
            FAMILIES.join(", ")
        ),
    }
}

/// Ascending and descending entries for every selected family, in the
/// fixed family order. An empty selection means all families.
pub fn entries(selected: &[String]) -> Result<Vec<ModelEntry>> {
    let wanted: Vec<&'static str> = if selected.is_empty() {
        FAMILIES.to_vec()
    } else {
        let resolved = selected.iter().map(|s| resolve_family(s)).collect::<Result<Vec<_>>>()?;
        FAMILIES.iter().copied().filter(|f| resolved.contains(f)).collect()
    };

    let mut entries = Vec::with_capacity(wanted.len() * 2);
    for family in wanted {
        for (name, direction) in [
            (family.to_string(), Direction::Ascending),
            (inverse_name(family), Direction::Descending),
        ] {
            let entry_name = name.clone();
            entries.push(ModelEntry::new(name, direction, move |config: &ExperimentConfig| {
                adapter(family, &entry_name, config)
            }));
        }
    }
    Ok(entries)
}
