//! rfex-deep: candle-backed neural adapters for the elimination harness.
//!
//! Provides the self-attention tabular model and a plain multilayer
//! perceptron, both implementing `rfex_classifiers::models::ModelAdapter`.
pub mod building_blocks;
pub mod models;
pub mod training;
pub mod utils;

use rfex_classifiers::error::RfexError;

pub(crate) fn model_error(name: &str, err: anyhow::Error) -> RfexError {
    RfexError::Model(format!("{}: {:#}", name, err))
}
