//! rfex-classifiers: recursive feature elimination driven by explanations.
//!
//! The crate holds the model-agnostic half of the harness: the encoded
//! feature table and its fold cache, dataset acquisition, the classical
//! model adapters (SVM, KNN, random forest), the permutation Shapley
//! explainer, the elimination loop and the result export. Neural adapters
//! live in `rfex-deep` and plug in through [`models::ModelAdapter`].
pub mod config;
pub mod elimination;
pub mod error;
pub mod experiment;
pub mod explain;
pub mod io;
pub mod models;
pub mod relevance;
pub mod report;
pub mod results;
pub mod stats;
pub mod table;

pub use error::{Result, RfexError};
