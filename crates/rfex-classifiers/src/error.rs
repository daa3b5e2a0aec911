use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the elimination harness.
///
/// Setup errors (`CacheExists`, `CacheMissing`) are reported to the user and
/// end the run. Consistency errors (`UnpopulatedCell`, `DuplicateCell`,
/// `FeatureCountMismatch`) indicate a defect in the elimination loop and are
/// never masked.
#[derive(Debug, Error)]
pub enum RfexError {
    #[error("fold cache already exists at {0:?}; refusing to overwrite")]
    CacheExists(PathBuf),

    #[error("fold cache not found at {0:?}; run with --mode loadData first")]
    CacheMissing(PathBuf),

    #[error("result cell never populated: model {model}, fold {fold}, round {round}")]
    UnpopulatedCell {
        model: String,
        fold: usize,
        round: usize,
    },

    #[error("result cell written twice: model {model}, fold {fold}, round {round}")]
    DuplicateCell {
        model: String,
        fold: usize,
        round: usize,
    },

    #[error("feature count mismatch in {context}: expected {expected}, found {found}")]
    FeatureCountMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("unknown feature {0:?}")]
    UnknownFeature(String),

    #[error("feature name {0:?} appears more than once")]
    DuplicateFeature(String),

    #[error("unknown model entry {0:?}")]
    UnknownModel(String),

    #[error("table has no {0}")]
    EmptyTable(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dataset acquisition failed: {0}")]
    Acquisition(String),

    #[error("model failure: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, RfexError>;
