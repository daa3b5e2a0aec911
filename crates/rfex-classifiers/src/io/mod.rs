pub mod dataset;
pub mod fold_cache;

pub use dataset::{build_folds, source_for, CsvSource, DatasetSource, OpenMlSource, RawDataset};
pub use fold_cache::{FoldCache, Folds};
