//! In-memory tabular dataset with separate categorical and continuous blocks.
//!
//! Features are indexed categorical-first: index `i < n_cat` addresses the
//! categorical column `i`, any other index addresses continuous column
//! `i - n_cat`. Relevance vectors and joined matrices use the same order.

use std::collections::HashSet;

use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::Task;
use crate::error::{Result, RfexError};

/// A categorical column: source column index, name and number of levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatDescriptor {
    pub index: usize,
    pub name: String,
    pub cardinality: usize,
}

/// A continuous column: source column index and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContDescriptor {
    pub index: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    name: String,
    task: Task,
    num_classes: usize,
    cat: Array2<i64>,
    cont: Array2<f64>,
    labels: Array1<f64>,
    cat_features: Vec<CatDescriptor>,
    cont_features: Vec<ContDescriptor>,
}

impl FeatureTable {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        task: Task,
        num_classes: usize,
        cat: Array2<i64>,
        cont: Array2<f64>,
        labels: Array1<f64>,
        cat_features: Vec<CatDescriptor>,
        cont_features: Vec<ContDescriptor>,
    ) -> Result<Self> {
        let table = FeatureTable {
            name: name.into(),
            task,
            num_classes,
            cat,
            cont,
            labels,
            cat_features,
            cont_features,
        };
        table.check_shape()?;
        Ok(table)
    }

    fn check_shape(&self) -> Result<()> {
        if self.cat.ncols() != self.cat_features.len() {
            return Err(RfexError::FeatureCountMismatch {
                expected: self.cat_features.len(),
                found: self.cat.ncols(),
                context: "categorical block".into(),
            });
        }
        if self.cont.ncols() != self.cont_features.len() {
            return Err(RfexError::FeatureCountMismatch {
                expected: self.cont_features.len(),
                found: self.cont.ncols(),
                context: "continuous block".into(),
            });
        }
        for (block, rows) in [("categorical rows", self.cat.nrows()), ("continuous rows", self.cont.nrows())] {
            if rows != self.labels.len() {
                return Err(RfexError::FeatureCountMismatch {
                    expected: self.labels.len(),
                    found: rows,
                    context: block.into(),
                });
            }
        }
        let mut seen = HashSet::with_capacity(self.n_features());
        for name in self.cat_features.iter().map(|d| &d.name).chain(self.cont_features.iter().map(|d| &d.name)) {
            if !seen.insert(name.as_str()) {
                return Err(RfexError::DuplicateFeature(name.clone()));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// Number of classes; 1 for regression.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn cat(&self) -> &Array2<i64> {
        &self.cat
    }

    pub fn cont(&self) -> &Array2<f64> {
        &self.cont
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    pub fn cat_features(&self) -> &[CatDescriptor] {
        &self.cat_features
    }

    pub fn cont_features(&self) -> &[ContDescriptor] {
        &self.cont_features
    }

    pub fn cardinalities(&self) -> Vec<usize> {
        self.cat_features.iter().map(|d| d.cardinality).collect()
    }

    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn n_cat(&self) -> usize {
        self.cat_features.len()
    }

    pub fn n_cont(&self) -> usize {
        self.cont_features.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_cat() + self.n_cont()
    }

    /// Feature names in index order (categorical first).
    pub fn feature_names(&self) -> Vec<String> {
        self.cat_features
            .iter()
            .map(|d| d.name.clone())
            .chain(self.cont_features.iter().map(|d| d.name.clone()))
            .collect()
    }

    pub fn feature_name(&self, idx: usize) -> Option<&str> {
        if idx < self.n_cat() {
            Some(self.cat_features[idx].name.as_str())
        } else {
            self.cont_features.get(idx - self.n_cat()).map(|d| d.name.as_str())
        }
    }

    /// True when both tables carry the same descriptor lists.
    pub fn same_features(&self, other: &FeatureTable) -> bool {
        self.cat_features == other.cat_features && self.cont_features == other.cont_features
    }

    /// Returns a new table lacking feature `idx`; `self` is left untouched.
    pub fn without_feature(&self, idx: usize) -> Result<FeatureTable> {
        let n_features = self.n_features();
        if idx >= n_features {
            return Err(RfexError::FeatureCountMismatch {
                expected: n_features,
                found: idx + 1,
                context: "feature removal index".into(),
            });
        }

        let mut cat_features = self.cat_features.clone();
        let mut cont_features = self.cont_features.clone();
        let (cat, cont) = if idx < self.n_cat() {
            cat_features.remove(idx);
            let keep: Vec<usize> = (0..self.n_cat()).filter(|&c| c != idx).collect();
            (self.cat.select(Axis(1), &keep), self.cont.clone())
        } else {
            let cont_idx = idx - self.n_cat();
            cont_features.remove(cont_idx);
            let keep: Vec<usize> = (0..self.n_cont()).filter(|&c| c != cont_idx).collect();
            (self.cat.clone(), self.cont.select(Axis(1), &keep))
        };

        log::trace!(
            "[FeatureTable] removed feature {} ({:?}); {} remain",
            idx,
            self.feature_name(idx),
            n_features - 1
        );

        FeatureTable::new(
            self.name.clone(),
            self.task,
            self.num_classes,
            cat,
            cont,
            self.labels.clone(),
            cat_features,
            cont_features,
        )
    }

    /// Returns a new table with only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> FeatureTable {
        FeatureTable {
            name: self.name.clone(),
            task: self.task,
            num_classes: self.num_classes,
            cat: self.cat.select(Axis(0), rows),
            cont: self.cont.select(Axis(0), rows),
            labels: self.labels.select(Axis(0), rows),
            cat_features: self.cat_features.clone(),
            cont_features: self.cont_features.clone(),
        }
    }

    /// Categorical codes (as f64) followed by continuous values.
    pub fn joined(&self) -> Array2<f64> {
        let n_cat = self.n_cat();
        let mut out = Array2::<f64>::zeros((self.n_rows(), self.n_features()));
        out.slice_mut(s![.., ..n_cat]).assign(&self.cat.mapv(|v| v as f64));
        out.slice_mut(s![.., n_cat..]).assign(&self.cont);
        out
    }

    /// Class index per row for classification tables.
    pub fn class_labels(&self) -> Vec<u32> {
        self.labels.iter().map(|&v| v.max(0.0) as u32).collect()
    }
}

/// Splits a joined matrix back into categorical codes and continuous values.
///
/// Categorical entries are rounded and clamped into `[0, cardinality)`, so
/// matrices built by mixing rows of different tables stay valid.
pub fn split_joined(x: &Array2<f64>, cardinalities: &[usize]) -> (Array2<u32>, Array2<f64>) {
    let n_cat = cardinalities.len();
    let mut cat = Array2::<u32>::zeros((x.nrows(), n_cat));
    for (mut out_row, in_row) in cat.rows_mut().into_iter().zip(x.rows()) {
        for (j, &card) in cardinalities.iter().enumerate() {
            let max_code = card.saturating_sub(1) as f64;
            out_row[j] = in_row[j].round().clamp(0.0, max_code) as u32;
        }
    }
    let cont = x.slice(s![.., n_cat..]).to_owned();
    (cat, cont)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn toy() -> FeatureTable {
        FeatureTable::new(
            "toy",
            Task::Binary,
            2,
            array![[0, 1], [1, 0], [2, 1]],
            array![[0.5, 1.5, 2.5], [1.0, 2.0, 3.0], [-1.0, 0.0, 1.0]],
            array![0.0, 1.0, 1.0],
            vec![
                CatDescriptor { index: 0, name: "color".into(), cardinality: 3 },
                CatDescriptor { index: 2, name: "shape".into(), cardinality: 2 },
            ],
            vec![
                ContDescriptor { index: 1, name: "width".into() },
                ContDescriptor { index: 3, name: "height".into() },
                ContDescriptor { index: 4, name: "depth".into() },
            ],
        )
        .unwrap()
    }

    #[test]
    fn feature_names_are_categorical_first() {
        let t = toy();
        assert_eq!(t.feature_names(), vec!["color", "shape", "width", "height", "depth"]);
        assert_eq!(t.n_features(), 5);
        assert_eq!(t.feature_name(3), Some("height"));
        assert_eq!(t.feature_name(5), None);
    }

    #[test]
    fn removing_categorical_feature_keeps_original() {
        let t = toy();
        let reduced = t.without_feature(0).unwrap();
        assert_eq!(reduced.feature_names(), vec!["shape", "width", "height", "depth"]);
        assert_eq!(reduced.cat(), &array![[1], [0], [1]]);
        assert_eq!(reduced.cont(), t.cont());
        assert_eq!(t.n_features(), 5);
        assert_eq!(t.cat().ncols(), 2);
    }

    #[test]
    fn removing_continuous_feature_preserves_order() {
        let t = toy();
        let reduced = t.without_feature(3).unwrap();
        assert_eq!(reduced.feature_names(), vec!["color", "shape", "width", "depth"]);
        assert_eq!(reduced.cont(), &array![[0.5, 2.5], [1.0, 3.0], [-1.0, 1.0]]);
        assert_eq!(reduced.cont_features()[1].index, 4);
        assert_eq!(reduced.n_cat() + reduced.n_cont(), reduced.n_features());
    }

    #[test]
    fn repeated_feature_names_are_rejected() {
        let result = FeatureTable::new(
            "dup",
            Task::Binary,
            2,
            array![[0], [1]],
            array![[0.5, 1.5], [1.0, 2.0]],
            array![0.0, 1.0],
            vec![CatDescriptor { index: 0, name: "f".into(), cardinality: 2 }],
            vec![
                ContDescriptor { index: 1, name: "g".into() },
                ContDescriptor { index: 2, name: "f".into() },
            ],
        );
        assert!(matches!(result, Err(RfexError::DuplicateFeature(name)) if name == "f"));
    }

    #[test]
    fn out_of_range_removal_fails() {
        assert!(matches!(
            toy().without_feature(5),
            Err(RfexError::FeatureCountMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_descriptors_are_rejected() {
        let err = FeatureTable::new(
            "bad",
            Task::Regression,
            1,
            Array2::zeros((2, 1)),
            Array2::zeros((2, 0)),
            array![1.0, 2.0],
            vec![],
            vec![],
        );
        assert!(err.is_err());
    }

    #[test]
    fn joined_and_split_agree() {
        let t = toy();
        let joined = t.joined();
        assert_eq!(joined.shape(), &[3, 5]);
        assert_eq!(joined[[2, 0]], 2.0);
        assert_eq!(joined[[2, 4]], 1.0);

        let mut mixed = joined.clone();
        mixed[[0, 0]] = 7.4;
        mixed[[1, 1]] = -3.0;
        let (cat, cont) = split_joined(&mixed, &t.cardinalities());
        assert_eq!(cat[[0, 0]], 2);
        assert_eq!(cat[[1, 1]], 0);
        assert_eq!(cont, *t.cont());
    }

    #[test]
    fn select_rows_reorders_labels() {
        let t = toy().select_rows(&[2, 0]);
        assert_eq!(t.labels(), &array![1.0, 0.0]);
        assert_eq!(t.cat().row(0).to_vec(), vec![2, 1]);
    }
}
