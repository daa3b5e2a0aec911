use linfa::dataset::Pr;
use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_svm::{Svm, SvmParams};
use ndarray::{Array1, Array2};

use crate::config::Task;
use crate::error::{Result, RfexError};
use crate::models::adapter::ModelAdapter;
use crate::table::FeatureTable;

enum FittedSvm {
    /// One Platt-scaled model per class; `None` for classes absent from the
    /// training fold. Binary tasks keep a single model for class 1.
    Classifier {
        per_class: Vec<Option<Svm<f64, Pr>>>,
        n_classes: usize,
    },
    Regressor(Svm<f64, f64>),
}

/// Linear-kernel support vector machine (one-vs-rest for multiclass).
pub struct SvmAdapter {
    name: String,
    c: f64,
    eps: f64,
    fitted: Option<FittedSvm>,
}

impl SvmAdapter {
    pub fn new(name: impl Into<String>, c: f64, eps: f64) -> Self {
        SvmAdapter {
            name: name.into(),
            c,
            eps,
            fitted: None,
        }
    }

    fn fit_one_vs_rest(&self, x: &Array2<f64>, labels: &Array1<f64>, class: usize) -> Result<Option<Svm<f64, Pr>>> {
        let y: Array1<bool> = labels.mapv(|l| l.round() as usize == class);
        let positives = y.iter().filter(|&&v| v).count();
        if positives == 0 || positives == y.len() {
            log::warn!(
                "[SvmAdapter] class {} is {} in the training fold; its score is fixed",
                class,
                if positives == 0 { "absent" } else { "the only class" }
            );
            return Ok(None);
        }
        let dataset = Dataset::new(x.to_owned(), y);
        let params: SvmParams<f64, Pr> = Svm::<f64, Pr>::params()
            .eps(self.eps)
            .pos_neg_weights(self.c, self.c)
            .linear_kernel();
        let model = params
            .fit(&dataset)
            .map_err(|e| RfexError::Model(format!("SVM fit for class {} failed: {}", class, e)))?;
        Ok(Some(model))
    }
}

impl ModelAdapter for SvmAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&mut self, train: &FeatureTable) -> Result<()> {
        let x = train.joined();
        let labels = train.labels();
        let fitted = match train.task() {
            Task::Regression => {
                let dataset = Dataset::new(x, labels.clone());
                let params: SvmParams<f64, f64> = Svm::<f64, f64>::params()
                    .eps(self.eps)
                    .c_svr(self.c, None)
                    .linear_kernel();
                let model = params
                    .fit(&dataset)
                    .map_err(|e| RfexError::Model(format!("SVR fit failed: {}", e)))?;
                FittedSvm::Regressor(model)
            }
            Task::Binary => FittedSvm::Classifier {
                per_class: vec![self.fit_one_vs_rest(&x, labels, 1)?],
                n_classes: 2,
            },
            Task::Multiclass => {
                let n_classes = train.num_classes();
                let per_class = (0..n_classes)
                    .map(|c| self.fit_one_vs_rest(&x, labels, c))
                    .collect::<Result<Vec<_>>>()?;
                FittedSvm::Classifier { per_class, n_classes }
            }
        };
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| RfexError::Model(format!("{} used before training", self.name)))?;

        match fitted {
            FittedSvm::Regressor(model) => {
                let predictions: Array1<f64> = model.predict(x);
                Ok(predictions.insert_axis(ndarray::Axis(1)))
            }
            FittedSvm::Classifier { per_class, n_classes } if *n_classes == 2 && per_class.len() == 1 => {
                let p1: Array1<f64> = match &per_class[0] {
                    Some(model) => {
                        let probs: Array1<Pr> = model.predict(x);
                        probs.mapv(|p| *p as f64)
                    }
                    None => Array1::from_elem(x.nrows(), 0.5),
                };
                let mut out = Array2::zeros((x.nrows(), 2));
                out.column_mut(0).assign(&p1.mapv(|p| 1.0 - p));
                out.column_mut(1).assign(&p1);
                Ok(out)
            }
            FittedSvm::Classifier { per_class, n_classes } => {
                let mut out = Array2::zeros((x.nrows(), *n_classes));
                for (c, model) in per_class.iter().enumerate() {
                    if let Some(model) = model {
                        let probs: Array1<Pr> = model.predict(x);
                        out.column_mut(c).assign(&probs.mapv(|p| *p as f64));
                    }
                }
                for mut row in out.rows_mut() {
                    let total: f64 = row.sum();
                    if total > 0.0 {
                        row /= total;
                    } else {
                        row.fill(1.0 / *n_classes as f64);
                    }
                }
                Ok(out)
            }
        }
    }

    fn release(&mut self) {
        self.fitted = None;
    }
}
