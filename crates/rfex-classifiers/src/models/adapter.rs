use ndarray::{Array1, Array2};

use crate::config::{ExplainConfig, Task};
use crate::error::Result;
use crate::explain::{argmax, ShapleyExplainer};
use crate::stats::task_metric;
use crate::table::FeatureTable;

/// Uniform contract over every model family the elimination loop drives.
///
/// Implementations only provide training and batched scoring; prediction,
/// evaluation and explanation are derived from `predict_scores`.
pub trait ModelAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fit on the training table, replacing any previous fit.
    fn train(&mut self, train: &FeatureTable) -> Result<()>;

    /// Scores for a joined matrix (categorical codes first).
    ///
    /// Classification returns one probability column per class, regression a
    /// single prediction column.
    fn predict_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Drop the fitted state and any accelerator buffers it holds.
    fn release(&mut self) {}

    fn predict(&self, table: &FeatureTable) -> Result<Array1<f64>> {
        let scores = self.predict_scores(&table.joined())?;
        Ok(decode_scores(&scores, table.task()))
    }

    /// Accuracy for classification, RMSE for regression.
    fn evaluate(&self, test: &FeatureTable) -> Result<f64> {
        let predictions = self.predict(test)?;
        Ok(task_metric(test.task(), &predictions, test.labels()))
    }

    /// Samples × features relevance of `table` rows, using rows of
    /// `background` as the reference distribution.
    fn explain(
        &self,
        background: &FeatureTable,
        table: &FeatureTable,
        config: &ExplainConfig,
    ) -> Result<Array2<f64>> {
        let explainer = ShapleyExplainer::from_config(config);
        let bg = explainer.sample_background(&background.joined());
        let rows = explainer.explained_rows(&table.joined());
        explainer.explain(|x| self.predict_scores(x), &bg, &rows, table.task())
    }
}

/// Class index (first maximum) per row, or the raw value for regression.
pub fn decode_scores(scores: &Array2<f64>, task: Task) -> Array1<f64> {
    if task.is_classification() {
        scores.rows().into_iter().map(|r| argmax(r) as f64).collect()
    } else {
        scores.column(0).to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn decode_picks_first_max_for_classes() {
        let scores = array![[0.1, 0.9], [0.5, 0.5], [0.7, 0.3]];
        assert_eq!(decode_scores(&scores, Task::Binary), array![1.0, 0.0, 0.0]);
        assert_eq!(decode_scores(&array![[2.5], [-1.0]], Task::Regression), array![2.5, -1.0]);
    }
}
