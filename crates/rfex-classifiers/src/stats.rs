use ndarray::Array1;
use statrs::statistics::Statistics;

use crate::config::Task;

/// Fraction of predictions equal to the true class.
pub fn accuracy(predictions: &Array1<f64>, labels: &Array1<f64>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predictions
        .iter()
        .zip(labels.iter())
        .filter(|(p, l)| (p.round() - l.round()).abs() < 0.5)
        .count();
    correct as f64 / labels.len() as f64
}

/// Root mean squared error.
pub fn rmse(predictions: &Array1<f64>, labels: &Array1<f64>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let sse: f64 = predictions
        .iter()
        .zip(labels.iter())
        .map(|(p, l)| (p - l).powi(2))
        .sum();
    (sse / labels.len() as f64).sqrt()
}

/// Accuracy for classification tasks, RMSE for regression.
pub fn task_metric(task: Task, predictions: &Array1<f64>, labels: &Array1<f64>) -> f64 {
    if task.is_classification() {
        accuracy(predictions, labels)
    } else {
        rmse(predictions, labels)
    }
}

/// Mean and sample standard deviation; the deviation of fewer than two
/// values is 0.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, 0.0);
    }
    let mean = values.iter().mean();
    let std = if values.len() < 2 { 0.0 } else { values.iter().std_dev() };
    (mean, std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn accuracy_counts_matches() {
        let acc = accuracy(&array![0.0, 1.0, 2.0, 1.0], &array![0.0, 1.0, 1.0, 1.0]);
        assert!((acc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn rmse_of_constant_offset() {
        let e = rmse(&array![1.0, 2.0, 3.0], &array![2.0, 3.0, 4.0]);
        assert!((e - 1.0).abs() < 1e-12);
        assert_eq!(task_metric(Task::Regression, &array![1.0], &array![1.0]), 0.0);
    }

    #[test]
    fn mean_std_summaries() {
        let (m, s) = mean_std(&[0.5, 0.7, 0.9]);
        assert!((m - 0.7).abs() < 1e-12);
        assert!((s - 0.2).abs() < 1e-12);
        assert_eq!(mean_std(&[0.4]), (0.4, 0.0));
    }
}
