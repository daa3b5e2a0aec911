//! Spreadsheet and HTML outputs of a finished experiment.

pub mod excel;
pub mod plots;

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Task;
use crate::error::Result;
use crate::results::ResultAccumulator;

/// Writes the accuracy and explanation workbooks plus the accuracy curve
/// into `<result_root>/<task>/`. Nothing is written unless every cell of
/// every entry is populated.
pub fn export(
    results: &ResultAccumulator,
    result_root: &Path,
    task: Task,
    dataset_name: &str,
    started: &DateTime<Local>,
) -> Result<Vec<PathBuf>> {
    results.check_complete()?;
    let dir = result_root.join(task.as_str());
    fs::create_dir_all(&dir)?;

    let accuracy = dir.join(format!("{}_accuracy.xlsx", dataset_name));
    let explanation = dir.join(format!("{}_explanation.xlsx", dataset_name));
    let curve = dir.join(format!("{}_accuracy.html", dataset_name));

    excel::write_accuracy_workbook(results, &accuracy, started)?;
    excel::write_relevance_workbook(results, &explanation, started)?;

    let metric = if task.is_classification() { "Accuracy" } else { "RMSE" };
    let plot = plots::plot_accuracy_curves(results, &format!("{} ({})", dataset_name, task), metric)?;
    fs::write(&curve, plot.to_html())?;
    log::info!("[report] wrote {:?}", curve);

    Ok(vec![accuracy, explanation, curve])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RfexError;

    fn single_round() -> ResultAccumulator {
        let mut results = ResultAccumulator::new(vec!["f0".to_string()], 1);
        results.register("KNN");
        results
            .record("KNN", 0, 0, 0.9, &[("f0".to_string(), 1.0)], "f0")
            .unwrap();
        results
    }

    #[test]
    fn writes_all_three_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let written = export(&single_round(), dir.path(), Task::Binary, "toy", &Local::now()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.is_file()));
        let html = fs::read_to_string(&written[2]).unwrap();
        assert!(html.contains("KNN"));
    }

    #[test]
    fn unwritable_curve_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join(Task::Binary.as_str()).join("toy_accuracy.html");
        fs::create_dir_all(&blocked).unwrap();
        let result = export(&single_round(), dir.path(), Task::Binary, "toy", &Local::now());
        assert!(matches!(result, Err(RfexError::Io(_))));
    }
}
