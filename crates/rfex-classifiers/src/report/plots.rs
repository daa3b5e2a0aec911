use plotly::common::{ErrorData, ErrorType, Mode};
use plotly::layout::{Axis, Layout};
use plotly::{Plot, Scatter};

use crate::error::Result;
use crate::results::ResultAccumulator;

/// Mean fold metric against the number of remaining features, one line per
/// model entry, with the fold standard deviation as error bars.
pub fn plot_accuracy_curves(results: &ResultAccumulator, title: &str, metric: &str) -> Result<Plot> {
    let mut plot = Plot::new();
    for model in results.model_names() {
        let summary = results.summary(model)?;
        let x: Vec<usize> = summary.iter().map(|s| s.n_features).collect();
        let y: Vec<f64> = summary.iter().map(|s| s.mean).collect();
        let err: Vec<f64> = summary.iter().map(|s| s.std).collect();

        let trace = Scatter::new(x, y)
            .mode(Mode::LinesMarkers)
            .name(model)
            .error_y(ErrorData::new(ErrorType::Data).array(err));
        plot.add_trace(trace);
    }

    let layout = Layout::new()
        .title(title)
        .x_axis(Axis::new().title("Number of features").auto_range(true))
        .y_axis(Axis::new().title(metric));
    plot.set_layout(layout);
    Ok(plot)
}
