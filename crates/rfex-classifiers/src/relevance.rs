//! Reduce per-sample relevance to one score per feature, rescaled per round.

use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, RfexError};

/// Mean relevance per feature across the rows of `matrix`.
pub fn mean_relevance(matrix: &Array2<f64>) -> Result<Array1<f64>> {
    if let Some(bad) = matrix.iter().find(|v| !v.is_finite()) {
        return Err(RfexError::Model(format!(
            "explainer produced a non-finite relevance value ({})",
            bad
        )));
    }
    matrix
        .mean_axis(Axis(0))
        .ok_or(RfexError::EmptyTable("explained rows"))
}

/// Min-max rescaling into `[0, 1]` fitted on `scores` alone.
///
/// A constant vector maps to all zeros.
pub fn min_max_normalize(scores: &Array1<f64>) -> Array1<f64> {
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return Array1::zeros(scores.len());
    }
    scores.mapv(|v| ((v - min) / range).clamp(0.0, 1.0))
}

/// Normalized relevance vector for one elimination round.
///
/// `matrix` is samples × features and must have exactly `n_active` columns.
pub fn normalize_round(matrix: &Array2<f64>, n_active: usize) -> Result<Array1<f64>> {
    if matrix.ncols() != n_active {
        return Err(RfexError::FeatureCountMismatch {
            expected: n_active,
            found: matrix.ncols(),
            context: "relevance matrix".into(),
        });
    }
    let mean = mean_relevance(matrix)?;
    Ok(min_max_normalize(&mean))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn averages_then_scales_to_unit_range() {
        let m = array![[1.0, 4.0, 2.0], [3.0, 8.0, 2.0]];
        let r = normalize_round(&m, 3).unwrap();
        // means are [2, 6, 2]
        assert_eq!(r, array![0.0, 1.0, 0.0]);
    }

    #[test]
    fn output_stays_within_bounds() {
        let m = array![[-5.0, 0.3, 12.0, 7.5], [1.0, -0.3, 4.0, 2.5]];
        let r = normalize_round(&m, 4).unwrap();
        assert!(r.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(r.iter().any(|&v| v == 0.0));
        assert!(r.iter().any(|&v| v == 1.0));
    }

    #[test]
    fn scaling_is_refit_each_round() {
        // the raw value 0.5 lands on different normalized values
        let first = normalize_round(&array![[0.0, 0.5, 1.0]], 3).unwrap();
        let second = normalize_round(&array![[0.5, 0.25, 2.25]], 3).unwrap();
        assert!((first[1] - 0.5).abs() < 1e-12);
        assert!((second[0] - 0.125).abs() < 1e-12);
    }

    #[test]
    fn constant_relevance_maps_to_zero() {
        let r = min_max_normalize(&array![0.3, 0.3, 0.3]);
        assert_eq!(r, array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let err = normalize_round(&array![[1.0, 2.0]], 3).unwrap_err();
        assert!(matches!(err, RfexError::FeatureCountMismatch { expected: 3, found: 2, .. }));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(normalize_round(&array![[1.0, f64::NAN]], 2).is_err());
        assert!(normalize_round(&Array2::<f64>::zeros((0, 2)), 2).is_err());
    }
}
