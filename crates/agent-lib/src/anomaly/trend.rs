//! Small numeric helpers shared by the detectors

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares slope of `values` against their index
///
/// Returns units per sample. Fewer than two points, or a degenerate fit,
/// yields 0.
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[45.0, 46.0, 44.0, 45.0, 47.0]) - 45.4).abs() < 1e-9);
    }

    #[test]
    fn test_slope_of_linear_series() {
        let values: Vec<f64> = (0..10).map(|i| 72.0 + 2.0 * i as f64).collect();
        assert_eq!(linear_regression_slope(&values), 2.0);
    }

    #[test]
    fn test_slope_flat_and_short() {
        assert_eq!(linear_regression_slope(&[50.0; 10]), 0.0);
        assert_eq!(linear_regression_slope(&[50.0]), 0.0);
        assert!(linear_regression_slope(&[90.0, 80.0, 70.0]) < 0.0);
    }
}
