// Robust stride statistics: z-score outlier rejection and median stride duration.

use ndarray::ArrayView1;
use ordered_float::OrderedFloat;

use crate::{QiError, Sample};

pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 2.0;

/// Keep the values whose absolute z-score (population standard deviation) is
/// strictly below `threshold`, in their original order.
///
/// A sample with zero variance has no outliers and is returned unchanged.
pub fn remove_outliers(values: &[f64], threshold: f64) -> Result<Vec<f64>, QiError> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(QiError::InvalidParameter(format!(
            "outlier threshold must be a positive number, got {threshold}"
        )));
    }
    if values.len() < 2 {
        return Err(QiError::InsufficientData(format!(
            "z-score needs at least 2 durations, got {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(QiError::InvalidParameter(
            "durations must be finite".to_string(),
        ));
    }

    let sample = ArrayView1::from(values);
    let mean = sample.mean().unwrap_or(0.0);
    let std = sample.std(0.0);
    if std <= f64::EPSILON * mean.abs().max(1.0) {
        return Ok(values.to_vec());
    }

    Ok(sample
        .iter()
        .copied()
        .filter(|v| ((v - mean) / std).abs() < threshold)
        .collect())
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1].0 + sorted[mid].0) / 2.0)
    } else {
        Some(sorted[mid].0)
    }
}

/// Typical stride duration, in samples, for one foot's event timestamps (taken
/// in detection order).
///
/// Consecutive differences go through [`remove_outliers`] first, so strides
/// straddling the trial start, the U-turn or the trial end do not bias the
/// median.
pub fn stride_duration(timestamps: &[Sample], threshold: f64) -> Result<f64, QiError> {
    if timestamps.len() < 2 {
        return Err(QiError::InsufficientData(format!(
            "stride timing needs at least 2 events, got {}",
            timestamps.len()
        )));
    }
    let strides: Vec<f64> = timestamps
        .windows(2)
        .map(|w| w[1] as f64 - w[0] as f64)
        .collect();
    let kept = remove_outliers(&strides, threshold)?;
    median(&kept).ok_or_else(|| {
        QiError::InsufficientData("every stride was rejected as an outlier".to_string())
    })
}
