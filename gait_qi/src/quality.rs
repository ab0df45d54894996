// Left/right alternation quality index.
//
// QI = 100 * sum(|foot[k+1] - foot[k]|) / (n_outbound + n_return - 2), where the
// sums run over the time-sorted outbound and return steps separately.

use serde::{Deserialize, Serialize};

use crate::correct::Correction;
use crate::{PhaseBoundary, QiError, StepEvent};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum QualityBasis {
    /// Every detected step against the detector's boundary.
    Raw,
    /// Steps flagged valid against the corrected boundary.
    Corrected,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct QualityIndex {
    /// Rounded to 4 decimals; 100 is perfect alternation.
    pub value: f64,
    pub basis: QualityBasis,
    pub outbound_steps: usize,
    pub return_steps: usize,
    pub alternations: u32,
}

pub fn quality_index<'a, I>(
    steps: I,
    boundary: &PhaseBoundary,
    basis: QualityBasis,
) -> Result<QualityIndex, QiError>
where
    I: IntoIterator<Item = &'a StepEvent>,
{
    let mut sorted: Vec<&StepEvent> = steps.into_iter().collect();
    sorted.sort_by_key(|s| (s.heel_strike, s.toe_off));

    let outbound: Vec<u8> = sorted
        .iter()
        .filter(|s| s.heel_strike < boundary.uturn_start)
        .map(|s| s.foot.code())
        .collect();
    let returning: Vec<u8> = sorted
        .iter()
        .filter(|s| s.heel_strike > boundary.uturn_end)
        .map(|s| s.foot.code())
        .collect();

    let pairs = (outbound.len() + returning.len()).saturating_sub(2);
    if pairs == 0 {
        return Err(QiError::QualityUndefined {
            outbound: outbound.len(),
            returning: returning.len(),
        });
    }

    let alternations = count_alternations(&outbound) + count_alternations(&returning);
    let value = round4(100.0 * alternations as f64 / pairs as f64);
    Ok(QualityIndex {
        value,
        basis,
        outbound_steps: outbound.len(),
        return_steps: returning.len(),
        alternations,
    })
}

pub fn corrected_quality_index(correction: &Correction) -> Result<QualityIndex, QiError> {
    quality_index(
        correction.valid_steps(),
        &correction.boundary,
        QualityBasis::Corrected,
    )
}

fn count_alternations(feet: &[u8]) -> u32 {
    feet.windows(2).map(|w| u32::from(w[0].abs_diff(w[1]))).sum()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
