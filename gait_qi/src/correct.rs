use serde::{Deserialize, Serialize};

use crate::bounds::{combine_bounds, resolve_feet, FootBounds};
use crate::phase::classify_step;
use crate::{Params, PhaseBoundary, QiError, StepEvent};

/// A detected step with its validity flag. The step itself is never altered.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrectedStep {
    #[serde(flatten)]
    pub step: StepEvent,
    #[serde(rename = "Correct")]
    pub valid: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Correction {
    /// Same length and order as the input stream.
    pub steps: Vec<CorrectedStep>,
    pub boundary: PhaseBoundary,
    pub feet: Vec<FootBounds>,
    /// Clamps applied while combining the feet.
    pub adjustments: Vec<String>,
}

impl Correction {
    pub fn valid_steps(&self) -> impl Iterator<Item = &StepEvent> + '_ {
        self.steps.iter().filter(|s| s.valid).map(|s| &s.step)
    }
}

/// Re-estimate the trial start/end and flag every step against the corrected
/// boundary. The U-turn window is taken from `raw` unchanged.
pub fn correct_steps(
    steps: &[StepEvent],
    raw: &PhaseBoundary,
    params: &Params,
) -> Result<Correction, QiError> {
    params.validate()?;
    let feet = resolve_feet(steps, raw, params);
    correct_with_feet(steps, raw, feet)
}

/// Second half of [`correct_steps`], for callers that already ran
/// [`resolve_feet`].
pub fn correct_with_feet(
    steps: &[StepEvent],
    raw: &PhaseBoundary,
    feet: Vec<FootBounds>,
) -> Result<Correction, QiError> {
    let resolved = combine_bounds(&feet, raw)?;
    Ok(Correction {
        steps: classify_steps(steps, &resolved.boundary),
        boundary: resolved.boundary,
        feet,
        adjustments: resolved.adjustments,
    })
}

pub fn classify_steps<'a, I>(steps: I, boundary: &PhaseBoundary) -> Vec<CorrectedStep>
where
    I: IntoIterator<Item = &'a StepEvent>,
{
    steps
        .into_iter()
        .map(|step| CorrectedStep {
            step: *step,
            valid: classify_step(step, boundary).is_valid(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Foot;

    fn trial() -> (Vec<StepEvent>, PhaseBoundary) {
        let mut steps = Vec::new();
        // Shuffling before the walk starts.
        steps.push(StepEvent::new(Foot::Left, 100, 130));
        steps.push(StepEvent::new(Foot::Right, 150, 180));
        let outbound_left = [1000, 1220, 1440, 1660];
        let outbound_right = [1110, 1330, 1550];
        let return_left = [2300, 2520, 2740, 2960];
        let return_right = [2410, 2630, 2850];
        for hs in outbound_left.iter().chain(return_left.iter()) {
            steps.push(StepEvent::new(Foot::Left, *hs, hs + 30));
        }
        for hs in outbound_right.iter().chain(return_right.iter()) {
            steps.push(StepEvent::new(Foot::Right, *hs, hs + 30));
        }
        // Turning step detected inside the U-turn window.
        steps.push(StepEvent::new(Foot::Right, 1900, 1930));
        let raw = PhaseBoundary::new(50, 1800, 2200, 3300).unwrap();
        (steps, raw)
    }

    #[test]
    fn test_correct_steps_flags_without_removing() {
        let (steps, raw) = trial();
        let correction = correct_steps(&steps, &raw, &Params::default()).unwrap();
        assert_eq!(correction.steps.len(), steps.len());
        for (corrected, original) in correction.steps.iter().zip(steps.iter()) {
            assert_eq!(&corrected.step, original);
        }
        // Pre-trial shuffle and U-turn step are rejected.
        assert!(!correction.steps[0].valid);
        assert!(!correction.steps[1].valid);
        assert!(!correction.steps.last().unwrap().valid);
        // The trial opens on the first regular toe-off and closes on the last
        // regular heel-strike, so the opening and closing steps straddle it.
        assert!(!correction.steps[2].valid);
        let closing = correction
            .steps
            .iter()
            .find(|s| s.step.heel_strike == 2960)
            .unwrap();
        assert!(!closing.valid);
        assert_eq!(correction.valid_steps().count(), steps.len() - 5);
    }

    #[test]
    fn test_correct_steps_keeps_uturn_and_orders_boundary() {
        let (steps, raw) = trial();
        let correction = correct_steps(&steps, &raw, &Params::default()).unwrap();
        let b = correction.boundary;
        assert_eq!(b.uturn_start, raw.uturn_start);
        assert_eq!(b.uturn_end, raw.uturn_end);
        assert!(b.start <= b.uturn_start && b.uturn_start <= b.uturn_end && b.uturn_end <= b.end);
        assert_eq!(b.start, 1030);
        assert_eq!(b.end, 2960);
    }

    #[test]
    fn test_reclassification_is_idempotent() {
        let (steps, raw) = trial();
        let correction = correct_steps(&steps, &raw, &Params::default()).unwrap();
        let again = classify_steps(correction.steps.iter().map(|s| &s.step), &correction.boundary);
        assert_eq!(again, correction.steps);
    }

    #[test]
    fn test_correct_steps_rejects_bad_params() {
        let (steps, raw) = trial();
        let params = Params {
            outlier_threshold: 0.0,
        };
        assert!(matches!(
            correct_steps(&steps, &raw, &params),
            Err(QiError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_corrected_step_json_shape() {
        let corrected = CorrectedStep {
            step: StepEvent::new(Foot::Left, 5, 9),
            valid: true,
        };
        let json = serde_json::to_string(&corrected).unwrap();
        assert_eq!(json, r#"{"Foot":0,"HS":5,"TO":9,"Correct":true}"#);
    }
}
