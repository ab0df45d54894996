use serde::{Deserialize, Serialize};

use crate::{PhaseBoundary, Sample, StepEvent};

/// Where a single sample falls relative to a phase boundary.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Zone {
    BeforeStart,
    /// `[start, uturn_start]`
    Outbound,
    /// Strictly inside `(uturn_start, uturn_end)`.
    UTurn,
    /// `[uturn_end, end]`
    Return,
    AfterEnd,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Window {
    Outbound,
    Return,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepClass {
    /// Both events inside the same straight-walking window.
    Valid(Window),
    /// At least one event before the start, inside the U-turn or after the end.
    OutOfTrial,
    /// One event in each walking window.
    Ambiguous,
}

impl StepClass {
    pub fn is_valid(self) -> bool {
        matches!(self, StepClass::Valid(_))
    }
}

impl PhaseBoundary {
    pub fn zone(&self, sample: Sample) -> Zone {
        if sample < self.start {
            Zone::BeforeStart
        } else if sample > self.uturn_start && sample < self.uturn_end {
            Zone::UTurn
        } else if sample > self.end {
            Zone::AfterEnd
        } else if sample <= self.uturn_start {
            Zone::Outbound
        } else {
            Zone::Return
        }
    }
}

pub fn classify_step(step: &StepEvent, boundary: &PhaseBoundary) -> StepClass {
    use Zone::*;

    match (boundary.zone(step.heel_strike), boundary.zone(step.toe_off)) {
        (BeforeStart | UTurn | AfterEnd, _) | (_, BeforeStart | UTurn | AfterEnd) => {
            StepClass::OutOfTrial
        }
        (Outbound, Outbound) => StepClass::Valid(Window::Outbound),
        (Return, Return) => StepClass::Valid(Window::Return),
        (Outbound, Return) | (Return, Outbound) => StepClass::Ambiguous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Foot;

    fn boundary() -> PhaseBoundary {
        PhaseBoundary::new(100, 250, 350, 430).unwrap()
    }

    fn step(hs: Sample, to: Sample) -> StepEvent {
        StepEvent::new(Foot::Left, hs, to)
    }

    #[test]
    fn test_zone_edges_are_inclusive_for_walking_windows() {
        let b = boundary();
        assert_eq!(b.zone(99), Zone::BeforeStart);
        assert_eq!(b.zone(100), Zone::Outbound);
        assert_eq!(b.zone(250), Zone::Outbound);
        assert_eq!(b.zone(251), Zone::UTurn);
        assert_eq!(b.zone(349), Zone::UTurn);
        assert_eq!(b.zone(350), Zone::Return);
        assert_eq!(b.zone(430), Zone::Return);
        assert_eq!(b.zone(431), Zone::AfterEnd);
    }

    #[test]
    fn test_step_before_start_is_invalid() {
        let class = classify_step(&step(95, 96), &boundary());
        assert_eq!(class, StepClass::OutOfTrial);
        assert!(!class.is_valid());
    }

    #[test]
    fn test_step_inside_one_window_is_valid() {
        assert_eq!(
            classify_step(&step(120, 140), &boundary()),
            StepClass::Valid(Window::Outbound)
        );
        assert_eq!(
            classify_step(&step(360, 380), &boundary()),
            StepClass::Valid(Window::Return)
        );
        // Event order inside a step does not matter.
        assert_eq!(
            classify_step(&step(380, 360), &boundary()),
            StepClass::Valid(Window::Return)
        );
    }

    #[test]
    fn test_step_touching_uturn_or_end_is_out_of_trial() {
        assert_eq!(classify_step(&step(240, 300), &boundary()), StepClass::OutOfTrial);
        assert_eq!(classify_step(&step(300, 360), &boundary()), StepClass::OutOfTrial);
        assert_eq!(classify_step(&step(420, 440), &boundary()), StepClass::OutOfTrial);
    }

    #[test]
    fn test_step_spanning_both_windows_is_ambiguous() {
        let b = PhaseBoundary::new(100, 250, 250, 430).unwrap();
        assert_eq!(classify_step(&step(240, 260), &b), StepClass::Ambiguous);
        assert!(!StepClass::Ambiguous.is_valid());
        let wide = boundary();
        assert_eq!(classify_step(&step(200, 400), &wide), StepClass::Ambiguous);
    }

    #[test]
    fn test_classification_partition() {
        let b = boundary();
        for hs in (80..460).step_by(7) {
            for to in (80..460).step_by(11) {
                let class = classify_step(&step(hs, to), &b);
                let (zh, zt) = (b.zone(hs), b.zone(to));
                let outside = |z: Zone| matches!(z, Zone::BeforeStart | Zone::UTurn | Zone::AfterEnd);
                let expected_valid = !outside(zh) && !outside(zt) && zh == zt;
                assert_eq!(class.is_valid(), expected_valid, "hs={hs} to={to}");
                if class == StepClass::Ambiguous {
                    assert!(!outside(zh) && !outside(zt) && zh != zt);
                }
            }
        }
    }
}
