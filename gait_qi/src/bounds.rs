// Trial start/end re-estimation from per-foot stride regularity.
//
// For each foot the start is the first toe-off whose stride two events later
// looks regular, and the end is the last heel-strike before stride timing
// breaks down after the U-turn. Feet are combined as a union of windows.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::stride_duration;
use crate::{Foot, Params, PhaseBoundary, QiError, Sample, StepEvent};

/// Two strides are regular when the gap between events `i` and `i ± 2` stays
/// under this many median strides.
pub const REGULARITY_FACTOR: f64 = 3.0;

/// The end search starts near `uturn_end + ratio * (uturn_end - start)`.
pub const END_ANCHOR_RATIO: f64 = 0.5;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Start => f.write_str("start"),
            Edge::End => f.write_str("end"),
        }
    }
}

/// Outcome of the boundary search for one foot.
#[derive(Clone, Debug, PartialEq)]
pub struct FootBounds {
    pub foot: Foot,
    pub stride: Result<f64, QiError>,
    pub start: Result<Sample, QiError>,
    pub end: Result<Sample, QiError>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBounds {
    pub boundary: PhaseBoundary,
    /// Notes about clamps applied to keep the boundary ordered.
    pub adjustments: Vec<String>,
}

/// Run the start and end searches for each foot, left first.
///
/// The end anchor of a foot uses the earliest start resolved so far, so the
/// right foot sees the left foot's start as well as its own.
pub fn resolve_feet(steps: &[StepEvent], raw: &PhaseBoundary, params: &Params) -> Vec<FootBounds> {
    let mut earliest_start: Option<Sample> = None;
    let mut feet = Vec::with_capacity(Foot::ALL.len());
    for foot in Foot::ALL {
        let bounds = resolve_foot(foot, steps, raw, earliest_start, params);
        if let Ok(start) = bounds.start {
            earliest_start = Some(earliest_start.map_or(start, |s| s.min(start)));
        }
        feet.push(bounds);
    }
    feet
}

fn resolve_foot(
    foot: Foot,
    steps: &[StepEvent],
    raw: &PhaseBoundary,
    earliest_start: Option<Sample>,
    params: &Params,
) -> FootBounds {
    let (heel_strikes, toe_offs): (Vec<Sample>, Vec<Sample>) = steps
        .iter()
        .filter(|s| s.foot == foot)
        .map(|s| (s.heel_strike, s.toe_off))
        .unzip();

    let stride = stride_duration(&heel_strikes, params.outlier_threshold)
        .map_err(|err| match err {
            QiError::InsufficientData(reason) => {
                QiError::InsufficientData(format!("{foot} foot: {reason}"))
            }
            other => other,
        })
        .and_then(|stride| {
            if stride > 0.0 {
                Ok(stride)
            } else {
                Err(QiError::InsufficientData(format!(
                    "{foot} foot: non-positive median stride ({stride})"
                )))
            }
        });

    let start = stride.clone().and_then(|stride| {
        search_start(&toe_offs, stride).ok_or(QiError::BoundarySearchExhausted {
            foot,
            edge: Edge::Start,
        })
    });

    let anchor_start = match (start.as_ref().ok(), earliest_start) {
        (Some(&own), Some(prev)) => own.min(prev),
        (Some(&own), None) => own,
        (None, Some(prev)) => prev,
        (None, None) => raw.start,
    };
    let anchor = end_anchor(raw.uturn_end, anchor_start);

    let end = stride.clone().and_then(|stride| {
        search_end(&heel_strikes, stride, anchor).map_err(|err| match err {
            QiError::InsufficientData(reason) => {
                QiError::InsufficientData(format!("{foot} foot: {reason}"))
            }
            other => other,
        })
    });

    FootBounds {
        foot,
        stride,
        start,
        end,
    }
}

fn end_anchor(uturn_end: Sample, start: Sample) -> f64 {
    uturn_end as f64 + END_ANCHOR_RATIO * (uturn_end as f64 - start as f64)
}

/// First toe-off `TO[i]` with `|TO[i] - TO[i + 2]| < 3 * stride`. Earlier
/// toe-offs are taken as pre-trial noise.
fn search_start(toe_offs: &[Sample], stride: f64) -> Option<Sample> {
    let tolerance = REGULARITY_FACTOR * stride;
    toe_offs
        .windows(3)
        .find(|w| (w[0].abs_diff(w[2]) as f64) < tolerance)
        .map(|w| w[0])
}

/// Walk forward from the heel-strike nearest `anchor` while
/// `|HS[i] - HS[i - 2]| < 3 * stride`. The first irregular gap ends the trial
/// at `HS[i - 1]`; reaching the last event ends it there.
fn search_end(heel_strikes: &[Sample], stride: f64, anchor: f64) -> Result<Sample, QiError> {
    if heel_strikes.len() < 3 {
        return Err(QiError::InsufficientData(format!(
            "end search needs at least 3 heel strikes, got {}",
            heel_strikes.len()
        )));
    }
    let tolerance = REGULARITY_FACTOR * stride;
    let first = nearest_index(heel_strikes, anchor).unwrap_or(0).max(2);
    for i in first..heel_strikes.len() {
        let gap = heel_strikes[i].abs_diff(heel_strikes[i - 2]) as f64;
        if gap >= tolerance {
            return Ok(heel_strikes[i - 1]);
        }
    }
    Ok(heel_strikes[heel_strikes.len() - 1])
}

fn nearest_index(samples: &[Sample], target: f64) -> Option<usize> {
    samples
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (**a as f64 - target).abs();
            let db = (**b as f64 - target).abs();
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)
}

/// Merge per-foot results: earliest start and latest end over the feet that
/// resolved, then clamp so the U-turn window stays inside the trial.
pub fn combine_bounds(feet: &[FootBounds], raw: &PhaseBoundary) -> Result<ResolvedBounds, QiError> {
    let start = pick(feet, Edge::Start, |b| &b.start, |a, b| a.min(b))?;
    let end = pick(feet, Edge::End, |b| &b.end, |a, b| a.max(b))?;

    let mut adjustments = Vec::new();
    let start = if start > raw.uturn_start {
        adjustments.push(format!(
            "resolved start {start} is after the U-turn start {}; clamped",
            raw.uturn_start
        ));
        raw.uturn_start
    } else {
        start
    };
    let end = if end < raw.uturn_end {
        adjustments.push(format!(
            "resolved end {end} is before the U-turn end {}; clamped",
            raw.uturn_end
        ));
        raw.uturn_end
    } else {
        end
    };

    Ok(ResolvedBounds {
        boundary: raw.with_trial_limits(start, end)?,
        adjustments,
    })
}

fn pick<F, M>(feet: &[FootBounds], edge: Edge, field: F, merge: M) -> Result<Sample, QiError>
where
    F: Fn(&FootBounds) -> &Result<Sample, QiError>,
    M: Fn(Sample, Sample) -> Sample,
{
    let mut best: Option<Sample> = None;
    let mut first_err: Option<QiError> = None;
    for bounds in feet {
        match field(bounds) {
            Ok(value) => best = Some(best.map_or(*value, |b| merge(b, *value))),
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err.clone());
                }
            }
        }
    }
    match (best, first_err) {
        (Some(value), _) => Ok(value),
        (None, Some(err)) => Err(err),
        (None, None) => Err(QiError::InsufficientData(format!(
            "no foot available to resolve the trial {edge}"
        ))),
    }
}
