//! Quality control for gait events detected during instrumented walking trials.
//!
//! Upstream detectors hand over a raw stream of heel-strike / toe-off events per
//! foot and a raw four-point phase boundary (start, U-turn start, U-turn end,
//! end). This crate re-estimates the trial start and end from stride timing,
//! flags every step that falls outside the two straight-walking windows, and
//! scores left/right alternation as a quality index, once on the raw input and
//! once on the corrected result.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod bounds;
pub mod correct;
pub mod phase;
pub mod quality;
pub mod stats;

pub use bounds::{combine_bounds, resolve_feet, Edge, FootBounds, ResolvedBounds};
pub use correct::{classify_steps, correct_steps, correct_with_feet, CorrectedStep, Correction};
pub use phase::{classify_step, StepClass, Window, Zone};
pub use quality::{corrected_quality_index, quality_index, QualityBasis, QualityIndex};
pub use stats::{median, remove_outliers, stride_duration, DEFAULT_OUTLIER_THRESHOLD};

/// Sample index on the acquisition clock.
pub type Sample = i64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QiError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("unable to resolve trial {edge} for {foot} foot")]
    BoundarySearchExhausted { foot: Foot, edge: Edge },
    #[error("quality index not computable: {outbound} outbound and {returning} return steps")]
    QualityUndefined { outbound: usize, returning: usize },
    #[error("invalid phase boundary: {0}")]
    InvalidBoundary(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub enum Foot {
    Left,
    Right,
}

impl Foot {
    pub const ALL: [Foot; 2] = [Foot::Left, Foot::Right];

    pub fn code(self) -> u8 {
        match self {
            Foot::Left => 0,
            Foot::Right => 1,
        }
    }
}

impl TryFrom<u8> for Foot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Foot::Left),
            1 => Ok(Foot::Right),
            other => Err(format!("unknown foot code {other} (expected 0 or 1)")),
        }
    }
}

impl From<Foot> for u8 {
    fn from(foot: Foot) -> Self {
        foot.code()
    }
}

impl fmt::Display for Foot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Foot::Left => f.write_str("left"),
            Foot::Right => f.write_str("right"),
        }
    }
}

/// One detected step, as produced by the event detector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepEvent {
    #[serde(rename = "Foot")]
    pub foot: Foot,
    #[serde(rename = "HS")]
    pub heel_strike: Sample,
    #[serde(rename = "TO")]
    pub toe_off: Sample,
}

impl StepEvent {
    pub fn new(foot: Foot, heel_strike: Sample, toe_off: Sample) -> Self {
        Self {
            foot,
            heel_strike,
            toe_off,
        }
    }
}

/// Trial phases as `(start, uturn_start, uturn_end, end)`.
///
/// Construction goes through [`PhaseBoundary::new`], which rejects boundaries
/// that are not ordered.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct PhaseBoundary {
    pub start: Sample,
    pub uturn_start: Sample,
    pub uturn_end: Sample,
    pub end: Sample,
}

impl PhaseBoundary {
    pub fn new(
        start: Sample,
        uturn_start: Sample,
        uturn_end: Sample,
        end: Sample,
    ) -> Result<Self, QiError> {
        if start > uturn_start || uturn_start > uturn_end || uturn_end > end {
            return Err(QiError::InvalidBoundary(format!(
                "expected start <= uturn_start <= uturn_end <= end, got ({start}, {uturn_start}, {uturn_end}, {end})"
            )));
        }
        Ok(Self {
            start,
            uturn_start,
            uturn_end,
            end,
        })
    }

    pub fn from_slice(values: &[Sample]) -> Result<Self, QiError> {
        match values {
            [start, uturn_start, uturn_end, end] => {
                Self::new(*start, *uturn_start, *uturn_end, *end)
            }
            _ => Err(QiError::InvalidBoundary(format!(
                "expected 4 phase samples, got {}",
                values.len()
            ))),
        }
    }

    /// Same U-turn window with a new trial start and end.
    pub fn with_trial_limits(&self, start: Sample, end: Sample) -> Result<Self, QiError> {
        Self::new(start, self.uturn_start, self.uturn_end, end)
    }

    pub fn as_array(&self) -> [Sample; 4] {
        [self.start, self.uturn_start, self.uturn_end, self.end]
    }
}

impl<'de> Deserialize<'de> for PhaseBoundary {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            start: Sample,
            uturn_start: Sample,
            uturn_end: Sample,
            end: Sample,
        }
        let raw = Raw::deserialize(deserializer)?;
        PhaseBoundary::new(raw.start, raw.uturn_start, raw.uturn_end, raw.end)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Durations with an absolute z-score at or above this value are dropped
    /// before the median stride is taken.
    pub outlier_threshold: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), QiError> {
        if !self.outlier_threshold.is_finite() || self.outlier_threshold <= 0.0 {
            return Err(QiError::InvalidParameter(format!(
                "outlier_threshold must be a positive number, got {}",
                self.outlier_threshold
            )));
        }
        Ok(())
    }

    pub fn params_hash_sha256(&self) -> Result<String, QiError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| QiError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

/// Serializable per-foot view of the boundary search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FootSummary {
    pub foot: Foot,
    pub stride_samples: Option<f64>,
    pub start: Option<Sample>,
    pub end: Option<Sample>,
    pub issues: Vec<String>,
}

impl From<&FootBounds> for FootSummary {
    fn from(bounds: &FootBounds) -> Self {
        let mut issues = Vec::new();
        let mut note = |result: Result<(), &QiError>| {
            if let Err(err) = result {
                let text = err.to_string();
                if !issues.contains(&text) {
                    issues.push(text);
                }
            }
        };
        note(bounds.stride.as_ref().map(|_| ()));
        note(bounds.start.as_ref().map(|_| ()));
        note(bounds.end.as_ref().map(|_| ()));
        Self {
            foot: bounds.foot,
            stride_samples: bounds.stride.as_ref().ok().copied(),
            start: bounds.start.as_ref().ok().copied(),
            end: bounds.end.as_ref().ok().copied(),
            issues,
        }
    }
}

/// Everything computed for one trial. Metrics that could not be computed are
/// `None` and the reason is listed in `diagnostics`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrialReport {
    pub params: Params,
    pub params_hash: String,
    pub raw_boundary: PhaseBoundary,
    pub raw_quality: Option<QualityIndex>,
    pub feet: Vec<FootSummary>,
    pub corrected_boundary: Option<PhaseBoundary>,
    pub corrected_steps: Option<Vec<CorrectedStep>>,
    pub corrected_quality: Option<QualityIndex>,
    pub diagnostics: Vec<String>,
}

impl TrialReport {
    pub fn total_steps(&self) -> usize {
        self.corrected_steps.as_ref().map_or(0, Vec::len)
    }

    pub fn valid_steps(&self) -> usize {
        self.corrected_steps
            .as_ref()
            .map_or(0, |steps| steps.iter().filter(|s| s.valid).count())
    }

    /// Boundary to report: the corrected one when available.
    pub fn effective_boundary(&self) -> PhaseBoundary {
        self.corrected_boundary.unwrap_or(self.raw_boundary)
    }
}

/// Analyze one trial: raw quality index, boundary correction, step
/// classification and corrected quality index.
///
/// Never fails as a whole. Each stage that cannot run leaves its field empty and
/// records why.
pub fn analyze_trial(steps: &[StepEvent], raw: &PhaseBoundary, params: &Params) -> TrialReport {
    let mut diagnostics = Vec::new();

    let params_hash = params.params_hash_sha256().unwrap_or_else(|err| {
        diagnostics.push(format!("params hash unavailable: {err}"));
        String::new()
    });

    let raw_quality = match quality_index(steps, raw, QualityBasis::Raw) {
        Ok(qi) => Some(qi),
        Err(err) => {
            diagnostics.push(format!("raw {err}"));
            None
        }
    };

    let mut report = TrialReport {
        params: params.clone(),
        params_hash,
        raw_boundary: *raw,
        raw_quality,
        feet: Vec::new(),
        corrected_boundary: None,
        corrected_steps: None,
        corrected_quality: None,
        diagnostics,
    };

    if let Err(err) = params.validate() {
        report.diagnostics.push(err.to_string());
        return report;
    }

    let feet = resolve_feet(steps, raw, params);
    report.feet = feet.iter().map(FootSummary::from).collect();
    for summary in &report.feet {
        for issue in &summary.issues {
            report.diagnostics.push(issue.clone());
        }
    }

    let correction = match correct_with_feet(steps, raw, feet) {
        Ok(correction) => correction,
        Err(err) => {
            report
                .diagnostics
                .push(format!("boundary correction failed: {err}"));
            return report;
        }
    };
    report
        .diagnostics
        .extend(correction.adjustments.iter().cloned());

    match corrected_quality_index(&correction) {
        Ok(qi) => report.corrected_quality = Some(qi),
        Err(err) => report.diagnostics.push(format!("corrected {err}")),
    }
    report.corrected_boundary = Some(correction.boundary);
    report.corrected_steps = Some(correction.steps);
    report
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
