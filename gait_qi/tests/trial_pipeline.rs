use gait_qi::{
    analyze_trial, classify_step, classify_steps, correct_steps, quality_index, Foot, Params,
    PhaseBoundary, QualityBasis, Sample, StepClass, StepEvent,
};

/// Alternating walk with `n` steps starting at `first_hs`, one step every
/// `step_len` samples.
fn walk(first_foot: Foot, first_hs: Sample, n: usize, step_len: Sample) -> Vec<StepEvent> {
    (0..n)
        .map(|k| {
            let foot = if k % 2 == 0 {
                first_foot
            } else if first_foot == Foot::Left {
                Foot::Right
            } else {
                Foot::Left
            };
            let hs = first_hs + k as Sample * step_len;
            StepEvent::new(foot, hs, hs + step_len / 4)
        })
        .collect()
}

/// Tiny deterministic generator for jitter.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, span: i64) -> i64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % (2 * span as u64 + 1)) as i64 - span
    }
}

fn noisy_trial(seed: u64) -> (Vec<StepEvent>, PhaseBoundary) {
    let mut rng = Lcg(seed);
    let mut steps = walk(Foot::Left, 1000, 8, 110);
    steps.extend(walk(Foot::Right, 2300, 8, 110));
    for step in &mut steps {
        let jitter = rng.next(8);
        step.heel_strike += jitter;
        step.toe_off += jitter;
    }
    // A few spurious detections before the walk, during the turn and after it.
    steps.push(StepEvent::new(Foot::Left, 200 + rng.next(50), 230));
    steps.push(StepEvent::new(Foot::Right, 2050 + rng.next(20), 2090));
    steps.push(StepEvent::new(Foot::Left, 3900 + rng.next(50), 3940));
    let raw = PhaseBoundary::new(150, 1900, 2200, 4000).unwrap();
    (steps, raw)
}

#[test]
fn concrete_perfect_alternation() {
    let steps = [
        StepEvent::new(Foot::Left, 100, 120),
        StepEvent::new(Foot::Right, 200, 220),
        StepEvent::new(Foot::Left, 300, 320),
        StepEvent::new(Foot::Right, 400, 420),
    ];
    let boundary = PhaseBoundary::new(90, 250, 350, 430).unwrap();
    let qi = quality_index(&steps, &boundary, QualityBasis::Raw).unwrap();
    assert_eq!(qi.value, 100.0);
}

#[test]
fn concrete_pre_trial_step_is_invalid() {
    let boundary = PhaseBoundary::new(100, 250, 350, 430).unwrap();
    let step = StepEvent::new(Foot::Left, 95, 96);
    assert_eq!(classify_step(&step, &boundary), StepClass::OutOfTrial);
}

#[test]
fn clean_walk_scores_perfectly_after_correction() {
    let mut steps = walk(Foot::Left, 1000, 8, 110);
    steps.extend(walk(Foot::Right, 2300, 8, 110));
    let raw = PhaseBoundary::new(900, 1900, 2200, 3300).unwrap();

    let report = analyze_trial(&steps, &raw, &Params::default());
    let corrected = report.corrected_boundary.expect("boundary resolves");
    assert_eq!(corrected.uturn_start, 1900);
    assert_eq!(corrected.uturn_end, 2200);
    assert!(corrected.start >= raw.start);
    assert_eq!(report.corrected_quality.map(|q| q.value), Some(100.0));
    assert_eq!(report.raw_quality.map(|q| q.value), Some(100.0));
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
}

#[test]
fn noisy_trials_keep_invariants() {
    for seed in 1..40u64 {
        let (steps, raw) = noisy_trial(seed);
        let report = analyze_trial(&steps, &raw, &Params::default());

        let raw_qi = report.raw_quality.expect("raw index defined");
        assert!((0.0..=100.0).contains(&raw_qi.value));

        let boundary = report.corrected_boundary.expect("boundary resolves");
        assert!(boundary.start <= boundary.uturn_start);
        assert!(boundary.uturn_start <= boundary.uturn_end);
        assert!(boundary.uturn_end <= boundary.end);
        assert_eq!(boundary.uturn_start, raw.uturn_start);
        assert_eq!(boundary.uturn_end, raw.uturn_end);

        let corrected_steps = report.corrected_steps.as_ref().unwrap();
        assert_eq!(corrected_steps.len(), steps.len());
        let again = classify_steps(corrected_steps.iter().map(|s| &s.step), &boundary);
        assert_eq!(&again, corrected_steps);

        // Spurious pre-trial, turning and post-trial detections are dropped.
        for spurious in &steps[16..] {
            let flagged = corrected_steps.iter().find(|c| c.step == *spurious).unwrap();
            assert!(!flagged.valid, "seed {seed}: {:?}", spurious);
        }

        let qi = report.corrected_quality.expect("corrected index defined");
        assert!((0.0..=100.0).contains(&qi.value));
        assert!(qi.value >= raw_qi.value, "seed {seed}");
    }
}

#[test]
fn raw_and_corrected_results_do_not_alias() {
    let (steps, raw) = noisy_trial(7);
    let snapshot = steps.clone();
    let correction = correct_steps(&steps, &raw, &Params::default()).unwrap();
    assert_eq!(steps, snapshot);
    assert_eq!(raw.start, 150);
    assert_ne!(correction.boundary, raw);
}

#[test]
fn single_foot_stream_still_reports() {
    let steps: Vec<StepEvent> = walk(Foot::Left, 1000, 8, 110)
        .into_iter()
        .map(|s| StepEvent::new(Foot::Left, s.heel_strike, s.toe_off))
        .collect();
    let raw = PhaseBoundary::new(900, 1500, 1600, 2000).unwrap();
    let report = analyze_trial(&steps, &raw, &Params::default());
    assert!(report
        .feet
        .iter()
        .any(|f| f.foot == Foot::Right && !f.issues.is_empty()));
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.contains("right foot")));
}
