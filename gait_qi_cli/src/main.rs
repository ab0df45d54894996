use std::collections::HashSet;
use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use gait_qi::{analyze_trial, CorrectedStep, Params, PhaseBoundary, Sample, StepEvent, TrialReport};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gait event quality control for walking trials", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Correct trial boundaries and score one trial
    Analyze(AnalyzeArgs),
    /// Analyze many trial directories in parallel and write a summary table
    Batch(BatchArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Output directory for reports
    #[arg(short, long, default_value = ".", value_hint = ValueHint::DirPath)]
    output: PathBuf,

    /// Acquisition frequency (Hz) used to express samples in seconds
    #[arg(long, default_value_t = 100.0)]
    freq: f64,

    /// Optional params JSON (e.g. {"outlier_threshold": 2.0})
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Z-score threshold for stride outlier rejection (overrides --config)
    #[arg(long)]
    threshold: Option<f64>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Steps table with Foot,HS,TO columns (Foot: 0 = left, 1 = right)
    #[arg(long, value_hint = ValueHint::FilePath)]
    steps: PathBuf,

    /// Raw phase boundary as start,uturn_start,uturn_end,end
    #[arg(long, conflicts_with = "phases_file", required_unless_present = "phases_file")]
    phases: Option<String>,

    /// File holding the four raw phase samples
    #[arg(long, value_hint = ValueHint::FilePath)]
    phases_file: Option<PathBuf>,

    /// Also print the JSON report to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    print_json: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// Trial directories, each holding a steps table and a phase file
    #[arg(required = true, value_hint = ValueHint::DirPath)]
    trials: Vec<PathBuf>,

    /// Steps table file name inside each trial directory
    #[arg(long, default_value = "steps.csv")]
    steps_name: String,

    /// Phase boundary file name inside each trial directory
    #[arg(long, default_value = "seg_lim.csv")]
    phases_name: String,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Analyze(args) => args.common.verbose,
        Command::Batch(args) => args.common.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Batch(args) => handle_batch(args),
    }
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let params = build_params(&args.common)?;
    check_freq(args.common.freq)?;

    let steps = read_steps(&args.steps)?;
    let raw = match (args.phases.as_ref(), args.phases_file.as_ref()) {
        (Some(list), _) => parse_phase_list(list)?,
        (None, Some(path)) => read_phases(path)?,
        (None, None) => return Err(anyhow!("either --phases or --phases-file is required")),
    };
    info!(
        "Loaded {} steps from {}, raw phases {:?}",
        steps.len(),
        args.steps.display(),
        raw.as_array()
    );

    let t_compute = Instant::now();
    let report = analyze_trial(&steps, &raw, &params);
    debug!(
        "Analysis stage: {:.3} ms",
        t_compute.elapsed().as_secs_f64() * 1000.0
    );
    log_report("trial", &report);

    let name = args
        .steps
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("trial")
        .to_string();
    write_trial_outputs(&name, &report, &args.common.output, args.common.freq)?;

    if args.print_json {
        let file = ReportFile::new(&name, args.common.freq, &report);
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, &file)?;
        writeln!(handle)?;
    }
    Ok(())
}

fn handle_batch(args: BatchArgs) -> Result<()> {
    let params = build_params(&args.common)?;
    check_freq(args.common.freq)?;
    fs::create_dir_all(&args.common.output)
        .with_context(|| format!("failed to create {}", args.common.output.display()))?;

    let names = unique_trial_names(&args.trials);
    let t_batch = Instant::now();
    let rows: Vec<SummaryRow> = args
        .trials
        .par_iter()
        .zip(names.par_iter())
        .map(|(dir, name)| match run_batch_trial(dir, name, &args, &params) {
            Ok(report) => SummaryRow::from_report(name, &report),
            Err(err) => {
                warn!("Trial {} skipped: {:#}", name, err);
                SummaryRow::failed(name, &err)
            }
        })
        .collect();

    let summary_path = args.common.output.join("summary.csv");
    write_summary_csv(&rows, &summary_path)?;
    let failed = rows.iter().filter(|r| r.error.is_some()).count();
    info!(
        "Batch done: {} trials ({} failed) in {:.1} ms; summary {}",
        rows.len(),
        failed,
        t_batch.elapsed().as_secs_f64() * 1000.0,
        summary_path.display()
    );
    Ok(())
}

fn run_batch_trial(dir: &Path, name: &str, args: &BatchArgs, params: &Params) -> Result<TrialReport> {
    let steps = read_steps(&dir.join(&args.steps_name))?;
    let raw = read_phases(&dir.join(&args.phases_name))?;
    let report = analyze_trial(&steps, &raw, params);
    log_report(name, &report);
    write_trial_outputs(name, &report, &args.common.output.join(name), args.common.freq)?;
    Ok(report)
}

fn trial_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| dir.display().to_string())
}

/// Output folder name per trial. Directories sharing a last path component get
/// `_2`, `_3`, ... so parallel trials never write into the same folder.
fn unique_trial_names(dirs: &[PathBuf]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    dirs.iter()
        .map(|dir| {
            let base = trial_name(dir);
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }
            if name != base {
                warn!("Trial name {} already used; writing {} to {}", base, dir.display(), name);
            }
            name
        })
        .collect()
}

fn check_freq(freq: f64) -> Result<()> {
    if !freq.is_finite() || freq <= 0.0 {
        return Err(anyhow!("--freq must be a positive number, got {}", freq));
    }
    Ok(())
}

fn build_params(common: &CommonArgs) -> Result<Params> {
    let mut params = match common.config.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(threshold) = common.threshold {
        params.outlier_threshold = threshold;
    }
    params.validate()?;
    Ok(params)
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read params {}", path.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid params JSON", path.display()))?;
    Ok(params)
}

fn read_steps(path: &Path) -> Result<Vec<StepEvent>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_steps_from(file).with_context(|| format!("failed to parse {}", path.display()))
}

fn read_steps_from<R: io::Read>(reader: R) -> Result<Vec<StepEvent>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut steps = Vec::new();
    for (row, record) in reader.deserialize::<StepEvent>().enumerate() {
        let step = record.with_context(|| format!("bad step on data row {}", row + 1))?;
        steps.push(step);
    }
    Ok(steps)
}

fn read_phases(path: &Path) -> Result<PhaseBoundary> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read phases {}", path.display()))?;
    parse_phase_list(&text).with_context(|| format!("invalid phases in {}", path.display()))
}

/// Four samples separated by commas, semicolons or whitespace. Fractional values
/// are truncated to whole samples.
fn parse_phase_list(input: &str) -> Result<PhaseBoundary> {
    let mut values: Vec<Sample> = Vec::new();
    for token in input.split(|c: char| c == ',' || c == ';' || c.is_whitespace()) {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .with_context(|| format!("invalid phase sample '{}'", trimmed))?;
        if !value.is_finite() {
            return Err(anyhow!("phase sample '{}' is not finite", trimmed));
        }
        values.push(value.trunc() as Sample);
    }
    Ok(PhaseBoundary::from_slice(&values)?)
}

fn log_report(name: &str, report: &TrialReport) {
    match report.raw_quality.as_ref() {
        Some(qi) => info!("{}: raw quality index {:.4}", name, qi.value),
        None => warn!("{}: raw quality index not computable", name),
    }
    match report.corrected_boundary.as_ref() {
        Some(b) => info!(
            "{}: corrected boundary {:?} ({}/{} steps valid)",
            name,
            b.as_array(),
            report.valid_steps(),
            report.total_steps()
        ),
        None => warn!("{}: trial boundaries could not be corrected", name),
    }
    match report.corrected_quality.as_ref() {
        Some(qi) => info!("{}: corrected quality index {:.4}", name, qi.value),
        None => warn!("{}: corrected quality index not computable", name),
    }
    for note in &report.diagnostics {
        debug!("{}: {}", name, note);
    }
}

#[derive(Serialize)]
struct ReportFile<'a> {
    trial: &'a str,
    generated_at: DateTime<Utc>,
    freq_hz: f64,
    #[serde(flatten)]
    report: &'a TrialReport,
}

impl<'a> ReportFile<'a> {
    fn new(trial: &'a str, freq_hz: f64, report: &'a TrialReport) -> Self {
        Self {
            trial,
            generated_at: Utc::now(),
            freq_hz,
            report,
        }
    }
}

fn write_trial_outputs(name: &str, report: &TrialReport, dir: &Path, freq: f64) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let seg_path = dir.join("seg_lim.txt");
    fs::write(&seg_path, format_boundary_table(&report.effective_boundary(), freq))
        .with_context(|| format!("failed to write {}", seg_path.display()))?;
    debug!("Wrote phase table: {}", seg_path.display());

    if let Some(steps) = report.corrected_steps.as_ref() {
        let steps_path = dir.join("steps_corrected.csv");
        write_corrected_csv(steps, &steps_path)?;
        debug!("Wrote corrected steps: {}", steps_path.display());
    }

    let json_path = dir.join("quality.json");
    let file = File::create(&json_path)
        .with_context(|| format!("failed to create {}", json_path.display()))?;
    serde_json::to_writer_pretty(file, &ReportFile::new(name, freq, report))
        .with_context(|| format!("failed to write {}", json_path.display()))?;
    info!("Wrote reports to {}", dir.display());
    Ok(())
}

fn format_boundary_table(boundary: &PhaseBoundary, freq: f64) -> String {
    let rows = [
        ("Trial start", boundary.start),
        ("U-Turn start", boundary.uturn_start),
        ("U-Turn end", boundary.uturn_end),
        ("Trial end", boundary.end),
    ];
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16}| {:<20}| {:<20}\n",
        "Trial boundaries", "Time (samples)", "Time (seconds)"
    ));
    out.push_str(&format!("{}+{}+{}\n", "-".repeat(16), "-".repeat(21), "-".repeat(21)));
    for (label, sample) in rows {
        out.push_str(&format!(
            "{:<16}| {:<20}| {:<20.2}\n",
            label,
            sample,
            sample as f64 / freq
        ));
    }
    out
}

fn write_corrected_csv(steps: &[CorrectedStep], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_corrected_rows(steps, &mut writer)
}

fn write_corrected_rows<W: Write>(steps: &[CorrectedStep], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["Foot", "HS", "TO", "Correct"])?;
    for corrected in steps {
        writer.write_record([
            corrected.step.foot.code().to_string(),
            corrected.step.heel_strike.to_string(),
            corrected.step.toe_off.to_string(),
            u8::from(corrected.valid).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
struct SummaryRow {
    trial: String,
    raw_qi: Option<f64>,
    corrected_qi: Option<f64>,
    start: Option<Sample>,
    end: Option<Sample>,
    valid_steps: usize,
    total_steps: usize,
    diagnostics: usize,
    error: Option<String>,
}

impl SummaryRow {
    fn from_report(trial: &str, report: &TrialReport) -> Self {
        Self {
            trial: trial.to_string(),
            raw_qi: report.raw_quality.map(|q| q.value),
            corrected_qi: report.corrected_quality.map(|q| q.value),
            start: report.corrected_boundary.map(|b| b.start),
            end: report.corrected_boundary.map(|b| b.end),
            valid_steps: report.valid_steps(),
            total_steps: report.total_steps(),
            diagnostics: report.diagnostics.len(),
            error: None,
        }
    }

    fn failed(trial: &str, err: &anyhow::Error) -> Self {
        Self {
            trial: trial.to_string(),
            raw_qi: None,
            corrected_qi: None,
            start: None,
            end: None,
            valid_steps: 0,
            total_steps: 0,
            diagnostics: 0,
            error: Some(format!("{:#}", err)),
        }
    }
}

fn write_summary_csv(rows: &[SummaryRow], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_summary_rows(rows, &mut writer)
}

fn write_summary_rows<W: Write>(rows: &[SummaryRow], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "trial",
        "raw_qi",
        "corrected_qi",
        "corrected_start",
        "corrected_end",
        "valid_steps",
        "total_steps",
        "diagnostics",
        "error",
    ])?;
    for row in rows {
        writer.write_record([
            row.trial.clone(),
            row.raw_qi
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "".into()),
            row.corrected_qi
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "".into()),
            row.start.map(|v| v.to_string()).unwrap_or_default(),
            row.end.map(|v| v.to_string()).unwrap_or_default(),
            row.valid_steps.to_string(),
            row.total_steps.to_string(),
            row.diagnostics.to_string(),
            row.error.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
