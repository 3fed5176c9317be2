use anyhow::{bail, Context};
use rep_vision::{
    FormChecks, FramePipeline, LandmarkSet, ManualClock, PipelineConfig, Side, SessionSummary,
    StopOutcome, TrackedSide,
};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "Usage: replay_tester <input.jsonl> [output.jsonl] [--user <id>] [--side left|right] [--checks strict|basic]";

/// One recorded detector frame.
#[derive(Debug, Deserialize)]
struct RecordedFrame {
    ts_millis: u64,
    landmarks: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, PartialEq)]
struct Args {
    input: String,
    output: Option<String>,
    user_id: String,
    pipeline: PipelineConfig,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut user_id = "replay".to_string();
    let mut pipeline = PipelineConfig::default();

    let mut raw = raw.into_iter();
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--user" => user_id = raw.next().context("--user needs a value")?,
            "--side" => {
                let side: Side = raw
                    .next()
                    .context("--side needs a value")?
                    .parse()?;
                pipeline.tracked_side = TrackedSide(side);
            }
            "--checks" => {
                pipeline.form_checks = raw
                    .next()
                    .context("--checks needs a value")?
                    .parse::<FormChecks>()?;
            }
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let Some(input) = positional.next() else {
        bail!(USAGE);
    };
    let output = positional.next();
    if positional.next().is_some() {
        bail!("too many arguments\n{USAGE}");
    }
    Ok(Args {
        input,
        output,
        user_id,
        pipeline,
    })
}

fn parse_line(line_no: usize, line: &str) -> anyhow::Result<(Duration, Option<LandmarkSet>)> {
    let frame: RecordedFrame =
        serde_json::from_str(line).with_context(|| format!("line {line_no}: malformed frame"))?;
    let landmarks = frame
        .landmarks
        .map(LandmarkSet::try_from)
        .transpose()
        .with_context(|| format!("line {line_no}: bad landmarks"))?;
    Ok((Duration::from_millis(frame.ts_millis), landmarks))
}

/// Replays every frame of `input` through a fresh pipeline, writing one
/// report line per frame to `out`. Returns `None` for an empty recording.
fn replay(args: &Args, input: impl BufRead, mut out: impl Write) -> anyhow::Result<Option<SessionSummary>> {
    let clock = Arc::new(ManualClock::new());
    let pipeline = FramePipeline::with_clock(args.pipeline.exercise(), Arc::clone(&clock));
    let mut started = false;
    let mut frames = 0usize;

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("line {line_no}: read failed"))?;
        if line.trim().is_empty() {
            continue;
        }
        let (ts, landmarks) = parse_line(line_no, &line)?;
        clock.set(ts);
        if !started {
            pipeline.start(&args.user_id);
            started = true;
        }

        let report = pipeline.process_frame(&args.user_id, landmarks.as_ref());
        serde_json::to_writer(&mut out, &report)?;
        out.write_all(b"\n")?;
        frames += 1;
    }
    out.flush()?;
    tracing::info!(frames, user_id = %args.user_id, "replay finished");

    match pipeline.stop(&args.user_id) {
        StopOutcome::Stopped(summary) => Ok(Some(summary)),
        StopOutcome::NoActiveSession => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args(env::args().skip(1))?;
    let input = BufReader::new(
        File::open(&args.input).with_context(|| format!("opening {}", args.input))?,
    );

    let summary = match &args.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {path}"))?;
            replay(&args, input, BufWriter::new(file))?
        }
        None => replay(&args, input, io::stdout().lock())?,
    };

    // Reports may own stdout, so the summary goes to stderr.
    match summary {
        Some(s) => eprintln!(
            "Replay complete for {}: {} reps in {:.2}s",
            s.user_id,
            s.repetition_count,
            s.elapsed.as_secs_f64()
        ),
        None => eprintln!("No frames in {}", args.input),
    }
    Ok(())
}
