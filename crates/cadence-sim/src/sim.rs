//! Synthetic two-stage pipeline.
//!
//! The main thread plays the simulation: wait for the paced start, burn
//! `sim` time, submit. A second thread plays the GPU: take submissions in
//! order from a bounded channel and burn `gpu` time each. The channel depth
//! is the driver's render-ahead limit.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::{anyhow, Context as _};
use cadence_engine::adapter::{GPU_SECTION, SUBMIT_SECTION};
use cadence_engine::pacing::Unpaced;
use cadence_engine::{
    time, DequeueMode, Frame, ImplicitContext, Interval, MarkType, PacingConfig, PacingContext,
    SectionId, Timestamp,
};
use rand::Rng;

pub const SIM_SECTION: SectionId = 1;

const MS: f64 = 1_000_000.0;

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub frames: u32,
    pub sim: Interval,
    pub gpu: Interval,
    /// Relative +/- spread applied to every stage duration.
    pub jitter: f64,
    pub render_ahead: usize,
    pub paced: bool,
    pub implicit: bool,
    pub pacing: PacingConfig,
}

struct Submission {
    /// `None` in implicit mode; the GPU thread dequeues the frame instead.
    frame: Option<Frame>,
    sim_begin: Timestamp,
}

struct Completed {
    sim_begin: Timestamp,
    gpu_end: Timestamp,
}

/// Where frames come from for this run.
enum Source {
    Explicit(PacingContext),
    Implicit(Arc<ImplicitContext>),
}

impl Source {
    fn context(&self) -> &PacingContext {
        match self {
            Source::Explicit(context) => context,
            Source::Implicit(implicit) => implicit.context(),
        }
    }
}

pub fn run(config: &SimConfig) -> anyhow::Result<Report> {
    let mut builder = PacingContext::builder().config(config.pacing.clone());
    if !config.paced {
        builder = builder.policy(Unpaced);
    }
    let context = builder.build().context("failed to create pacing context")?;

    let source = if config.implicit {
        Source::Implicit(Arc::new(ImplicitContext::from_context(context)))
    } else {
        Source::Explicit(context)
    };

    let (tx, rx) = mpsc::sync_channel::<Submission>(config.render_ahead.saturating_sub(1));
    let gpu = {
        let implicit = match &source {
            Source::Implicit(implicit) => Some(implicit.clone()),
            Source::Explicit(_) => None,
        };
        let (gpu, jitter) = (config.gpu, config.jitter);
        thread::Builder::new()
            .name("gpu".into())
            .spawn(move || gpu_thread(rx, implicit, gpu, jitter))
            .context("failed to spawn gpu thread")?
    };

    let mut rng = rand::rng();
    for _ in 0..config.frames {
        let (frame, target) = match &source {
            Source::Explicit(context) => context.create_frame(),
            Source::Implicit(implicit) => {
                let (created, target) = implicit.create_frame();
                drop(created);
                // Input sampling attaches to whatever frame is newest.
                let newest = implicit
                    .dequeue(DequeueMode::Critical)
                    .ok_or_else(|| anyhow!("implicit queue empty right after create"))?;
                (newest, target)
            }
        };
        time::sleep_until(target);

        let sim_begin = frame.mark_now(SIM_SECTION, MarkType::Begin);
        time::sleep_until(sim_begin + jittered(&mut rng, config.sim, config.jitter));
        frame.mark_now(SIM_SECTION, MarkType::End);

        frame.mark_now(SUBMIT_SECTION, MarkType::Begin);
        let submission = Submission {
            frame: (!config.implicit).then(|| frame.clone()),
            sim_begin,
        };
        tx.send(submission).map_err(|_| anyhow!("gpu thread exited early"))?;
        frame.mark_now(SUBMIT_SECTION, MarkType::End);
    }
    drop(tx);

    let completed = gpu
        .join()
        .map_err(|_| anyhow!("gpu thread panicked"))?;
    let stats = source.context().stats();
    log::info!("final context state: {stats:?}");

    Ok(Report::new(&completed, config))
}

fn gpu_thread(
    rx: Receiver<Submission>,
    implicit: Option<Arc<ImplicitContext>>,
    gpu: Interval,
    jitter: f64,
) -> Vec<Completed> {
    let mut rng = rand::rng();
    let mut completed = Vec::new();

    while let Ok(submission) = rx.recv() {
        let frame = match (&submission.frame, &implicit) {
            (Some(frame), _) => Some(frame.clone()),
            (None, Some(implicit)) => implicit.dequeue(DequeueMode::Ordered),
            (None, None) => None,
        };
        let Some(frame) = frame else {
            log::warn!("gpu: submission without a frame");
            continue;
        };

        let begin = frame.mark_now(GPU_SECTION, MarkType::Begin);
        time::sleep_until(begin + jittered(&mut rng, gpu, jitter));
        let end = frame.mark_now(GPU_SECTION, MarkType::End);

        completed.push(Completed {
            sim_begin: submission.sim_begin,
            gpu_end: end,
        });
    }
    completed
}

fn jittered(rng: &mut impl Rng, base: Interval, jitter: f64) -> Interval {
    if jitter <= 0.0 {
        return base;
    }
    let factor = 1.0 + rng.random_range(-jitter..=jitter);
    (base as f64 * factor.max(0.0)) as Interval
}

/// Latency and frame-time summary, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub frames: usize,
    pub paced: bool,
    pub latency_mean: f64,
    pub latency_p50: f64,
    pub latency_p99: f64,
    pub frame_time_mean: f64,
}

impl Report {
    fn new(completed: &[Completed], config: &SimConfig) -> Self {
        // Skip warm-up so the estimators have settled.
        let warm = &completed[completed.len().min(10)..];

        let mut latencies: Vec<f64> = warm
            .iter()
            .map(|c| c.gpu_end.saturating_sub(c.sim_begin) as f64 / MS)
            .collect();
        latencies.sort_by(f64::total_cmp);

        let frame_time_mean = match (warm.first(), warm.last()) {
            (Some(first), Some(last)) if warm.len() > 1 => {
                (last.gpu_end - first.gpu_end) as f64 / MS / (warm.len() - 1) as f64
            }
            _ => 0.0,
        };

        Self {
            frames: completed.len(),
            paced: config.paced,
            latency_mean: mean(&latencies),
            latency_p50: percentile(&latencies, 0.5),
            latency_p99: percentile(&latencies, 0.99),
            frame_time_mean,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  frames      {:>8}", self.frames)?;
        writeln!(f, "  pacing      {:>8}", if self.paced { "on" } else { "off" })?;
        writeln!(f, "  latency     {:>8.2} ms mean", self.latency_mean)?;
        writeln!(f, "              {:>8.2} ms p50", self.latency_p50)?;
        writeln!(f, "              {:>8.2} ms p99", self.latency_p99)?;
        write!(f, "  frame time  {:>8.2} ms mean", self.frame_time_mean)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Nearest-rank percentile of sorted values.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
