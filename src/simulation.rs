use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::network::{Reaction, ReactionNetwork};
use crate::propensity::PropensityEngine;
use crate::scheduler::{Perturbation, Scheduler};
use crate::{Result, SimError};

/// Stop early once a molecule's count passes through a threshold.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitor {
    pub molecule: String,
    pub threshold: f64,
    /// Keep simulating this long after the threshold is reached.
    pub delay: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunOptions {
    /// Spacing of the sampling grid; 0 emits one sample per step.
    pub plot_interval: f64,
    pub stop_time: f64,
    pub monitor: Option<Monitor>,
    /// Keep advancing time in idle ticks while no reaction is feasible.
    pub run_idle: bool,
    pub idle_tick: f64,
    pub seed: Option<u64>,
    /// Record which reaction fired at every step.
    pub trace_steps: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            plot_interval: 0.001,
            stop_time: 1.0,
            monitor: None,
            run_idle: true,
            idle_tick: 0.3,
            seed: None,
            trace_steps: false,
        }
    }
}

impl RunOptions {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::default().with_json_file(path)
    }

    /// Overlays the fields present in a JSON options file onto `self`.
    /// Fields the file does not mention keep their current values.
    pub fn with_json_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bad = |err: serde_json::Error| {
            SimError::InvalidArgument(format!("{}: {}", path.display(), err))
        };
        let contents = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: serde_json::Value = serde_json::from_str(&contents).map_err(bad)?;
        let serde_json::Value::Object(fields) = overlay else {
            return Err(SimError::InvalidArgument(format!(
                "{}: options must be a JSON object",
                path.display()
            )));
        };
        let mut merged = serde_json::to_value(&self).map_err(bad)?;
        if let serde_json::Value::Object(base) = &mut merged {
            base.extend(fields);
        }
        let options: Self = serde_json::from_value(merged).map_err(bad)?;
        log::info!("loaded run options from {}", path.display());
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.stop_time.is_finite() || self.stop_time < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "stop time must be a non-negative number, got {}",
                self.stop_time
            )));
        }
        if !self.plot_interval.is_finite() || self.plot_interval < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "plot interval must be a non-negative number, got {}",
                self.plot_interval
            )));
        }
        if self.run_idle && !(self.idle_tick.is_finite() && self.idle_tick > 0.0) {
            return Err(SimError::InvalidArgument(format!(
                "idle tick must be positive, got {}",
                self.idle_tick
            )));
        }
        if let Some(monitor) = &self.monitor {
            if monitor.threshold.is_nan() {
                return Err(SimError::InvalidArgument(
                    "monitor threshold must be a number".into(),
                ));
            }
            if !monitor.delay.is_finite() || monitor.delay < 0.0 {
                return Err(SimError::InvalidArgument(format!(
                    "monitor delay must be a non-negative number, got {}",
                    monitor.delay
                )));
            }
        }
        Ok(())
    }
}

/// What happened in one iteration of the direct method.
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub time: f64,
    /// `None` when no reaction fired (idle tick, event boundary or end).
    pub reaction: Option<usize>,
}

pub trait Recorder {
    fn record_sample(&mut self, time: f64, counts: &[u32]);

    fn record_step(&mut self, _step: &StepRecord) {}
}

/// Samples on the plot grid, stored row-major, plus optional step records.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    n_molecules: usize,
    times: Vec<f64>,
    counts: Vec<u32>,
    steps: Vec<StepRecord>,
}

impl Trajectory {
    pub fn new(n_molecules: usize) -> Self {
        Self {
            n_molecules,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn sample(&self, index: usize) -> &[u32] {
        let start = index * self.n_molecules;
        &self.counts[start..start + self.n_molecules]
    }

    pub fn samples(&self) -> impl Iterator<Item = (f64, &[u32])> {
        self.times
            .iter()
            .copied()
            .zip(self.counts.chunks_exact(self.n_molecules.max(1)))
    }

    pub fn last(&self) -> Option<(f64, &[u32])> {
        let last = self.times.len().checked_sub(1)?;
        Some((self.times[last], self.sample(last)))
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }
}

impl Recorder for Trajectory {
    fn record_sample(&mut self, time: f64, counts: &[u32]) {
        debug_assert_eq!(counts.len(), self.n_molecules);
        self.times.push(time);
        self.counts.extend_from_slice(counts);
    }

    fn record_step(&mut self, step: &StepRecord) {
        self.steps.push(step.clone());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Simulated time passed the stop time, or the one set by the monitor.
    StopTime,
    /// No reaction was feasible and idling was disabled.
    Exhausted,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub end_time: f64,
    /// Stop time in effect at the end, after any monitor trigger.
    pub stop_time: f64,
    pub steps: u64,
    pub reactions_fired: u64,
    pub threshold_reached_at: Option<f64>,
    pub termination: Termination,
}

/// Grid cursor for emitted samples.
enum SampleGrid {
    EveryStep,
    Interval { interval: f64, next: u64 },
}

impl SampleGrid {
    fn new(interval: f64) -> Self {
        if interval > 0.0 {
            SampleGrid::Interval { interval, next: 0 }
        } else {
            SampleGrid::EveryStep
        }
    }

    fn emit_due<R: Recorder + ?Sized>(
        &mut self,
        previous: f64,
        limit: f64,
        counts: &[u32],
        recorder: &mut R,
    ) {
        match self {
            SampleGrid::EveryStep => recorder.record_sample(previous, counts),
            SampleGrid::Interval { interval, next } => loop {
                let time = *next as f64 * *interval;
                if time > limit {
                    break;
                }
                recorder.record_sample(time, counts);
                *next += 1;
            },
        }
    }
}

struct MonitorState {
    molecule: usize,
    threshold: f64,
    delay: f64,
    initially_above: bool,
}

impl MonitorState {
    fn crossed(&self, count: u32) -> bool {
        let count = count as f64;
        count == self.threshold || (count > self.threshold) != self.initially_above
    }
}

/// Draws the waiting time until the next reaction for total propensity
/// `a0 > 0`. Returns `(tau, r1)` with `r1` uniform on (0, 1].
pub fn draw_waiting_time<R: Rng + ?Sized>(rng: &mut R, a0: f64) -> (f64, f64) {
    let r1 = 1.0 - rng.r#gen::<f64>();
    (1.0 / a0 * (1.0 / r1).ln(), r1)
}

/// Picks the first reaction whose running propensity sum reaches `r2`.
///
/// Only the first `len - 1` entries are scanned: if rounding keeps every
/// partial sum below `r2`, the last reaction is chosen by elimination.
pub fn select_reaction<I>(propensities: I, r2: f64) -> usize
where
    I: ExactSizeIterator<Item = f64>,
{
    let last = propensities.len().saturating_sub(1);
    let mut sum = 0.0;
    for (idx, a) in propensities.take(last).enumerate() {
        sum += a;
        if sum >= r2 {
            return idx;
        }
    }
    last
}

/// A reaction network together with the propensity cache and the event
/// queue driving one run at a time.
#[derive(Debug)]
pub struct Simulation {
    network: ReactionNetwork,
    engine: PropensityEngine,
    scheduler: Scheduler<ReactionNetwork>,
}

impl Simulation {
    pub fn new(network: ReactionNetwork) -> Self {
        let engine = PropensityEngine::new(&network);
        Self {
            network,
            engine,
            scheduler: Scheduler::new(),
        }
    }

    pub fn network(&self) -> &ReactionNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut ReactionNetwork {
        &mut self.network
    }

    pub fn engine(&self) -> &PropensityEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler<ReactionNetwork> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler<ReactionNetwork> {
        &mut self.scheduler
    }

    pub fn schedule(&mut self, time: f64, perturbation: Perturbation) -> Result<()> {
        self.scheduler.schedule_handler(time, perturbation)
    }

    pub fn refresh_propensities(&mut self) -> f64 {
        self.engine.refresh(&mut self.network)
    }

    pub fn run<R: Recorder + ?Sized>(
        &mut self,
        options: &RunOptions,
        recorder: &mut R,
    ) -> Result<RunSummary> {
        let mut rng = match options.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        self.run_with_rng(options, &mut rng, recorder)
    }

    /// Runs the direct method until simulated time passes the stop time or,
    /// with idling disabled, until no reaction is feasible.
    pub fn run_with_rng<G, R>(
        &mut self,
        options: &RunOptions,
        rng: &mut G,
        recorder: &mut R,
    ) -> Result<RunSummary>
    where
        G: Rng + ?Sized,
        R: Recorder + ?Sized,
    {
        options.validate()?;
        let monitor = match &options.monitor {
            Some(m) => {
                let molecule = self
                    .network
                    .molecule_index(&m.molecule)
                    .ok_or_else(|| SimError::UnknownMolecule(m.molecule.clone()))?;
                Some(MonitorState {
                    molecule,
                    threshold: m.threshold,
                    delay: m.delay,
                    initially_above: self.network.count(molecule) as f64 > m.threshold,
                })
            }
            None => None,
        };

        log::info!(
            "starting run: {} molecules, {} reactions, stop time {}",
            self.network.molecules().len(),
            self.network.reactions().len(),
            options.stop_time
        );

        let mut stop_time = options.stop_time;
        let mut threshold_reached_at = None;
        let mut grid = SampleGrid::new(options.plot_interval);
        let mut counts = vec![0u32; self.network.molecules().len()];
        let mut steps = 0u64;
        let mut reactions_fired = 0u64;
        let mut termination = Termination::StopTime;
        let mut t = 0.0;

        while t <= stop_time {
            self.scheduler.process_due(t, &mut self.network)?;

            if let Some(monitor) = &monitor {
                if threshold_reached_at.is_none()
                    && monitor.crossed(self.network.count(monitor.molecule))
                {
                    stop_time = t + monitor.delay;
                    threshold_reached_at = Some(t);
                    log::info!(
                        "t={:.4}: monitored molecule {} reached threshold {}, stopping at {:.4}",
                        t,
                        self.network.molecule(monitor.molecule).id(),
                        monitor.threshold,
                        stop_time
                    );
                }
            }

            let a0 = self.engine.refresh(&mut self.network);

            let mut tau = 0.0;
            let mut chosen = None;
            let exhausted = a0 <= 0.0 && !options.run_idle;
            if a0 > 0.0 {
                let (waiting, r1) = draw_waiting_time(rng, a0);
                if waiting == 0.0 {
                    self.dump_state(t);
                    return Err(SimError::ZeroWaitingTime { time: t, a0, r1 });
                }
                let r2 = a0 * (1.0 - rng.r#gen::<f64>());
                tau = waiting;
                chosen = Some(select_reaction(
                    self.network.reactions().iter().map(Reaction::propensity),
                    r2,
                ));
            } else if options.run_idle {
                tau = options.idle_tick;
            }

            // A pending event inside this step cuts it short. The waiting
            // time is memoryless, so redrawing after the event is exact.
            let mut next_t = t + tau;
            if !exhausted {
                if let Some(next_event) = self.scheduler.next_fire_time() {
                    if next_event > t && next_t >= next_event {
                        next_t = next_event;
                        chosen = None;
                    }
                }
            }

            let previous = t;
            t = next_t;

            // Samples show the counts in effect before this step's reaction.
            self.network.copy_counts_into(&mut counts);
            grid.emit_due(previous, t.min(stop_time), &counts, recorder);

            if options.trace_steps {
                recorder.record_step(&StepRecord {
                    time: t,
                    reaction: chosen,
                });
            }

            if let Some(r) = chosen {
                log::debug!(
                    "t={:.6}: [{}] {}",
                    t,
                    self.network.reaction(r).id(),
                    self.network.reaction(r).formula()
                );
                if let Err(err) = self.network.fire(r, t) {
                    self.dump_state(t);
                    return Err(err);
                }
                reactions_fired += 1;
            }
            steps += 1;

            if exhausted {
                log::debug!("t={:.6}: no reaction possible", t);
                self.scheduler.clear();
                termination = Termination::Exhausted;
                break;
            }
        }

        log::info!(
            "run finished at t={:.4} after {} steps ({} reactions fired, {:?})",
            t,
            steps,
            reactions_fired,
            termination
        );

        Ok(RunSummary {
            end_time: t,
            stop_time,
            steps,
            reactions_fired,
            threshold_reached_at,
            termination,
        })
    }

    /// Discards pending events so the simulation can be reused for a fresh run.
    pub fn clear_events(&mut self) {
        self.scheduler.clear();
    }

    fn dump_state(&self, t: f64) {
        log::error!("fatal condition at t={}", t);
        log::error!("\n{}", self.network.molecule_table());
        for reaction in self.network.reactions() {
            log::error!(
                "[{}] {} c={} h={} a={} inhibition={}",
                reaction.id(),
                reaction.formula(),
                reaction.stochastic_rate(),
                reaction.combinations(),
                reaction.propensity(),
                reaction.inhibition()
            );
        }
    }
}
