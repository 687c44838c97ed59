use std::collections::VecDeque;
use std::fmt;

use crate::{Result, SimError};
use crate::network::ReactionNetwork;

/// Times passed to an event when it fires.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FireTimes {
    /// The time the event was scheduled for.
    pub scheduled: f64,
    /// The simulated time at which it actually fired (never earlier).
    pub now: f64,
}

pub type UnitCallback<C> = fn(&mut C, FireTimes) -> Result<()>;
pub type IntegerCallback<C> = fn(&mut C, FireTimes, u64) -> Result<()>;
pub type FloatCallback<C> = fn(&mut C, FireTimes, f64) -> Result<()>;

/// A one-shot handler that owns its payload. The payload is consumed by
/// `fire` and dropped once the handler returns.
pub trait EventHandler<C> {
    fn fire(self: Box<Self>, ctx: &mut C, times: FireTimes) -> Result<()>;
}

impl<C, F> EventHandler<C> for F
where
    F: FnOnce(&mut C, FireTimes) -> Result<()>,
{
    fn fire(self: Box<Self>, ctx: &mut C, times: FireTimes) -> Result<()> {
        (*self)(ctx, times)
    }
}

pub enum EventTask<C> {
    Unit(UnitCallback<C>),
    Integer(IntegerCallback<C>, u64),
    Float(FloatCallback<C>, f64),
    Owned(Box<dyn EventHandler<C>>),
}

impl<C> EventTask<C> {
    fn run(self, ctx: &mut C, times: FireTimes) -> Result<()> {
        match self {
            EventTask::Unit(cb) => cb(ctx, times),
            EventTask::Integer(cb, data) => cb(ctx, times, data),
            EventTask::Float(cb, data) => cb(ctx, times, data),
            EventTask::Owned(handler) => handler.fire(ctx, times),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            EventTask::Unit(_) => "unit",
            EventTask::Integer(..) => "integer",
            EventTask::Float(..) => "float",
            EventTask::Owned(_) => "owned",
        }
    }
}

struct ScheduledEvent<C> {
    time: f64,
    task: EventTask<C>,
}

/// Pending one-shot events kept in non-decreasing order of fire time.
/// Events with equal times fire in the order they were scheduled.
pub struct Scheduler<C> {
    queue: VecDeque<ScheduledEvent<C>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.queue.iter().map(|e| (e.time, e.task.kind())))
            .finish()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` at `time`. Fire times must be finite: a NaN would sort
    /// ahead of every event and never come due.
    pub fn schedule(&mut self, time: f64, task: EventTask<C>) -> Result<()> {
        if !time.is_finite() {
            return Err(SimError::InvalidArgument(format!(
                "event fire time must be finite, got {time}"
            )));
        }
        // insert after every event already due at or before `time`
        let pos = self.queue.partition_point(|e| e.time <= time);
        self.queue.insert(pos, ScheduledEvent { time, task });
        Ok(())
    }

    pub fn schedule_unit(&mut self, time: f64, cb: UnitCallback<C>) -> Result<()> {
        self.schedule(time, EventTask::Unit(cb))
    }

    pub fn schedule_integer(
        &mut self,
        time: f64,
        cb: IntegerCallback<C>,
        data: u64,
    ) -> Result<()> {
        self.schedule(time, EventTask::Integer(cb, data))
    }

    pub fn schedule_float(&mut self, time: f64, cb: FloatCallback<C>, data: f64) -> Result<()> {
        self.schedule(time, EventTask::Float(cb, data))
    }

    pub fn schedule_handler<H>(&mut self, time: f64, handler: H) -> Result<()>
    where
        H: EventHandler<C> + 'static,
    {
        self.schedule(time, EventTask::Owned(Box::new(handler)))
    }

    pub fn schedule_once<F>(&mut self, time: f64, f: F) -> Result<()>
    where
        F: FnOnce(&mut C, FireTimes) -> Result<()> + 'static,
    {
        self.schedule_handler(time, f)
    }

    /// Fires, in order, every event due at or before `now`. Later events stay
    /// queued. Returns the number of events fired.
    pub fn process_due(&mut self, now: f64, ctx: &mut C) -> Result<usize> {
        let mut fired = 0;
        while self.queue.front().is_some_and(|e| e.time <= now) {
            let Some(event) = self.queue.pop_front() else {
                break;
            };
            let times = FireTimes {
                scheduled: event.time,
                now,
            };
            event.task.run(ctx, times)?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Drops all pending events without firing them.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn next_fire_time(&self) -> Option<f64> {
        self.queue.front().map(|e| e.time)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Timed changes a network description can request.
#[derive(Clone, Debug, PartialEq)]
pub enum Perturbation {
    SetCount { molecule: usize, count: u32 },
    SetInhibition { reaction: usize, level: f64 },
}

impl Perturbation {
    pub fn apply(&self, network: &mut ReactionNetwork) -> Result<()> {
        match *self {
            Perturbation::SetCount { molecule, count } => network.set_count(molecule, count),
            Perturbation::SetInhibition { reaction, level } => {
                network.set_inhibition(reaction, level)
            }
        }
    }
}

impl EventHandler<ReactionNetwork> for Perturbation {
    fn fire(self: Box<Self>, network: &mut ReactionNetwork, times: FireTimes) -> Result<()> {
        log::debug!(
            "t={:.4}: applying {:?} (scheduled for {:.4})",
            times.now,
            self,
            times.scheduled
        );
        self.apply(network)
    }
}
