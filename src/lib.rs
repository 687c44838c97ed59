//! Exact stochastic simulation of discrete reaction networks with
//! Gillespie's direct method.
//!
//! A [`ReactionNetwork`] is assembled with a [`NetworkBuilder`] (or read from
//! a `.gil` description with [`loader::load_file`]), wrapped in a
//! [`Simulation`], and run with [`RunOptions`]. Propensities are cached and
//! only recomputed for reactions whose reactant counts or inhibition changed
//! since the last step. Timed [`Perturbation`]s and arbitrary callbacks are
//! fired by the [`Scheduler`] at the start of the first step at or after
//! their scheduled time.

pub mod combinatorics;
pub mod loader;
pub mod network;
pub mod propensity;
pub mod scheduler;
pub mod simulation;

#[cfg(feature = "python")]
mod python;

pub use combinatorics::{BinomialTable, MAX_MULTIPLICITY};
pub use loader::{LoadedModel, ScheduledPerturbation, load_file, load_str};
pub use network::{COUNT_SANITY_LIMIT, Molecule, NetworkBuilder, Reaction, ReactionNetwork};
pub use propensity::PropensityEngine;
pub use scheduler::{EventHandler, EventTask, FireTimes, Perturbation, Scheduler};
pub use simulation::{
    Monitor, Recorder, RunOptions, RunSummary, Simulation, StepRecord, Termination, Trajectory,
    draw_waiting_time, select_reaction,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown molecule: {0}")]
    UnknownMolecule(String),
    #[error("unknown reaction: {0}")]
    UnknownReaction(String),
    #[error("duplicate molecule: {0}")]
    DuplicateMolecule(String),
    #[error("duplicate reaction: {0}")]
    DuplicateReaction(String),
    #[error("bad reaction formula '{formula}': {reason}")]
    Formula { formula: String, reason: String },
    #[error("reaction {reaction} consumes {multiplicity} copies of one molecule, limit is {limit}")]
    Multiplicity {
        reaction: String,
        multiplicity: u32,
        limit: u32,
    },
    #[error("no molecules specified")]
    NoMolecules,
    #[error("no reactions specified")]
    NoReactions,
    #[error("volume not specified")]
    MissingVolume,
    #[error("invalid inhibition level ({0}), must be between 0.0 and 1.0")]
    InhibitionLevel(f64),
    #[error("{file}, line {line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("molecule index {index} out of range ({count} molecules)")]
    MoleculeIndex { index: usize, count: usize },
    #[error("reaction index {index} out of range ({count} reactions)")]
    ReactionIndex { index: usize, count: usize },
    #[error("zero waiting time at t={time} (a0={a0}, r1={r1})")]
    ZeroWaitingTime { time: f64, a0: f64, r1: f64 },
    #[error("count of {molecule} reached {count} after reaction {reaction} at t={time}")]
    Runaway {
        time: f64,
        reaction: String,
        molecule: String,
        count: i64,
    },
}

pub type Result<T> = std::result::Result<T, SimError>;
