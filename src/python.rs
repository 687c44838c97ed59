use numpy::{
    Element, PyArray1, PyArray2, PyArrayMethods, PyReadonlyArray1, PyReadonlyArray2,
    PyUntypedArrayMethods,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyAnyMethods, PyDict};

use crate::network::NetworkBuilder;
use crate::scheduler::Perturbation;
use crate::simulation::{Monitor, RunOptions, Simulation, Trajectory};
use crate::SimError;

impl From<SimError> for PyErr {
    fn from(err: SimError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

fn flatten_pyarray2<T: Copy + Element>(
    array: PyReadonlyArray2<T>,
    name: &str,
) -> Result<(usize, usize, Vec<T>), SimError> {
    let shape = array.shape();
    let data = array
        .as_slice()
        .map_err(|_| SimError::InvalidArgument(format!("{name} must be contiguous")))?;
    Ok((shape[0], shape[1], data.to_vec()))
}

fn stoichiometry_rows(
    array: PyReadonlyArray2<i32>,
    name: &str,
    n_reactions: usize,
    n_molecules: usize,
) -> Result<Vec<Vec<u32>>, SimError> {
    let (rows, cols, flat) = flatten_pyarray2(array, name)?;
    if rows != n_reactions || cols != n_molecules {
        return Err(SimError::InvalidArgument(format!(
            "{name} shape ({rows}, {cols}) does not match ({n_reactions}, {n_molecules})"
        )));
    }
    flat.chunks(cols.max(1))
        .map(|row| {
            row.iter()
                .map(|&v| {
                    u32::try_from(v).map_err(|_| {
                        SimError::InvalidArgument(format!("{name} entries must be non-negative"))
                    })
                })
                .collect()
        })
        .collect()
}

fn parse_perturbations(
    perturbations: Option<Bound<'_, PyAny>>,
    n_molecules: usize,
    n_reactions: usize,
) -> Result<Vec<(f64, Perturbation)>, SimError> {
    let mut events = Vec::new();
    let Some(obj) = perturbations else {
        return Ok(events);
    };
    if obj.is_none() {
        return Ok(events);
    }
    let py = obj.py();
    let entries: Vec<Py<PyAny>> = obj.extract().map_err(|_| {
        SimError::InvalidArgument("perturbations must be a sequence of mappings".into())
    })?;
    for raw in entries {
        let bound = raw.bind(py);
        let dict = bound.cast::<PyDict>().map_err(|_| {
            SimError::InvalidArgument("each perturbation must be a mapping".into())
        })?;
        let time: f64 = dict
            .get_item("time")
            .ok()
            .flatten()
            .ok_or_else(|| SimError::InvalidArgument("perturbation missing 'time'".into()))?
            .extract()
            .map_err(|_| SimError::InvalidArgument("perturbation time must be a float".into()))?;
        if !time.is_finite() || time < 0.0 {
            return Err(SimError::InvalidArgument(
                "perturbation times must be finite and non-negative".into(),
            ));
        }
        if let Some(list) = dict.get_item("set_count").ok().flatten() {
            if !list.is_none() {
                let pairs: Vec<(usize, u32)> = list.extract().map_err(|_| {
                    SimError::InvalidArgument(
                        "set_count must be a sequence of (molecule, count) pairs".into(),
                    )
                })?;
                for (molecule, count) in pairs {
                    if molecule >= n_molecules {
                        return Err(SimError::MoleculeIndex {
                            index: molecule,
                            count: n_molecules,
                        });
                    }
                    events.push((time, Perturbation::SetCount { molecule, count }));
                }
            }
        }
        if let Some(list) = dict.get_item("set_inhibition").ok().flatten() {
            if !list.is_none() {
                let pairs: Vec<(usize, f64)> = list.extract().map_err(|_| {
                    SimError::InvalidArgument(
                        "set_inhibition must be a sequence of (reaction, level) pairs".into(),
                    )
                })?;
                for (reaction, level) in pairs {
                    if reaction >= n_reactions {
                        return Err(SimError::ReactionIndex {
                            index: reaction,
                            count: n_reactions,
                        });
                    }
                    if !(0.0..=1.0).contains(&level) {
                        return Err(SimError::InhibitionLevel(level));
                    }
                    events.push((time, Perturbation::SetInhibition { reaction, level }));
                }
            }
        }
    }
    Ok(events)
}

/// Runs one trajectory and returns `(times, counts)`, with `counts` shaped
/// `(len(times), len(molecule_ids))`.
#[pyfunction(signature = (
    molecule_ids,
    initial_counts,
    left,
    right,
    rate_constants,
    volume,
    stop_time,
    plot_interval=None,
    reaction_ids=None,
    run_idle=true,
    idle_tick=0.3,
    monitor=None,
    perturbations=None,
    seed=None
))]
#[allow(clippy::too_many_arguments)]
pub fn simulate<'py>(
    py: Python<'py>,
    molecule_ids: Vec<String>,
    initial_counts: PyReadonlyArray1<u32>,
    left: PyReadonlyArray2<i32>,
    right: PyReadonlyArray2<i32>,
    rate_constants: PyReadonlyArray1<f64>,
    volume: f64,
    stop_time: f64,
    plot_interval: Option<f64>,
    reaction_ids: Option<Vec<String>>,
    run_idle: bool,
    idle_tick: f64,
    monitor: Option<(String, f64, f64)>,
    perturbations: Option<Py<PyAny>>,
    seed: Option<u64>,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray2<u32>>)> {
    let n_molecules = molecule_ids.len();
    let counts = initial_counts
        .as_slice()
        .map_err(|_| PyValueError::new_err("initial_counts must be contiguous"))?
        .to_vec();
    if counts.len() != n_molecules {
        return Err(PyValueError::new_err(format!(
            "initial_counts length {} does not match molecule count {}",
            counts.len(),
            n_molecules
        )));
    }
    let rates = rate_constants
        .as_slice()
        .map_err(|_| PyValueError::new_err("rate_constants must be contiguous"))?
        .to_vec();
    let n_reactions = rates.len();
    let left = stoichiometry_rows(left, "left", n_reactions, n_molecules)?;
    let right = stoichiometry_rows(right, "right", n_reactions, n_molecules)?;
    if let Some(ids) = &reaction_ids {
        if ids.len() != n_reactions {
            return Err(PyValueError::new_err(format!(
                "reaction_ids length {} does not match reaction count {}",
                ids.len(),
                n_reactions
            )));
        }
    }

    let mut builder = NetworkBuilder::new();
    builder.volume(volume);
    for (id, &count) in molecule_ids.iter().zip(&counts) {
        builder.add_molecule(id, count, "")?;
    }
    for (r, ((l, rt), k)) in left.into_iter().zip(right).zip(rates).enumerate() {
        let id = match &reaction_ids {
            Some(ids) => ids[r].clone(),
            None => format!("R{r}"),
        };
        builder.add_reaction_stoich(&id, l, rt, k, "")?;
    }
    let network = builder.build()?;
    let events = parse_perturbations(
        perturbations.map(|p| p.into_bound(py)),
        n_molecules,
        n_reactions,
    )?;

    let options = RunOptions {
        plot_interval: plot_interval.unwrap_or(stop_time / 1000.0),
        stop_time,
        monitor: monitor.map(|(molecule, threshold, delay)| Monitor {
            molecule,
            threshold,
            delay,
        }),
        run_idle,
        idle_tick,
        seed,
        trace_steps: false,
    };

    let trajectory = py.detach(move || -> Result<Trajectory, SimError> {
        let mut sim = Simulation::new(network);
        for (time, perturbation) in events {
            sim.schedule(time, perturbation)?;
        }
        let mut trajectory = Trajectory::new(n_molecules);
        sim.run(&options, &mut trajectory)?;
        Ok(trajectory)
    })?;

    let times = PyArray1::from_slice(py, trajectory.times());
    let counts = PyArray1::from_slice(py, trajectory.counts())
        .reshape([trajectory.len(), n_molecules])?;
    Ok((times, counts))
}

#[pymodule]
fn gilrs(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(simulate, module)?)?;
    Ok(())
}
