//! Trajectory Generator: Ground-Truth Data from the Physical System
//!
//! One call samples initial states, integrates the analytic dynamics once
//! with RK4 at the sampling interval, and optionally perturbs the result with
//! Gaussian noise:
//!
//! ```text
//! q ← q + N(0, σ)
//! p ← p + N(0, σ) · max|p|      (max over the whole momentum channel)
//! ```
//!
//! The momentum scaling is a heuristic, not a normalisation with a
//! statistical derivation.
//!
//! With [`CoordinateKind::Newtonian`] each momentum column is replaced by the
//! velocity `q̇ = ∂H/∂p` (plus any input term) before noise is added, so the
//! stored pairs are `(q, q̇)`.

use ndarray::{s, Array2, Array3, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use super::energy::{energy_from_velocities, evaluate_energy};
use super::init::{InitPolicy, InitialConditions};
use crate::context::ExecutionContext;
use crate::control::{InputFunction, InputMatrix};
use crate::dynamics::{integrate, stack_states, HamiltonianDynamics, TimeGrid};
use crate::error::{Error, Result};
use crate::systems::MechanicalSystem;

/// What the odd coordinate columns of stored trajectories hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateKind {
    /// Conjugate momenta `(q, p)`
    #[default]
    Hamiltonian,
    /// Velocities `(q, q̇)`
    Newtonian,
}

impl FromStr for CoordinateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hamiltonian" => Ok(CoordinateKind::Hamiltonian),
            "newtonian" => Ok(CoordinateKind::Newtonian),
            other => Err(Error::InvalidConfig(format!("unknown coordinate type '{other}'"))),
        }
    }
}

/// Sizes and noise level of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub init: InitPolicy,
    pub num_trajectories: usize,
    pub time_steps: usize,
    #[serde(default)]
    pub noise_std: f64,
    #[serde(default)]
    pub coord_type: CoordinateKind,
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_trajectories == 0 || self.time_steps == 0 {
            return Err(Error::InvalidConfig("nothing to generate".into()));
        }
        if !(self.noise_std >= 0.0 && self.noise_std.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "noise_std {} must be finite and non-negative",
                self.noise_std
            )));
        }
        Ok(())
    }
}

/// Plain-data trajectories, `[batch, time, coord]` sampled on `times`.
#[derive(Debug, Clone)]
pub struct Trajectories {
    pub states: Array3<f64>,
    pub times: TimeGrid,
    pub coord_type: CoordinateKind,
}

impl Trajectories {
    pub fn num_trajectories(&self) -> usize {
        self.states.len_of(Axis(0))
    }

    pub fn time_steps(&self) -> usize {
        self.states.len_of(Axis(1))
    }

    pub fn coord_dim(&self) -> usize {
        self.states.len_of(Axis(2))
    }

    /// Time grid replicated once per trajectory, as a data loader expects.
    pub fn time_matrix(&self) -> Array2<f64> {
        let row = self.times.to_array();
        Array2::from_shape_fn((self.num_trajectories(), row.len()), |(_, k)| row[k])
    }
}

/// Trajectories plus the energy check evaluated on them.
#[derive(Debug, Clone)]
pub struct TrajectoriesWithEnergy {
    pub trajectories: Trajectories,
    /// `[batch, time]`
    pub energy: Array2<f64>,
    /// `[batch, time, coord]` from Hamilton's equations; `None` for
    /// Newtonian data, which carries no momenta to evaluate them on.
    pub derivatives: Option<Array3<f64>>,
}

/// Integrates `system` from the requested initial conditions.
pub fn generate<S, R>(
    system: &S,
    initial: &InitialConditions,
    config: &GenerationConfig,
    input: &InputFunction,
    input_matrix: &dyn InputMatrix,
    rng: &mut R,
) -> Result<Trajectories>
where
    S: MechanicalSystem,
    R: Rng + ?Sized,
{
    config.validate()?;
    let y0 = initial.resolve(config.num_trajectories, system.coord_dim(), rng)?;
    let ts = system.sampling_time();
    let times = TimeGrid::uniform(config.time_steps, ts)?;

    let friction = system.friction();
    let dynamics = HamiltonianDynamics::new(
        system,
        input,
        input_matrix,
        &friction,
        ExecutionContext::inference(),
    );
    let path = integrate(&dynamics, &y0, &times, ts)?;
    let mut states = stack_states(&path)?;
    if config.coord_type == CoordinateKind::Newtonian {
        momenta_to_velocities(&dynamics, &mut states, times.times())?;
    }

    if config.noise_std > 0.0 {
        add_noise(&mut states, config.noise_std, rng)?;
    }

    info!(
        system = system.name(),
        trajectories = y0.nrows(),
        time_steps = config.time_steps,
        noise_std = config.noise_std,
        coord_type = ?config.coord_type,
        "generated trajectories"
    );
    Ok(Trajectories {
        states,
        times,
        coord_type: config.coord_type,
    })
}

/// [`generate`] followed by the energy evaluation of the result.
pub fn generate_with_energy<S, R>(
    system: &S,
    initial: &InitialConditions,
    config: &GenerationConfig,
    input: &InputFunction,
    input_matrix: &dyn InputMatrix,
    rng: &mut R,
) -> Result<TrajectoriesWithEnergy>
where
    S: MechanicalSystem,
    R: Rng + ?Sized,
{
    let trajectories = generate(system, initial, config, input, input_matrix, rng)?;
    let (energy, derivatives) = match trajectories.coord_type {
        CoordinateKind::Hamiltonian => {
            let (energy, derivatives) = evaluate_energy(
                system,
                trajectories.states.view(),
                trajectories.times.times(),
                input,
                input_matrix,
            )?;
            (energy, Some(derivatives))
        }
        CoordinateKind::Newtonian => (energy_from_velocities(system, trajectories.states.view())?, None),
    };
    Ok(TrajectoriesWithEnergy {
        trajectories,
        energy,
        derivatives,
    })
}

fn momenta_to_velocities(dynamics: &HamiltonianDynamics<'_>, states: &mut Array3<f64>, times: &[f64]) -> Result<()> {
    let dof = states.len_of(Axis(2)) / 2;
    for (k, &t) in times.iter().enumerate() {
        let dx = dynamics.coordinate_derivatives(t, states.index_axis(Axis(1), k))?;
        for j in 0..dof {
            states.slice_mut(s![.., k, 2 * j + 1]).assign(&dx.column(2 * j));
        }
    }
    Ok(())
}

fn add_noise<R: Rng + ?Sized>(states: &mut Array3<f64>, std: f64, rng: &mut R) -> Result<()> {
    let normal = Normal::new(0.0, std).map_err(|e| Error::Distribution(e.to_string()))?;
    for (c, mut channel) in states.axis_iter_mut(Axis(2)).enumerate() {
        let scale = if c % 2 == 0 {
            1.0
        } else {
            channel.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
        };
        channel.mapv_inplace(|v| v + normal.sample(rng) * scale);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StaticInputMatrix;
    use crate::systems::{FurutaPendulum, SimplePendulum};
    use crate::trajectory::energy_drift;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(n: usize, steps: usize, noise: f64) -> GenerationConfig {
        GenerationConfig {
            init: InitPolicy::AwayFromZero,
            num_trajectories: n,
            time_steps: steps,
            noise_std: noise,
            coord_type: CoordinateKind::Hamiltonian,
        }
    }

    #[test]
    fn test_simple_pendulum_conserves_energy() {
        let mut rng = StdRng::seed_from_u64(2024);
        let system = SimplePendulum::default();
        let cfg = config(10, 20, 0.0);
        let out = generate_with_energy(
            &system,
            &cfg.init.into(),
            &cfg,
            &InputFunction::Zero,
            &StaticInputMatrix::Zero,
            &mut rng,
        )
        .unwrap();
        assert_eq!(out.trajectories.states.dim(), (10, 20, 2));
        assert_eq!(out.energy.dim(), (10, 20));
        // RK4 is not symplectic; the drift is small relative to the energy
        for (b, drift) in energy_drift(&out.energy).iter().enumerate() {
            let e0 = out.energy[[b, 0]];
            assert!(*drift <= 1e-4 * e0.max(1.0), "trajectory {b}: drift {drift} from {e0}");
        }
    }

    #[test]
    fn test_first_step_is_initial_state() {
        let mut rng = StdRng::seed_from_u64(1);
        let system = FurutaPendulum::default();
        let y0 = array![[0.5, 0.0, 3.0, 0.0]];
        let out = generate(
            &system,
            &InitialConditions::Explicit(y0.clone()),
            &config(1, 5, 0.0),
            &InputFunction::Zero,
            &StaticInputMatrix::Zero,
            &mut rng,
        )
        .unwrap();
        assert_eq!(out.states.index_axis(Axis(1), 0), y0);
        assert_eq!(out.times.times()[0], 0.005);
        assert_eq!(out.time_matrix().dim(), (1, 5));
    }

    #[test]
    fn test_noise_is_seeded_and_scaled() {
        let system = SimplePendulum::default();
        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            generate(
                &system,
                &InitPolicy::NearZero.into(),
                &config(4, 10, 0.01),
                &InputFunction::Zero,
                &StaticInputMatrix::Zero,
                &mut rng,
            )
            .unwrap()
            .states
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }

    #[test]
    fn test_unknown_coordinate_count_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = generate(
            &SimplePendulum::default(),
            &InitialConditions::Explicit(Array2::zeros((2, 4))),
            &config(2, 3, 0.0),
            &InputFunction::Zero,
            &StaticInputMatrix::Zero,
            &mut rng,
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_negative_or_nan_noise_rejected() {
        for noise in [-0.1, f64::NAN, f64::INFINITY] {
            let mut rng = StdRng::seed_from_u64(0);
            let err = generate(
                &SimplePendulum::default(),
                &InitPolicy::NearZero.into(),
                &config(2, 3, noise),
                &InputFunction::Zero,
                &StaticInputMatrix::Zero,
                &mut rng,
            )
            .unwrap_err();
            assert!(err.is_config(), "noise {noise} accepted");
        }
    }

    #[test]
    fn test_newtonian_furuta_stores_velocities() {
        let system = FurutaPendulum::default();
        let y0 = array![[2.5, 1e-4, 0.3, -2e-4], [3.0, 0.0, -0.1, 1e-4]];
        let input = InputFunction::Zero;
        let g = StaticInputMatrix::torque(4);
        let run = |coord_type: CoordinateKind| {
            let cfg = GenerationConfig {
                coord_type,
                ..config(2, 6, 0.0)
            };
            let mut rng = StdRng::seed_from_u64(4);
            generate_with_energy(&system, &InitialConditions::Explicit(y0.clone()), &cfg, &input, &g, &mut rng)
                .unwrap()
        };
        let hamiltonian = run(CoordinateKind::Hamiltonian);
        let newtonian = run(CoordinateKind::Newtonian);
        assert_eq!(newtonian.trajectories.coord_type, CoordinateKind::Newtonian);
        assert!(newtonian.derivatives.is_none());

        let states_p = &hamiltonian.trajectories.states;
        let states_v = &newtonian.trajectories.states;
        let derivatives = hamiltonian.derivatives.as_ref().unwrap();
        for b in 0..2 {
            for k in 0..6 {
                for j in 0..2 {
                    assert_eq!(states_v[[b, k, 2 * j]], states_p[[b, k, 2 * j]]);
                    approx::assert_abs_diff_eq!(
                        states_v[[b, k, 2 * j + 1]],
                        derivatives[[b, k, 2 * j]],
                        epsilon = 1e-12
                    );
                }
            }
        }
        for (a, b) in newtonian.energy.iter().zip(hamiltonian.energy.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_coordinate_kind_tags() {
        assert_eq!("newtonian".parse::<CoordinateKind>().unwrap(), CoordinateKind::Newtonian);
        assert!("lagrangian".parse::<CoordinateKind>().unwrap_err().is_config());
    }
}
