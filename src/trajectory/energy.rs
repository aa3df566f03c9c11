//! Energy Evaluator: Closed-Form Energy Along a Coordinate Sequence
//!
//! Coordinate derivatives are recomputed from Hamilton's equations at every
//! step, so any sequence can be checked: integrated ground truth, model
//! rollouts, or states decoded from elsewhere. The energy is then the
//! system's kinetic plus potential term evaluated on `(q, q̇)`.

use ndarray::{s, Array1, Array2, Array3, ArrayView3, Axis};

use crate::context::ExecutionContext;
use crate::control::{InputFunction, InputMatrix};
use crate::dynamics::HamiltonianDynamics;
use crate::error::{Error, Result};
use crate::systems::MechanicalSystem;

/// Returns `(energy [batch, time], derivatives [batch, time, coord])` for
/// `states [batch, time, coord]` sampled at `times`.
pub fn evaluate_energy<S: MechanicalSystem>(
    system: &S,
    states: ArrayView3<f64>,
    times: &[f64],
    input: &InputFunction,
    input_matrix: &dyn InputMatrix,
) -> Result<(Array2<f64>, Array3<f64>)> {
    let (batch, steps, coords) = states.dim();
    if times.len() != steps {
        return Err(Error::ShapeMismatch {
            context: "energy time grid",
            expected: vec![steps],
            found: vec![times.len()],
        });
    }
    let friction = system.friction();
    let dynamics = HamiltonianDynamics::new(
        system,
        input,
        input_matrix,
        &friction,
        ExecutionContext::inference(),
    );

    let mut energy = Array2::zeros((batch, steps));
    let mut derivatives = Array3::zeros((batch, steps, coords));
    for (k, &t) in times.iter().enumerate() {
        let x = states.index_axis(Axis(1), k);
        let dx = dynamics.coordinate_derivatives(t, x)?;
        energy
            .column_mut(k)
            .assign(&system.mechanical_energy(x, dx.view()));
        derivatives.slice_mut(s![.., k, ..]).assign(&dx);
    }
    Ok((energy, derivatives))
}

/// Energy of sequences stored as `(q1, q̇1, q2, q̇2, ...)` instead of momenta.
pub fn energy_from_velocities<S: MechanicalSystem>(system: &S, states: ArrayView3<f64>) -> Result<Array2<f64>> {
    let (batch, steps, coords) = states.dim();
    if coords != system.coord_dim() {
        return Err(Error::CoordinateMismatch {
            expected: system.coord_dim(),
            found: coords,
        });
    }
    let mut energy = Array2::zeros((batch, steps));
    for k in 0..steps {
        let x = states.index_axis(Axis(1), k);
        let mut velocities = Array2::zeros((batch, coords));
        for j in 0..coords / 2 {
            velocities.column_mut(2 * j).assign(&x.column(2 * j + 1));
        }
        energy
            .column_mut(k)
            .assign(&system.mechanical_energy(x, velocities.view()));
    }
    Ok(energy)
}

/// Largest deviation from the initial energy, per trajectory.
pub fn energy_drift(energy: &Array2<f64>) -> Array1<f64> {
    Array1::from_iter(energy.rows().into_iter().map(|row| {
        let e0 = row.first().copied().unwrap_or(0.0);
        row.iter().fold(0.0_f64, |acc, e| acc.max((e - e0).abs()))
    }))
}
