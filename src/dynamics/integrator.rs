//! Integrator: Fixed-Step Classical Runge-Kutta
//!
//! For each output interval `[t_i, t_{i+1}]` the solver takes
//! `n = ceil((t_{i+1} − t_i) / step_size)` equal sub-steps of
//! `h = (t_{i+1} − t_i) / n`, so every requested time is hit exactly while
//! no sub-step exceeds `step_size`:
//!
//! ```text
//! k1 = f(t, y)
//! k2 = f(t + h/2, y + h/2 k1)
//! k3 = f(t + h/2, y + h/2 k2)
//! k4 = f(t + h, y + h k3)
//! y ← y + h/6 (k1 + 2 k2 + 2 k3 + k4)
//! ```
//!
//! The same routine steps plain arrays (data generation) and tape vars
//! (training, where the loss is differentiated through every stage).

use ndarray::{Array1, Array2, Array3, Axis};

use super::vector_field::VectorField;
use crate::autodiff::Var;
use crate::error::{Error, Result};

/// State that the integrator can combine linearly.
pub trait OdeState: Clone {
    /// `self + h * k`
    fn axpy(&self, h: f64, k: &Self) -> Self;
}

impl OdeState for Array2<f64> {
    fn axpy(&self, h: f64, k: &Self) -> Self {
        self + &(k * h)
    }
}

impl OdeState for Var {
    fn axpy(&self, h: f64, k: &Self) -> Self {
        self + &(k * h)
    }
}

/// Strictly increasing output times.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    pub fn new(times: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(Error::InvalidConfig("time grid is empty".into()));
        }
        for (index, t) in times.iter().enumerate() {
            if !t.is_finite() || (index > 0 && *t <= times[index - 1]) {
                return Err(Error::NonMonotonicTimeGrid { index });
            }
        }
        Ok(Self { times })
    }

    /// `t_k = k · ts` for `k = 1..=steps`.
    pub fn uniform(steps: usize, ts: f64) -> Result<Self> {
        if !(ts > 0.0 && ts.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "sampling time must be positive, got {ts}"
            )));
        }
        Self::new((1..=steps).map(|k| k as f64 * ts).collect())
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The first `horizon` times.
    pub fn truncated(&self, horizon: usize) -> Result<Self> {
        if horizon == 0 || horizon > self.len() {
            return Err(Error::HorizonTooLong {
                horizon,
                length: self.len(),
            });
        }
        Ok(Self {
            times: self.times[..horizon].to_vec(),
        })
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from_vec(self.times.clone())
    }
}

fn rk4_step<S, F>(field: &F, t: f64, y: &S, h: f64) -> Result<S>
where
    S: OdeState,
    F: VectorField<S> + ?Sized,
{
    let k1 = field.derivative(t, y)?;
    let k2 = field.derivative(t + 0.5 * h, &y.axpy(0.5 * h, &k1))?;
    let k3 = field.derivative(t + 0.5 * h, &y.axpy(0.5 * h, &k2))?;
    let k4 = field.derivative(t + h, &y.axpy(h, &k3))?;
    Ok(y.axpy(h / 6.0, &k1)
        .axpy(h / 3.0, &k2)
        .axpy(h / 3.0, &k3)
        .axpy(h / 6.0, &k4))
}

/// Integrates `field` from `y0` at `grid[0]`, returning one state per grid time
/// (`output[0]` is `y0`).
pub fn integrate<S, F>(field: &F, y0: &S, grid: &TimeGrid, step_size: f64) -> Result<Vec<S>>
where
    S: OdeState,
    F: VectorField<S> + ?Sized,
{
    if !(step_size > 0.0 && step_size.is_finite()) {
        return Err(Error::InvalidConfig(format!(
            "integrator step size must be positive, got {step_size}"
        )));
    }
    let times = grid.times();
    let mut states = Vec::with_capacity(times.len());
    states.push(y0.clone());

    for window in times.windows(2) {
        let (t0, t1) = (window[0], window[1]);
        let span = t1 - t0;
        // tolerate grids built as k * ts, whose spacing is off by an ulp
        let substeps = ((span / step_size) - 1e-9).ceil().max(1.0) as usize;
        let h = span / substeps as f64;

        let mut y = states[states.len() - 1].clone();
        for s in 0..substeps {
            y = rk4_step(field, t0 + s as f64 * h, &y, h)?;
        }
        states.push(y);
    }
    Ok(states)
}

/// Stacks per-time `[batch, coord]` states into `[batch, time, coord]`.
pub fn stack_states(states: &[Array2<f64>]) -> Result<Array3<f64>> {
    let Some(first) = states.first() else {
        return Err(Error::InvalidConfig("no states to stack".into()));
    };
    if let Some(odd) = states.iter().find(|s| s.dim() != first.dim()) {
        return Err(Error::ShapeMismatch {
            context: "stacked trajectory states",
            expected: first.shape().to_vec(),
            found: odd.shape().to_vec(),
        });
    }
    let views: Vec<_> = states.iter().map(|s| s.view()).collect();
    ndarray::stack(Axis(1), &views).map_err(|e| Error::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Tape;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    struct Zero;

    impl VectorField<Array2<f64>> for Zero {
        fn derivative(&self, _t: f64, y: &Array2<f64>) -> Result<Array2<f64>> {
            Ok(Array2::zeros(y.raw_dim()))
        }
    }

    /// q̇ = p, ṗ = −q
    struct Oscillator;

    impl VectorField<Array2<f64>> for Oscillator {
        fn derivative(&self, _t: f64, y: &Array2<f64>) -> Result<Array2<f64>> {
            let mut d = Array2::zeros(y.raw_dim());
            for (mut out, row) in d.rows_mut().into_iter().zip(y.rows()) {
                out[0] = row[1];
                out[1] = -row[0];
            }
            Ok(d)
        }
    }

    /// ẏ = a y on the tape, with `a` a differentiable leaf.
    struct Growth {
        a: Var,
    }

    impl VectorField<Var> for Growth {
        fn derivative(&self, _t: f64, y: &Var) -> Result<Var> {
            Ok(y * &self.a.broadcast_rows(y.shape().0))
        }
    }

    #[test]
    fn test_zero_field_keeps_initial_state() {
        let y0 = array![[0.3, -1.2], [2.0, 0.0]];
        let grid = TimeGrid::uniform(15, 0.05).unwrap();
        let states = integrate(&Zero, &y0, &grid, 0.01).unwrap();
        assert_eq!(states.len(), 15);
        for s in &states {
            assert_eq!(s, &y0);
        }
    }

    #[test]
    fn test_oscillator_matches_closed_form() {
        let y0 = array![[1.0, 0.0]];
        let grid = TimeGrid::uniform(40, 0.1).unwrap();
        // coarse step forces 4 sub-steps of 0.025 per interval
        let states = integrate(&Oscillator, &y0, &grid, 0.03).unwrap();
        for (k, s) in states.iter().enumerate() {
            let dt = grid.times()[k] - grid.times()[0];
            assert_abs_diff_eq!(s[[0, 0]], dt.cos(), epsilon = 1e-6);
            assert_abs_diff_eq!(s[[0, 1]], -dt.sin(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gradient_through_solver() {
        let tape = Tape::new();
        let a = tape.leaf(array![[0.5]]);
        let y0 = tape.constant(array![[2.0]]);
        let grid = TimeGrid::new(vec![0.0, 1.0]).unwrap();
        let states = integrate(&Growth { a: a.clone() }, &y0, &grid, 0.05).unwrap();
        let end = &states[1];
        assert_abs_diff_eq!(end.item(), 2.0 * 0.5f64.exp(), epsilon = 1e-6);
        // d/da (y0 e^{aT}) = T y0 e^{aT}
        let da = tape.grad(end, &[a.clone()]).unwrap().remove(0);
        assert_abs_diff_eq!(da.item(), 2.0 * 0.5f64.exp(), epsilon = 1e-5);
    }

    #[test]
    fn test_invalid_step_and_grid() {
        let grid = TimeGrid::uniform(3, 0.1).unwrap();
        let y0 = array![[0.0, 0.0]];
        assert!(integrate(&Zero, &y0, &grid, 0.0).unwrap_err().is_config());
        assert!(matches!(
            TimeGrid::new(vec![0.0, 0.2, 0.1]),
            Err(Error::NonMonotonicTimeGrid { index: 2 })
        ));
    }

    #[test]
    fn test_stack_states_layout() {
        let states = vec![array![[1.0, 2.0]], array![[3.0, 4.0]], array![[5.0, 6.0]]];
        let stacked = stack_states(&states).unwrap();
        assert_eq!(stacked.dim(), (1, 3, 2));
        assert_eq!(stacked[[0, 2, 1]], 6.0);
    }
}
