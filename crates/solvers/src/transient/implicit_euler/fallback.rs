use nalgebra::DVector;
use tether_core::{OdeSystem, Scalar};

use super::{Error, estimator::Estimate, statistics::SolveCounts};

/// Takes an explicit Euler step, estimating its error against an explicit
/// trapezoid (Heun) step.
///
/// Used only when the step is too small for the implicit formula to be
/// meaningful. Costs two derivative evaluations.
pub(super) fn explicit_step<S: OdeSystem, T: Scalar>(
    system: &S,
    time: T,
    state: &DVector<T>,
    step_size: f64,
    counts: &mut SolveCounts,
) -> Result<Estimate<T>, Error> {
    let n = state.len();
    let h = T::from_value(step_size);
    let half = T::from_value(step_size / 2.0);

    let start = evaluate(system, time, state, counts)?;
    let euler = DVector::from_fn(n, |i, _| state[i] + h * start[i]);

    let end = evaluate(system, time + h, &euler, counts)?;
    let heun = DVector::from_fn(n, |i, _| state[i] + half * (start[i] + end[i]));

    let error = DVector::from_fn(n, |i, _| heun[i] - euler[i]);
    Ok(Estimate {
        state: euler,
        error,
    })
}

fn evaluate<S: OdeSystem, T: Scalar>(
    system: &S,
    time: T,
    state: &DVector<T>,
    counts: &mut SolveCounts,
) -> Result<DVector<T>, Error> {
    let derivative = system.derivative(time, state).map_err(Error::system)?;
    counts.derivative_evaluations += 1;
    if derivative.len() != state.len() {
        return Err(Error::DimensionMismatch {
            expected: state.len(),
            actual: derivative.len(),
        });
    }
    Ok(derivative)
}
