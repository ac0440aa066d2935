use nalgebra::DVector;
use tether_core::{OdeSystem, Scalar};

use super::{
    Error, Statistics,
    newton::{self, Caches, NewtonFailure, Outcome, Settings},
    statistics::SolveCounts,
};

/// Order of the step-doubling error estimate.
pub const ERROR_ESTIMATE_ORDER: u32 = 2;

/// A candidate state and its local error estimate.
#[derive(Debug, Clone)]
pub(super) struct Estimate<T: Scalar> {
    pub state: DVector<T>,
    pub error: DVector<T>,
}

#[derive(Debug)]
pub(super) enum Attempt<T: Scalar> {
    Completed(Estimate<T>),
    Failed(NewtonFailure),
}

/// Takes one implicit Euler step of `step_size` with a step-doubling error
/// estimate.
///
/// The full step gives `x_full` and two half steps give `x_half`. The
/// candidate is `x_half` and the error is `x_half − x_full`. Any failed
/// Newton solve fails the whole attempt. Work spent on the half steps is
/// counted in both the estimator counts and the totals.
pub(super) fn step_doubling<S: OdeSystem, T: Scalar>(
    system: &S,
    caches: &mut Caches<T>,
    settings: Settings,
    time: T,
    state: &DVector<T>,
    step_size: f64,
    statistics: &mut Statistics,
) -> Result<Attempt<T>, Error> {
    let mut counts = SolveCounts::default();
    let outcome = newton::solve(system, caches, settings, time, state, step_size, &mut counts);
    statistics.totals += counts;
    let full = match outcome? {
        Outcome::Converged(x) => x,
        Outcome::DidNotConverge(reason) => return Ok(Attempt::Failed(reason)),
    };

    let half = step_size / 2.0;
    let mut midpoint_time = time;
    let mut x_half = state.clone();
    for _ in 0..2 {
        let mut counts = SolveCounts::default();
        let outcome = newton::solve(
            system,
            caches,
            settings,
            midpoint_time,
            &x_half,
            half,
            &mut counts,
        );
        statistics.totals += counts;
        statistics.estimator += counts;
        x_half = match outcome? {
            Outcome::Converged(x) => x,
            Outcome::DidNotConverge(reason) => return Ok(Attempt::Failed(reason)),
        };
        midpoint_time = time + T::from_value(half);
    }

    let error = DVector::from_fn(state.len(), |i, _| x_half[i] - full[i]);
    Ok(Attempt::Completed(Estimate {
        state: x_half,
        error,
    }))
}
