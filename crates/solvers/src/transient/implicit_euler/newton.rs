use log::debug;
use nalgebra::DVector;
use tether_core::{OdeSystem, Scalar};

use super::{
    Error, JacobianScheme, SolveCounts, iteration_matrix::IterationMatrixSolver,
    jacobian::JacobianManager, norm::weighted_norm,
};

/// Iteration budget for one Newton solve.
pub(super) const MAX_ITERATIONS: usize = 10;

/// Fraction of the accuracy in use that an update norm must fall below.
pub(super) const CONVERGENCE_FRACTION: f64 = 0.1;

/// Why a Newton solve did not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonFailure {
    /// The update norm grew on two consecutive iterations, or became
    /// non-finite.
    Diverged,

    /// The iteration budget ran out.
    MaxIterations,

    /// The iteration matrix `I − h·J` could not be factored.
    SingularIterationMatrix,
}

#[derive(Debug)]
pub(super) enum Outcome<T: Scalar> {
    Converged(DVector<T>),
    DidNotConverge(NewtonFailure),
}

/// Settings shared by every Newton solve of a step attempt.
#[derive(Debug, Clone, Copy)]
pub(super) struct Settings {
    pub scheme: JacobianScheme,
    pub reuse: bool,
    pub accuracy: f64,
}

/// The Jacobian and iteration-matrix caches.
#[derive(Debug)]
pub(super) struct Caches<T: Scalar> {
    pub jacobian: JacobianManager<T>,
    pub iteration: IterationMatrixSolver<T>,
}

impl<T: Scalar> Caches<T> {
    pub fn new() -> Self {
        Self {
            jacobian: JacobianManager::new(),
            iteration: IterationMatrixSolver::new(),
        }
    }

    pub fn invalidate(&mut self) {
        self.jacobian.invalidate();
        self.iteration.invalidate();
    }
}

/// Solves `x − xₙ − h·F(tₙ + h, x) = 0` for `x`, starting from `xₙ`.
///
/// A failed solve invalidates both caches. If it was working from a reused
/// Jacobian, it is retried once with a fresh one before reporting failure.
pub(super) fn solve<S: OdeSystem, T: Scalar>(
    system: &S,
    caches: &mut Caches<T>,
    settings: Settings,
    time: T,
    state: &DVector<T>,
    step_size: f64,
    counts: &mut SolveCounts,
) -> Result<Outcome<T>, Error> {
    let (outcome, fresh) = iterate(system, caches, settings, time, state, step_size, counts)?;

    let reason = match outcome {
        Outcome::Converged(_) => return Ok(outcome),
        Outcome::DidNotConverge(reason) => reason,
    };

    let stale_time = caches.jacobian.evaluated_at().map(|(time, _)| time.value());
    caches.invalidate();
    if fresh {
        return Ok(outcome);
    }

    debug!(
        "Newton solve {reason:?} with a Jacobian reused from t = {stale_time:?}, retrying with a fresh one"
    );
    let (outcome, _) = iterate(system, caches, settings, time, state, step_size, counts)?;
    if matches!(outcome, Outcome::DidNotConverge(_)) {
        caches.invalidate();
    }
    Ok(outcome)
}

/// Runs one chord-Newton iteration with a fixed iteration matrix.
///
/// Returns the outcome and whether the Jacobian was freshly computed.
fn iterate<S: OdeSystem, T: Scalar>(
    system: &S,
    caches: &mut Caches<T>,
    settings: Settings,
    time: T,
    state: &DVector<T>,
    step_size: f64,
    counts: &mut SolveCounts,
) -> Result<(Outcome<T>, bool), Error> {
    let n = state.len();
    let end_time = time + T::from_value(step_size);

    let Caches {
        jacobian,
        iteration,
    } = caches;

    let jacobian = jacobian.jacobian(
        system,
        end_time,
        state,
        settings.scheme,
        settings.reuse,
        counts,
    )?;
    let fresh = jacobian.fresh;

    let singular = Ok((
        Outcome::DidNotConverge(NewtonFailure::SingularIterationMatrix),
        fresh,
    ));
    let lu = match iteration.factor(
        jacobian.matrix,
        jacobian.generation,
        step_size,
        settings.reuse,
        counts,
    ) {
        Ok(lu) => lu,
        Err(err) => {
            debug!("cannot factor iteration matrix for h = {step_size:e}: {err}");
            return singular;
        }
    };

    let h = T::from_value(step_size);
    let tolerance = CONVERGENCE_FRACTION * settings.accuracy;

    let mut x = state.clone();
    let mut previous_norm = f64::INFINITY;
    let mut converged_iterations = 0;
    let mut increases = 0;

    for _ in 0..MAX_ITERATIONS {
        counts.newton_iterations += 1;
        counts.derivative_evaluations += 1;
        let derivative = system.derivative(end_time, &x).map_err(Error::system)?;
        if derivative.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: derivative.len(),
            });
        }

        let residual = DVector::from_fn(n, |i, _| x[i] - state[i] - h * derivative[i]);
        let Ok(delta) = lu.solve(&residual) else {
            return singular;
        };
        for i in 0..n {
            x[i] -= delta[i];
        }

        let norm = weighted_norm(&delta, &x);
        if !norm.is_finite() {
            return Ok((Outcome::DidNotConverge(NewtonFailure::Diverged), fresh));
        }

        if norm <= tolerance {
            converged_iterations += 1;
            if converged_iterations == 2 {
                return Ok((Outcome::Converged(x), fresh));
            }
        } else {
            converged_iterations = 0;
            if norm > previous_norm {
                increases += 1;
                if increases == 2 {
                    return Ok((Outcome::DidNotConverge(NewtonFailure::Diverged), fresh));
                }
            } else {
                increases = 0;
            }
        }
        previous_norm = norm;
    }

    Ok((Outcome::DidNotConverge(NewtonFailure::MaxIterations), fresh))
}
