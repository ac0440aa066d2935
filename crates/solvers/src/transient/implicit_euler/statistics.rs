use std::ops::AddAssign;

/// Work counters for Newton solves and the Jacobians and factorizations
/// they need.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveCounts {
    /// Newton iterations, converged or not.
    pub newton_iterations: usize,

    /// Derivative evaluations, including those spent on Jacobians.
    pub derivative_evaluations: usize,

    /// Derivative evaluations spent on Jacobians.
    pub jacobian_derivative_evaluations: usize,

    /// Jacobian computations (cache hits excluded).
    pub jacobian_evaluations: usize,

    /// Factorizations of the iteration matrix (reuse excluded).
    pub factorizations: usize,
}

impl AddAssign for SolveCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.newton_iterations += rhs.newton_iterations;
        self.derivative_evaluations += rhs.derivative_evaluations;
        self.jacobian_derivative_evaluations += rhs.jacobian_derivative_evaluations;
        self.jacobian_evaluations += rhs.jacobian_evaluations;
        self.factorizations += rhs.factorizations;
    }
}

/// Accumulated integrator statistics.
///
/// Counters only grow until [`reset`](Self::reset). Step sizes are `None`
/// until a step has been taken.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    /// All work, including the error estimator's half steps.
    pub totals: SolveCounts,

    /// Work spent in the error estimator's half steps.
    pub estimator: SolveCounts,

    /// Committed steps, implicit and explicit.
    pub steps_taken: usize,

    /// Committed explicit fallback steps.
    pub explicit_fallback_steps: usize,

    /// Step attempts abandoned because a Newton solve failed.
    pub substep_failures: usize,

    /// Step shrinkages caused by Newton failures.
    pub shrinkages_from_substep_failures: usize,

    /// Step shrinkages caused by the error estimate.
    pub shrinkages_from_error_control: usize,

    pub previous_step_size: Option<f64>,

    pub largest_step_size: Option<f64>,

    /// Smallest committed step that was not shortened to land on a target.
    pub smallest_adapted_step_size: Option<f64>,
}

impl Statistics {
    /// Zeroes every counter and forgets every step size.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records a committed step of `step_size`.
    pub(super) fn record_step(&mut self, step_size: f64, adapted: bool) {
        self.steps_taken += 1;
        self.previous_step_size = Some(step_size);
        self.largest_step_size = Some(
            self.largest_step_size
                .map_or(step_size, |largest| largest.max(step_size)),
        );
        if adapted {
            self.smallest_adapted_step_size = Some(
                self.smallest_adapted_step_size
                    .map_or(step_size, |smallest| smallest.min(step_size)),
            );
        }
    }
}
