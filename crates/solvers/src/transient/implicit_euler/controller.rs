//! Step-size control as an explicit state machine.
//!
//! Each step starts with a [`Proposal`]. The attempt's [`Outcome`] is then
//! mapped to a [`Transition`] that the integrator carries out: accept the
//! step, shrink and retry, fall back to an explicit step, reject it, or stop
//! with a fatal error.

use super::{StepControl, estimator::ERROR_ESTIMATE_ORDER};

/// Step-size bounds at the current time.
#[derive(Debug, Clone, Copy)]
pub(super) struct Limits {
    pub working_minimum: f64,
    pub maximum: f64,
}

/// The first step size tried for a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Proposal {
    pub step_size: f64,

    /// The step ends exactly at the target time.
    pub reaches_target: bool,

    /// The step was shortened to land on the target.
    pub truncated: bool,

    /// The step is below the working minimum and must be taken explicitly.
    pub explicit: bool,
}

/// Proposes a step of about `preferred` with `remaining` left to the target.
pub(super) fn propose(
    preferred: f64,
    remaining: f64,
    limits: Limits,
    control: &StepControl,
) -> Proposal {
    if remaining < limits.working_minimum {
        return Proposal {
            step_size: remaining,
            reaches_target: true,
            truncated: true,
            explicit: true,
        };
    }

    let step_size = preferred.min(limits.maximum).max(limits.working_minimum);
    if step_size * control.stretch_factor() >= remaining {
        return Proposal {
            step_size: remaining,
            reaches_target: true,
            truncated: remaining < step_size,
            explicit: false,
        };
    }

    Proposal {
        step_size,
        reaches_target: false,
        truncated: false,
        explicit: false,
    }
}

/// Whether an attempt may be retried at a smaller step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Policy {
    Adaptive,

    /// The step size is fixed; inaccurate steps are rejected only if
    /// `reject_inaccurate` is set.
    Fixed { reject_inaccurate: bool },
}

/// Everything the controller weighs besides the attempt itself.
#[derive(Debug, Clone, Copy)]
pub(super) struct Controller {
    pub accuracy: f64,
    pub limits: Limits,
    pub policy: Policy,
    pub throw_on_minimum_step_size_violation: bool,
    pub control: StepControl,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Outcome {
    NewtonFailed,
    Completed { error_norm: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Shrink {
    SubstepFailure,
    ErrorControl,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Transition {
    /// Commit the step. `forced` marks an inaccurate step accepted at the
    /// working minimum.
    Accept { next_step_size: f64, forced: bool },

    ShrinkAndRetry { step_size: f64, cause: Shrink },

    /// Take an explicit step of at most `step_size` instead.
    Fallback { step_size: f64 },

    /// Leave the context unchanged.
    Reject,

    /// `step_size` would violate the working minimum.
    Fatal { step_size: f64 },
}

impl Controller {
    pub fn decide(&self, outcome: Outcome, step_size: f64) -> Transition {
        let minimum = self.limits.working_minimum;

        match (outcome, self.policy) {
            (Outcome::NewtonFailed, Policy::Fixed { .. }) => Transition::Reject,

            (Outcome::NewtonFailed, Policy::Adaptive) => {
                let shrunk = step_size * self.control.failure_factor();
                if shrunk >= minimum {
                    Transition::ShrinkAndRetry {
                        step_size: shrunk,
                        cause: Shrink::SubstepFailure,
                    }
                } else if self.throw_on_minimum_step_size_violation {
                    Transition::Fatal { step_size: shrunk }
                } else {
                    Transition::Fallback { step_size: minimum }
                }
            }

            (Outcome::Completed { error_norm }, policy) if error_norm > self.accuracy => {
                match policy {
                    Policy::Fixed {
                        reject_inaccurate: true,
                    } => Transition::Reject,
                    Policy::Fixed {
                        reject_inaccurate: false,
                    } => Transition::Accept {
                        next_step_size: step_size,
                        forced: false,
                    },
                    Policy::Adaptive if step_size <= minimum => {
                        if self.throw_on_minimum_step_size_violation {
                            Transition::Fatal { step_size }
                        } else {
                            Transition::Accept {
                                next_step_size: step_size,
                                forced: true,
                            }
                        }
                    }
                    Policy::Adaptive => {
                        let ratio = self
                            .ratio(error_norm)
                            .clamp(self.control.min_factor(), 1.0);
                        Transition::ShrinkAndRetry {
                            step_size: (step_size * ratio).max(minimum),
                            cause: Shrink::ErrorControl,
                        }
                    }
                }
            }

            (Outcome::Completed { error_norm }, _) => {
                let ratio = if error_norm > 0.0 {
                    self.ratio(error_norm)
                        .clamp(1.0, self.control.max_factor())
                } else {
                    self.control.max_factor()
                };
                Transition::Accept {
                    next_step_size: (step_size * ratio).min(self.limits.maximum),
                    forced: false,
                }
            }
        }
    }

    /// Returns `safety·(accuracy/error)^(1/order)`.
    fn ratio(&self, error_norm: f64) -> f64 {
        let exponent = 1.0 / f64::from(ERROR_ESTIMATE_ORDER);
        self.control.safety() * (self.accuracy / error_norm).powf(exponent)
    }
}
