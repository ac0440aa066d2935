//! Adaptive implicit (backward) Euler integration for stiff systems.
//!
//! # Algorithm
//!
//! Each step solves the backward Euler equation
//!
//! ```text
//! x_{n+1} = x_n + h * F(t_n + h, x_{n+1})
//! ```
//!
//! with a chord-Newton iteration on the iteration matrix `I − h·J`, where `J`
//! is the Jacobian of `F`. The step is taken once at `h` and once as two
//! steps of `h/2`. The half-step result is kept, and its difference from the
//! full step estimates the local error. A controller compares that estimate
//! with the accuracy in use and accepts the step, or shrinks it and retries.
//!
//! Jacobians come from one of three [`JacobianScheme`]s. With reuse enabled,
//! a Jacobian and its factorization are kept across steps until a Newton
//! solve fails.
//!
//! # When to Use
//!
//! Implicit Euler is appropriate when:
//! - The system is stiff and an explicit method would need tiny steps
//! - Robustness matters more than high-order accuracy
//! - Moderate accuracy targets (around `1e-3` to `1e-6`) are enough
//!
//! # Observer Events
//!
//! [`integrate_to_time`](ImplicitEulerIntegrator::integrate_to_time) emits:
//!
//! - [`Event::StepAccepted`] — an implicit step was committed
//! - [`Event::NewtonFailed`] — a step attempt failed to converge
//! - [`Event::ErrorControlShrink`] — a step attempt was too inaccurate
//! - [`Event::ExplicitFallback`] — an explicit step was committed
//! - [`Event::StepRejected`] — a fixed step was rejected
//!
//! Observers can return [`Action::StopEarly`] after any event. Integration
//! then stops with every committed step kept in the context.
//!
//! # Example
//!
//! ```ignore
//! use tether_core::SimulationContext;
//! use tether_solvers::transient::implicit_euler::ImplicitEulerIntegrator;
//!
//! let mut integrator = ImplicitEulerIntegrator::new(system);
//! integrator.set_maximum_step_size(0.1);
//! integrator.set_target_accuracy(1e-5);
//! integrator.initialize()?;
//!
//! let mut context = SimulationContext::from_slice(0.0, &[1.0, 0.0]);
//! let solution = integrator.integrate_to_time_unobserved(&mut context, 2.0)?;
//! ```

mod action;
mod config;
mod controller;
mod error;
mod estimator;
mod event;
mod fallback;
mod iteration_matrix;
mod jacobian;
mod newton;
mod norm;
mod solution;
mod statistics;

#[cfg(test)]
mod test_systems;

pub use action::Action;
pub use config::{
    Config, ConfigError, DEFAULT_REQUESTED_MINIMUM_STEP_SIZE, JacobianScheme, StepControl,
};
pub use error::Error;
pub use estimator::ERROR_ESTIMATE_ORDER;
pub use event::Event;
pub use newton::NewtonFailure;
pub use solution::{Solution, Status};
pub use statistics::{SolveCounts, Statistics};

use log::{debug, warn};
use nalgebra::DVector;
use tether_core::{Context, Observer, OdeSystem, Scalar};

use controller::{Controller, Limits, Outcome, Policy, Proposal, Shrink, Transition};
use estimator::{Attempt, Estimate};
use newton::{Caches, Settings};
use norm::weighted_norm;

/// Accuracy used when no target accuracy is set.
const DEFAULT_ACCURACY: f64 = 1e-3;

/// Loosest accuracy the step-doubling estimate can meaningfully control.
const LOOSEST_ACCURACY: f64 = 1e-1;

/// Absolute floor of the working minimum step size.
const MINIMUM_STEP_FLOOR: f64 = 1e-14;

/// Working minimum step size relative to the magnitude of the time.
const TIME_RESOLUTION: f64 = 1e-14;

/// An adaptive implicit Euler integrator for an [`OdeSystem`].
///
/// The integrator owns the system, its configuration and everything it
/// learns while stepping: the accuracy in use, the next step size, the
/// Jacobian and iteration-matrix caches, statistics and the last error
/// estimate. The [`Context`] being advanced is borrowed for each call.
///
/// States and times use the scalar type `T`. Step sizes, accuracies and
/// norms are always `f64`.
#[derive(Debug)]
pub struct ImplicitEulerIntegrator<S, T: Scalar = f64> {
    system: S,
    config: Config,
    accuracy_in_use: Option<f64>,
    initialized: bool,
    next_step_size: f64,
    caches: Caches<T>,
    statistics: Statistics,
    error_estimate: Option<DVector<T>>,
}

/// How one call to `advance` ended.
enum Advance {
    Committed { stopped: bool },
    Rejected,
    Stopped,
}

/// The step being attempted.
#[derive(Debug, Clone, Copy)]
struct Step<T> {
    start: T,
    target: T,
    size: f64,
    reaches_target: bool,
    adapted: bool,
}

impl<S: OdeSystem, T: Scalar> ImplicitEulerIntegrator<S, T> {
    /// Creates an integrator with the default configuration.
    ///
    /// A maximum step size or an initial step-size target must still be set
    /// before calling [`initialize`](Self::initialize).
    pub fn new(system: S) -> Self {
        Self::with_config(system, Config::default())
    }

    pub fn with_config(system: S, config: Config) -> Self {
        Self {
            system,
            accuracy_in_use: config.target_accuracy(),
            config,
            initialized: false,
            next_step_size: 0.0,
            caches: Caches::new(),
            statistics: Statistics::default(),
            error_estimate: None,
        }
    }

    #[must_use]
    pub fn system(&self) -> &S {
        &self.system
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sets the target accuracy.
    ///
    /// The accuracy in use follows the new target immediately. The next
    /// [`initialize`](Self::initialize) clamps it again.
    pub fn set_target_accuracy(&mut self, accuracy: f64) {
        self.config = self.config.with_target_accuracy(accuracy);
        self.accuracy_in_use = Some(accuracy);
    }

    #[must_use]
    pub fn target_accuracy(&self) -> Option<f64> {
        self.config.target_accuracy()
    }

    /// Returns the accuracy the error control works to, once resolved.
    #[must_use]
    pub fn accuracy_in_use(&self) -> Option<f64> {
        self.accuracy_in_use
    }

    pub fn set_maximum_step_size(&mut self, step_size: f64) {
        self.config = self.config.with_maximum_step_size(step_size);
    }

    #[must_use]
    pub fn maximum_step_size(&self) -> Option<f64> {
        self.config.maximum_step_size()
    }

    pub fn request_initial_step_size_target(&mut self, step_size: f64) {
        self.config = self.config.with_initial_step_size_target(step_size);
    }

    #[must_use]
    pub fn initial_step_size_target(&self) -> Option<f64> {
        self.config.initial_step_size_target()
    }

    pub fn set_requested_minimum_step_size(&mut self, step_size: f64) {
        self.config = self.config.with_requested_minimum_step_size(step_size);
    }

    #[must_use]
    pub fn requested_minimum_step_size(&self) -> f64 {
        self.config.requested_minimum_step_size()
    }

    pub fn set_fixed_step_mode(&mut self, enabled: bool) {
        self.config = self.config.with_fixed_step_mode(enabled);
    }

    #[must_use]
    pub fn fixed_step_mode(&self) -> bool {
        self.config.fixed_step_mode()
    }

    /// Selects how Jacobians are computed, dropping any cached Jacobian when
    /// the scheme changes.
    pub fn set_jacobian_scheme(&mut self, scheme: JacobianScheme) {
        if scheme != self.config.jacobian_scheme() {
            self.caches.invalidate();
        }
        self.config = self.config.with_jacobian_scheme(scheme);
    }

    #[must_use]
    pub fn jacobian_scheme(&self) -> JacobianScheme {
        self.config.jacobian_scheme()
    }

    /// Enables or disables reuse of Jacobians and factorizations across
    /// steps. Disabling reuse drops the caches.
    pub fn set_reuse(&mut self, enabled: bool) {
        if !enabled {
            self.caches.invalidate();
        }
        self.config = self.config.with_reuse(enabled);
    }

    #[must_use]
    pub fn reuse(&self) -> bool {
        self.config.reuse()
    }

    pub fn set_throw_on_minimum_step_size_violation(&mut self, enabled: bool) {
        self.config = self.config.with_throw_on_minimum_step_size_violation(enabled);
    }

    #[must_use]
    pub fn throw_on_minimum_step_size_violation(&self) -> bool {
        self.config.throw_on_minimum_step_size_violation()
    }

    pub fn set_step_control(&mut self, step_control: StepControl) {
        self.config = self.config.with_step_control(step_control);
    }

    /// Validates the configuration and resets the adaptive state.
    ///
    /// Resolves the accuracy in use from the target accuracy (`1e-3` when
    /// unset), clamped to at most `1e-1`. A missing maximum step size is
    /// taken as ten times the initial step-size target, and a missing
    /// initial target as a tenth of the maximum. Clears the caches and the
    /// error estimate; statistics are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingStepSize`] if neither a maximum step size nor
    /// an initial step-size target is set, and [`Error::InvalidConfig`] if
    /// any configured value is invalid.
    pub fn initialize(&mut self) -> Result<(), Error> {
        let (Some(maximum), Some(initial)) = (
            self.config.resolved_maximum_step_size(),
            self.config.resolved_initial_step_size(),
        ) else {
            return Err(Error::MissingStepSize);
        };
        self.config.validate()?;

        let requested = self.config.target_accuracy().unwrap_or(DEFAULT_ACCURACY);
        if requested > LOOSEST_ACCURACY {
            warn!(
                "target accuracy {requested:e} is looser than the error estimate can control, using {LOOSEST_ACCURACY:e}"
            );
        }
        let accuracy = requested.min(LOOSEST_ACCURACY);

        self.accuracy_in_use = Some(accuracy);
        self.next_step_size = initial.min(maximum);
        self.caches = Caches::new();
        self.error_estimate = None;
        self.initialized = true;

        debug!(
            "initialized implicit Euler: accuracy {accuracy:e}, initial step {:e}, maximum step {maximum:e}",
            self.next_step_size
        );
        Ok(())
    }

    /// Returns the smallest step size worth taking at `time`.
    ///
    /// This is the requested minimum, raised where needed so that a step
    /// always changes the time in floating point.
    #[must_use]
    pub fn working_minimum_step_size(&self, time: T) -> f64 {
        let resolvable = MINIMUM_STEP_FLOOR.max(time.value().abs() * TIME_RESOLUTION);
        self.config.requested_minimum_step_size().max(resolvable)
    }

    /// Integrates the context to exactly `target`, taking as many steps as
    /// needed.
    ///
    /// In fixed-step mode every step is the maximum step size (the last one
    /// shortened or stretched to land on the target) and no step is retried.
    /// Fixed steps are held to the accuracy only when a target accuracy is
    /// set; without one, only a failed Newton solve rejects them.
    ///
    /// The observer receives an [`Event`] for every committed step, failed
    /// Newton solve, error-control shrinkage and rejection.
    ///
    /// # Errors
    ///
    /// Returns an error if the integrator is not initialized, the context
    /// does not match the system, the target is in the past or not finite,
    /// the configuration was made invalid after initialization, a step would
    /// violate the working minimum step size while that is fatal, a fixed
    /// step is rejected, or the system fails.
    pub fn integrate_to_time<C, Obs>(
        &mut self,
        context: &mut C,
        target: T,
        mut observer: Obs,
    ) -> Result<Solution, Error>
    where
        C: Context<T>,
        Obs: Observer<Event, Action>,
    {
        self.check_ready(context, target)?;

        let fixed = self.config.fixed_step_mode();
        let policy = if fixed {
            Policy::Fixed {
                reject_inaccurate: self.config.target_accuracy().is_some(),
            }
        } else {
            Policy::Adaptive
        };
        let maximum = self.maximum()?;

        let mut steps = 0;
        while context.time() < target {
            let start = context.time();
            let remaining = (target - start).value();
            let preferred = if fixed { maximum } else { self.next_step_size };
            let limits = Limits {
                working_minimum: self.working_minimum_step_size(start),
                maximum,
            };
            let proposal =
                controller::propose(preferred, remaining, limits, &self.config.step_control());

            match self.advance(context, target, proposal, policy, &mut observer)? {
                Advance::Committed { stopped } => {
                    steps += 1;
                    if stopped {
                        return Ok(Solution {
                            status: Status::StoppedByObserver,
                            steps,
                        });
                    }
                }
                Advance::Stopped => {
                    return Ok(Solution {
                        status: Status::StoppedByObserver,
                        steps,
                    });
                }
                Advance::Rejected => {
                    return Err(Error::FixedStepRejected {
                        time: start.value(),
                    });
                }
            }
        }

        Ok(Solution {
            status: Status::Complete,
            steps,
        })
    }

    /// Integrates to exactly `target` without observer support.
    ///
    /// This is a convenience wrapper around
    /// [`integrate_to_time`](Self::integrate_to_time) that uses a no-op
    /// observer.
    ///
    /// # Errors
    ///
    /// See [`integrate_to_time`](Self::integrate_to_time).
    pub fn integrate_to_time_unobserved<C: Context<T>>(
        &mut self,
        context: &mut C,
        target: T,
    ) -> Result<Solution, Error> {
        self.integrate_to_time(context, target, ())
    }

    /// Attempts one step of exactly `target − t`.
    ///
    /// Returns `false` and leaves the context unchanged if a Newton solve
    /// fails or, in fixed-step mode with a target accuracy set, if the error
    /// estimate exceeds the accuracy in use. A step below the working minimum
    /// step size is taken explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error for usage errors (see
    /// [`integrate_to_time`](Self::integrate_to_time)) and system failures.
    pub fn attempt_fixed_step<C: Context<T>>(
        &mut self,
        context: &mut C,
        target: T,
    ) -> Result<bool, Error> {
        self.check_ready(context, target)?;

        let start = context.time();
        let step_size = (target - start).value();
        if step_size <= 0.0 {
            return Ok(true);
        }

        let proposal = Proposal {
            step_size,
            reaches_target: true,
            truncated: false,
            explicit: step_size < self.working_minimum_step_size(start),
        };
        let policy = Policy::Fixed {
            reject_inaccurate: self.config.fixed_step_mode()
                && self.config.target_accuracy().is_some(),
        };

        match self.advance(context, target, proposal, policy, &mut ())? {
            Advance::Committed { .. } => Ok(true),
            Advance::Rejected | Advance::Stopped => Ok(false),
        }
    }

    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }

    /// Returns the error estimate of the last completed step attempt.
    #[must_use]
    pub fn error_estimate(&self) -> Option<&DVector<T>> {
        self.error_estimate.as_ref()
    }

    /// Returns the order of the error estimate.
    #[must_use]
    pub fn error_estimate_order(&self) -> u32 {
        ERROR_ESTIMATE_ORDER
    }

    #[must_use]
    pub fn supports_error_estimation(&self) -> bool {
        true
    }

    fn check_ready<C: Context<T>>(&self, context: &C, target: T) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.config.validate()?;

        let expected = self.system.dimension();
        let actual = context.state().len();
        if expected != actual {
            return Err(Error::DimensionMismatch { expected, actual });
        }

        if !target.value().is_finite() {
            return Err(Error::NonFiniteTarget {
                target: target.value(),
            });
        }

        let time = context.time();
        if target < time {
            return Err(Error::TargetInPast {
                time: time.value(),
                target: target.value(),
            });
        }
        Ok(())
    }

    fn maximum(&self) -> Result<f64, Error> {
        self.config
            .resolved_maximum_step_size()
            .ok_or(Error::MissingStepSize)
    }

    /// Commits one step, retrying or falling back as the controller decides.
    fn advance<C, Obs>(
        &mut self,
        context: &mut C,
        target: T,
        proposal: Proposal,
        policy: Policy,
        observer: &mut Obs,
    ) -> Result<Advance, Error>
    where
        C: Context<T>,
        Obs: Observer<Event, Action>,
    {
        let start = context.time();
        let state = context.clone_state();
        let remaining = (target - start).value();
        let time = start.value();

        let accuracy = self.accuracy_in_use.ok_or(Error::NotInitialized)?;
        let controller = Controller {
            accuracy,
            limits: Limits {
                working_minimum: self.working_minimum_step_size(start),
                maximum: self.maximum()?,
            },
            policy,
            throw_on_minimum_step_size_violation: self
                .config
                .throw_on_minimum_step_size_violation(),
            control: self.config.step_control(),
        };
        let settings = Settings {
            scheme: self.config.jacobian_scheme(),
            reuse: self.config.reuse(),
            accuracy,
        };

        let mut step = Step {
            start,
            target,
            size: proposal.step_size,
            reaches_target: proposal.reaches_target,
            adapted: !proposal.truncated,
        };
        if proposal.explicit {
            return self.commit_explicit(context, &state, step, observer);
        }

        loop {
            let attempt = estimator::step_doubling(
                &self.system,
                &mut self.caches,
                settings,
                start,
                &state,
                step.size,
                &mut self.statistics,
            )?;

            let (transition, candidate) = match attempt {
                Attempt::Failed(reason) => {
                    self.statistics.substep_failures += 1;
                    debug!(
                        "Newton solve {reason:?} at t = {time}, h = {:e}",
                        step.size
                    );
                    let event = Event::NewtonFailed {
                        time,
                        step_size: step.size,
                        reason,
                    };
                    if stop_requested(observer, &event) {
                        return Ok(Advance::Stopped);
                    }
                    (controller.decide(Outcome::NewtonFailed, step.size), None)
                }
                Attempt::Completed(estimate) => {
                    let error_norm = weighted_norm(&estimate.error, &estimate.state);
                    let outcome = Outcome::Completed { error_norm };
                    (
                        controller.decide(outcome, step.size),
                        Some((estimate, error_norm)),
                    )
                }
            };

            match (transition, candidate) {
                (
                    Transition::Accept {
                        next_step_size,
                        forced,
                    },
                    Some((estimate, error_norm)),
                ) => {
                    if forced {
                        warn!(
                            "accepting step of {:e} at t = {time} with error {error_norm:e} above accuracy {accuracy:e}",
                            step.size
                        );
                    }
                    if policy == Policy::Adaptive {
                        self.next_step_size = next_step_size;
                    }
                    self.commit(context, step, estimate);

                    let event = Event::StepAccepted {
                        time,
                        step_size: step.size,
                        error_norm,
                    };
                    let stopped = stop_requested(observer, &event);
                    return Ok(Advance::Committed { stopped });
                }

                (Transition::ShrinkAndRetry { step_size, cause }, candidate) => {
                    let event = match cause {
                        Shrink::SubstepFailure => {
                            self.statistics.shrinkages_from_substep_failures += 1;
                            None
                        }
                        Shrink::ErrorControl => {
                            self.statistics.shrinkages_from_error_control += 1;
                            let error_norm = candidate.as_ref().map_or(f64::INFINITY, |c| c.1);
                            debug!(
                                "error {error_norm:e} above accuracy {accuracy:e} at t = {time}, shrinking h from {:e} to {step_size:e}",
                                step.size
                            );
                            Some(Event::ErrorControlShrink {
                                time,
                                step_size: step.size,
                                error_norm,
                                next_step_size: step_size,
                            })
                        }
                    };
                    if let Some((estimate, _)) = candidate {
                        self.error_estimate = Some(estimate.error);
                    }
                    if event.is_some_and(|event| stop_requested(observer, &event)) {
                        return Ok(Advance::Stopped);
                    }

                    step.size = step_size;
                    step.reaches_target = false;
                    step.adapted = true;
                }

                (Transition::Fallback { step_size }, _) => {
                    step.size = step_size.min(remaining);
                    step.reaches_target = step_size >= remaining;
                    step.adapted = step_size <= remaining;
                    return self.commit_explicit(context, &state, step, observer);
                }

                (Transition::Reject | Transition::Accept { .. }, candidate) => {
                    if let Some((estimate, _)) = candidate {
                        self.error_estimate = Some(estimate.error);
                    }
                    debug!("rejected fixed step of {:e} at t = {time}", step.size);
                    let event = Event::StepRejected {
                        time,
                        step_size: step.size,
                    };
                    if stop_requested(observer, &event) {
                        return Ok(Advance::Stopped);
                    }
                    return Ok(Advance::Rejected);
                }

                (Transition::Fatal { step_size }, _) => {
                    return Err(Error::MinimumStepSizeViolation {
                        time,
                        step_size,
                        minimum: controller.limits.working_minimum,
                    });
                }
            }
        }
    }

    /// Takes and commits an explicit Euler step.
    fn commit_explicit<C, Obs>(
        &mut self,
        context: &mut C,
        state: &DVector<T>,
        step: Step<T>,
        observer: &mut Obs,
    ) -> Result<Advance, Error>
    where
        C: Context<T>,
        Obs: Observer<Event, Action>,
    {
        let time = step.start.value();
        warn!("taking an explicit Euler step of {:e} at t = {time}", step.size);

        let mut counts = SolveCounts::default();
        let estimate = fallback::explicit_step(&self.system, step.start, state, step.size, &mut counts);
        self.statistics.totals += counts;
        let estimate = estimate?;

        let error_norm = weighted_norm(&estimate.error, &estimate.state);
        self.statistics.explicit_fallback_steps += 1;
        self.commit(context, step, estimate);

        let event = Event::ExplicitFallback {
            time,
            step_size: step.size,
            error_norm,
        };
        let stopped = stop_requested(observer, &event);
        Ok(Advance::Committed { stopped })
    }

    /// Writes a candidate into the context and records the step.
    fn commit<C: Context<T>>(&mut self, context: &mut C, step: Step<T>, estimate: Estimate<T>) {
        context.set_state(estimate.state);
        context.set_time(if step.reaches_target {
            step.target
        } else {
            step.start + T::from_value(step.size)
        });
        self.error_estimate = Some(estimate.error);
        self.statistics.record_step(step.size, step.adapted);
    }
}

/// Shows `event` to the observer and returns true if it asked to stop.
fn stop_requested<Obs: Observer<Event, Action>>(observer: &mut Obs, event: &Event) -> bool {
    matches!(observer.observe(event), Some(Action::StopEarly))
}
