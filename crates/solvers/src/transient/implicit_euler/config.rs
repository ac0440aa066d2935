use thiserror::Error;

/// Default smallest step size a caller may request.
pub const DEFAULT_REQUESTED_MINIMUM_STEP_SIZE: f64 = 1e-14;

/// How the integrator obtains the Jacobian `∂F/∂x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JacobianScheme {
    /// One-sided differences, `n + 1` derivative evaluations.
    #[default]
    ForwardDifference,

    /// Symmetric differences, `2n` derivative evaluations.
    CentralDifference,

    /// Exact partials, from the system's closed-form Jacobian when it has one
    /// and from dual-number evaluation of the derivative otherwise.
    Automatic,
}

/// Calibration constants of the step-size controller.
///
/// After an accurate step the next step size is the current one scaled by
/// `safety·(accuracy/error)^(1/2)`, clamped to `[1, max_factor]`. After an
/// inaccurate step the same ratio is clamped to `[min_factor, 1]`. A Newton
/// failure scales the step by `failure_factor`. A proposed step within
/// `stretch_factor` of the target is stretched to land on it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepControl {
    safety: f64,
    min_factor: f64,
    max_factor: f64,
    failure_factor: f64,
    stretch_factor: f64,
}

impl Default for StepControl {
    fn default() -> Self {
        Self {
            safety: 0.9,
            min_factor: 0.1,
            max_factor: 5.0,
            failure_factor: 0.5,
            stretch_factor: 1.01,
        }
    }
}

impl StepControl {
    /// Creates validated step-control constants.
    ///
    /// # Errors
    ///
    /// Returns an error if any constant is non-finite or out of its range:
    /// `0 < safety ≤ 1`, `0 < min_factor < 1 < max_factor`,
    /// `0 < failure_factor < 1` and `stretch_factor ≥ 1`.
    pub fn new(
        safety: f64,
        min_factor: f64,
        max_factor: f64,
        failure_factor: f64,
        stretch_factor: f64,
    ) -> Result<Self, ConfigError> {
        let control = Self {
            safety,
            min_factor,
            max_factor,
            failure_factor,
            stretch_factor,
        };
        control.validate()?;
        Ok(control)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.safety.is_finite() || self.safety <= 0.0 || self.safety > 1.0 {
            return Err(ConfigError::Safety);
        }
        if !self.min_factor.is_finite() || self.min_factor <= 0.0 || self.min_factor >= 1.0 {
            return Err(ConfigError::MinFactor);
        }
        if !self.max_factor.is_finite() || self.max_factor <= 1.0 {
            return Err(ConfigError::MaxFactor);
        }
        if !self.failure_factor.is_finite()
            || self.failure_factor <= 0.0
            || self.failure_factor >= 1.0
        {
            return Err(ConfigError::FailureFactor);
        }
        if !self.stretch_factor.is_finite() || self.stretch_factor < 1.0 {
            return Err(ConfigError::StretchFactor);
        }
        Ok(())
    }

    #[must_use]
    pub fn safety(&self) -> f64 {
        self.safety
    }

    #[must_use]
    pub fn min_factor(&self) -> f64 {
        self.min_factor
    }

    #[must_use]
    pub fn max_factor(&self) -> f64 {
        self.max_factor
    }

    #[must_use]
    pub fn failure_factor(&self) -> f64 {
        self.failure_factor
    }

    #[must_use]
    pub fn stretch_factor(&self) -> f64 {
        self.stretch_factor
    }
}

/// Configuration for the implicit Euler integrator.
///
/// Every field has a default except the step size: either a maximum step
/// size or an initial step-size target must be set before
/// [`initialize`](super::ImplicitEulerIntegrator::initialize).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    target_accuracy: Option<f64>,
    maximum_step_size: Option<f64>,
    initial_step_size_target: Option<f64>,
    requested_minimum_step_size: f64,
    fixed_step_mode: bool,
    jacobian_scheme: JacobianScheme,
    reuse: bool,
    throw_on_minimum_step_size_violation: bool,
    step_control: StepControl,
}

/// Errors that can occur when validating an implicit Euler config.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target_accuracy must be finite and positive")]
    TargetAccuracy,

    #[error("maximum_step_size must be finite and positive")]
    MaximumStepSize,

    #[error("initial_step_size_target must be finite and positive")]
    InitialStepSizeTarget,

    #[error("requested_minimum_step_size must be finite and positive")]
    RequestedMinimumStepSize,

    #[error("maximum_step_size must not be smaller than requested_minimum_step_size")]
    MaximumBelowMinimum,

    #[error("safety must be in (0, 1]")]
    Safety,

    #[error("min_factor must be in (0, 1)")]
    MinFactor,

    #[error("max_factor must be finite and greater than 1")]
    MaxFactor,

    #[error("failure_factor must be in (0, 1)")]
    FailureFactor,

    #[error("stretch_factor must be finite and at least 1")]
    StretchFactor,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_accuracy: None,
            maximum_step_size: None,
            initial_step_size_target: None,
            requested_minimum_step_size: DEFAULT_REQUESTED_MINIMUM_STEP_SIZE,
            fixed_step_mode: false,
            jacobian_scheme: JacobianScheme::default(),
            reuse: true,
            throw_on_minimum_step_size_violation: true,
            step_control: StepControl::default(),
        }
    }
}

impl Config {
    /// Checks every configured value.
    ///
    /// A config with neither a maximum step size nor an initial step-size
    /// target is still valid here; the integrator reports it when it is
    /// initialized.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |value: f64| value.is_finite() && value > 0.0;

        if self.target_accuracy.is_some_and(|a| !positive(a)) {
            return Err(ConfigError::TargetAccuracy);
        }
        if self.maximum_step_size.is_some_and(|h| !positive(h)) {
            return Err(ConfigError::MaximumStepSize);
        }
        if self.initial_step_size_target.is_some_and(|h| !positive(h)) {
            return Err(ConfigError::InitialStepSizeTarget);
        }
        if !positive(self.requested_minimum_step_size) {
            return Err(ConfigError::RequestedMinimumStepSize);
        }
        if let Some(maximum) = self.resolved_maximum_step_size() {
            if maximum < self.requested_minimum_step_size {
                return Err(ConfigError::MaximumBelowMinimum);
            }
        }
        self.step_control.validate()
    }

    /// Returns the maximum step size, derived from the initial target when
    /// only that is set.
    pub(super) fn resolved_maximum_step_size(&self) -> Option<f64> {
        self.maximum_step_size
            .or(self.initial_step_size_target.map(|h| h * 10.0))
    }

    /// Returns the initial step-size target, derived from the maximum step
    /// size when only that is set.
    pub(super) fn resolved_initial_step_size(&self) -> Option<f64> {
        self.initial_step_size_target
            .or(self.maximum_step_size.map(|h| h * 0.1))
    }

    #[must_use]
    pub fn with_target_accuracy(mut self, accuracy: f64) -> Self {
        self.target_accuracy = Some(accuracy);
        self
    }

    #[must_use]
    pub fn with_maximum_step_size(mut self, step_size: f64) -> Self {
        self.maximum_step_size = Some(step_size);
        self
    }

    #[must_use]
    pub fn with_initial_step_size_target(mut self, step_size: f64) -> Self {
        self.initial_step_size_target = Some(step_size);
        self
    }

    #[must_use]
    pub fn with_requested_minimum_step_size(mut self, step_size: f64) -> Self {
        self.requested_minimum_step_size = step_size;
        self
    }

    #[must_use]
    pub fn with_fixed_step_mode(mut self, enabled: bool) -> Self {
        self.fixed_step_mode = enabled;
        self
    }

    #[must_use]
    pub fn with_jacobian_scheme(mut self, scheme: JacobianScheme) -> Self {
        self.jacobian_scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_reuse(mut self, enabled: bool) -> Self {
        self.reuse = enabled;
        self
    }

    #[must_use]
    pub fn with_throw_on_minimum_step_size_violation(mut self, enabled: bool) -> Self {
        self.throw_on_minimum_step_size_violation = enabled;
        self
    }

    #[must_use]
    pub fn with_step_control(mut self, step_control: StepControl) -> Self {
        self.step_control = step_control;
        self
    }

    /// Returns the requested accuracy, if one was set.
    #[must_use]
    pub fn target_accuracy(&self) -> Option<f64> {
        self.target_accuracy
    }

    #[must_use]
    pub fn maximum_step_size(&self) -> Option<f64> {
        self.maximum_step_size
    }

    #[must_use]
    pub fn initial_step_size_target(&self) -> Option<f64> {
        self.initial_step_size_target
    }

    #[must_use]
    pub fn requested_minimum_step_size(&self) -> f64 {
        self.requested_minimum_step_size
    }

    /// Returns true if every step is taken at the maximum step size without
    /// error-controlled retries.
    #[must_use]
    pub fn fixed_step_mode(&self) -> bool {
        self.fixed_step_mode
    }

    #[must_use]
    pub fn jacobian_scheme(&self) -> JacobianScheme {
        self.jacobian_scheme
    }

    /// Returns true if Jacobians and factorizations are reused across steps.
    #[must_use]
    pub fn reuse(&self) -> bool {
        self.reuse
    }

    /// Returns true if stepping below the working minimum step size is an
    /// error rather than a reason to take an explicit step.
    #[must_use]
    pub fn throw_on_minimum_step_size_violation(&self) -> bool {
        self.throw_on_minimum_step_size_violation
    }

    #[must_use]
    pub fn step_control(&self) -> StepControl {
        self.step_control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jacobian_scheme(), JacobianScheme::ForwardDifference);
        assert!(config.reuse());
        assert!(config.throw_on_minimum_step_size_violation());
        assert!(!config.fixed_step_mode());
        assert_eq!(config.target_accuracy(), None);
        assert_relative_eq!(
            config.requested_minimum_step_size(),
            DEFAULT_REQUESTED_MINIMUM_STEP_SIZE
        );
    }

    #[test]
    fn rejects_non_positive_values() {
        let config = Config::default().with_target_accuracy(0.0);
        assert_eq!(config.validate(), Err(ConfigError::TargetAccuracy));

        let config = Config::default().with_maximum_step_size(f64::NAN);
        assert_eq!(config.validate(), Err(ConfigError::MaximumStepSize));

        let config = Config::default().with_initial_step_size_target(-1.0);
        assert_eq!(config.validate(), Err(ConfigError::InitialStepSizeTarget));

        let config = Config::default().with_requested_minimum_step_size(0.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::RequestedMinimumStepSize)
        );
    }

    #[test]
    fn maximum_must_cover_minimum() {
        let config = Config::default()
            .with_maximum_step_size(1e-6)
            .with_requested_minimum_step_size(1e-3);
        assert_eq!(config.validate(), Err(ConfigError::MaximumBelowMinimum));

        // A derived maximum is checked too.
        let config = Config::default()
            .with_initial_step_size_target(1e-5)
            .with_requested_minimum_step_size(1e-3);
        assert_eq!(config.validate(), Err(ConfigError::MaximumBelowMinimum));
    }

    #[test]
    fn missing_step_size_is_derived() {
        let config = Config::default().with_maximum_step_size(0.5);
        assert_relative_eq!(config.resolved_initial_step_size().unwrap(), 0.05);

        let config = Config::default().with_initial_step_size_target(0.5);
        assert_relative_eq!(config.resolved_maximum_step_size().unwrap(), 5.0);

        assert!(Config::default().resolved_maximum_step_size().is_none());
    }

    #[test]
    fn step_control_ranges() {
        assert!(StepControl::new(0.9, 0.1, 5.0, 0.5, 1.01).is_ok());
        assert_eq!(
            StepControl::new(1.5, 0.1, 5.0, 0.5, 1.01),
            Err(ConfigError::Safety)
        );
        assert_eq!(
            StepControl::new(0.9, 1.0, 5.0, 0.5, 1.01),
            Err(ConfigError::MinFactor)
        );
        assert_eq!(
            StepControl::new(0.9, 0.1, 1.0, 0.5, 1.01),
            Err(ConfigError::MaxFactor)
        );
        assert_eq!(
            StepControl::new(0.9, 0.1, 5.0, 0.0, 1.01),
            Err(ConfigError::FailureFactor)
        );
        assert_eq!(
            StepControl::new(0.9, 0.1, 5.0, 0.5, 0.99),
            Err(ConfigError::StretchFactor)
        );
    }
}
