use super::NewtonFailure;

/// Events emitted by the implicit Euler integrator.
///
/// Times are the start of the attempted step. Error norms are weighted
/// norms of the step-doubling error estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// An implicit step was committed to the context.
    StepAccepted {
        time: f64,
        step_size: f64,
        error_norm: f64,
    },

    /// A fixed-size step was rejected and the context left unchanged.
    StepRejected { time: f64, step_size: f64 },

    /// A Newton solve within a step attempt did not converge.
    NewtonFailed {
        time: f64,
        step_size: f64,
        reason: NewtonFailure,
    },

    /// The error estimate exceeded the accuracy in use and the step will be
    /// retried at `next_step_size`.
    ErrorControlShrink {
        time: f64,
        step_size: f64,
        error_norm: f64,
        next_step_size: f64,
    },

    /// An explicit Euler step was committed in place of an implicit one.
    ExplicitFallback {
        time: f64,
        step_size: f64,
        error_norm: f64,
    },
}

impl Event {
    /// Returns the time at the start of the step this event describes.
    #[must_use]
    pub fn time(&self) -> f64 {
        match self {
            Self::StepAccepted { time, .. }
            | Self::StepRejected { time, .. }
            | Self::NewtonFailed { time, .. }
            | Self::ErrorControlShrink { time, .. }
            | Self::ExplicitFallback { time, .. } => *time,
        }
    }

    /// Returns the step size this event describes.
    #[must_use]
    pub fn step_size(&self) -> f64 {
        match self {
            Self::StepAccepted { step_size, .. }
            | Self::StepRejected { step_size, .. }
            | Self::NewtonFailed { step_size, .. }
            | Self::ErrorControlShrink { step_size, .. }
            | Self::ExplicitFallback { step_size, .. } => *step_size,
        }
    }
}
