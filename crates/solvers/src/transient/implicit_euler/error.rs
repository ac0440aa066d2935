use std::error::Error as StdError;

use super::ConfigError;

/// Errors that can occur during implicit Euler integration.
///
/// Newton non-convergence is not an error: the integrator recovers from it
/// by shrinking the step, and reports it only through one of the policy
/// variants below when recovery is not allowed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("integrator must be initialized before stepping")]
    NotInitialized,

    #[error("neither a maximum step size nor an initial step size target is set")]
    MissingStepSize,

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("automatically differentiated Jacobian not supported for a differentiable scalar type")]
    AutoDiffUnsupported,

    #[error("target time {target} is not finite")]
    NonFiniteTarget { target: f64 },

    #[error("target time {target} is earlier than the current time {time}")]
    TargetInPast { time: f64, target: f64 },

    #[error("system has dimension {expected}, but the state has {actual} components")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "step size {step_size:e} at time {time} is below the working minimum step size {minimum:e}"
    )]
    MinimumStepSizeViolation {
        time: f64,
        step_size: f64,
        minimum: f64,
    },

    #[error("fixed step rejected at time {time}")]
    FixedStepRejected { time: f64 },

    #[error("system error: {0}")]
    System(#[source] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn system<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::System(Box::new(err))
    }
}
