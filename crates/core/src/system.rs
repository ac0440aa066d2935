use nalgebra::{DMatrix, DVector};

use crate::Scalar;

/// A continuous-time dynamical system `dx/dt = F(t, x)`.
///
/// The derivative is generic over [`Scalar`] so a solver can evaluate it on
/// plain `f64` values for stepping and on [`Dual64`] values when it needs an
/// exact Jacobian. Implementations should only use the arithmetic and
/// elementary functions that `Scalar` provides.
///
/// [`Dual64`]: crate::Dual64
pub trait OdeSystem {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the number of continuous state variables.
    fn dimension(&self) -> usize;

    /// Evaluates the time derivative of the state.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the derivative cannot be evaluated at the
    /// given time and state.
    fn derivative<T: Scalar>(
        &self,
        time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error>;

    /// Optionally supplies the Jacobian `∂F/∂x` in closed form.
    ///
    /// Solvers that compute Jacobians automatically prefer this matrix when it
    /// is available. The default returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `Some(Err(_))` if the Jacobian cannot be evaluated.
    fn jacobian<T: Scalar>(
        &self,
        _time: T,
        _state: &DVector<T>,
    ) -> Option<Result<DMatrix<T>, Self::Error>> {
        None
    }
}

impl<S: OdeSystem + ?Sized> OdeSystem for &S {
    type Error = S::Error;

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn derivative<T: Scalar>(
        &self,
        time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        (**self).derivative(time, state)
    }

    fn jacobian<T: Scalar>(
        &self,
        time: T,
        state: &DVector<T>,
    ) -> Option<Result<DMatrix<T>, Self::Error>> {
        (**self).jacobian(time, state)
    }
}
