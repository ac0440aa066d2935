use nalgebra::RealField;
use num_dual::Dual64;

/// A real-valued element of a state vector, a time, or a derivative.
///
/// Systems implement their derivative generically over `Scalar`, which lets
/// solvers evaluate the same code on plain `f64` values and on [`Dual64`]
/// numbers when an exact Jacobian is required. Arithmetic, comparisons and
/// elementary functions come from [`RealField`].
///
/// Comparisons and [`Scalar::value`] only consider the primal (real) part, so
/// step-size logic, norms, and pivoting behave identically for every scalar.
pub trait Scalar: RealField + Copy {
    /// Whether this scalar already carries derivative information.
    ///
    /// Solvers use this to refuse nesting automatic differentiation inside an
    /// integration that is itself being differentiated.
    const DIFFERENTIABLE: bool;

    /// Creates a constant scalar (zero derivative) from a real value.
    fn from_value(value: f64) -> Self;

    /// Returns the primal (real) part.
    fn value(self) -> f64;
}

impl Scalar for f64 {
    const DIFFERENTIABLE: bool = false;

    fn from_value(value: f64) -> Self {
        value
    }

    fn value(self) -> f64 {
        self
    }
}

impl Scalar for Dual64 {
    const DIFFERENTIABLE: bool = true;

    fn from_value(value: f64) -> Self {
        Dual64::from(value)
    }

    fn value(self) -> f64 {
        self.re
    }
}
