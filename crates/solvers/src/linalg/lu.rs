use nalgebra::{DMatrix, DVector, Dyn, LU};
use tether_core::Scalar;
use thiserror::Error;

/// Errors from factoring or solving a dense system.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinalgError {
    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("matrix is singular (no usable pivot in column {column})")]
    Singular { column: usize },

    #[error("right-hand side has length {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// An LU factorization with partial pivoting, `P·A = L·U`.
///
/// Wraps [`nalgebra::LU`] and adds a relative singularity test, so a
/// factorization that succeeds can always be solved against.
#[derive(Debug, Clone)]
pub struct Lu<T: Scalar> {
    lu: LU<T, Dyn, Dyn>,
    dimension: usize,
}

impl<T: Scalar> Lu<T> {
    /// Factors a square matrix.
    ///
    /// A column is treated as singular when its pivot is not finite or is no
    /// larger than `ε` times the largest entry of the input.
    ///
    /// # Errors
    ///
    /// Returns [`LinalgError::NotSquare`] for a non-square matrix and
    /// [`LinalgError::Singular`] when no usable pivot exists.
    pub fn factor(matrix: DMatrix<T>) -> Result<Self, LinalgError> {
        let (rows, cols) = matrix.shape();
        if rows != cols {
            return Err(LinalgError::NotSquare { rows, cols });
        }

        let scale = matrix.iter().map(|x| x.value().abs()).fold(0.0, f64::max);
        let threshold = f64::EPSILON * scale;

        let lu = matrix.lu();
        let pivots = lu.u().diagonal();
        if let Some(column) = pivots.iter().position(|pivot| {
            let magnitude = pivot.value().abs();
            !magnitude.is_finite() || magnitude <= threshold
        }) {
            return Err(LinalgError::Singular { column });
        }

        Ok(Self { lu, dimension: rows })
    }

    /// Returns the dimension of the factored matrix.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Solves `A·x = b` using the stored factors.
    ///
    /// # Errors
    ///
    /// Returns [`LinalgError::DimensionMismatch`] if `b` has the wrong length.
    pub fn solve(&self, b: &DVector<T>) -> Result<DVector<T>, LinalgError> {
        let n = self.dimension();
        if b.len() != n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                actual: b.len(),
            });
        }

        self.lu
            .solve(b)
            .ok_or(LinalgError::Singular { column: n.saturating_sub(1) })
    }
}
