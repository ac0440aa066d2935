use log::debug;
use nalgebra::DMatrix;
use tether_core::Scalar;

use crate::linalg::{LinalgError, Lu};

use super::SolveCounts;

/// Builds and factors the iteration matrix `I − h·J`.
///
/// One factorization is cached together with the step size and the Jacobian
/// generation it was built from.
#[derive(Debug)]
pub(super) struct IterationMatrixSolver<T: Scalar> {
    factored: Option<Factored<T>>,
}

#[derive(Debug)]
struct Factored<T: Scalar> {
    lu: Lu<T>,
    step_size: f64,
    generation: u64,
}

impl<T: Scalar> IterationMatrixSolver<T> {
    pub fn new() -> Self {
        Self { factored: None }
    }

    pub fn invalidate(&mut self) {
        self.factored = None;
    }

    /// Returns true if a factorization for `step_size` and `generation` is
    /// cached.
    pub fn is_usable(&self, step_size: f64, generation: u64) -> bool {
        self.factored
            .as_ref()
            .is_some_and(|f| f.step_size == step_size && f.generation == generation)
    }

    /// Returns factors of `I − h·J` for the start of a Newton solve.
    ///
    /// With `reuse` set, a cached factorization with the same `h` and
    /// Jacobian generation is returned as is. Otherwise the matrix is built
    /// and factored, which counts as one factorization even when it turns out
    /// to be singular.
    pub fn factor(
        &mut self,
        jacobian: &DMatrix<T>,
        generation: u64,
        step_size: f64,
        reuse: bool,
        counts: &mut SolveCounts,
    ) -> Result<&Lu<T>, LinalgError> {
        let usable = reuse && self.is_usable(step_size, generation);
        let factored = match self.factored.take() {
            Some(factored) if usable => self.factored.insert(factored),
            _ => {
                counts.factorizations += 1;
                let lu = Lu::factor(iteration_matrix(jacobian, step_size))?;
                debug!("factored iteration matrix for h = {step_size:e} (generation {generation})");
                self.factored.insert(Factored {
                    lu,
                    step_size,
                    generation,
                })
            }
        };
        Ok(&factored.lu)
    }
}

/// Returns `I − h·J`.
fn iteration_matrix<T: Scalar>(jacobian: &DMatrix<T>, step_size: f64) -> DMatrix<T> {
    let h = T::from_value(step_size);
    DMatrix::from_fn(jacobian.nrows(), jacobian.ncols(), |i, j| {
        let identity = if i == j { T::one() } else { T::zero() };
        identity - h * jacobian[(i, j)]
    })
}
