use log::debug;
use nalgebra::{DMatrix, DVector};
use tether_core::{Dual64, OdeSystem, Scalar};

use super::{Error, JacobianScheme, SolveCounts};

/// Computes and caches the Jacobian `∂F/∂x`.
///
/// Every freshly computed matrix bumps a generation counter. Factorizations
/// record the generation they were built from, so replacing or invalidating
/// the Jacobian also retires any factorization of the old one.
#[derive(Debug)]
pub(super) struct JacobianManager<T: Scalar> {
    cache: Option<Cached<T>>,
    generation: u64,
}

#[derive(Debug)]
struct Cached<T: Scalar> {
    matrix: DMatrix<T>,
    time: T,
    state: DVector<T>,
}

/// A Jacobian handed out by [`JacobianManager::jacobian`].
#[derive(Debug)]
pub(super) struct Jacobian<'a, T: Scalar> {
    pub matrix: &'a DMatrix<T>,
    pub generation: u64,

    /// False when the matrix came from the cache.
    pub fresh: bool,
}

impl<T: Scalar> JacobianManager<T> {
    pub fn new() -> Self {
        Self {
            cache: None,
            generation: 0,
        }
    }

    /// Drops the cached matrix so the next request recomputes it.
    pub fn invalidate(&mut self) {
        if self.cache.take().is_some() {
            debug!("Jacobian invalidated (generation {})", self.generation);
        }
    }

    #[cfg(test)]
    pub fn is_valid(&self) -> bool {
        self.cache.is_some()
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the time and state the cached matrix was evaluated at.
    pub fn evaluated_at(&self) -> Option<(T, &DVector<T>)> {
        self.cache.as_ref().map(|cached| (cached.time, &cached.state))
    }

    /// Returns the Jacobian at `(time, state)`, from the cache when `reuse`
    /// is set and a matrix is cached.
    ///
    /// A cached matrix may have been evaluated at a different point; callers
    /// that detect trouble from a stale matrix invalidate it and ask again.
    /// A failed computation leaves nothing cached.
    pub fn jacobian<S: OdeSystem>(
        &mut self,
        system: &S,
        time: T,
        state: &DVector<T>,
        scheme: JacobianScheme,
        reuse: bool,
        counts: &mut SolveCounts,
    ) -> Result<Jacobian<'_, T>, Error> {
        let (cached, fresh) = match self.cache.take() {
            Some(cached) if reuse => (self.cache.insert(cached), false),
            _ => {
                let matrix = compute(system, time, state, scheme, counts)?;
                self.generation += 1;
                debug!(
                    "computed {scheme:?} Jacobian at t = {} (generation {})",
                    time.value(),
                    self.generation
                );
                let cached = self.cache.insert(Cached {
                    matrix,
                    time,
                    state: state.clone(),
                });
                (cached, true)
            }
        };

        Ok(Jacobian {
            matrix: &cached.matrix,
            generation: self.generation,
            fresh,
        })
    }
}

/// Computes a Jacobian with the given scheme.
fn compute<S: OdeSystem, T: Scalar>(
    system: &S,
    time: T,
    state: &DVector<T>,
    scheme: JacobianScheme,
    counts: &mut SolveCounts,
) -> Result<DMatrix<T>, Error> {
    let n = state.len();
    let matrix = match scheme {
        JacobianScheme::ForwardDifference => forward_difference(system, time, state, counts)?,
        JacobianScheme::CentralDifference => central_difference(system, time, state, counts)?,
        JacobianScheme::Automatic => automatic(system, time, state, counts)?,
    };

    if matrix.shape() != (n, n) {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: matrix.nrows(),
        });
    }

    counts.jacobian_evaluations += 1;
    Ok(matrix)
}

/// Evaluates the derivative on behalf of a Jacobian computation.
fn evaluate<S: OdeSystem, U: Scalar>(
    system: &S,
    time: U,
    state: &DVector<U>,
    counts: &mut SolveCounts,
) -> Result<DVector<U>, Error> {
    let derivative = system.derivative(time, state).map_err(Error::system)?;
    counts.derivative_evaluations += 1;
    counts.jacobian_derivative_evaluations += 1;

    if derivative.len() != state.len() {
        return Err(Error::DimensionMismatch {
            expected: state.len(),
            actual: derivative.len(),
        });
    }
    Ok(derivative)
}

/// Perturbation size for a state component: `max(|x|, 1)·√ε`.
fn increment(x: f64) -> f64 {
    x.abs().max(1.0) * f64::EPSILON.sqrt()
}

fn forward_difference<S: OdeSystem, T: Scalar>(
    system: &S,
    time: T,
    state: &DVector<T>,
    counts: &mut SolveCounts,
) -> Result<DMatrix<T>, Error> {
    let n = state.len();
    let baseline = evaluate(system, time, state, counts)?;

    let mut jacobian = DMatrix::from_element(n, n, T::zero());
    let mut perturbed = state.clone();

    for j in 0..n {
        let original = state[j];
        perturbed[j] = original + T::from_value(increment(original.value()));

        // The representable increment, not the requested one.
        let delta = perturbed[j] - original;

        let derivative = evaluate(system, time, &perturbed, counts)?;
        for i in 0..n {
            jacobian[(i, j)] = (derivative[i] - baseline[i]) / delta;
        }
        perturbed[j] = original;
    }

    Ok(jacobian)
}

fn central_difference<S: OdeSystem, T: Scalar>(
    system: &S,
    time: T,
    state: &DVector<T>,
    counts: &mut SolveCounts,
) -> Result<DMatrix<T>, Error> {
    let n = state.len();
    let mut jacobian = DMatrix::from_element(n, n, T::zero());
    let mut perturbed = state.clone();

    for j in 0..n {
        let original = state[j];
        let step = T::from_value(increment(original.value()));

        perturbed[j] = original + step;
        let upper = perturbed[j];
        let forward = evaluate(system, time, &perturbed, counts)?;

        perturbed[j] = original - step;
        let lower = perturbed[j];
        let backward = evaluate(system, time, &perturbed, counts)?;

        let delta = upper - lower;
        for i in 0..n {
            jacobian[(i, j)] = (forward[i] - backward[i]) / delta;
        }
        perturbed[j] = original;
    }

    Ok(jacobian)
}

fn automatic<S: OdeSystem, T: Scalar>(
    system: &S,
    time: T,
    state: &DVector<T>,
    counts: &mut SolveCounts,
) -> Result<DMatrix<T>, Error> {
    if T::DIFFERENTIABLE {
        return Err(Error::AutoDiffUnsupported);
    }

    if let Some(result) = system.jacobian(time, state) {
        return result.map_err(Error::system);
    }

    let n = state.len();
    let time = Dual64::from(time.value());
    let mut seeded: DVector<Dual64> = state.map(|x| Dual64::from(x.value()));
    let mut jacobian = DMatrix::from_element(n, n, T::zero());

    for j in 0..n {
        seeded[j].eps = 1.0;
        let derivative = evaluate(system, time, &seeded, counts)?;
        for i in 0..n {
            jacobian[(i, j)] = T::from_value(derivative[i].eps);
        }
        seeded[j].eps = 0.0;
    }

    Ok(jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::transient::implicit_euler::test_systems::{Broken, Decay, Nonlinear};

    const A: f64 = 0.7;
    const B: f64 = -1.3;

    fn point() -> DVector<f64> {
        DVector::from_vec(vec![A, B])
    }

    fn check_against_exact(scheme: JacobianScheme, analytic: bool, tolerance: f64) -> SolveCounts {
        let system = Nonlinear { analytic };
        let mut manager = JacobianManager::new();
        let mut counts = SolveCounts::default();

        let jacobian = manager
            .jacobian(&system, 0.0, &point(), scheme, true, &mut counts)
            .unwrap();
        assert!(jacobian.fresh);

        let exact = Nonlinear::exact_jacobian(A, B);
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(jacobian.matrix[(i, j)], exact[(i, j)], epsilon = tolerance);
            }
        }
        counts
    }

    #[test]
    fn forward_difference_matches_exact() {
        let counts = check_against_exact(JacobianScheme::ForwardDifference, false, 1e-6);
        assert_eq!(counts.derivative_evaluations, 3);
        assert_eq!(counts.jacobian_derivative_evaluations, 3);
        assert_eq!(counts.jacobian_evaluations, 1);
    }

    #[test]
    fn central_difference_matches_exact() {
        let counts = check_against_exact(JacobianScheme::CentralDifference, false, 1e-7);
        assert_eq!(counts.derivative_evaluations, 4);
    }

    #[test]
    fn automatic_uses_duals_without_closed_form() {
        let counts = check_against_exact(JacobianScheme::Automatic, false, 1e-14);
        assert_eq!(counts.derivative_evaluations, 2);
    }

    #[test]
    fn automatic_prefers_closed_form() {
        let counts = check_against_exact(JacobianScheme::Automatic, true, 1e-14);
        assert_eq!(counts.derivative_evaluations, 0);
        assert_eq!(counts.jacobian_evaluations, 1);
    }

    #[test]
    fn automatic_refuses_differentiable_scalars() {
        let mut manager = JacobianManager::<Dual64>::new();
        let state = DVector::from_element(1, Dual64::from(1.0));
        let result = manager.jacobian(
            &Decay { rate: 1.0 },
            Dual64::from(0.0),
            &state,
            JacobianScheme::Automatic,
            true,
            &mut SolveCounts::default(),
        );
        assert!(matches!(result, Err(Error::AutoDiffUnsupported)));
        assert!(!manager.is_valid());
    }

    #[test]
    fn reuse_returns_cached_matrix() {
        let system = Decay { rate: 2.0 };
        let mut manager = JacobianManager::new();
        let mut counts = SolveCounts::default();
        let scheme = JacobianScheme::ForwardDifference;

        let first = manager
            .jacobian(&system, 0.0, &DVector::from_element(1, 1.0), scheme, true, &mut counts)
            .unwrap();
        assert!(first.fresh);
        assert_eq!(first.generation, 1);

        let second = manager
            .jacobian(&system, 1.0, &DVector::from_element(1, 5.0), scheme, true, &mut counts)
            .unwrap();
        assert!(!second.fresh);
        assert_eq!(second.generation, 1);
        assert_eq!(counts.jacobian_evaluations, 1);

        let (time, state) = manager.evaluated_at().unwrap();
        assert_relative_eq!(time, 0.0);
        assert_relative_eq!(state[0], 1.0);
    }

    #[test]
    fn invalidation_and_disabled_reuse_recompute() {
        let system = Decay { rate: 2.0 };
        let mut manager = JacobianManager::new();
        let mut counts = SolveCounts::default();
        let scheme = JacobianScheme::CentralDifference;
        let state = DVector::from_element(1, 1.0);

        manager
            .jacobian(&system, 0.0, &state, scheme, true, &mut counts)
            .unwrap();
        manager.invalidate();
        assert!(!manager.is_valid());

        let again = manager
            .jacobian(&system, 0.0, &state, scheme, true, &mut counts)
            .unwrap();
        assert!(again.fresh);
        assert_eq!(again.generation, 2);
        assert_relative_eq!(again.matrix[(0, 0)], -2.0, epsilon = 1e-8);

        let without_reuse = manager
            .jacobian(&system, 0.0, &state, scheme, false, &mut counts)
            .unwrap();
        assert!(without_reuse.fresh);
        assert_eq!(manager.generation(), 3);
        assert_eq!(counts.jacobian_evaluations, 3);
    }

    #[test]
    fn recompute_after_cache_hit_keeps_one_matrix() {
        let system = Decay { rate: 3.0 };
        let mut manager = JacobianManager::new();
        let mut counts = SolveCounts::default();
        let scheme = JacobianScheme::Automatic;

        let cached = manager
            .jacobian(&system, 0.0, &DVector::from_element(1, 1.0), scheme, true, &mut counts)
            .unwrap();
        assert_relative_eq!(cached.matrix[(0, 0)], -3.0);

        let hit = manager
            .jacobian(&system, 0.5, &DVector::from_element(1, 2.0), scheme, true, &mut counts)
            .unwrap();
        assert!(!hit.fresh);

        let replaced = manager
            .jacobian(&system, 0.5, &DVector::from_element(1, 2.0), scheme, false, &mut counts)
            .unwrap();
        assert!(replaced.fresh);
        assert_eq!(replaced.generation, 2);

        let (time, state) = manager.evaluated_at().unwrap();
        assert_relative_eq!(time, 0.5);
        assert_relative_eq!(state[0], 2.0);
    }

    #[test]
    fn failed_recompute_leaves_nothing_cached() {
        let mut manager = JacobianManager::<f64>::new();
        let mut counts = SolveCounts::default();
        let state = DVector::from_element(1, 0.0);
        let scheme = JacobianScheme::ForwardDifference;

        manager
            .jacobian(&Decay { rate: 1.0 }, 0.0, &state, scheme, true, &mut counts)
            .unwrap();
        assert!(manager.is_valid());

        let result = manager.jacobian(&Broken, 0.0, &state, scheme, false, &mut counts);
        assert!(result.is_err());
        assert!(!manager.is_valid());
    }

    #[test]
    fn system_errors_propagate() {
        let mut manager = JacobianManager::<f64>::new();
        let result = manager.jacobian(
            &Broken,
            0.0,
            &DVector::from_element(1, 0.0),
            JacobianScheme::ForwardDifference,
            true,
            &mut SolveCounts::default(),
        );
        assert!(matches!(result, Err(Error::System(_))));
    }
}
