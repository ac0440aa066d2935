use nalgebra::DVector;

use crate::Scalar;

/// The container a solver advances: the current time and continuous state.
///
/// Solvers read the time and state at the start of a step and write both back
/// only when a step is committed.
pub trait Context<T: Scalar> {
    /// Returns the current time.
    fn time(&self) -> T;

    /// Sets the current time.
    fn set_time(&mut self, time: T);

    /// Returns the current continuous state.
    fn state(&self) -> &DVector<T>;

    /// Replaces the current continuous state.
    fn set_state(&mut self, state: DVector<T>);

    /// Returns an owned copy of the current state.
    fn clone_state(&self) -> DVector<T> {
        self.state().clone()
    }
}

/// A plain in-memory [`Context`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationContext<T: Scalar = f64> {
    time: T,
    state: DVector<T>,
}

impl<T: Scalar> SimulationContext<T> {
    /// Creates a context at `time` with the given state.
    #[must_use]
    pub fn new(time: T, state: DVector<T>) -> Self {
        Self { time, state }
    }

    /// Creates a context at `time` from a slice of state values.
    #[must_use]
    pub fn from_slice(time: T, state: &[T]) -> Self {
        Self::new(time, DVector::from_column_slice(state))
    }
}

impl<T: Scalar> Context<T> for SimulationContext<T> {
    fn time(&self) -> T {
        self.time
    }

    fn set_time(&mut self, time: T) {
        self.time = time;
    }

    fn state(&self) -> &DVector<T> {
        &self.state
    }

    fn set_state(&mut self, state: DVector<T>) {
        self.state = state;
    }
}
