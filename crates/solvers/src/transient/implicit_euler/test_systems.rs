//! Reference systems with known behavior, shared by the integrator's tests.

use std::convert::Infallible;

use nalgebra::{DMatrix, DVector};
use tether_core::{OdeSystem, Scalar};

/// `x' = 0` for two states.
pub(super) struct Stationary;

impl OdeSystem for Stationary {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        2
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        Ok(DVector::from_element(state.len(), T::zero()))
    }
}

/// `x' = slope`, so `x(t) = x(0) + slope·t` has a zero second derivative.
pub(super) struct LinearScalar {
    pub slope: f64,
}

impl OdeSystem for LinearScalar {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        1
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        _state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        Ok(DVector::from_element(1, T::from_value(self.slope)))
    }
}

/// `x' = -rate·x`.
pub(super) struct Decay {
    pub rate: f64,
}

impl OdeSystem for Decay {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        1
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        Ok(DVector::from_element(1, -T::from_value(self.rate) * state[0]))
    }
}

/// Undamped spring and mass, state `[x, v]`.
pub(super) struct SpringMass {
    pub stiffness: f64,
    pub mass: f64,
}

impl SpringMass {
    /// Returns `(x, v)` at time `t`.
    pub fn closed_form(&self, x0: f64, v0: f64, t: f64) -> (f64, f64) {
        let omega = (self.stiffness / self.mass).sqrt();
        let (c1, c2) = (x0, v0 / omega);
        let x = c1 * (omega * t).cos() + c2 * (omega * t).sin();
        let v = -c1 * omega * (omega * t).sin() + c2 * omega * (omega * t).cos();
        (x, v)
    }
}

impl OdeSystem for SpringMass {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        2
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        let accel = -T::from_value(self.stiffness / self.mass) * state[0];
        Ok(DVector::from_vec(vec![state[1], accel]))
    }
}

/// Spring, damper and mass, state `[x, v]`.
pub(super) struct SpringMassDamper {
    pub stiffness: f64,
    pub damping: f64,
    pub mass: f64,
}

impl SpringMassDamper {
    /// Returns `(x, v)` at time `t` for the overdamped case.
    pub fn closed_form(&self, x0: f64, v0: f64, t: f64) -> (f64, f64) {
        let (k, b, m) = (self.stiffness, self.damping, self.mass);
        let discriminant = b * b - 4.0 * m * k;
        assert!(discriminant > 0.0, "closed form requires overdamping");

        // Stable root pair: r_fast·r_slow = k/m.
        let r_fast = (-b - discriminant.sqrt()) / (2.0 * m);
        let r_slow = (k / m) / r_fast;

        let c_fast = (v0 - r_slow * x0) / (r_fast - r_slow);
        let c_slow = x0 - c_fast;

        let x = c_slow * (r_slow * t).exp() + c_fast * (r_fast * t).exp();
        let v = c_slow * r_slow * (r_slow * t).exp() + c_fast * r_fast * (r_fast * t).exp();
        (x, v)
    }
}

impl OdeSystem for SpringMassDamper {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        2
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        let k = T::from_value(self.stiffness / self.mass);
        let b = T::from_value(self.damping / self.mass);
        let accel = -(k * state[0] + b * state[1]);
        Ok(DVector::from_vec(vec![state[1], accel]))
    }
}

/// A mass pushed by a constant force against a stiff spring and damper that
/// only act while `x > 0`, so the acceleration is discontinuous at `x = 0`.
/// State `[x, v]`; the mass rests at `x = force / stiffness`.
pub(super) struct DiscontinuousSpringMassDamper {
    pub stiffness: f64,
    pub damping: f64,
    pub mass: f64,
    pub force: f64,
}

impl OdeSystem for DiscontinuousSpringMassDamper {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        2
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        let (x, v) = (state[0], state[1]);
        let mut force = T::from_value(self.force);
        if x > T::zero() {
            force -= T::from_value(self.stiffness) * x + T::from_value(self.damping) * v;
        }
        Ok(DVector::from_vec(vec![v, force / T::from_value(self.mass)]))
    }
}

/// Two masses joined by a stiff, damped spring, the first also tied to the
/// world by a soft spring. State `[x1, x2, v1, v2]`.
///
/// With equal initial positions and zero velocities the pair moves like one
/// body of mass `2m` on the soft spring.
pub(super) struct StiffDoubleSpring {
    pub mass: f64,
    pub soft_stiffness: f64,
    pub stiff_stiffness: f64,
    pub damping: f64,
}

impl StiffDoubleSpring {
    /// Returns the rigid-body approximation of `(x1, x2)` at time `t`.
    pub fn rigid_solution(&self, x0: f64, t: f64) -> (f64, f64) {
        let omega = (self.soft_stiffness / (2.0 * self.mass)).sqrt();
        let x = x0 * (omega * t).cos();
        (x, x)
    }
}

impl OdeSystem for StiffDoubleSpring {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        4
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        let (x1, x2, v1, v2) = (state[0], state[1], state[2], state[3]);
        let inv_mass = T::from_value(1.0 / self.mass);

        let coupling = T::from_value(self.stiff_stiffness) * (x2 - x1)
            + T::from_value(self.damping) * (v2 - v1);
        let a1 = (coupling - T::from_value(self.soft_stiffness) * x1) * inv_mass;
        let a2 = -coupling * inv_mass;

        Ok(DVector::from_vec(vec![v1, v2, a1, a2]))
    }
}

/// Robertson's stiff chemical kinetics problem.
pub(super) struct Robertson;

impl OdeSystem for Robertson {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        3
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        let (y1, y2, y3) = (state[0], state[1], state[2]);
        let slow = T::from_value(0.04) * y1;
        let reverse = T::from_value(1e4) * y2 * y3;
        let fast = T::from_value(3e7) * y2 * y2;
        Ok(DVector::from_vec(vec![
            reverse - slow,
            slow - reverse - fast,
            fast,
        ]))
    }
}

/// A nonlinear system with a closed-form Jacobian, state `[a, b]`:
/// `a' = b - a²`, `b' = sin(a)·b`.
///
/// The Jacobian is only offered when `analytic` is set.
pub(super) struct Nonlinear {
    pub analytic: bool,
}

impl Nonlinear {
    /// Returns the exact Jacobian as plain values.
    pub fn exact_jacobian(a: f64, b: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[-2.0 * a, 1.0, a.cos() * b, a.sin()])
    }
}

impl OdeSystem for Nonlinear {
    type Error = Infallible;

    fn dimension(&self) -> usize {
        2
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        let (a, b) = (state[0], state[1]);
        Ok(DVector::from_vec(vec![b - a * a, a.sin() * b]))
    }

    fn jacobian<T: Scalar>(
        &self,
        _time: T,
        state: &DVector<T>,
    ) -> Option<Result<DMatrix<T>, Self::Error>> {
        self.analytic.then(|| {
            let exact = Self::exact_jacobian(state[0].value(), state[1].value());
            Ok(exact.map(T::from_value))
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("derivative unavailable")]
pub(super) struct Unavailable;

/// A system whose derivative always fails.
pub(super) struct Broken;

impl OdeSystem for Broken {
    type Error = Unavailable;

    fn dimension(&self) -> usize {
        1
    }

    fn derivative<T: Scalar>(
        &self,
        _time: T,
        _state: &DVector<T>,
    ) -> Result<DVector<T>, Self::Error> {
        Err(Unavailable)
    }
}
