//! Time integrators for continuous-time dynamical systems.
//!
//! An [`OdeSystem`] supplies `dx/dt = F(t, x)` and a [`Context`] holds the
//! current time and state. Integrators in this module advance the context to
//! a requested time.
//!
//! # Integrators
//!
//! - [`implicit_euler`] — adaptive, first-order implicit (backward) Euler for
//!   stiff systems, with step-doubling error control
//!
//! [`OdeSystem`]: tether_core::OdeSystem
//! [`Context`]: tether_core::Context

pub mod implicit_euler;
