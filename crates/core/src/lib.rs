//! Core traits and types for the Tether framework.
//!
//! This crate defines the shared abstractions that time integrators and the
//! systems they advance build on:
//!
//! - [`Scalar`] — the numeric element of states, times and derivatives
//! - [`Dual64`] — the forward-mode dual number used for exact Jacobians
//! - [`OdeSystem`] — a dynamical system `dx/dt = F(t, x)`
//! - [`Context`] — the time and state container a solver advances
//! - [`Observer`] — receives solver events and optionally returns control actions

mod context;
mod observer;
mod scalar;
mod system;

pub use context::{Context, SimulationContext};
pub use observer::Observer;
pub use scalar::Scalar;
pub use system::OdeSystem;

pub use num_dual::Dual64;
