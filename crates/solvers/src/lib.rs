//! Solvers for the Tether framework.
//!
//! # Modules
//!
//! - [`transient`] — time integrators that advance an [`OdeSystem`] held in a
//!   [`Context`]
//! - [`linalg`] — the dense linear algebra the implicit integrators rely on
//!
//! [`OdeSystem`]: tether_core::OdeSystem
//! [`Context`]: tether_core::Context

pub mod linalg;
pub mod transient;
