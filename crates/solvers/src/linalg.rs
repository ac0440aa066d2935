//! Dense linear algebra over any [`Scalar`].
//!
//! [`Scalar`]: tether_core::Scalar

mod lu;

pub use lu::{LinalgError, Lu};
