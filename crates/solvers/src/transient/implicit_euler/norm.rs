use nalgebra::DVector;
use tether_core::Scalar;

/// Returns `maxᵢ |vᵢ| / max(|refᵢ|, 1)`.
///
/// Components are scaled relative to the reference state once it exceeds
/// unity and absolute below that. A non-finite component makes the norm
/// infinite.
pub(super) fn weighted_norm<T: Scalar>(v: &DVector<T>, reference: &DVector<T>) -> f64 {
    v.iter()
        .zip(reference.iter())
        .map(|(vi, ri)| {
            let ratio = vi.value().abs() / ri.value().abs().max(1.0);
            if ratio.is_finite() { ratio } else { f64::INFINITY }
        })
        .fold(0.0, f64::max)
}
