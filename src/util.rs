use nalgebra::{Unit, Vector3};
use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::{thread_rng, Rng};
use std::ops::RangeBounds;

pub fn random_vec<T: SampleUniform, R: RangeBounds<T> + SampleRange<T> + Clone>(
    range: R,
) -> Vector3<T> {
    let mut rng = thread_rng();
    Vector3::new(
        rng.gen_range(range.clone()),
        rng.gen_range(range.clone()),
        rng.gen_range(range),
    )
}

/// Uniform direction from the host thread RNG. The all-zero draw falls back
/// to the y axis instead of normalizing a zero vector.
pub fn random_unit_vec() -> Unit<Vector3<f32>> {
    Unit::try_new(random_vec(-1.0..1.0), 1.0e-6).unwrap_or_else(Vector3::y_axis)
}
