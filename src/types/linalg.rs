//! Dimensions and ndarray/nalgebra glue for the pose filter.
//!
//! State and covariance live in ndarray; the small innovation matrix is
//! handed to nalgebra for inversion.

use nalgebra::{Matrix3, Rotation3, Vector3};
use ndarray::Array2;

// ===== State Dimensions =====
pub const STATE_DIM: usize = 6;

pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_HEADING: usize = 2;
pub const IDX_DRIFT: usize = 3;
pub const IDX_SPEED: usize = 4;
pub const IDX_SCALE_BIAS: usize = 5;

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POSE: usize = 3; // (x, y, heading)

pub type InnovationCov = Matrix3<f64>;

pub fn matrix3_from_array(a: &Array2<f64>) -> InnovationCov {
    Matrix3::from_fn(|r, c| a[[r, c]])
}

pub fn array_from_matrix3(m: &InnovationCov) -> Array2<f64> {
    Array2::from_shape_fn((MEASURE_DIM_POSE, MEASURE_DIM_POSE), |(r, c)| m[(r, c)])
}

/// Rodrigues vector (axis * angle) to rotation matrix.
pub fn rotation_from_rodrigues(rvec: [f32; 3]) -> Rotation3<f64> {
    let v = Vector3::new(rvec[0] as f64, rvec[1] as f64, rvec[2] as f64);
    Rotation3::from_scaled_axis(v)
}
