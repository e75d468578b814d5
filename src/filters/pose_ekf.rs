//! 6-state planar pose EKF.
//!
//! State: [x, y, heading, heading_drift_rate, speed, speed_scale_bias].
//! Heading is kept in (-π, π] after every mutation.

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::geometry::{angle_diff, normalize_angle};
use crate::types::linalg::{
    array_from_matrix3, matrix3_from_array, IDX_DRIFT, IDX_HEADING, IDX_SCALE_BIAS, IDX_SPEED,
    IDX_X, IDX_Y, MEASURE_DIM_POSE, STATE_DIM,
};

const STARTUP_VARIANCE: [f64; STATE_DIM] = [10.0, 10.0, 0.55, 0.25, 1.0, 0.5];
const PROCESS_NOISE: [f64; STATE_DIM] = [1e-3, 1e-3, 3e-4, 5e-8, 2e-3, 1e-6];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorMode {
    /// No pose yet, predict is a no-op
    Unseeded,
    /// Integrating from the origin after an external reset; no corrections
    DeadReckoning,
    /// Seeded from a landmark; predict and correct both apply
    Tracking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrectionOutcome {
    Applied,
    NotTracking,
    SingularInnovation,
}

/// Absolute pose pseudo-measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseMeasurement {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
    /// sqrt(Pxx + Pyy)
    pub radius: f64,
}

pub struct PoseEkf {
    state: Array1<f64>,
    covariance: Array2<f64>,
    process_noise: Array2<f64>,
    mode: EstimatorMode,
    max_dt: f64,
    last_sensor_us: Option<u32>,
    last_wall_time: Option<f64>,
    predict_count: u64,
    correction_count: u64,
}

impl PoseEkf {
    pub fn new(max_dt: f64) -> Self {
        Self {
            state: Array1::zeros(STATE_DIM),
            covariance: Self::default_covariance(),
            process_noise: Self::build_process_noise(),
            mode: EstimatorMode::Unseeded,
            max_dt,
            last_sensor_us: None,
            last_wall_time: None,
            predict_count: 0,
            correction_count: 0,
        }
    }

    fn default_covariance() -> Array2<f64> {
        Array2::from_diag(&Array1::from(STARTUP_VARIANCE.to_vec()))
    }

    fn build_process_noise() -> Array2<f64> {
        Array2::from_diag(&Array1::from(PROCESS_NOISE.to_vec()))
    }

    pub fn set_max_dt(&mut self, max_dt: f64) {
        self.max_dt = max_dt;
    }

    /// Blend the sensor-clock and wall-clock deltas into one predict step.
    ///
    /// Both clocks are recorded on every call. Returns `None` for the first
    /// sample and for any step that is non-finite, non-positive or longer
    /// than the configured maximum.
    pub fn step_interval(&mut self, sensor_us: u32, wall_time: f64) -> Option<f64> {
        let prev = self.last_sensor_us.zip(self.last_wall_time);
        self.last_sensor_us = Some(sensor_us);
        self.last_wall_time = Some(wall_time);

        let (prev_us, prev_wall) = prev?;
        let sensor_dt = sensor_us.wrapping_sub(prev_us) as f64 * 1e-6;
        let wall_dt = wall_time - prev_wall;
        let dt = 0.5 * (sensor_dt + wall_dt);

        if !dt.is_finite() || dt <= 0.0 || dt > self.max_dt {
            debug!(
                "skipping predict: dt={:.4}s (sensor {:.4}s, wall {:.4}s)",
                dt, sensor_dt, wall_dt
            );
            return None;
        }
        Some(dt)
    }

    /// Propagate one step. Returns false (no-op) while unseeded.
    pub fn predict(
        &mut self,
        dt: f64,
        gyro_z_rad: f64,
        wheel_speed: f64,
        nominal_speed_scale: f64,
    ) -> bool {
        if self.mode == EstimatorMode::Unseeded {
            return false;
        }

        let heading = self.state[IDX_HEADING];
        let drift = self.state[IDX_DRIFT];
        let scale_bias = self.state[IDX_SCALE_BIAS];

        let hk = normalize_angle(heading + (gyro_z_rad + drift) * dt);
        let vk = wheel_speed * (nominal_speed_scale - scale_bias);
        let (sin_h, cos_h) = hk.sin_cos();

        let mut f = Array2::<f64>::eye(STATE_DIM);
        f[[IDX_X, IDX_HEADING]] = -vk * sin_h * dt;
        f[[IDX_X, IDX_DRIFT]] = -vk * sin_h * dt;
        f[[IDX_X, IDX_SPEED]] = cos_h * dt;
        f[[IDX_X, IDX_SCALE_BIAS]] = -wheel_speed * cos_h * dt;
        f[[IDX_Y, IDX_HEADING]] = vk * cos_h * dt;
        f[[IDX_Y, IDX_DRIFT]] = vk * cos_h * dt;
        f[[IDX_Y, IDX_SPEED]] = sin_h * dt;
        f[[IDX_Y, IDX_SCALE_BIAS]] = -wheel_speed * sin_h * dt;
        f[[IDX_HEADING, IDX_DRIFT]] = dt;

        self.state[IDX_X] += vk * cos_h * dt;
        self.state[IDX_Y] += vk * sin_h * dt;
        self.state[IDX_HEADING] = hk;
        self.state[IDX_SPEED] = vk;

        self.covariance = f.dot(&self.covariance).dot(&f.t()) + &self.process_noise;
        self.symmetrize();
        self.predict_count += 1;
        true
    }

    /// Absolute (x, y, heading) update. Heading innovation is circular.
    pub fn correct(&mut self, z: &PoseMeasurement, r: &Array2<f64>) -> CorrectionOutcome {
        if self.mode != EstimatorMode::Tracking {
            return CorrectionOutcome::NotTracking;
        }

        let mut h = Array2::<f64>::zeros((MEASURE_DIM_POSE, STATE_DIM));
        h[[0, IDX_X]] = 1.0;
        h[[1, IDX_Y]] = 1.0;
        h[[2, IDX_HEADING]] = 1.0;

        let innovation = Array1::from(vec![
            z.x - self.state[IDX_X],
            z.y - self.state[IDX_Y],
            angle_diff(self.state[IDX_HEADING], z.heading),
        ]);

        let p = &self.covariance;
        let h_t = h.t();
        let s = h.dot(p).dot(&h_t) + r;
        let s_mat = matrix3_from_array(&s);
        let Some(inv) = s_mat.try_inverse().filter(|m| m.iter().all(|v| v.is_finite())) else {
            warn!("singular innovation covariance, correction skipped");
            return CorrectionOutcome::SingularInnovation;
        };
        let s_inv = array_from_matrix3(&inv);

        let k = p.dot(&h_t).dot(&s_inv);
        let dx = k.dot(&innovation);
        if dx.iter().any(|v| !v.is_finite()) {
            warn!("non-finite correction step, correction skipped");
            return CorrectionOutcome::SingularInnovation;
        }

        self.state += &dx;
        self.state[IDX_HEADING] = normalize_angle(self.state[IDX_HEADING]);

        let i_minus_kh = Array2::<f64>::eye(STATE_DIM) - k.dot(&h);
        self.covariance = i_minus_kh.dot(&self.covariance);
        self.symmetrize();
        self.correction_count += 1;
        CorrectionOutcome::Applied
    }

    /// Zero state and covariance and drop back to `Unseeded`.
    /// Ignored once tracking; returns whether it applied.
    pub fn reset(&mut self) -> bool {
        self.zero_to(EstimatorMode::Unseeded)
    }

    /// Zero state and covariance and integrate from the origin.
    /// Ignored once tracking.
    pub fn start_dead_reckoning(&mut self) -> bool {
        self.zero_to(EstimatorMode::DeadReckoning)
    }

    fn zero_to(&mut self, mode: EstimatorMode) -> bool {
        if self.mode == EstimatorMode::Tracking {
            return false;
        }
        self.state.fill(0.0);
        self.covariance.fill(0.0);
        self.mode = mode;
        true
    }

    /// Seed the pose from a landmark. Covariance is left as is.
    pub fn initialize(&mut self, x: f64, y: f64, heading: f64) {
        self.state.fill(0.0);
        self.state[IDX_X] = x;
        self.state[IDX_Y] = y;
        self.state[IDX_HEADING] = normalize_angle(heading);
        if self.mode != EstimatorMode::Tracking {
            info!(
                "pose seeded at ({:.3}, {:.3}) heading {:.1}°",
                x,
                y,
                self.state[IDX_HEADING].to_degrees()
            );
        }
        self.mode = EstimatorMode::Tracking;
    }

    // Force symmetry
    fn symmetrize(&mut self) {
        let p_t = self.covariance.t().to_owned();
        self.covariance = (&self.covariance + &p_t) * 0.5;
    }

    pub fn mode(&self) -> EstimatorMode {
        self.mode
    }

    pub fn is_tracking(&self) -> bool {
        self.mode == EstimatorMode::Tracking
    }

    pub fn pose(&self) -> PoseEstimate {
        let var = self.covariance[[IDX_X, IDX_X]] + self.covariance[[IDX_Y, IDX_Y]];
        PoseEstimate {
            x: self.state[IDX_X],
            y: self.state[IDX_Y],
            heading: self.state[IDX_HEADING],
            speed: self.state[IDX_SPEED],
            radius: var.max(0.0).sqrt(),
        }
    }

    pub fn heading(&self) -> f64 {
        self.state[IDX_HEADING]
    }

    pub fn state(&self) -> &Array1<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn predict_count(&self) -> u64 {
        self.predict_count
    }

    pub fn correction_count(&self) -> u64 {
        self.correction_count
    }
}

impl Default for PoseEkf {
    fn default() -> Self {
        Self::new(0.5)
    }
}
