pub mod pose_ekf;

pub use pose_ekf::{CorrectionOutcome, EstimatorMode, PoseEkf, PoseEstimate, PoseMeasurement};
