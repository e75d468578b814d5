pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Camera-relative pose of a recognised road sign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadSignDetection {
    pub id: i16,
    #[serde(default)]
    pub image_size: f32,
    /// Rodrigues rotation vector (rad)
    pub rotation_vector: [f32; 3],
    /// Camera-frame translation (m): lateral, vertical, longitudinal
    pub translation_vector: [f32; 3],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    #[serde(default)]
    pub ax: f32,
    #[serde(default)]
    pub ay: f32,
    #[serde(default)]
    pub az: f32,
    #[serde(default)]
    pub gx: f32,
    #[serde(default)]
    pub gy: f32,
    /// Yaw rate (deg/s)
    pub gz: f32,
    #[serde(default)]
    pub mx: f32,
    #[serde(default)]
    pub my: f32,
    #[serde(default)]
    pub mz: f32,
    /// Sensor clock (µs), wraps at u32::MAX
    pub timestamp_us: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WheelSpeed {
    /// m/s
    pub value: f32,
    #[serde(default)]
    pub timestamp_us: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseResetFlag {
    pub value: bool,
    #[serde(default)]
    pub timestamp_us: u32,
}

/// Fused pose looped back from the downstream consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedPoseFeedback {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub speed: f32,
    pub heading: f32,
}

impl From<&Pose> for FusedPoseFeedback {
    fn from(p: &Pose) -> Self {
        Self {
            x: p.x,
            y: p.y,
            radius: p.radius,
            speed: p.speed,
            heading: p.heading,
        }
    }
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub speed: f32,
    pub heading: f32,
    /// Wall-clock seconds at emission
    pub timestamp: f64,
}

/// Landmark visibility notification. `id == -1` means "left the landmark"
/// or "unmapped sign"; any other id is the raw detection id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPresenceEvent {
    pub id: i16,
    pub x: f32,
    pub y: f32,
    pub heading: f32,
}

impl LandmarkPresenceEvent {
    pub const REMOVED: i16 = -1;

    pub fn new(id: i16, x: f64, y: f64, heading: f64) -> Self {
        Self {
            id,
            x: x as f32,
            y: y as f32,
            heading: heading as f32,
        }
    }
}
