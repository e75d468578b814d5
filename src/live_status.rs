use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::filters::EstimatorMode;
use crate::sensor_fusion::{FusionStats, LocalizerSnapshot};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub mode: EstimatorMode,
    pub landmarks_loaded: usize,
    // Pose
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    pub speed: f64,
    pub uncertainty_radius: f64,
    // Counters
    pub stats: FusionStats,
    pub poses_emitted: u64,
    pub presence_events: u64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            mode: EstimatorMode::Unseeded,
            landmarks_loaded: 0,
            x: 0.0,
            y: 0.0,
            heading_deg: 0.0,
            speed: 0.0,
            uncertainty_radius: 0.0,
            stats: FusionStats::default(),
            poses_emitted: 0,
            presence_events: 0,
        }
    }

    pub fn update_from(&mut self, snapshot: &LocalizerSnapshot) {
        self.timestamp = current_timestamp();
        self.mode = snapshot.mode;
        self.landmarks_loaded = snapshot.landmarks;
        self.x = snapshot.pose.x;
        self.y = snapshot.pose.y;
        self.heading_deg = snapshot.pose.heading.to_degrees();
        self.speed = snapshot.pose.speed;
        self.uncertainty_radius = snapshot.pose.radius;
        self.stats = snapshot.stats.clone();
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
