// sensor_fusion.rs: Pure computation layer for the road-sign localizer
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - file output and the CLI
//
// Typed input events go in through `Localizer::dispatch`, poses and landmark
// events come out. Recorded sessions replay through exactly the same path.

use std::path::PathBuf;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filters::{CorrectionOutcome, EstimatorMode, PoseEkf, PoseEstimate};
use crate::landmark_map::LandmarkMap;
use crate::observer::{CameraMount, LandmarkObserver, Observation, ObserverLimits, SeedPolicy};
use crate::presence::{PresenceConfig, PresenceTracker};
use crate::types::{
    FusedPoseFeedback, InertialSample, LandmarkPresenceEvent, Pose, PoseResetFlag,
    RoadSignDetection, WheelSpeed,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    // ── Camera mount ──
    pub camera_offset_lateral: f64,
    pub camera_offset_longitudinal: f64,
    pub camera_offset_yaw_deg: f64,

    // ── Odometry ──
    pub speed_scale: f64,
    pub max_predict_dt: f64,

    // ── Landmarks ──
    pub landmark_map_path: PathBuf,
    pub seed_policy: SeedPolicy,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            camera_offset_lateral: 0.05,
            camera_offset_longitudinal: 0.0,
            camera_offset_yaw_deg: 2.0,
            speed_scale: 1.0,
            max_predict_dt: 0.5,
            landmark_map_path: PathBuf::from("roadSign.xml"),
            seed_policy: SeedPolicy::RequireHeadOn,
        }
    }
}

impl LocalizerConfig {
    pub fn camera_mount(&self) -> CameraMount {
        CameraMount {
            lateral: self.camera_offset_lateral,
            longitudinal: self.camera_offset_longitudinal,
            yaw_deg: self.camera_offset_yaw_deg,
        }
    }
}

/// A single live configuration change. Applies from the next event on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum ConfigUpdate {
    CameraOffsetLateral(f64),
    CameraOffsetLongitudinal(f64),
    CameraOffsetYawDeg(f64),
    SpeedScale(f64),
    MaxPredictDt(f64),
    LandmarkMapPath(PathBuf),
    SeedPolicy(SeedPolicy),
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    RoadSign(RoadSignDetection),
    Inertial(InertialSample),
    WheelSpeed(WheelSpeed),
    PoseReset(PoseResetFlag),
    PoseFeedback(FusedPoseFeedback),
}

/// An input event stamped with its wall-clock arrival time (s).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub received_at: f64,
    #[serde(flatten)]
    pub event: InputEvent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionEvent {
    Pose(Pose),
    LandmarkPresence(LandmarkPresenceEvent),
    Seeded { landmark: u16, x: f64, y: f64, heading: f64 },
    Corrected { landmark: u16, x: f64, y: f64, heading: f64 },
    CorrectionSkipped { landmark: u16, singular: bool },
    PredictSkipped,
    ResetApplied { dead_reckoning: bool },
    ResetIgnored,
}

// ─── Counters ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionStats {
    pub detections: u64,
    pub warmup_dropped: u64,
    pub out_of_range: u64,
    pub seeds: u64,
    pub seed_rejected: u64,
    pub debounced: u64,
    pub corrections: u64,
    pub skipped_corrections: u64,
    pub unmapped: u64,
    pub predicts: u64,
    pub skipped_predicts: u64,
    pub presence_removals: u64,
}

/// Read-only view for status output.
#[derive(Clone, Debug, Serialize)]
pub struct LocalizerSnapshot {
    pub mode: EstimatorMode,
    pub pose: PoseEstimate,
    pub stats: FusionStats,
    pub landmarks: usize,
}

// ─── Localizer ───────────────────────────────────────────────────────────────

pub struct Localizer {
    config: LocalizerConfig,
    map: LandmarkMap,
    ekf: PoseEkf,
    observer: LandmarkObserver,
    presence: PresenceTracker,
    wheel_speed: f64,
    reset_level: bool,
    stats: FusionStats,
}

impl Localizer {
    pub fn new(config: LocalizerConfig, map: LandmarkMap) -> Self {
        let observer = LandmarkObserver::new(
            config.camera_mount(),
            config.seed_policy,
            ObserverLimits::default(),
        );
        Self {
            ekf: PoseEkf::new(config.max_predict_dt),
            observer,
            presence: PresenceTracker::new(PresenceConfig::default()),
            map,
            config,
            wheel_speed: 0.0,
            reset_level: false,
            stats: FusionStats::default(),
        }
    }

    /// Load the configured landmark map; a missing or malformed map is fatal.
    pub fn from_config(config: LocalizerConfig) -> Result<Self> {
        let map = LandmarkMap::load(&config.landmark_map_path)?;
        Ok(Self::new(config, map))
    }

    pub fn dispatch(&mut self, event: &InputEvent, now: f64) -> Vec<FusionEvent> {
        match event {
            InputEvent::RoadSign(det) => self.feed_road_sign(det, now),
            InputEvent::Inertial(imu) => self.feed_inertial(imu, now),
            InputEvent::WheelSpeed(ws) => {
                self.wheel_speed = ws.value as f64;
                Vec::new()
            }
            InputEvent::PoseReset(flag) => self.feed_reset(flag),
            InputEvent::PoseFeedback(fb) => self.feed_pose_feedback(fb, now),
        }
    }

    pub fn dispatch_timed(&mut self, event: &TimedEvent) -> Vec<FusionEvent> {
        self.dispatch(&event.event, event.received_at)
    }

    fn feed_inertial(&mut self, imu: &InertialSample, now: f64) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        let Some(dt) = self.ekf.step_interval(imu.timestamp_us, now) else {
            if self.ekf.mode() != EstimatorMode::Unseeded {
                self.stats.skipped_predicts += 1;
                events.push(FusionEvent::PredictSkipped);
            }
            return events;
        };

        let gyro_z = (imu.gz as f64).to_radians();
        if self
            .ekf
            .predict(dt, gyro_z, self.wheel_speed, self.config.speed_scale)
        {
            self.stats.predicts += 1;
            let p = self.ekf.pose();
            events.push(FusionEvent::Pose(Pose {
                x: p.x as f32,
                y: p.y as f32,
                radius: p.radius as f32,
                speed: p.speed as f32,
                heading: p.heading as f32,
                timestamp: now,
            }));
        }
        events
    }

    fn feed_road_sign(&mut self, det: &RoadSignDetection, now: f64) -> Vec<FusionEvent> {
        self.stats.detections += 1;
        let observation = self.observer.observe(det, &mut self.map, &mut self.ekf, now);
        if observation != Observation::WarmingUp {
            self.presence.note_sighting(now);
        }

        match observation {
            Observation::WarmingUp => {
                self.stats.warmup_dropped += 1;
                vec![]
            }
            Observation::OutOfRange(_) => {
                self.stats.out_of_range += 1;
                vec![]
            }
            Observation::SeedRejected(_) => {
                self.stats.seed_rejected += 1;
                vec![]
            }
            Observation::Debouncing { landmark, hits, gap } => {
                debug!("sign {} hit {} (gap {:.2}s)", landmark, hits, gap);
                self.stats.debounced += 1;
                vec![]
            }
            Observation::Seeded {
                landmark,
                x,
                y,
                heading,
            } => {
                self.stats.seeds += 1;
                vec![FusionEvent::Seeded {
                    landmark,
                    x,
                    y,
                    heading,
                }]
            }
            Observation::Unmapped(event) => {
                self.stats.unmapped += 1;
                vec![FusionEvent::LandmarkPresence(event)]
            }
            Observation::Corrected {
                landmark,
                measurement,
            } => {
                self.stats.corrections += 1;
                vec![FusionEvent::Corrected {
                    landmark,
                    x: measurement.x,
                    y: measurement.y,
                    heading: measurement.heading,
                }]
            }
            Observation::CorrectionSkipped { landmark, outcome } => {
                self.stats.skipped_corrections += 1;
                vec![FusionEvent::CorrectionSkipped {
                    landmark,
                    singular: outcome == CorrectionOutcome::SingularInnovation,
                }]
            }
        }
    }

    /// Edge-triggered: rising arms dead reckoning from the origin, falling
    /// disarms it. Both zero the filter and both are ignored once seeded.
    fn feed_reset(&mut self, flag: &PoseResetFlag) -> Vec<FusionEvent> {
        if flag.value == self.reset_level {
            return Vec::new();
        }
        self.reset_level = flag.value;

        let applied = if flag.value {
            self.ekf.start_dead_reckoning()
        } else {
            self.ekf.reset()
        };
        if applied {
            info!(
                "pose reset ({})",
                if flag.value { "dead reckoning from origin" } else { "unseeded" }
            );
            vec![FusionEvent::ResetApplied {
                dead_reckoning: flag.value,
            }]
        } else {
            debug!("pose reset ignored, filter already seeded");
            vec![FusionEvent::ResetIgnored]
        }
    }

    fn feed_pose_feedback(&mut self, fb: &FusedPoseFeedback, now: f64) -> Vec<FusionEvent> {
        match self.presence.evaluate(
            fb.x as f64,
            fb.y as f64,
            fb.heading as f64,
            fb.radius as f64,
            &self.map,
            now,
        ) {
            Some(event) => {
                self.stats.presence_removals += 1;
                vec![FusionEvent::LandmarkPresence(event)]
            }
            None => Vec::new(),
        }
    }

    /// Apply a live configuration change. A failed map reload keeps the
    /// current map and reports the error.
    pub fn apply_config(&mut self, update: ConfigUpdate) -> Result<()> {
        match update {
            ConfigUpdate::CameraOffsetLateral(v) => self.config.camera_offset_lateral = v,
            ConfigUpdate::CameraOffsetLongitudinal(v) => self.config.camera_offset_longitudinal = v,
            ConfigUpdate::CameraOffsetYawDeg(v) => self.config.camera_offset_yaw_deg = v,
            ConfigUpdate::SpeedScale(v) => self.config.speed_scale = v,
            ConfigUpdate::MaxPredictDt(v) => {
                self.config.max_predict_dt = v;
                self.ekf.set_max_dt(v);
            }
            ConfigUpdate::SeedPolicy(policy) => {
                self.config.seed_policy = policy;
                self.observer.policy = policy;
            }
            ConfigUpdate::LandmarkMapPath(path) => {
                let map = LandmarkMap::load(&path).map_err(|err| {
                    warn!("keeping current landmark map: {}", err);
                    err
                })?;
                self.map = map;
                self.presence.clear();
                self.config.landmark_map_path = path;
            }
        }
        self.observer.mount = self.config.camera_mount();
        Ok(())
    }

    pub fn config(&self) -> &LocalizerConfig {
        &self.config
    }

    pub fn map(&self) -> &LandmarkMap {
        &self.map
    }

    pub fn estimator(&self) -> &PoseEkf {
        &self.ekf
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    pub fn snapshot(&self) -> LocalizerSnapshot {
        LocalizerSnapshot {
            mode: self.ekf.mode(),
            pose: self.ekf.pose(),
            stats: self.stats.clone(),
            landmarks: self.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark_map::Landmark;

    fn config() -> LocalizerConfig {
        LocalizerConfig {
            camera_offset_lateral: 0.0,
            camera_offset_yaw_deg: 0.0,
            ..LocalizerConfig::default()
        }
    }

    fn map() -> LandmarkMap {
        LandmarkMap::new(vec![
            Landmark::new(5, 0.0, 0.0, 0.5, 0.0, true, false).unwrap(),
            Landmark::new(7, 4.0, 0.0, 0.5, 0.0, false, true).unwrap(),
        ])
    }

    fn sign(id: i16, longitudinal: f32) -> InputEvent {
        InputEvent::RoadSign(RoadSignDetection {
            id,
            image_size: 0.0,
            rotation_vector: [0.0; 3],
            translation_vector: [0.0, 0.0, longitudinal],
        })
    }

    fn imu(gz: f32, timestamp_us: u32) -> InputEvent {
        InputEvent::Inertial(InertialSample {
            gz,
            timestamp_us,
            ..Default::default()
        })
    }

    fn reset(value: bool) -> InputEvent {
        InputEvent::PoseReset(PoseResetFlag {
            value,
            timestamp_us: 0,
        })
    }

    fn seeded() -> Localizer {
        let mut loc = Localizer::new(config(), map());
        for i in 0..50 {
            assert!(loc.dispatch(&sign(5, 1.0), i as f64 * 0.01).is_empty());
        }
        let out = loc.dispatch(&sign(5, 1.0), 1.0);
        assert!(matches!(out[..], [FusionEvent::Seeded { landmark: 5, .. }]));
        loc
    }

    #[test]
    fn test_no_pose_before_seed_or_reset() {
        let mut loc = Localizer::new(config(), map());
        loc.dispatch(
            &InputEvent::WheelSpeed(WheelSpeed {
                value: 1.0,
                timestamp_us: 0,
            }),
            0.0,
        );
        assert!(loc.dispatch(&imu(0.0, 0), 0.0).is_empty());
        assert!(loc.dispatch(&imu(0.0, 100_000), 0.1).is_empty());
        assert_eq!(loc.stats().predicts, 0);
    }

    #[test]
    fn test_reset_edge_enables_dead_reckoning() {
        let mut loc = Localizer::new(config(), map());
        let out = loc.dispatch(&reset(true), 0.0);
        assert_eq!(out, vec![FusionEvent::ResetApplied { dead_reckoning: true }]);
        // level, not edge
        assert!(loc.dispatch(&reset(true), 0.0).is_empty());

        loc.dispatch(
            &InputEvent::WheelSpeed(WheelSpeed {
                value: 1.0,
                timestamp_us: 0,
            }),
            0.0,
        );
        loc.dispatch(&imu(0.0, 0), 0.0);
        let out = loc.dispatch(&imu(0.0, 100_000), 0.1);
        match &out[..] {
            [FusionEvent::Pose(p)] => {
                assert!((p.x - 0.1).abs() < 1e-6);
                assert!(p.radius > 0.0);
                assert_eq!(p.timestamp, 0.1);
            }
            other => panic!("expected a pose, got {other:?}"),
        }

        let out = loc.dispatch(&reset(false), 0.2);
        assert_eq!(out, vec![FusionEvent::ResetApplied { dead_reckoning: false }]);
        assert_eq!(loc.estimator().mode(), EstimatorMode::Unseeded);
    }

    #[test]
    fn test_seed_then_ignore_resets() {
        let mut loc = seeded();
        assert_eq!(loc.estimator().mode(), EstimatorMode::Tracking);
        let pose = loc.estimator().pose();
        assert!((pose.x + 1.0).abs() < 1e-6);

        assert_eq!(loc.dispatch(&reset(true), 2.0), vec![FusionEvent::ResetIgnored]);
        assert_eq!(loc.estimator().mode(), EstimatorMode::Tracking);
        assert_eq!(loc.estimator().pose(), pose);
    }

    #[test]
    fn test_unmapped_sign_emits_presence_event() {
        let mut loc = seeded();
        let out = loc.dispatch(&sign(11, 1.0), 2.0);
        match &out[..] {
            [FusionEvent::LandmarkPresence(ev)] => {
                assert_eq!(ev.id, 11);
                assert!((ev.x + 1.0).abs() < 1e-6);
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(loc.stats().unmapped, 1);
    }

    #[test]
    fn test_speed_scale_applies_immediately() {
        let mut loc = seeded();
        loc.dispatch(
            &InputEvent::WheelSpeed(WheelSpeed {
                value: 2.0,
                timestamp_us: 0,
            }),
            2.0,
        );
        loc.dispatch(&imu(0.0, 0), 2.0);
        loc.apply_config(ConfigUpdate::SpeedScale(0.5)).unwrap();
        let out = loc.dispatch(&imu(0.0, 100_000), 2.1);
        match &out[..] {
            [FusionEvent::Pose(p)] => assert!((p.speed - 1.0).abs() < 1e-6),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_failed_map_reload_keeps_old_map() {
        let mut loc = Localizer::new(config(), map());
        let err = loc.apply_config(ConfigUpdate::LandmarkMapPath("/nonexistent.xml".into()));
        assert!(err.is_err());
        assert_eq!(loc.map().len(), 2);
        assert_eq!(loc.config().landmark_map_path, PathBuf::from("roadSign.xml"));
    }

    #[test]
    fn test_map_reload_drops_captured_landmark() {
        let lead = 25f64.to_radians();
        let sign = Landmark::new(3, lead.cos(), -lead.sin(), 0.5, 0.0, false, true).unwrap();
        let mut loc = Localizer::new(config(), LandmarkMap::new(vec![sign]));
        let here = InputEvent::PoseFeedback(FusedPoseFeedback {
            x: 0.0,
            y: 0.0,
            radius: 0.5,
            speed: 0.0,
            heading: 0.0,
        });
        // No sightings yet, so the watchdog is live and captures index 0
        assert!(loc.dispatch(&here, 10.0).is_empty());

        let dir = std::env::temp_dir().join(format!("reload_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("far_map.json");
        std::fs::write(
            &path,
            r#"{"landmarks": [{"id": 9, "x": 50.0, "y": 50.0, "radius": 0.5, "direction": 0, "update": true}]}"#,
        )
        .unwrap();
        loc.apply_config(ConfigUpdate::LandmarkMapPath(path.clone())).unwrap();
        assert_eq!(loc.map().len(), 1);

        // Same pose against the new map: nothing was driven past
        assert!(loc.dispatch(&here, 10.1).is_empty());
        assert_eq!(loc.stats().presence_removals, 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stale_imu_gap_skips_predict() {
        let mut loc = seeded();
        loc.dispatch(&imu(0.0, 0), 2.0);
        let out = loc.dispatch(&imu(0.0, 2_000_000), 4.0);
        assert_eq!(out, vec![FusionEvent::PredictSkipped]);
        // first sample has no interval either
        assert_eq!(loc.stats().skipped_predicts, 2);
    }

    #[test]
    fn test_pose_feedback_drives_presence() {
        let mut loc = seeded();
        let feedback = |x: f32| {
            InputEvent::PoseFeedback(FusedPoseFeedback {
                x,
                y: 0.0,
                radius: 0.5,
                speed: 1.0,
                heading: 0.0,
            })
        };
        // Scan point 1 m ahead at -25°; landmark 7 sits at (4, 0)
        let lead = 25f32.to_radians();
        let capture_x = 4.0 - lead.cos();
        let capture_y = lead.sin();
        let capture = InputEvent::PoseFeedback(FusedPoseFeedback {
            x: capture_x,
            y: capture_y,
            radius: 0.5,
            speed: 1.0,
            heading: 0.0,
        });

        // Sightings too recent
        assert!(loc.dispatch(&capture, 2.0).is_empty());
        assert!(loc.dispatch(&capture, 5.0).is_empty());
        let out = loc.dispatch(&feedback(capture_x + 1.0), 5.1);
        match &out[..] {
            [FusionEvent::LandmarkPresence(ev)] => assert_eq!(ev.id, -1),
            other => panic!("{other:?}"),
        }
        assert_eq!(loc.stats().presence_removals, 1);
    }

    #[test]
    fn test_event_log_shape() {
        let json = r#"{"received_at": 1.5, "kind": "wheel_speed", "value": 0.8}"#;
        let ev: TimedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.received_at, 1.5);
        assert!(matches!(ev.event, InputEvent::WheelSpeed(WheelSpeed { value, .. }) if value == 0.8));
    }
}
