// observer.rs: Road-sign detections in, filter seeds and corrections out.
//
// Per detection: warm-up drop, geometric decode, validity gate, then either
// seeding (filter not tracking) or association + debounce + correction.

use log::{debug, info};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::filters::{CorrectionOutcome, PoseEkf, PoseMeasurement};
use crate::geometry::{distance, normalize_angle, project, HeadingBucket};
use crate::landmark_map::LandmarkMap;
use crate::types::linalg::rotation_from_rodrigues;
use crate::types::{LandmarkPresenceEvent, RoadSignDetection};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Camera placement relative to the vehicle reference point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMount {
    pub lateral: f64,
    pub longitudinal: f64,
    pub yaw_deg: f64,
}

impl Default for CameraMount {
    fn default() -> Self {
        Self {
            lateral: 0.05,
            longitudinal: 0.0,
            yaw_deg: 2.0,
        }
    }
}

/// How the filter may be seeded from a sign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Seed only when the sign is seen nearly head-on
    #[default]
    RequireHeadOn,
    /// Take heading from the map orientation alone, at any yaw
    TrustMapHeading,
}

#[derive(Clone, Debug)]
pub struct ObserverLimits {
    pub warmup_detections: u32,
    pub max_bearing_deg: f64,
    pub max_distance: f64,
    pub max_seed_yaw_deg: f64,
    /// Largest sighting gap that may still correct (s)
    pub max_correction_gap: f64,
    /// Gap after which a hit streak restarts (s)
    pub streak_reset_gap: f64,
    pub required_hits: u32,
    /// Diagonal of R for (x, y, heading)
    pub measurement_noise: [f64; 3],
}

impl Default for ObserverLimits {
    fn default() -> Self {
        Self {
            warmup_detections: 50,
            max_bearing_deg: 60.0,
            max_distance: 2.5,
            max_seed_yaw_deg: 8.0,
            max_correction_gap: 0.3,
            streak_reset_gap: 1.0,
            required_hits: 10,
            measurement_noise: [0.5, 0.5, 1.0],
        }
    }
}

// ─── Decode ──────────────────────────────────────────────────────────────────

/// A detection decoded into vehicle-relative range and angles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignSighting {
    pub id: i16,
    /// Ground-plane range to the sign (m)
    pub distance: f64,
    /// Positive to the left of the vehicle axis (deg)
    pub bearing_deg: f64,
    /// Sign's yaw relative to the camera axis, mount offset applied (deg)
    pub yaw_deg: f64,
}

impl SignSighting {
    pub fn decode(detection: &RoadSignDetection, mount: &CameraMount) -> Self {
        let lateral = detection.translation_vector[0] as f64 + mount.lateral;
        let longitudinal = detection.translation_vector[2] as f64 + mount.longitudinal;

        let distance = lateral.hypot(longitudinal);
        let bearing_deg = -normalize_angle(lateral.atan2(longitudinal)).to_degrees();

        let rotation = rotation_from_rodrigues(detection.rotation_vector);
        let r20 = rotation.matrix()[(2, 0)].clamp(-1.0, 1.0);
        let yaw_deg = -r20.asin().to_degrees() + mount.yaw_deg;

        Self {
            id: detection.id,
            distance,
            bearing_deg,
            yaw_deg,
        }
    }

    pub fn bearing(&self) -> f64 {
        self.bearing_deg.to_radians()
    }

    pub fn yaw(&self) -> f64 {
        self.yaw_deg.to_radians()
    }

    /// Vehicle position that puts the sign at this range and bearing when
    /// the vehicle faces `heading`.
    fn vehicle_position(&self, landmark: (f64, f64), heading: f64) -> (f64, f64) {
        let line_of_sight = normalize_angle(heading + self.bearing());
        project(landmark.0, landmark.1, line_of_sight, -self.distance)
    }
}

// ─── Observer ────────────────────────────────────────────────────────────────

/// What a single detection did.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    WarmingUp,
    OutOfRange(SignSighting),
    Seeded {
        landmark: u16,
        x: f64,
        y: f64,
        heading: f64,
    },
    /// No seedable entry, or the sign was not seen head-on
    SeedRejected(SignSighting),
    /// No correctable entry near the projected position
    Unmapped(LandmarkPresenceEvent),
    /// Matched but waiting on the hit streak or a fresh sighting
    Debouncing {
        landmark: u16,
        hits: u32,
        gap: f64,
    },
    Corrected {
        landmark: u16,
        measurement: PoseMeasurement,
    },
    CorrectionSkipped {
        landmark: u16,
        outcome: CorrectionOutcome,
    },
}

pub struct LandmarkObserver {
    pub mount: CameraMount,
    pub policy: SeedPolicy,
    limits: ObserverLimits,
    measurement_noise: Array2<f64>,
    detections_seen: u32,
}

impl LandmarkObserver {
    pub fn new(mount: CameraMount, policy: SeedPolicy, limits: ObserverLimits) -> Self {
        let measurement_noise = Array2::from_diag(&Array1::from(limits.measurement_noise.to_vec()));
        Self {
            mount,
            policy,
            limits,
            measurement_noise,
            detections_seen: 0,
        }
    }

    /// Detections still inside the warm-up window have been counted too.
    pub fn detections_seen(&self) -> u32 {
        self.detections_seen
    }

    pub fn is_warmed_up(&self) -> bool {
        self.detections_seen > self.limits.warmup_detections
    }

    pub fn observe(
        &mut self,
        detection: &RoadSignDetection,
        map: &mut LandmarkMap,
        ekf: &mut PoseEkf,
        now: f64,
    ) -> Observation {
        self.detections_seen = self.detections_seen.saturating_add(1);
        if !self.is_warmed_up() {
            return Observation::WarmingUp;
        }

        let sighting = SignSighting::decode(detection, &self.mount);
        if sighting.bearing_deg.abs() > self.limits.max_bearing_deg
            || sighting.distance > self.limits.max_distance
        {
            debug!(
                "sign {} out of range: d={:.2}m bearing={:.1}°",
                sighting.id, sighting.distance, sighting.bearing_deg
            );
            return Observation::OutOfRange(sighting);
        }

        if ekf.is_tracking() {
            self.track(sighting, map, ekf, now)
        } else {
            self.seed(sighting, map, ekf)
        }
    }

    fn seed(&self, sighting: SignSighting, map: &LandmarkMap, ekf: &mut PoseEkf) -> Observation {
        // Several seedable entries may share an id; the last one in map order wins.
        let Some(landmark) = map
            .iter()
            .rev()
            .find(|l| l.seedable && l.matches_id(sighting.id))
        else {
            return Observation::SeedRejected(sighting);
        };

        let heading = match self.policy {
            SeedPolicy::RequireHeadOn => {
                if sighting.yaw_deg.abs() > self.limits.max_seed_yaw_deg {
                    debug!(
                        "sign {} seen at yaw {:.1}°, not seeding",
                        sighting.id, sighting.yaw_deg
                    );
                    return Observation::SeedRejected(sighting);
                }
                landmark.heading.radians() + sighting.yaw()
            }
            SeedPolicy::TrustMapHeading => landmark.heading.radians(),
        };
        let heading = normalize_angle(heading);
        let (x, y) = sighting.vehicle_position(landmark.position(), heading);

        ekf.initialize(x, y, heading);
        info!("seeded from sign {} at d={:.2}m", landmark.id, sighting.distance);
        Observation::Seeded {
            landmark: landmark.id,
            x,
            y,
            heading,
        }
    }

    fn track(
        &self,
        sighting: SignSighting,
        map: &mut LandmarkMap,
        ekf: &mut PoseEkf,
        now: f64,
    ) -> Observation {
        let pose = ekf.pose();
        let bucket = HeadingBucket::quantize(pose.heading);
        let line_of_sight = normalize_angle(pose.heading + sighting.bearing());
        let marker = project(pose.x, pose.y, line_of_sight, sighting.distance);

        // First match in map order wins, even if a later entry is closer.
        let matched = map.find_mut(|l| {
            l.correctable
                && l.heading == bucket
                && l.matches_id(sighting.id)
                && distance(marker, l.position()) < l.radius
        });
        let Some(landmark) = matched else {
            return Observation::Unmapped(LandmarkPresenceEvent::new(
                sighting.id,
                pose.x,
                pose.y,
                pose.heading,
            ));
        };

        let gap = landmark.record_hit(now, self.limits.streak_reset_gap);
        if gap > self.limits.max_correction_gap
            || landmark.consecutive_hits < self.limits.required_hits
        {
            return Observation::Debouncing {
                landmark: landmark.id,
                hits: landmark.consecutive_hits,
                gap,
            };
        }

        let heading = match self.policy {
            SeedPolicy::RequireHeadOn => normalize_angle(landmark.heading.radians() + sighting.yaw()),
            SeedPolicy::TrustMapHeading => pose.heading,
        };
        let (x, y) = sighting.vehicle_position(landmark.position(), heading);
        let measurement = PoseMeasurement { x, y, heading };
        let id = landmark.id;

        match ekf.correct(&measurement, &self.measurement_noise) {
            CorrectionOutcome::Applied => {
                debug!("corrected from sign {} ({:.3}, {:.3})", id, x, y);
                Observation::Corrected {
                    landmark: id,
                    measurement,
                }
            }
            outcome => Observation::CorrectionSkipped {
                landmark: id,
                outcome,
            },
        }
    }
}

impl Default for LandmarkObserver {
    fn default() -> Self {
        Self::new(CameraMount::default(), SeedPolicy::default(), ObserverLimits::default())
    }
}
