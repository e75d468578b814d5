//! "Have we just driven past a sign?" watchdog.
//!
//! Runs on each fused pose while sign sightings have gone quiet. A fixed
//! scan point ahead-right of the vehicle is compared against correctable
//! landmarks; losing a captured landmark emits a removal event.

use serde::{Deserialize, Serialize};

use crate::geometry::{distance, normalize_angle, project, HeadingBucket};
use crate::landmark_map::LandmarkMap;
use crate::types::LandmarkPresenceEvent;

#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub scan_bearing_deg: f64,
    pub scan_distance: f64,
    pub capture_radius: f64,
    /// Sighting silence before the watchdog engages (s)
    pub engage_after: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            scan_bearing_deg: -25.0,
            scan_distance: 1.0,
            capture_radius: 0.2,
            engage_after: 3.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceState {
    Searching,
    Tracking { landmark: usize },
}

pub struct PresenceTracker {
    config: PresenceConfig,
    state: PresenceState,
    last_sighting: Option<f64>,
    radius_seen: bool,
    removals: u64,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            state: PresenceState::Searching,
            last_sighting: None,
            radius_seen: false,
            removals: 0,
        }
    }

    /// Record a sign sighting that made it past warm-up.
    pub fn note_sighting(&mut self, now: f64) {
        self.last_sighting = Some(now);
    }

    /// Forget any captured landmark, e.g. after the map was replaced.
    pub fn clear(&mut self) {
        self.state = PresenceState::Searching;
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn removals(&self) -> u64 {
        self.removals
    }

    fn engaged(&self, now: f64) -> bool {
        let quiet = self
            .last_sighting
            .map_or(true, |t| now - t > self.config.engage_after);
        quiet && self.radius_seen
    }

    pub fn scan_point(&self, x: f64, y: f64, heading: f64) -> (f64, f64) {
        let angle = normalize_angle(heading + self.config.scan_bearing_deg.to_radians());
        project(x, y, angle, self.config.scan_distance)
    }

    /// Evaluate one fused pose. Returns a removal event when a captured
    /// landmark drops out of the scan window.
    pub fn evaluate(
        &mut self,
        x: f64,
        y: f64,
        heading: f64,
        radius: f64,
        map: &LandmarkMap,
        now: f64,
    ) -> Option<LandmarkPresenceEvent> {
        if radius != 0.0 {
            self.radius_seen = true;
        }
        if !self.engaged(now) {
            self.state = PresenceState::Searching;
            return None;
        }

        let heading = normalize_angle(heading);
        let scan = self.scan_point(x, y, heading);

        match self.state {
            PresenceState::Searching => {
                let bucket = HeadingBucket::quantize(heading);
                let captured = map.iter().position(|l| {
                    l.correctable
                        && l.heading == bucket
                        && distance(scan, l.position()) <= self.config.capture_radius
                });
                if let Some(landmark) = captured {
                    self.state = PresenceState::Tracking { landmark };
                }
                None
            }
            PresenceState::Tracking { landmark } => {
                let still_near = map
                    .get(landmark)
                    .map_or(false, |l| distance(scan, l.position()) <= self.config.capture_radius);
                if still_near {
                    return None;
                }
                self.state = PresenceState::Searching;
                self.removals += 1;
                Some(LandmarkPresenceEvent::new(
                    LandmarkPresenceEvent::REMOVED,
                    x,
                    y,
                    heading,
                ))
            }
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark_map::Landmark;

    /// One east-facing correctable sign sitting exactly on the scan point of
    /// a vehicle at the origin facing east.
    fn setup() -> (PresenceTracker, LandmarkMap, (f64, f64)) {
        let tracker = PresenceTracker::default();
        let (sx, sy) = tracker.scan_point(0.0, 0.0, 0.0);
        let map = LandmarkMap::new(vec![
            Landmark::new(3, sx, sy, 0.5, 0.0, false, true).unwrap(),
        ]);
        (tracker, map, (sx, sy))
    }

    #[test]
    fn test_scan_point_is_ahead_right() {
        let tracker = PresenceTracker::default();
        let (x, y) = tracker.scan_point(0.0, 0.0, 0.0);
        assert!((x - 25f64.to_radians().cos()).abs() < 1e-12);
        assert!((y + 25f64.to_radians().sin()).abs() < 1e-12);
    }

    #[test]
    fn test_search_capture_release() {
        let (mut tracker, map, _) = setup();

        // Nothing near
        assert_eq!(tracker.evaluate(-5.0, 0.0, 0.0, 1.0, &map, 10.0), None);
        assert_eq!(tracker.state(), PresenceState::Searching);

        // Within 0.2 m
        assert_eq!(tracker.evaluate(0.1, 0.0, 0.0, 1.0, &map, 10.1), None);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });

        // Still close
        assert_eq!(tracker.evaluate(0.15, 0.0, 0.0, 1.0, &map, 10.2), None);

        // Drove past
        let event = tracker.evaluate(0.5, 0.0, 0.0, 1.0, &map, 10.3).unwrap();
        assert_eq!(event.id, -1);
        assert_eq!(event.x, 0.5);
        assert_eq!(tracker.state(), PresenceState::Searching);
        assert_eq!(tracker.removals(), 1);

        // Exactly one event
        assert_eq!(tracker.evaluate(0.6, 0.0, 0.0, 1.0, &map, 10.4), None);
        assert_eq!(tracker.evaluate(0.7, 0.0, 0.0, 1.0, &map, 10.5), None);
        assert_eq!(tracker.removals(), 1);
    }

    #[test]
    fn test_capture_includes_boundary() {
        let mut tracker = PresenceTracker::default();
        let heading = 25f64.to_radians();
        // Scan point of this pose is exactly the origin
        assert_eq!(tracker.scan_point(-1.0, 0.0, heading), (0.0, 0.0));
        let map = LandmarkMap::new(vec![
            Landmark::new(3, 0.2, 0.0, 0.5, 0.0, false, true).unwrap(),
        ]);
        assert_eq!(tracker.evaluate(-1.0, 0.0, heading, 1.0, &map, 10.0), None);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });
        // Same distance keeps it captured
        assert_eq!(tracker.evaluate(-1.0, 0.0, heading, 1.0, &map, 10.1), None);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });
    }

    #[test]
    fn test_clear_drops_capture() {
        let (mut tracker, map, _) = setup();
        tracker.evaluate(0.0, 0.0, 0.0, 1.0, &map, 10.0);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });
        tracker.clear();
        assert_eq!(tracker.state(), PresenceState::Searching);
        assert_eq!(tracker.removals(), 0);
    }

    #[test]
    fn test_wrong_bucket_is_not_captured() {
        let (mut tracker, map, (sx, sy)) = setup();
        // Pose whose scan point lands on the sign while facing north
        let heading = std::f64::consts::FRAC_PI_2;
        let scan_angle = heading - 25f64.to_radians();
        let (x, y) = (sx - scan_angle.cos(), sy - scan_angle.sin());
        assert_eq!(tracker.evaluate(x, y, heading, 1.0, &map, 10.0), None);
        assert_eq!(tracker.state(), PresenceState::Searching);
    }

    #[test]
    fn test_recent_sighting_keeps_watchdog_idle() {
        let (mut tracker, map, _) = setup();
        tracker.note_sighting(9.0);
        assert_eq!(tracker.evaluate(0.0, 0.0, 0.0, 1.0, &map, 10.0), None);
        assert_eq!(tracker.state(), PresenceState::Searching);

        // Engages once sightings are more than 3 s old
        assert_eq!(tracker.evaluate(0.0, 0.0, 0.0, 1.0, &map, 12.5), None);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });

        // A fresh sighting drops back to searching without an event
        tracker.note_sighting(12.6);
        assert_eq!(tracker.evaluate(3.0, 0.0, 0.0, 1.0, &map, 12.7), None);
        assert_eq!(tracker.state(), PresenceState::Searching);
        assert_eq!(tracker.removals(), 0);
    }

    #[test]
    fn test_waits_for_nonzero_radius() {
        let (mut tracker, map, _) = setup();
        assert_eq!(tracker.evaluate(0.0, 0.0, 0.0, 0.0, &map, 10.0), None);
        assert_eq!(tracker.state(), PresenceState::Searching);
        tracker.evaluate(0.0, 0.0, 0.0, 0.8, &map, 10.1);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });
        // Latched: a later zero radius does not disengage
        tracker.evaluate(0.0, 0.0, 0.0, 0.0, &map, 10.2);
        assert_eq!(tracker.state(), PresenceState::Tracking { landmark: 0 });
    }
}
