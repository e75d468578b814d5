//! Road-sign landmark localizer.
//!
//! A 6-state EKF dead-reckons from gyro yaw rate and wheel speed, is seeded
//! and corrected by camera sightings of mapped road signs, and reports when
//! the vehicle drives past a known sign.

pub mod error;
pub mod filters;
pub mod geometry;
pub mod landmark_map;
pub mod live_status;
pub mod observer;
pub mod presence;
pub mod replay;
pub mod runtime;
pub mod sensor_fusion;
pub mod types;

pub use error::{LocalizerError, Result};
pub use sensor_fusion::{ConfigUpdate, FusionEvent, InputEvent, Localizer, LocalizerConfig, TimedEvent};
