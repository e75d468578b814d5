//! Table of known road signs.
//!
//! Loaded once at startup from either the XML `configuration/roadSign`
//! layout or a JSON `{"landmarks": [...]}` document. After loading only the
//! per-sign debounce bookkeeping changes.

use std::fs;
use std::path::Path;

use log::info;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{LocalizerError, Result};
use crate::geometry::HeadingBucket;

/// How far a map direction may sit from a cardinal orientation (deg).
const DIRECTION_TOLERANCE_DEG: f64 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Landmark {
    pub id: u16,
    pub x: f64,
    pub y: f64,
    /// Association radius (m)
    pub radius: f64,
    pub heading: HeadingBucket,
    /// May seed the filter from an unknown pose
    pub seedable: bool,
    /// May correct a tracking filter
    pub correctable: bool,

    // ── Debounce bookkeeping ──
    pub last_seen: Option<f64>,
    pub consecutive_hits: u32,
}

impl Landmark {
    pub fn new(
        id: u16,
        x: f64,
        y: f64,
        radius: f64,
        direction_deg: f64,
        seedable: bool,
        correctable: bool,
    ) -> Result<Self> {
        let heading = HeadingBucket::from_direction_deg(direction_deg, DIRECTION_TOLERANCE_DEG)
            .ok_or_else(|| LocalizerError::InvalidLandmark {
                id,
                message: format!("direction {direction_deg}° is not a cardinal orientation"),
            })?;
        if !(radius.is_finite() && radius >= 0.0) || !x.is_finite() || !y.is_finite() {
            return Err(LocalizerError::InvalidLandmark {
                id,
                message: "position and radius must be finite, radius non-negative".into(),
            });
        }
        Ok(Self {
            id,
            x,
            y,
            radius,
            heading,
            seedable,
            correctable,
            last_seen: None,
            consecutive_hits: 0,
        })
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Detection ids are signed; negative ids never match.
    pub fn matches_id(&self, detection_id: i16) -> bool {
        u16::try_from(detection_id).map_or(false, |id| id == self.id)
    }

    /// Register a sighting at `now`. Returns the gap since the previous one
    /// (infinite if never seen). A gap above `stale_after` restarts the streak.
    pub fn record_hit(&mut self, now: f64, stale_after: f64) -> f64 {
        let dt = self.last_seen.map_or(f64::INFINITY, |t| now - t);
        if dt > stale_after {
            self.consecutive_hits = 0;
        }
        self.last_seen = Some(now);
        self.consecutive_hits = self.consecutive_hits.saturating_add(1);
        dt
    }
}

#[derive(Deserialize)]
struct LandmarkRecord {
    id: u16,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    radius: f64,
    #[serde(default)]
    direction: f64,
    #[serde(default, alias = "init")]
    seedable: bool,
    #[serde(default, alias = "update")]
    correctable: bool,
}

#[derive(Deserialize)]
struct LandmarkFile {
    landmarks: Vec<LandmarkRecord>,
}

#[derive(Clone, Debug, Default)]
pub struct LandmarkMap {
    landmarks: Vec<Landmark>,
}

impl LandmarkMap {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }

    /// Load from disk; `.xml` files use the roadSign layout, anything else JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LocalizerError::MapNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|source| LocalizerError::MapIo {
            path: path.to_path_buf(),
            source,
        })?;
        let is_xml = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        let parsed = if is_xml {
            Self::from_xml_str(&text)
        } else {
            Self::from_json_str(&text)
        };
        let map = parsed.map_err(|err| match err {
            LocalizerError::MapFormat { message, .. } => LocalizerError::MapFormat {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        info!(
            "Loaded {} landmarks ({} seedable, {} correctable) from {}",
            map.len(),
            map.iter().filter(|l| l.seedable).count(),
            map.iter().filter(|l| l.correctable).count(),
            path.display()
        );
        Ok(map)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: LandmarkFile =
            serde_json::from_str(text).map_err(|e| format_error(e.to_string()))?;
        file.landmarks
            .into_iter()
            .map(|r| {
                Landmark::new(
                    r.id,
                    r.x,
                    r.y,
                    r.radius,
                    r.direction,
                    r.seedable,
                    r.correctable,
                )
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    pub fn from_xml_str(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        let mut landmarks = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                    if e.name().as_ref() == b"roadSign" =>
                {
                    landmarks.push(parse_road_sign(e)?);
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(format_error(e.to_string())),
                _ => {}
            }
        }

        Ok(Self::new(landmarks))
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.landmarks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Landmark> {
        self.landmarks.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.landmarks.iter()
    }

    /// First entry in map order satisfying `pred`.
    pub fn find_mut<F>(&mut self, mut pred: F) -> Option<&mut Landmark>
    where
        F: FnMut(&Landmark) -> bool,
    {
        self.landmarks.iter_mut().find(|l| pred(l))
    }
}

fn format_error(message: String) -> LocalizerError {
    LocalizerError::MapFormat {
        path: Default::default(),
        message,
    }
}

fn parse_road_sign(e: &BytesStart<'_>) -> Result<Landmark> {
    let mut id: Option<u16> = None;
    let (mut x, mut y, mut radius, mut direction) = (0.0, 0.0, 0.0, 0.0);
    let (mut seedable, mut correctable) = (false, false);

    for attr in e.attributes() {
        let attr = attr.map_err(|err| format_error(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| format_error(err.to_string()))?;
        let value = value.trim();
        match attr.key.as_ref() {
            b"id" => id = Some(parse_attr(value, "id")?),
            b"x" => x = parse_attr(value, "x")?,
            b"y" => y = parse_attr(value, "y")?,
            b"radius" => radius = parse_attr(value, "radius")?,
            b"direction" => direction = parse_attr(value, "direction")?,
            b"init" | b"seedable" => seedable = parse_flag(value)?,
            b"update" | b"correctable" => correctable = parse_flag(value)?,
            _ => {}
        }
    }

    let id = id.ok_or_else(|| format_error("roadSign without id".into()))?;
    Landmark::new(id, x, y, radius, direction, seedable, correctable)
}

fn parse_attr<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| format_error(format!("attribute {name}={value:?} is not a number")))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "True" | "TRUE" => Ok(true),
        "0" | "false" | "False" | "FALSE" | "" => Ok(false),
        other => Err(format_error(format!("expected boolean flag, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const XML_MAP: &str = r#"<?xml version="1.0" encoding="iso-8859-1" standalone="no"?>
<configuration>
    <roadSign id="5" x="0.0" y="0.0" radius="0.5" direction="0" init="1" update="0"/>
    <roadSign id="7" x="3.5" y="-1.25" radius="0.4" direction="270" init="0" update="1"/>
    <roadSign id="7" x="8.0" y="2.0" radius="0.4" direction="90" init="0" update="1"></roadSign>
</configuration>"#;

    #[test]
    fn test_parse_xml_layout() {
        let map = LandmarkMap::from_xml_str(XML_MAP).unwrap();
        assert_eq!(map.len(), 3);

        let first = map.get(0).unwrap();
        assert_eq!(first.id, 5);
        assert!(first.seedable && !first.correctable);
        assert_eq!(first.heading, HeadingBucket::East);

        let second = map.get(1).unwrap();
        assert_eq!(second.heading, HeadingBucket::South);
        assert_eq!(second.position(), (3.5, -1.25));
        assert!(second.correctable);
        assert_eq!(map.get(2).unwrap().heading, HeadingBucket::North);
    }

    #[test]
    fn test_parse_json_layout_with_aliases() {
        let json = r#"{"landmarks": [
            {"id": 5, "x": 1.0, "y": 2.0, "radius": 0.5, "direction": 180, "seedable": true},
            {"id": 6, "x": 0.0, "y": 0.0, "radius": 0.3, "direction": -90, "update": true}
        ]}"#;
        let map = LandmarkMap::from_json_str(json).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(0).unwrap().heading, HeadingBucket::West);
        assert!(map.get(0).unwrap().seedable);
        assert!(map.get(1).unwrap().correctable);
        assert!(!map.get(1).unwrap().seedable);
    }

    #[test]
    fn test_rejects_diagonal_direction() {
        let json = r#"{"landmarks": [{"id": 9, "radius": 0.5, "direction": 30}]}"#;
        match LandmarkMap::from_json_str(json) {
            Err(LocalizerError::InvalidLandmark { id, .. }) => assert_eq!(id, 9),
            other => panic!("expected InvalidLandmark, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_xml_number() {
        let xml = r#"<configuration><roadSign id="1" x="abc"/></configuration>"#;
        assert!(matches!(
            LandmarkMap::from_xml_str(xml),
            Err(LocalizerError::MapFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let path = PathBuf::from("/nonexistent/roadSign.xml");
        assert!(matches!(
            LandmarkMap::load(&path),
            Err(LocalizerError::MapNotFound { .. })
        ));
    }

    #[test]
    fn test_load_from_disk_by_extension() {
        let dir = std::env::temp_dir().join(format!("landmark_map_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roadSign.xml");
        fs::write(&path, XML_MAP).unwrap();
        let map = LandmarkMap::load(&path).unwrap();
        assert_eq!(map.len(), 3);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_record_hit_streak() {
        let mut lm = Landmark::new(1, 0.0, 0.0, 0.5, 0.0, false, true).unwrap();
        assert!(lm.record_hit(10.0, 1.0).is_infinite());
        assert_eq!(lm.consecutive_hits, 1);
        assert!((lm.record_hit(10.2, 1.0) - 0.2).abs() < 1e-9);
        assert_eq!(lm.consecutive_hits, 2);
        lm.record_hit(12.5, 1.0);
        assert_eq!(lm.consecutive_hits, 1);
    }

    #[test]
    fn test_negative_detection_id_never_matches() {
        let lm = Landmark::new(0, 0.0, 0.0, 0.5, 0.0, true, true).unwrap();
        assert!(lm.matches_id(0));
        assert!(!lm.matches_id(-1));
    }
}
