use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{LocalizerError, Result};
use crate::sensor_fusion::TimedEvent;

/// Recorded input stream, in arrival order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionLog {
    pub events: Vec<TimedEvent>,
}

/// Load a `*.json` or gzip-compressed `*.json.gz` session.
pub fn load_session(path: &Path) -> Result<SessionLog> {
    let file = File::open(path).map_err(|e| {
        LocalizerError::Session(format!("cannot open {}: {}", path.display(), e))
    })?;
    let parsed = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))
    } else {
        serde_json::from_reader(BufReader::new(file))
    };
    parsed.map_err(|e| LocalizerError::Session(format!("{}: {}", path.display(), e)))
}
