use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalizerError {
    #[error("landmark map not found: {path}")]
    MapNotFound { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    MapIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed landmark map {path}: {message}")]
    MapFormat { path: PathBuf, message: String },

    #[error("invalid landmark {id}: {message}")]
    InvalidLandmark { id: u16, message: String },

    #[error("session log error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, LocalizerError>;
