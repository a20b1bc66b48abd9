//! Error types for window resolution, configuration, blending and tracking.

use thiserror::Error;

pub type MoveResult<T> = Result<T, MoveError>;

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("Invalid static window '{spec}': {reason}")]
    InvalidWindowSpec { spec: String, reason: String },

    #[error("Window mapping incomplete: {}", describe_mapping_gaps(.missing_keys, .invalid_values))]
    MissingWindowMapping {
        missing_keys: Vec<String>,
        /// (video name, offending value)
        invalid_values: Vec<(String, String)>,
    },

    #[error("Invalid video record ({video}): {reason}")]
    InvalidVideoRecord { video: String, reason: String },

    #[error("Detector {detector} produces {family} descriptors and cannot be paired with matcher {matcher}")]
    IncompatibleDetectorMatcher {
        detector: String,
        matcher: String,
        family: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read frame {frame_index} of {video}")]
    FrameReadError { video: String, frame_index: usize },

    #[error("Cannot blend an empty frame set")]
    EmptyFrameSet,

    #[error("Frame {index} has shape {found}, expected {expected}")]
    InconsistentFrameShape {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("Failed to open video {path}: {reason}")]
    VideoOpen { path: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MoveError {
    pub fn invalid_window(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWindowSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_record(video: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVideoRecord {
            video: video.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True for errors that only affect a single frame read.
    pub fn is_frame_read(&self) -> bool {
        matches!(self, Self::FrameReadError { .. })
    }
}

fn describe_mapping_gaps(missing_keys: &[String], invalid_values: &[(String, String)]) -> String {
    let mut parts = Vec::new();
    if !missing_keys.is_empty() {
        parts.push(format!("missing keys [{}]", missing_keys.join(", ")));
    }
    if !invalid_values.is_empty() {
        let values: Vec<String> = invalid_values
            .iter()
            .map(|(video, value)| format!("\"{}\" (for {})", value, video))
            .collect();
        parts.push(format!("invalid values [{}]", values.join(", ")));
    }
    parts.join(" and ")
}
