use crate::config::TrackerConfig;
use crate::error::{MoveError, MoveResult};
use crate::window::StaticWindow;
use opencv::core::{Mat, CV_64FC1};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 3x3 planar transform, row-major, mapping reference coordinates to target
/// coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub [[f64; 3]; 3]);

impl Homography {
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Read a 3x3 `CV_64FC1` matrix as returned by `find_homography`.
    pub fn from_mat(mat: &Mat) -> MoveResult<Self> {
        if mat.typ() != CV_64FC1 || mat.rows() != 3 || mat.cols() != 3 {
            return Err(MoveError::InvalidInput(format!(
                "expected a 3x3 CV_64FC1 homography, got {}x{} (type {})",
                mat.rows(),
                mat.cols(),
                mat.typ()
            )));
        }
        let mut m = [[0.0; 3]; 3];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = *mat.at_2d::<f64>(r as i32, c as i32)?;
            }
        }
        Ok(Self(m))
    }

    /// Apparent camera displacement in pixels (x, y).
    pub fn translation(&self) -> (f64, f64) {
        (self.0[0][2], self.0[1][2])
    }

    pub fn displacement(&self) -> f64 {
        let (dx, dy) = self.translation();
        dx.hypot(dy)
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }

    /// Largest absolute element-wise difference to the identity.
    #[cfg(test)]
    pub fn max_deviation_from_identity(&self) -> f64 {
        let id = Self::identity();
        self.0
            .iter()
            .flatten()
            .zip(id.0.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// Why a tracking step produced no transform.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    FrameRead,
    FeatureExtraction { message: String },
    InsufficientMatches { found: usize, required: usize },
    DegenerateHomography,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFailure::FrameRead => write!(f, "frame could not be read"),
            StepFailure::FeatureExtraction { message } => {
                write!(f, "feature extraction failed: {}", message)
            }
            StepFailure::InsufficientMatches { found, required } => {
                write!(f, "{} correspondences, {} required", found, required)
            }
            StepFailure::DegenerateHomography => write!(f, "degenerate homography"),
        }
    }
}

/// One sampled point of the main pass. `valid` is true exactly when a
/// transform is present.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackingStep {
    pub frame_index: usize,
    pub time_seconds: f64,
    pub valid: bool,
    pub transform: Option<Homography>,
    pub correspondences: usize,
    pub inliers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl TrackingStep {
    pub fn tracked(
        frame_index: usize,
        time_seconds: f64,
        transform: Homography,
        correspondences: usize,
        inliers: usize,
    ) -> Self {
        Self {
            frame_index,
            time_seconds,
            valid: true,
            transform: Some(transform),
            correspondences,
            inliers,
            failure: None,
        }
    }

    pub fn failed(
        frame_index: usize,
        time_seconds: f64,
        failure: StepFailure,
        correspondences: usize,
    ) -> Self {
        Self {
            frame_index,
            time_seconds,
            valid: false,
            transform: None,
            correspondences,
            inliers: 0,
            failure: Some(failure),
        }
    }

    pub fn translation(&self) -> Option<(f64, f64)> {
        self.transform.as_ref().map(Homography::translation)
    }

    pub fn displacement(&self) -> Option<f64> {
        self.transform.as_ref().map(Homography::displacement)
    }
}

/// One input video under analysis.
#[derive(Debug, Clone, Serialize)]
pub struct VideoRecord {
    pub path: PathBuf,
    pub name: String,
    pub frame_rate: f64,
    pub frame_count: usize,
    pub static_window: StaticWindow,
    movement_series: Vec<TrackingStep>,
}

impl VideoRecord {
    pub fn new(path: &Path, frame_rate: f64, frame_count: usize, static_window: StaticWindow) -> Self {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        Self {
            path: path.to_path_buf(),
            name,
            frame_rate,
            frame_count,
            static_window,
            movement_series: Vec::new(),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.frame_rate
    }

    pub fn movement_series(&self) -> &[TrackingStep] {
        &self.movement_series
    }

    pub fn is_tracked(&self) -> bool {
        !self.movement_series.is_empty()
    }

    /// Store the result of a tracking run. The series is written once.
    pub fn set_movement_series(&mut self, steps: Vec<TrackingStep>) -> MoveResult<()> {
        if self.is_tracked() {
            return Err(MoveError::invalid_record(
                &self.name,
                "movement series already populated",
            ));
        }
        self.movement_series = steps;
        Ok(())
    }

    /// Metadata invariants plus sampling density for the configured step counts.
    pub fn validate(&self, config: &TrackerConfig) -> MoveResult<()> {
        let fail = |reason: String| Err(MoveError::invalid_record(&self.name, reason));

        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return fail(format!("frame rate {} is not positive", self.frame_rate));
        }
        if self.frame_count == 0 {
            return fail("video has no frames".to_string());
        }

        let StaticWindow { start, end } = self.static_window;
        if start >= end {
            return fail(format!("window start {} is not before end {}", start, end));
        }
        if start < 0.0 {
            return fail(format!("window starts before 0 ({})", start));
        }
        let duration = self.duration_seconds();
        if end > duration {
            return fail(format!(
                "window ends at {}s, after the video end at {:.2}s",
                end, duration
            ));
        }

        if self.frame_count < 3 * config.n_main_steps {
            return fail(format!(
                "n_main_steps={} too large for a video with only {} frames",
                config.n_main_steps, self.frame_count
            ));
        }
        let window_frames = self.static_window.length() * self.frame_rate;
        if window_frames < (3 * config.n_init_steps) as f64 {
            return fail(format!(
                "n_init_steps={} too large for a window of {:.1} frames",
                config.n_init_steps, window_frames
            ));
        }

        Ok(())
    }
}
