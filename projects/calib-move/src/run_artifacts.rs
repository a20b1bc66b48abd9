// Run artifact definitions
//
// Everything written next to `metadata.json` in a video's output directory:
// the movement report (JSON and CSV) and the blended reference frame.

use crate::error::{MoveError, MoveResult};
use crate::pipeline::types::{TrackingStep, VideoRecord};
use crate::window::StaticWindow;
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const MOVEMENT_JSON: &str = "movement.json";
pub const MOVEMENT_CSV: &str = "movement.csv";
pub const REFERENCE_IMAGE: &str = "reference.png";

/// Aggregate over the valid steps of a movement series
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MovementSummary {
    pub steps: usize,
    pub valid_steps: usize,
    pub invalid_steps: usize,
    pub max_displacement: Option<f64>,
    pub mean_displacement: Option<f64>,
}

impl MovementSummary {
    pub fn from_steps(steps: &[TrackingStep]) -> Self {
        let displacements: Vec<f64> = steps.iter().filter_map(|s| s.displacement()).collect();
        let valid_steps = displacements.len();
        let max_displacement = displacements.iter().copied().reduce(f64::max);
        let mean_displacement = if valid_steps > 0 {
            Some(displacements.iter().sum::<f64>() / valid_steps as f64)
        } else {
            None
        };
        Self {
            steps: steps.len(),
            valid_steps,
            invalid_steps: steps.len() - valid_steps,
            max_displacement,
            mean_displacement,
        }
    }
}

/// movement.json
#[derive(Serialize, Debug)]
pub struct MovementReport<'a> {
    pub video: &'a str,
    pub frame_rate: f64,
    pub frame_count: usize,
    pub duration_seconds: f64,
    pub static_window: StaticWindow,
    pub summary: MovementSummary,
    pub steps: &'a [TrackingStep],
}

impl<'a> MovementReport<'a> {
    pub fn new(video: &'a VideoRecord) -> Self {
        let steps = video.movement_series();
        Self {
            video: &video.name,
            frame_rate: video.frame_rate,
            frame_count: video.frame_count,
            duration_seconds: video.duration_seconds(),
            static_window: video.static_window,
            summary: MovementSummary::from_steps(steps),
            steps,
        }
    }
}

/// One row of movement.csv
#[derive(Serialize, Debug, PartialEq)]
pub struct MovementRow {
    pub frame_index: usize,
    pub time_seconds: f64,
    pub valid: bool,
    pub dx: Option<f64>,
    pub dy: Option<f64>,
    pub displacement: Option<f64>,
    pub correspondences: usize,
    pub inliers: usize,
    pub failure: Option<String>,
}

impl From<&TrackingStep> for MovementRow {
    fn from(step: &TrackingStep) -> Self {
        let translation = step.translation();
        Self {
            frame_index: step.frame_index,
            time_seconds: step.time_seconds,
            valid: step.valid,
            dx: translation.map(|t| t.0),
            dy: translation.map(|t| t.1),
            displacement: step.displacement(),
            correspondences: step.correspondences,
            inliers: step.inliers,
            failure: step.failure.as_ref().map(|f| f.to_string()),
        }
    }
}

pub fn write_movement_json(output_dir: &Path, video: &VideoRecord) -> MoveResult<PathBuf> {
    let path = output_dir.join(MOVEMENT_JSON);
    let content = serde_json::to_string_pretty(&MovementReport::new(video))?;
    fs::write(&path, content)?;
    Ok(path)
}

pub fn write_movement_csv(output_dir: &Path, steps: &[TrackingStep]) -> MoveResult<PathBuf> {
    let path = output_dir.join(MOVEMENT_CSV);
    let mut writer = csv::Writer::from_path(&path)?;
    for step in steps {
        writer.serialize(MovementRow::from(step))?;
    }
    writer.flush()?;
    Ok(path)
}

pub fn write_reference_frame(output_dir: &Path, reference: &Mat) -> MoveResult<PathBuf> {
    let path = output_dir.join(REFERENCE_IMAGE);
    let path_str = path.to_string_lossy().to_string();
    if !imgcodecs::imwrite(&path_str, reference, &Vector::new())? {
        return Err(MoveError::InvalidInput(format!(
            "could not encode reference frame to {}",
            path_str
        )));
    }
    Ok(path)
}

/// Write the full report of a tracked video into its output directory.
pub fn write_artifacts(
    output_dir: &Path,
    video: &VideoRecord,
    reference: &Mat,
) -> MoveResult<MovementSummary> {
    write_movement_json(output_dir, video)?;
    write_movement_csv(output_dir, video.movement_series())?;
    write_reference_frame(output_dir, reference)?;
    Ok(MovementSummary::from_steps(video.movement_series()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::textured_frame;
    use crate::pipeline::types::{Homography, StepFailure};
    use opencv::prelude::*;

    fn shifted(dx: f64, dy: f64) -> Homography {
        let mut h = Homography::identity();
        h.0[0][2] = dx;
        h.0[1][2] = dy;
        h
    }

    fn tracked_video() -> VideoRecord {
        let mut video = VideoRecord::new(
            Path::new("/videos/pitch.mp4"),
            25.0,
            500,
            StaticWindow::new(0.0, 4.0),
        );
        video
            .set_movement_series(vec![
                TrackingStep::tracked(0, 0.0, Homography::identity(), 120, 110),
                TrackingStep::failed(249, 9.96, StepFailure::FrameRead, 0),
                TrackingStep::tracked(499, 19.96, shifted(3.0, 4.0), 90, 70),
            ])
            .unwrap();
        video
    }

    #[test]
    fn test_summary_ignores_invalid_steps() {
        let video = tracked_video();
        let summary = MovementSummary::from_steps(video.movement_series());
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.valid_steps, 2);
        assert_eq!(summary.invalid_steps, 1);
        assert_eq!(summary.max_displacement, Some(5.0));
        assert_eq!(summary.mean_displacement, Some(2.5));

        let empty = MovementSummary::from_steps(&[]);
        assert_eq!(empty.max_displacement, None);
        assert_eq!(empty.mean_displacement, None);
    }

    #[test]
    fn test_rows_flatten_steps() {
        let video = tracked_video();
        let rows: Vec<MovementRow> = video.movement_series().iter().map(MovementRow::from).collect();
        assert_eq!(rows[2].dx, Some(3.0));
        assert_eq!(rows[2].dy, Some(4.0));
        assert_eq!(rows[1].dx, None);
        assert_eq!(rows[1].failure.as_deref(), Some("frame could not be read"));
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let video = tracked_video();
        let reference = textured_frame(48, 64, 9, (0, 0));

        let summary = write_artifacts(dir.path(), &video, &reference).unwrap();
        assert_eq!(summary.valid_steps, 2);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(MOVEMENT_JSON)).unwrap())
                .unwrap();
        assert_eq!(json["video"], "pitch.mp4");
        assert_eq!(json["steps"].as_array().unwrap().len(), 3);
        assert_eq!(json["steps"][1]["valid"], false);
        assert_eq!(json["steps"][1]["failure"]["kind"], "frame_read");
        assert!(json["steps"][1]["transform"].is_null());

        let csv_text = fs::read_to_string(dir.path().join(MOVEMENT_CSV)).unwrap();
        let lines: Vec<&str> = csv_text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("frame_index,time_seconds,valid,dx,dy"));
        assert!(lines[2].starts_with("249,9.96,false,,,"));

        let reread = imgcodecs::imread(
            &dir.path().join(REFERENCE_IMAGE).to_string_lossy(),
            imgcodecs::IMREAD_GRAYSCALE,
        )
        .unwrap();
        assert_eq!(reread.data_bytes().unwrap(), reference.data_bytes().unwrap());
    }
}
