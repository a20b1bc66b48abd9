use super::blend::blend;
use super::features::{build_feature_matcher, FeatureMatcher, Features};
use super::homography::{best_correspondences, HomographyEstimator};
use super::types::{StepFailure, TrackingStep, VideoRecord};
use crate::config::TrackerConfig;
use crate::error::{MoveError, MoveResult};
use crate::video::opencv_reader::OpencvReader;
use crate::video::processor::sample_frames;
use crate::video::sampling::{main_pass_indices, window_frame_indices};
use crate::video::{to_gray, FrameSource};
use opencv::core::Mat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    BuildingReference,
    Tracking,
    Done,
    Failed,
}

/// Drives one video through reference construction and the main tracking
/// pass. A tracker is used for a single video.
pub struct MovementTracker<'a> {
    config: &'a TrackerConfig,
    estimator: HomographyEstimator,
    state: TrackerState,
    reference: Option<Mat>,
}

impl<'a> MovementTracker<'a> {
    pub fn new(config: &'a TrackerConfig) -> Self {
        Self {
            config,
            estimator: HomographyEstimator::new(config.estimator.clone()),
            state: TrackerState::Idle,
            reference: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn into_reference(self) -> Option<Mat> {
        self.reference
    }

    /// Build the reference, track every main-pass sample and store the series
    /// on `video`. `open_source` is called once per phase; each source is
    /// dropped when its phase ends.
    pub fn run<S, F>(
        &mut self,
        video: &mut VideoRecord,
        mut open_source: F,
        matcher: &mut dyn FeatureMatcher,
    ) -> MoveResult<()>
    where
        S: FrameSource,
        F: FnMut() -> MoveResult<S>,
    {
        if self.state != TrackerState::Idle {
            return Err(MoveError::InvalidInput(format!(
                "tracker for {} is not idle ({:?})",
                video.name, self.state
            )));
        }

        let result = self.run_phases(video, &mut open_source, matcher);
        if let Err(e) = &result {
            tracing::error!("{}: tracking failed: {}", video.name, e);
            self.state = TrackerState::Failed;
        }
        result
    }

    fn run_phases<S, F>(
        &mut self,
        video: &mut VideoRecord,
        open_source: &mut F,
        matcher: &mut dyn FeatureMatcher,
    ) -> MoveResult<()>
    where
        S: FrameSource,
        F: FnMut() -> MoveResult<S>,
    {
        let reference_features = {
            let mut source = open_source()?;
            self.build_reference(video, &mut source, matcher)?
        };

        let steps = {
            let mut source = open_source()?;
            self.track(video, &mut source, matcher, &reference_features)?
        };

        let valid = steps.iter().filter(|s| s.valid).count();
        tracing::info!(
            "{}: tracked {} steps, {} valid, {} invalid",
            video.name,
            steps.len(),
            valid,
            steps.len() - valid
        );
        video.set_movement_series(steps)?;
        self.state = TrackerState::Done;
        Ok(())
    }

    fn build_reference(
        &mut self,
        video: &VideoRecord,
        source: &mut dyn FrameSource,
        matcher: &mut dyn FeatureMatcher,
    ) -> MoveResult<Features> {
        self.state = TrackerState::BuildingReference;
        let indices = window_frame_indices(
            &video.static_window,
            video.frame_rate,
            video.frame_count,
            self.config.n_init_steps,
        );
        tracing::info!(
            "{}: building reference from {} frames in [{:.2}s, {:.2}s] ({:?})",
            video.name,
            indices.len(),
            video.static_window.start,
            video.static_window.end,
            self.config.blending
        );

        let mut frames = Vec::with_capacity(indices.len());
        let label = format!("{} reference", video.name);
        sample_frames(
            source,
            &indices,
            &label,
            |_frame_index: usize, frame: MoveResult<Mat>| -> MoveResult<()> {
                frames.push(to_gray(&frame?)?);
                Ok(())
            },
        )?;

        let reference = blend(&frames, self.config.blending, &self.config.blend)?;
        let features = matcher.detect_and_describe(&reference)?;
        if features.is_empty() {
            tracing::warn!(
                "{}: reference frame has no keypoints, every step will be invalid",
                video.name
            );
        } else {
            tracing::debug!("{}: reference has {} keypoints", video.name, features.len());
        }

        self.reference = Some(reference);
        self.state = TrackerState::Tracking;
        Ok(features)
    }

    fn track(
        &mut self,
        video: &VideoRecord,
        source: &mut dyn FrameSource,
        matcher: &mut dyn FeatureMatcher,
        reference: &Features,
    ) -> MoveResult<Vec<TrackingStep>> {
        let indices = main_pass_indices(video.frame_count, self.config.n_main_steps);
        tracing::info!(
            "{}: tracking {} frames across {:.2}s",
            video.name,
            indices.len(),
            video.duration_seconds()
        );

        let estimator = &self.estimator;
        let frame_rate = video.frame_rate;
        let mut steps = Vec::with_capacity(indices.len());
        let label = format!("{} tracking", video.name);
        let stats = sample_frames(
            source,
            &indices,
            &label,
            |frame_index: usize, frame: MoveResult<Mat>| -> MoveResult<()> {
                let time_seconds = frame_index as f64 / frame_rate;
                let step = track_step(frame_index, time_seconds, frame, reference, matcher, estimator);
                if let Some(failure) = &step.failure {
                    tracing::warn!(
                        "{}: step at frame {} ({:.2}s) invalid: {}",
                        video.name,
                        frame_index,
                        time_seconds,
                        failure
                    );
                }
                steps.push(step);
                Ok(())
            },
        )?;

        tracing::debug!(
            "{}: main pass read {} frames in {:.2?}, {} failed reads",
            video.name,
            stats.processed_frames,
            stats.duration,
            stats.failed_reads
        );
        Ok(steps)
    }
}

/// Detect, match and estimate for one sampled frame. Every failure is folded
/// into the returned step.
fn track_step(
    frame_index: usize,
    time_seconds: f64,
    frame: MoveResult<Mat>,
    reference: &Features,
    matcher: &mut dyn FeatureMatcher,
    estimator: &HomographyEstimator,
) -> TrackingStep {
    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
            if e.is_frame_read() {
                tracing::debug!("frame {}: {}", frame_index, e);
            } else {
                tracing::warn!("frame {}: unexpected source error: {}", frame_index, e);
            }
            return TrackingStep::failed(frame_index, time_seconds, StepFailure::FrameRead, 0);
        }
    };

    let correspondences = match to_gray(&frame)
        .and_then(|gray| matcher.detect_and_describe(&gray))
        .and_then(|features| matcher.match_features(reference, &features))
    {
        Ok(c) => c,
        Err(e) => {
            let failure = StepFailure::FeatureExtraction {
                message: e.to_string(),
            };
            return TrackingStep::failed(frame_index, time_seconds, failure, 0);
        }
    };

    let used = best_correspondences(&correspondences, estimator.config()).len();
    let estimate = estimator.estimate_from(&correspondences);
    match estimate.transform.filter(|_| estimate.valid) {
        Some(transform) => {
            TrackingStep::tracked(frame_index, time_seconds, transform, used, estimate.inliers)
        }
        None => {
            let failure = estimate
                .failure
                .unwrap_or(StepFailure::DegenerateHomography);
            TrackingStep::failed(frame_index, time_seconds, failure, used)
        }
    }
}

/// Track one video from disk and return its reference frame.
pub fn track_video(video: &mut VideoRecord, config: &TrackerConfig) -> MoveResult<Mat> {
    let mut matcher = build_feature_matcher(config.detector, config.matcher)?;
    let path = video.path.to_string_lossy().to_string();
    let mut tracker = MovementTracker::new(config);
    tracker.run(video, || OpencvReader::new(&path), &mut matcher)?;
    tracker
        .into_reference()
        .ok_or_else(|| MoveError::InvalidInput(format!("no reference frame for {}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlendStrategy, DetectorKind, MatcherKind};
    use crate::pipeline::test_support::{constant_frame, textured_frame};
    use crate::window::StaticWindow;
    use opencv::imgproc;
    use opencv::prelude::*;
    use std::path::Path;

    /// In-memory video: frames before `moved_from` show the background, later
    /// frames show `moved`. Frames listed in `occluded` are blanked out.
    struct StillSource {
        frame_count: usize,
        background: Mat,
        moved: Mat,
        moved_from: usize,
        occluded: Vec<usize>,
        broken: Vec<usize>,
    }

    impl StillSource {
        fn steady(frame_count: usize, background: Mat) -> Self {
            Self {
                frame_count,
                moved: background.clone(),
                background,
                moved_from: frame_count,
                occluded: Vec::new(),
                broken: Vec::new(),
            }
        }
    }

    impl FrameSource for StillSource {
        fn frame_rate(&self) -> f64 {
            30.0
        }

        fn frame_count(&self) -> usize {
            self.frame_count
        }

        fn read_frame(&mut self, frame_index: usize) -> MoveResult<Mat> {
            if frame_index >= self.frame_count || self.broken.contains(&frame_index) {
                return Err(MoveError::FrameReadError {
                    video: "still".to_string(),
                    frame_index,
                });
            }
            let gray = if self.occluded.contains(&frame_index) {
                constant_frame(self.background.rows(), self.background.cols(), 255)
            } else if frame_index >= self.moved_from {
                self.moved.clone()
            } else {
                self.background.clone()
            };
            let mut bgr = Mat::default();
            imgproc::cvt_color_def(&gray, &mut bgr, imgproc::COLOR_GRAY2BGR)?;
            Ok(bgr)
        }
    }

    fn record(start: f64, end: f64) -> VideoRecord {
        VideoRecord::new(
            Path::new("/videos/still.mp4"),
            30.0,
            1800,
            StaticWindow::new(start, end),
        )
    }

    fn config(detector: DetectorKind) -> TrackerConfig {
        TrackerConfig::new(5, BlendStrategy::Median, 10, detector, MatcherKind::BruteForceHamming)
            .unwrap()
    }

    #[test]
    fn test_static_video_tracks_near_identity() {
        let config = config(DetectorKind::Akaze);
        let mut video = record(10.0, 50.0);
        video.validate(&config).unwrap();
        let background = textured_frame(240, 320, 1, (0, 0));
        // One init sample (frame 900) is occluded; the median drops it.
        let mut source = Some(StillSource {
            occluded: vec![900],
            ..StillSource::steady(1800, background.clone())
        });
        let mut matcher =
            build_feature_matcher(config.detector, config.matcher).unwrap();

        let mut tracker = MovementTracker::new(&config);
        assert_eq!(tracker.state(), TrackerState::Idle);
        tracker
            .run(
                &mut video,
                || Ok(source.take().unwrap_or_else(|| StillSource::steady(1800, background.clone()))),
                &mut matcher,
            )
            .unwrap();

        assert_eq!(tracker.state(), TrackerState::Done);
        let reference = tracker.into_reference().unwrap();
        assert_eq!(
            reference.data_bytes().unwrap(),
            background.data_bytes().unwrap()
        );

        let steps = video.movement_series();
        assert_eq!(steps.len(), 10);
        assert!(steps.windows(2).all(|w| w[0].frame_index < w[1].frame_index));
        for step in steps {
            assert!(step.valid, "step {} invalid: {:?}", step.frame_index, step.failure);
            assert!(step.frame_index < 1800);
            assert_eq!(step.time_seconds, step.frame_index as f64 / 30.0);
            let h = step.transform.unwrap();
            assert!(h.max_deviation_from_identity() < 1e-2, "{:?}", h);
            assert!(step.inliers >= 4 && step.inliers <= step.correspondences);
        }
    }

    #[test]
    fn test_camera_shift_shows_up_as_translation() {
        let config = config(DetectorKind::Orb);
        let mut video = record(0.0, 10.0);
        let background = textured_frame(240, 320, 2, (0, 0));
        let moved = textured_frame(240, 320, 2, (4, 3));
        let mut matcher = build_feature_matcher(config.detector, config.matcher).unwrap();

        let mut tracker = MovementTracker::new(&config);
        tracker
            .run(
                &mut video,
                || {
                    Ok(StillSource {
                        moved: moved.clone(),
                        moved_from: 600,
                        ..StillSource::steady(1800, background.clone())
                    })
                },
                &mut matcher,
            )
            .unwrap();

        for step in video.movement_series() {
            assert!(step.valid);
            let (dx, dy) = step.translation().unwrap();
            let expected = if step.frame_index >= 600 { (4.0, 3.0) } else { (0.0, 0.0) };
            assert!((dx - expected.0).abs() < 0.5, "frame {}: dx={}", step.frame_index, dx);
            assert!((dy - expected.1).abs() < 0.5, "frame {}: dy={}", step.frame_index, dy);
        }
    }

    #[test]
    fn test_reference_read_failure_aborts_video() {
        let config = config(DetectorKind::Orb);
        let mut video = record(10.0, 50.0);
        let background = textured_frame(120, 160, 4, (0, 0));
        let mut matcher = build_feature_matcher(config.detector, config.matcher).unwrap();

        let mut tracker = MovementTracker::new(&config);
        let res = tracker.run(
            &mut video,
            || {
                Ok(StillSource {
                    broken: vec![600],
                    ..StillSource::steady(1800, background.clone())
                })
            },
            &mut matcher,
        );

        assert!(matches!(
            res,
            Err(MoveError::FrameReadError { frame_index: 600, .. })
        ));
        assert_eq!(tracker.state(), TrackerState::Failed);
        assert!(!video.is_tracked());
    }

    #[test]
    fn test_main_pass_read_failure_only_invalidates_its_step() {
        let config = config(DetectorKind::Orb);
        let mut video = record(10.0, 50.0);
        let background = textured_frame(240, 320, 5, (0, 0));
        let mut matcher = build_feature_matcher(config.detector, config.matcher).unwrap();

        let mut tracker = MovementTracker::new(&config);
        tracker
            .run(
                &mut video,
                || {
                    Ok(StillSource {
                        broken: vec![999],
                        ..StillSource::steady(1800, background.clone())
                    })
                },
                &mut matcher,
            )
            .unwrap();

        let steps = video.movement_series();
        assert_eq!(steps.len(), 10);
        let invalid: Vec<&TrackingStep> = steps.iter().filter(|s| !s.valid).collect();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].frame_index, 999);
        assert_eq!(invalid[0].failure, Some(StepFailure::FrameRead));
        assert!(invalid[0].transform.is_none());
    }

    #[test]
    fn test_blank_video_yields_invalid_steps() {
        let config = config(DetectorKind::Orb);
        let mut video = record(10.0, 50.0);
        let mut matcher = build_feature_matcher(config.detector, config.matcher).unwrap();

        let mut tracker = MovementTracker::new(&config);
        tracker
            .run(
                &mut video,
                || Ok(StillSource::steady(1800, constant_frame(120, 160, 90))),
                &mut matcher,
            )
            .unwrap();

        assert!(video.movement_series().iter().all(|s| !s.valid));
        assert!(video.movement_series().iter().all(|s| matches!(
            s.failure,
            Some(StepFailure::InsufficientMatches { found: 0, .. })
        )));
    }

    #[test]
    fn test_tracker_runs_once() {
        let config = config(DetectorKind::Orb);
        let mut video = record(10.0, 50.0);
        let background = textured_frame(120, 160, 6, (0, 0));
        let mut matcher = build_feature_matcher(config.detector, config.matcher).unwrap();

        let mut tracker = MovementTracker::new(&config);
        tracker
            .run(
                &mut video,
                || Ok(StillSource::steady(1800, background.clone())),
                &mut matcher,
            )
            .unwrap();
        let again = tracker.run(
            &mut video,
            || Ok(StillSource::steady(1800, background.clone())),
            &mut matcher,
        );
        assert!(again.is_err());
    }
}
