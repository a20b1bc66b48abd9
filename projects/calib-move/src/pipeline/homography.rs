use super::features::Correspondence;
use super::types::{Homography, StepFailure};
use crate::config::EstimatorConfig;
use opencv::{
    calib3d,
    core::{self, Mat, Point2f, Vector},
    prelude::*,
};

const RANSAC_MAX_ITERS: i32 = 2000;
const RANSAC_CONFIDENCE: f64 = 0.995;
const MIN_ABS_DETERMINANT: f64 = 1e-9;

/// Outcome of one estimation. Failures are reported here, never as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct HomographyEstimate {
    pub transform: Option<Homography>,
    pub valid: bool,
    pub inliers: usize,
    pub failure: Option<StepFailure>,
}

impl HomographyEstimate {
    fn rejected(failure: StepFailure) -> Self {
        Self {
            transform: None,
            valid: false,
            inliers: 0,
            failure: Some(failure),
        }
    }
}

/// Keep at most `max_correspondences` of the best (lowest distance) matches.
/// Input must already be sorted by distance.
pub fn best_correspondences<'a>(
    correspondences: &'a [Correspondence],
    config: &EstimatorConfig,
) -> &'a [Correspondence] {
    match config.max_correspondences {
        Some(max) if correspondences.len() > max => &correspondences[..max],
        _ => correspondences,
    }
}

/// RANSAC planar transform fitting between two point sets.
pub struct HomographyEstimator {
    config: EstimatorConfig,
}

impl HomographyEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn required_correspondences(&self) -> usize {
        self.config.min_correspondences.max(4)
    }

    /// Fit the transform mapping `reference` points onto `target` points.
    pub fn estimate(&self, reference: &[Point2f], target: &[Point2f]) -> HomographyEstimate {
        let required = self.required_correspondences();
        if reference.len() != target.len() || reference.len() < required {
            return HomographyEstimate::rejected(StepFailure::InsufficientMatches {
                found: reference.len().min(target.len()),
                required,
            });
        }

        match self.solve(reference, target) {
            Ok(Some((transform, inliers))) => HomographyEstimate {
                transform: Some(transform),
                valid: true,
                inliers,
                failure: None,
            },
            Ok(None) => HomographyEstimate::rejected(StepFailure::DegenerateHomography),
            Err(e) => {
                tracing::debug!("find_homography failed: {}", e);
                HomographyEstimate::rejected(StepFailure::DegenerateHomography)
            }
        }
    }

    pub fn estimate_from(&self, correspondences: &[Correspondence]) -> HomographyEstimate {
        let used = best_correspondences(correspondences, &self.config);
        let reference: Vec<Point2f> = used.iter().map(|c| c.reference).collect();
        let target: Vec<Point2f> = used.iter().map(|c| c.target).collect();
        self.estimate(&reference, &target)
    }

    fn solve(
        &self,
        reference: &[Point2f],
        target: &[Point2f],
    ) -> opencv::Result<Option<(Homography, usize)>> {
        let src = Vector::<Point2f>::from_slice(reference);
        let dst = Vector::<Point2f>::from_slice(target);
        let mut mask = Mat::default();
        let h = calib3d::find_homography_ext(
            &src,
            &dst,
            calib3d::RANSAC,
            self.config.ransac_threshold,
            &mut mask,
            RANSAC_MAX_ITERS,
            RANSAC_CONFIDENCE,
        )?;

        if h.empty() {
            return Ok(None);
        }
        let transform = match Homography::from_mat(&h) {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };
        if !transform.is_finite() || transform.determinant().abs() < MIN_ABS_DETERMINANT {
            return Ok(None);
        }

        let inliers = if mask.empty() {
            0
        } else {
            core::count_non_zero(&mask)?.max(0) as usize
        };
        Ok(Some((transform, inliers)))
    }
}
