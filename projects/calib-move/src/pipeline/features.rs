use crate::config::{DetectorKind, MatcherKind};
use crate::error::{MoveError, MoveResult};
use opencv::{
    core::{DMatch, KeyPoint, Mat, Point2f, Ptr, Vector, NORM_HAMMING, NORM_L2},
    features2d::{BFMatcher, AKAZE, ORB, SIFT},
    prelude::*,
};

/// Keypoints and their descriptors (one row per keypoint) for one image.
pub struct Features {
    pub keypoints: Vector<KeyPoint>,
    pub descriptors: Mat,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty() || self.descriptors.empty()
    }
}

/// A matched point pair, reference image coordinates to target image
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub reference: Point2f,
    pub target: Point2f,
    pub distance: f32,
}

/// Keypoint detection plus descriptor matching against a reference.
pub trait FeatureMatcher {
    fn detect_and_describe(&mut self, image: &Mat) -> MoveResult<Features>;

    /// Correspondences sorted by ascending descriptor distance.
    fn match_features(
        &mut self,
        reference: &Features,
        target: &Features,
    ) -> MoveResult<Vec<Correspondence>>;
}

enum Detector {
    Akaze(Ptr<AKAZE>),
    Orb(Ptr<ORB>),
    Sift(Ptr<SIFT>),
}

impl Detector {
    fn create(kind: DetectorKind) -> MoveResult<Self> {
        Ok(match kind {
            DetectorKind::Akaze => Detector::Akaze(AKAZE::create_def()?),
            DetectorKind::Orb => Detector::Orb(ORB::create_def()?),
            DetectorKind::Sift => Detector::Sift(SIFT::create_def()?),
        })
    }

    fn detect_and_compute(
        &mut self,
        image: &Mat,
        keypoints: &mut Vector<KeyPoint>,
        descriptors: &mut Mat,
    ) -> opencv::Result<()> {
        let mask = Mat::default();
        match self {
            Detector::Akaze(d) => d.detect_and_compute(image, &mask, keypoints, descriptors, false),
            Detector::Orb(d) => d.detect_and_compute(image, &mask, keypoints, descriptors, false),
            Detector::Sift(d) => d.detect_and_compute(image, &mask, keypoints, descriptors, false),
        }
    }
}

/// OpenCV detector paired with a cross-checked brute force matcher.
pub struct OpencvFeatureMatcher {
    detector: Detector,
    matcher: BFMatcher,
}

/// Build the detector/matcher pair for one run from its selectors.
pub fn build_feature_matcher(
    detector: DetectorKind,
    matcher: MatcherKind,
) -> MoveResult<OpencvFeatureMatcher> {
    let family = detector.descriptor_family();
    if !matcher.accepts(family) {
        return Err(MoveError::IncompatibleDetectorMatcher {
            detector: detector.to_string(),
            matcher: matcher.to_string(),
            family: family.to_string(),
        });
    }

    let norm = match matcher {
        MatcherKind::BruteForceHamming => NORM_HAMMING,
        MatcherKind::BruteForceL2 => NORM_L2,
    };

    tracing::debug!("Feature matcher: detector={}, matcher={}", detector, matcher);
    Ok(OpencvFeatureMatcher {
        detector: Detector::create(detector)?,
        matcher: BFMatcher::new(norm, true)?,
    })
}

impl FeatureMatcher for OpencvFeatureMatcher {
    fn detect_and_describe(&mut self, image: &Mat) -> MoveResult<Features> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        self.detector
            .detect_and_compute(image, &mut keypoints, &mut descriptors)?;
        Ok(Features {
            keypoints,
            descriptors,
        })
    }

    fn match_features(
        &mut self,
        reference: &Features,
        target: &Features,
    ) -> MoveResult<Vec<Correspondence>> {
        if reference.is_empty() || target.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches = Vector::<DMatch>::new();
        self.matcher.train_match_def(
            &reference.descriptors,
            &target.descriptors,
            &mut matches,
        )?;

        let mut correspondences = Vec::with_capacity(matches.len());
        for m in matches.iter() {
            let reference_kp = reference.keypoints.get(m.query_idx as usize)?;
            let target_kp = target.keypoints.get(m.train_idx as usize)?;
            correspondences.push(Correspondence {
                reference: reference_kp.pt(),
                target: target_kp.pt(),
                distance: m.distance,
            });
        }
        correspondences.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(correspondences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{constant_frame, textured_frame};

    #[test]
    fn test_incompatible_pairs_are_rejected() {
        assert!(matches!(
            build_feature_matcher(DetectorKind::Orb, MatcherKind::BruteForceL2),
            Err(MoveError::IncompatibleDetectorMatcher { .. })
        ));
        assert!(matches!(
            build_feature_matcher(DetectorKind::Sift, MatcherKind::BruteForceHamming),
            Err(MoveError::IncompatibleDetectorMatcher { .. })
        ));
    }

    #[test]
    fn test_self_match_is_sorted_and_aligned() {
        let mut fm = build_feature_matcher(DetectorKind::Orb, MatcherKind::BruteForceHamming)
            .unwrap();
        let frame = textured_frame(240, 320, 3, (0, 0));
        let features = fm.detect_and_describe(&frame).unwrap();
        assert!(features.len() > 20, "only {} keypoints", features.len());

        let matches = fm.match_features(&features, &features).unwrap();
        assert!(!matches.is_empty());
        assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(matches[0].distance, 0.0);
        let aligned = matches
            .iter()
            .filter(|c| c.reference == c.target)
            .count();
        assert!(aligned * 2 > matches.len());
    }

    #[test]
    fn test_akaze_finds_keypoints() {
        let mut fm = build_feature_matcher(DetectorKind::Akaze, MatcherKind::BruteForceHamming)
            .unwrap();
        let features = fm
            .detect_and_describe(&textured_frame(240, 320, 11, (0, 0)))
            .unwrap();
        assert!(!features.is_empty());
    }

    #[test]
    fn test_blank_image_gives_no_correspondences() {
        let mut fm = build_feature_matcher(DetectorKind::Sift, MatcherKind::BruteForceL2)
            .unwrap();
        let blank = fm.detect_and_describe(&constant_frame(120, 160, 128)).unwrap();
        assert!(blank.is_empty());
        let textured = fm
            .detect_and_describe(&textured_frame(120, 160, 5, (0, 0)))
            .unwrap();
        assert!(fm.match_features(&textured, &blank).unwrap().is_empty());
        assert!(fm.match_features(&blank, &textured).unwrap().is_empty());
    }
}
