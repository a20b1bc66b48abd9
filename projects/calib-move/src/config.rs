use crate::error::{MoveError, MoveResult};
use crate::pipeline::blend::KDE_LEVELS;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;

/// How the static window frames are combined into the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BlendStrategy {
    Median,
    Mode,
    Kde,
}

/// Keypoint detector/descriptor selector. Construction happens later in
/// `pipeline::features::build_feature_matcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Akaze,
    Orb,
    Sift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MatcherKind {
    /// Brute force, L2 norm, cross-checked
    #[value(name = "bf-l2")]
    BruteForceL2,
    /// Brute force, Hamming norm, cross-checked
    #[value(name = "bf-hamming")]
    BruteForceHamming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFamily {
    Binary,
    Float,
}

impl DetectorKind {
    pub fn descriptor_family(self) -> DescriptorFamily {
        match self {
            DetectorKind::Akaze | DetectorKind::Orb => DescriptorFamily::Binary,
            DetectorKind::Sift => DescriptorFamily::Float,
        }
    }
}

impl MatcherKind {
    pub fn accepts(self, family: DescriptorFamily) -> bool {
        matches!(
            (self, family),
            (MatcherKind::BruteForceHamming, DescriptorFamily::Binary)
                | (MatcherKind::BruteForceL2, DescriptorFamily::Float)
        )
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorKind::Akaze => "akaze",
            DetectorKind::Orb => "orb",
            DetectorKind::Sift => "sift",
        };
        f.write_str(name)
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatcherKind::BruteForceL2 => "bf-l2",
            MatcherKind::BruteForceHamming => "bf-hamming",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DescriptorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorFamily::Binary => f.write_str("binary"),
            DescriptorFamily::Float => f.write_str("floating-point"),
        }
    }
}

/// Tuning for the frame blender
#[derive(Debug, Clone, Serialize)]
pub struct BlendConfig {
    /// Triangular kernel half width, in quantized intensity levels.
    pub kde_bandwidth: u32,
    /// Frames above this many pixels are downscaled before the KDE pass.
    pub kde_pixel_budget: usize,
    /// Gaussian kernel size of the final smoothing pass (odd).
    pub smoothing_kernel: i32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            kde_bandwidth: 10,
            kde_pixel_budget: 1_000_000,
            smoothing_kernel: 11,
        }
    }
}

/// Tuning for the homography estimator
#[derive(Debug, Clone, Serialize)]
pub struct EstimatorConfig {
    /// RANSAC inlier reprojection threshold in pixels.
    pub ransac_threshold: f64,
    pub min_correspondences: usize,
    /// Keep only the best N matches; `None` uses all of them.
    pub max_correspondences: Option<usize>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            ransac_threshold: 5.0,
            min_correspondences: 4,
            max_correspondences: None,
        }
    }
}

/// Immutable configuration of one tracking run.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerConfig {
    pub n_init_steps: usize,
    pub blending: BlendStrategy,
    pub n_main_steps: usize,
    pub detector: DetectorKind,
    pub matcher: MatcherKind,
    pub blend: BlendConfig,
    pub estimator: EstimatorConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            n_init_steps: 8,
            blending: BlendStrategy::Kde,
            n_main_steps: 16,
            detector: DetectorKind::Akaze,
            matcher: MatcherKind::BruteForceHamming,
            blend: BlendConfig::default(),
            estimator: EstimatorConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Build a validated configuration with default tuning.
    pub fn new(
        n_init_steps: usize,
        blending: BlendStrategy,
        n_main_steps: usize,
        detector: DetectorKind,
        matcher: MatcherKind,
    ) -> MoveResult<Self> {
        let config = Self {
            n_init_steps,
            blending,
            n_main_steps,
            detector,
            matcher,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_blend(mut self, blend: BlendConfig) -> MoveResult<Self> {
        self.blend = blend;
        self.validate()?;
        Ok(self)
    }

    pub fn with_estimator(mut self, estimator: EstimatorConfig) -> MoveResult<Self> {
        self.estimator = estimator;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> MoveResult<()> {
        let family = self.detector.descriptor_family();
        if !self.matcher.accepts(family) {
            return Err(MoveError::IncompatibleDetectorMatcher {
                detector: self.detector.to_string(),
                matcher: self.matcher.to_string(),
                family: family.to_string(),
            });
        }

        if self.n_init_steps < 2 {
            return Err(MoveError::invalid_config(format!(
                "n_init_steps={} too small (minimum 2)",
                self.n_init_steps
            )));
        }
        if self.n_main_steps < 2 {
            return Err(MoveError::invalid_config(format!(
                "n_main_steps={} too small (minimum 2)",
                self.n_main_steps
            )));
        }

        if self.blend.kde_bandwidth == 0 || self.blend.kde_bandwidth as usize > KDE_LEVELS {
            return Err(MoveError::invalid_config(format!(
                "kde_bandwidth must be between 1 and {} (got {})",
                KDE_LEVELS, self.blend.kde_bandwidth
            )));
        }
        if self.blend.kde_pixel_budget == 0 {
            return Err(MoveError::invalid_config("kde_pixel_budget must be positive"));
        }
        if self.blend.smoothing_kernel < 1 || self.blend.smoothing_kernel % 2 == 0 {
            return Err(MoveError::invalid_config(format!(
                "smoothing_kernel must be odd and positive (got {})",
                self.blend.smoothing_kernel
            )));
        }

        if self.estimator.ransac_threshold.is_nan() || self.estimator.ransac_threshold <= 0.0 {
            return Err(MoveError::invalid_config(format!(
                "ransac_threshold must be positive (got {})",
                self.estimator.ransac_threshold
            )));
        }
        if self.estimator.min_correspondences < 4 {
            return Err(MoveError::invalid_config(
                "a homography needs at least 4 correspondences",
            ));
        }
        if let Some(max) = self.estimator.max_correspondences {
            if max < self.estimator.min_correspondences {
                return Err(MoveError::invalid_config(format!(
                    "max_correspondences={} is below min_correspondences={}",
                    max, self.estimator.min_correspondences
                )));
            }
        }

        Ok(())
    }
}
