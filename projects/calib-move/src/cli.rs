use crate::config::{
    BlendConfig, BlendStrategy, DetectorKind, EstimatorConfig, MatcherKind, TrackerConfig,
};
use crate::error::MoveResult;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Estimate camera movement for one video or every video in a folder
    Track(TrackArgs),
    /// Write a static window mapping template for a folder of videos
    Template(TemplateArgs),
}

#[derive(clap::Args, Debug)]
pub struct TrackArgs {
    /// Video file or folder of videos
    #[arg(long, env = "CALIB_MOVE_INPUT")]
    pub input_path: PathBuf,

    /// Root directory for output artifacts
    #[arg(long, env = "CALIB_MOVE_OUTPUT", default_value = "output")]
    pub output_path: PathBuf,

    /// START-hh:mm:ss, hh:mm:ss-END, hh:mm:ss-hh:mm:ss or a JSON mapping file
    #[arg(long, env = "CALIB_MOVE_STATIC_WINDOW")]
    pub static_window: String,

    /// Frames sampled from the static window for the reference frame
    #[arg(long, default_value_t = 8)]
    pub n_init_steps: usize,

    #[arg(long, value_enum, default_value_t = BlendStrategy::Kde)]
    pub blending: BlendStrategy,

    /// Frames sampled across the whole video
    #[arg(long, default_value_t = 16)]
    pub n_main_steps: usize,

    #[arg(long, value_enum, default_value_t = DetectorKind::Akaze)]
    pub detector: DetectorKind,

    #[arg(long, value_enum, default_value_t = MatcherKind::BruteForceHamming)]
    pub matcher: MatcherKind,

    /// KDE kernel half width in 7-bit intensity levels (1 to 128)
    #[arg(long, default_value_t = 10)]
    pub kde_bandwidth: u32,

    /// Frames above this many pixels are downscaled for the KDE pass
    #[arg(long, default_value_t = 1_000_000)]
    pub kde_pixel_budget: usize,

    /// RANSAC reprojection threshold in pixels
    #[arg(long, default_value_t = 5.0)]
    pub ransac_threshold: f64,

    /// Use only the best N matches per frame
    #[arg(long)]
    pub max_correspondences: Option<usize>,

    /// Replace existing output directories
    #[arg(long, env = "CALIB_MOVE_OVERWRITE")]
    pub overwrite: bool,
}

#[derive(clap::Args, Debug)]
pub struct TemplateArgs {
    /// Folder of videos
    pub video_folder: PathBuf,

    /// Where to write the template
    #[arg(long, default_value = "static_window_template.json")]
    pub output: PathBuf,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl TrackArgs {
    pub fn tracker_config(&self) -> MoveResult<TrackerConfig> {
        TrackerConfig::new(
            self.n_init_steps,
            self.blending,
            self.n_main_steps,
            self.detector,
            self.matcher,
        )?
        .with_blend(BlendConfig {
            kde_bandwidth: self.kde_bandwidth,
            kde_pixel_budget: self.kde_pixel_budget,
            ..BlendConfig::default()
        })?
        .with_estimator(EstimatorConfig {
            ransac_threshold: self.ransac_threshold,
            max_correspondences: self.max_correspondences,
            ..EstimatorConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoveError;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "calib-move",
            "track",
            "--input-path",
            "videos",
            "--static-window",
            "START-00:00:10",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn track_args(args: Args) -> TrackArgs {
        match args.command {
            Command::Track(t) => t,
            other => panic!("expected track, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let t = track_args(parse(&[]));
        let config = t.tracker_config().unwrap();
        let defaults = TrackerConfig::default();
        assert_eq!(config.n_init_steps, defaults.n_init_steps);
        assert_eq!(config.n_main_steps, defaults.n_main_steps);
        assert_eq!(config.blending, BlendStrategy::Kde);
        assert_eq!(config.detector, DetectorKind::Akaze);
        assert_eq!(config.matcher, MatcherKind::BruteForceHamming);
        assert_eq!(config.blend.kde_bandwidth, 10);
        assert_eq!(config.estimator.ransac_threshold, 5.0);
        assert!(!t.overwrite);
    }

    #[test]
    fn test_selectors_parse() {
        let t = track_args(parse(&[
            "--detector",
            "sift",
            "--matcher",
            "bf-l2",
            "--blending",
            "mode",
            "--max-correspondences",
            "200",
        ]));
        let config = t.tracker_config().unwrap();
        assert_eq!(config.detector, DetectorKind::Sift);
        assert_eq!(config.matcher, MatcherKind::BruteForceL2);
        assert_eq!(config.blending, BlendStrategy::Mode);
        assert_eq!(config.estimator.max_correspondences, Some(200));
    }

    #[test]
    fn test_incompatible_pair_fails_config() {
        let t = track_args(parse(&["--detector", "orb", "--matcher", "bf-l2"]));
        assert!(matches!(
            t.tracker_config(),
            Err(MoveError::IncompatibleDetectorMatcher { .. })
        ));
    }

    #[test]
    fn test_template_subcommand() {
        let args = Args::try_parse_from(["calib-move", "template", "videos"]).unwrap();
        match args.command {
            Command::Template(t) => {
                assert_eq!(t.video_folder, PathBuf::from("videos"));
                assert_eq!(t.output, PathBuf::from("static_window_template.json"));
            }
            other => panic!("expected template, got {:?}", other),
        }
    }
}
