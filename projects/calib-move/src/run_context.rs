use crate::config::TrackerConfig;
use crate::error::{MoveError, MoveResult};
use crate::pipeline::types::VideoRecord;
use crate::video::opencv_reader::OpencvReader;
use crate::video::FrameSource;
use crate::window::{StaticWindow, WindowSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const ALLOWED_VIDEO_EXT: &[&str] = &["mp4"];

/// Placeholder value written for every video in a mapping template.
pub const TEMPLATE_WINDOW: &str = "hh:mm:ss-hh:mm:ss";

#[derive(Serialize, Debug, Clone)]
pub struct RunMetadata {
    pub original_name: String,
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub frame_rate: f64,
    pub frame_count: usize,
    pub static_window: StaticWindow,
    pub config: TrackerConfig,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

fn has_video_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| {
            let ext = s.to_lowercase();
            ALLOWED_VIDEO_EXT.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Videos directly inside `video_root`, sorted by path.
pub fn list_videos(video_root: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(video_root)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_video_ext(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();
    videos.sort();
    videos
}

/// A single video file or every video in a folder.
pub fn discover_videos(input: &Path) -> MoveResult<Vec<PathBuf>> {
    if input.is_file() {
        if !has_video_ext(input) {
            return Err(MoveError::InvalidInput(format!(
                "{:?} is not a supported video (allowed: {})",
                input,
                ALLOWED_VIDEO_EXT.join(", ")
            )));
        }
        return Ok(vec![input.to_path_buf()]);
    }

    if input.is_dir() {
        let videos = list_videos(input);
        if videos.is_empty() {
            return Err(MoveError::InvalidInput(format!(
                "no videos found in {:?}",
                input
            )));
        }
        return Ok(videos);
    }

    Err(MoveError::InvalidInput(format!(
        "input path {:?} does not exist",
        input
    )))
}

pub fn video_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Build and validate the record of one video from its stream metadata.
pub fn record_from_metadata(
    path: &Path,
    frame_rate: f64,
    frame_count: usize,
    windows: &WindowSpec,
    config: &TrackerConfig,
) -> MoveResult<VideoRecord> {
    let name = video_name(path);
    if !frame_rate.is_finite() || frame_rate <= 0.0 || frame_count == 0 {
        return Err(MoveError::invalid_record(
            name,
            format!(
                "unusable stream metadata (fps={}, frames={})",
                frame_rate, frame_count
            ),
        ));
    }

    let duration = frame_count as f64 / frame_rate;
    let window = windows.resolve_for(&name, duration)?;
    let record = VideoRecord::new(path, frame_rate, frame_count, window);
    record.validate(config)?;
    Ok(record)
}

/// Open every video once for its metadata and build validated records. The
/// window mapping is checked against all videos before any is opened.
pub fn gather_videos(
    paths: &[PathBuf],
    windows: &WindowSpec,
    config: &TrackerConfig,
) -> MoveResult<Vec<VideoRecord>> {
    let names: Vec<String> = paths.iter().map(|p| video_name(p)).collect();
    windows.validate_for(&names)?;

    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        let reader = OpencvReader::new(&path.to_string_lossy())?;
        let record = record_from_metadata(
            path,
            reader.frame_rate(),
            reader.frame_count(),
            windows,
            config,
        )?;
        tracing::info!(
            "Gathered {}: {:.2}s at {:.2} fps, static window [{:.2}s, {:.2}s]",
            record.name,
            record.duration_seconds(),
            record.frame_rate,
            record.static_window.start,
            record.static_window.end
        );
        records.push(record);
    }
    Ok(records)
}

/// Create `<output_root>/<video stem>/` and write `metadata.json` into it.
pub fn create_run(
    output_root: &Path,
    video: &VideoRecord,
    config: &TrackerConfig,
    overwrite: bool,
) -> MoveResult<RunMetadata> {
    let stem = Path::new(&video.name)
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MoveError::InvalidInput(format!("Invalid video name: {}", video.name)))?;

    let output_dir = output_root.join(stem);
    if output_dir.exists() && !overwrite {
        return Err(MoveError::InvalidInput(format!(
            "Output directory already exists for: {}",
            stem
        )));
    }

    fs::create_dir_all(&output_dir)?;

    let metadata = RunMetadata {
        original_name: video.name.clone(),
        source_path: video.path.clone(),
        created_at: Utc::now(),
        run_id: stem.to_string(),
        frame_rate: video.frame_rate,
        frame_count: video.frame_count,
        static_window: video.static_window,
        config: config.clone(),
        output_dir: output_dir.clone(),
    };

    let metadata_path = output_dir.join("metadata.json");
    let content = serde_json::to_string_pretty(&metadata)?;
    fs::write(metadata_path, content)?;

    Ok(metadata)
}

/// Remove a run's output directory after a failed tracking run, so the video
/// can be re-run without `--overwrite`.
pub fn discard_run(run: &RunMetadata) -> MoveResult<()> {
    tracing::warn!("Discarding partial output in {}", run.output_dir.display());
    fs::remove_dir_all(&run.output_dir)?;
    Ok(())
}

/// JSON object with one placeholder window per video, keys padded so the
/// values line up.
pub fn render_template_mapping(video_names: &[String]) -> MoveResult<String> {
    if video_names.is_empty() {
        return Err(MoveError::InvalidInput(
            "cannot build a template without videos".to_string(),
        ));
    }

    let width = video_names.iter().map(|n| n.chars().count()).max().unwrap_or(0) + 2;
    let entries: Vec<String> = video_names
        .iter()
        .map(|name| {
            let key = serde_json::to_string(name)?;
            Ok(format!("    {:<width$}: \"{}\"", key, TEMPLATE_WINDOW, width = width))
        })
        .collect::<MoveResult<_>>()?;

    Ok(format!("{{\n{}\n}}", entries.join(",\n")))
}

/// Write the template for every video in `video_folder` to `output_path`.
pub fn write_template_mapping(video_folder: &Path, output_path: &Path) -> MoveResult<usize> {
    if !video_folder.is_dir() {
        return Err(MoveError::InvalidInput(format!(
            "{:?} is not a folder",
            video_folder
        )));
    }
    let names: Vec<String> = list_videos(video_folder)
        .iter()
        .map(|p| video_name(p))
        .collect();
    let content = render_template_mapping(&names)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(output_path, content)?;
    tracing::info!(
        "Wrote window template for {} videos to {:?}",
        names.len(),
        output_path
    );
    Ok(names.len())
}
