use super::FrameSource;
use crate::error::{MoveError, MoveResult};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_POS_FRAMES},
};

/// Forward gaps up to this many frames are grabbed instead of seeking.
const MAX_GRAB_GAP: usize = 16;

/// `VideoCapture` backed frame source. The capture is released on drop, so
/// every exit path of a tracking run gives the decoder back.
pub struct OpencvReader {
    capture: VideoCapture,
    path: String,
    source_fps: f64,
    total_frames: usize,
}

impl OpencvReader {
    pub fn new(path: &str) -> MoveResult<Self> {
        let capture =
            VideoCapture::from_file(path, CAP_ANY).map_err(|e| MoveError::VideoOpen {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        if !capture.is_opened()? {
            return Err(MoveError::VideoOpen {
                path: path.to_string(),
                reason: "capture could not be opened".to_string(),
            });
        }

        let fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!("OpencvReader: no usable FPS in metadata of {}", path);
        }
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT)?;
        let total_frames = if raw_count > 0.0 { raw_count as usize } else { 0 };
        let duration_secs = if fps > 0.0 {
            total_frames as f64 / fps
        } else {
            0.0
        };

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, stream_frames={}",
            path,
            duration_secs,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            path: path.to_string(),
            source_fps: fps,
            total_frames,
        })
    }

    fn read_error(&self, frame_index: usize) -> MoveError {
        MoveError::FrameReadError {
            video: self.path.clone(),
            frame_index,
        }
    }

    fn position_at(&mut self, frame_index: usize) -> MoveResult<()> {
        let current = self.capture.get(CAP_PROP_POS_FRAMES)?.max(0.0) as usize;

        if frame_index > current && frame_index - current <= MAX_GRAB_GAP {
            for _ in current..frame_index {
                if !self.capture.grab()? {
                    return Err(self.read_error(frame_index));
                }
            }
        } else if frame_index != current
            && !self.capture.set(CAP_PROP_POS_FRAMES, frame_index as f64)?
        {
            return Err(self.read_error(frame_index));
        }
        Ok(())
    }
}

impl FrameSource for OpencvReader {
    fn frame_rate(&self) -> f64 {
        self.source_fps
    }

    fn frame_count(&self) -> usize {
        self.total_frames
    }

    fn read_frame(&mut self, frame_index: usize) -> MoveResult<Mat> {
        if frame_index >= self.total_frames {
            return Err(self.read_error(frame_index));
        }

        if let Err(e) = self.position_at(frame_index) {
            tracing::debug!("OpencvReader: seek to {} failed: {}", frame_index, e);
            return Err(self.read_error(frame_index));
        }

        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame).unwrap_or(false);
        if !success || frame.empty() {
            return Err(self.read_error(frame_index));
        }

        Ok(frame)
    }
}

impl Drop for OpencvReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("OpencvReader: failed to release {}: {}", self.path, e);
        }
    }
}
