pub mod opencv_reader;
pub mod processor;
pub mod sampling;

use crate::error::MoveResult;
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;

/// Random-access frame source for one video.
pub trait FrameSource: Send {
    fn frame_rate(&self) -> f64;
    fn frame_count(&self) -> usize;
    /// Decode the frame at `frame_index`. A failed decode is reported as
    /// `MoveError::FrameReadError`, never as an empty `Mat`.
    fn read_frame(&mut self, frame_index: usize) -> MoveResult<Mat>;
}

/// Convert a decoded frame to a single 8-bit channel.
pub fn to_gray(frame: &Mat) -> MoveResult<Mat> {
    let code = match frame.channels() {
        1 => return Ok(frame.try_clone()?),
        4 => imgproc::COLOR_BGRA2GRAY,
        _ => imgproc::COLOR_BGR2GRAY,
    };
    let mut gray = Mat::default();
    imgproc::cvt_color_def(frame, &mut gray, code)?;
    Ok(gray)
}
