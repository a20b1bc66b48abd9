use crate::config::{BlendConfig, BlendStrategy};
use crate::error::{MoveError, MoveResult};
use opencv::core::{Mat, Scalar, Size, CV_8UC1};
use opencv::imgproc;
use opencv::prelude::*;

/// 8-bit intensities are halved before the KDE pass. A bandwidth above this
/// many levels spreads every sample across the whole range.
pub const KDE_LEVELS: usize = 128;

/// Combine same-sized 8-bit grayscale frames into one reference frame.
pub fn blend(frames: &[Mat], strategy: BlendStrategy, config: &BlendConfig) -> MoveResult<Mat> {
    let (rows, cols) = check_frames(frames)?;
    tracing::debug!(
        "Blending {} frames of {}x{} with {:?}",
        frames.len(),
        cols,
        rows,
        strategy
    );

    match strategy {
        BlendStrategy::Median => {
            let planes = frame_planes(frames)?;
            let pixels = reduce_stack(&planes, median_of);
            mat_from_bytes(rows, cols, &pixels)
        }
        BlendStrategy::Mode => {
            let planes = frame_planes(frames)?;
            let pixels = reduce_stack(&planes, mode_of);
            mat_from_bytes(rows, cols, &pixels)
        }
        BlendStrategy::Kde => kde_blend(frames, rows, cols, config),
    }
}

fn describe(frame: &Mat) -> String {
    format!("{}x{} (type {})", frame.cols(), frame.rows(), frame.typ())
}

fn check_frames(frames: &[Mat]) -> MoveResult<(i32, i32)> {
    let first = frames.first().ok_or(MoveError::EmptyFrameSet)?;
    let expected = format!("{}x{} (type {})", first.cols(), first.rows(), CV_8UC1);

    for (index, frame) in frames.iter().enumerate() {
        if frame.empty()
            || frame.typ() != CV_8UC1
            || frame.rows() != first.rows()
            || frame.cols() != first.cols()
        {
            return Err(MoveError::InconsistentFrameShape {
                index,
                expected,
                found: describe(frame),
            });
        }
    }
    Ok((first.rows(), first.cols()))
}

fn frame_bytes(frame: &Mat) -> MoveResult<Vec<u8>> {
    if frame.is_continuous() {
        Ok(frame.data_bytes()?.to_vec())
    } else {
        let copy = frame.try_clone()?;
        Ok(copy.data_bytes()?.to_vec())
    }
}

fn frame_planes(frames: &[Mat]) -> MoveResult<Vec<Vec<u8>>> {
    frames.iter().map(frame_bytes).collect()
}

fn mat_from_bytes(rows: i32, cols: i32, bytes: &[u8]) -> MoveResult<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(bytes);
    Ok(mat)
}

/// Apply `reduce` to the stack of samples at every pixel position.
fn reduce_stack<F>(planes: &[Vec<u8>], mut reduce: F) -> Vec<u8>
where
    F: FnMut(&mut [u8]) -> u8,
{
    let len = planes.first().map_or(0, Vec::len);
    let mut stack = vec![0u8; planes.len()];
    (0..len)
        .map(|p| {
            for (sample, plane) in stack.iter_mut().zip(planes) {
                *sample = plane[p];
            }
            reduce(&mut stack)
        })
        .collect()
}

fn median_of(stack: &mut [u8]) -> u8 {
    stack.sort_unstable();
    let n = stack.len();
    if n % 2 == 1 {
        stack[n / 2]
    } else {
        ((stack[n / 2 - 1] as u16 + stack[n / 2] as u16) / 2) as u8
    }
}

/// Most frequent value; the smallest value wins a tie.
fn mode_of(stack: &mut [u8]) -> u8 {
    stack.sort_unstable();
    let mut best = stack[0];
    let mut best_count = 0;
    let mut run_start = 0;
    for i in 1..=stack.len() {
        if i == stack.len() || stack[i] != stack[run_start] {
            let count = i - run_start;
            if count > best_count {
                best = stack[run_start];
                best_count = count;
            }
            run_start = i;
        }
    }
    best
}

/// K[i][j] = max(bandwidth - |i - j|, 0), flattened row-major.
fn triangular_kernel(bandwidth: u32) -> Vec<u64> {
    let bw = bandwidth as i64;
    let mut kernel = vec![0u64; KDE_LEVELS * KDE_LEVELS];
    for i in 0..KDE_LEVELS {
        for j in 0..KDE_LEVELS {
            let d = (i as i64 - j as i64).abs();
            kernel[i * KDE_LEVELS + j] = (bw - d).max(0) as u64;
        }
    }
    kernel
}

/// Working size for the KDE pass, or `None` when the frame already fits the
/// pixel budget. Dimensions are rounded like a scale-factor resize.
fn kde_work_size(rows: i32, cols: i32, budget: usize) -> Option<Size> {
    let scale = (budget as f64 / (rows as f64 * cols as f64)).sqrt();
    if scale >= 1.0 {
        return None;
    }
    Some(Size::new(
        ((cols as f64 * scale).round() as i32).max(1),
        ((rows as f64 * scale).round() as i32).max(1),
    ))
}

fn kde_blend(frames: &[Mat], rows: i32, cols: i32, config: &BlendConfig) -> MoveResult<Mat> {
    let work_size = kde_work_size(rows, cols, config.kde_pixel_budget);

    let (work_rows, work_cols, planes) = if let Some(size) = work_size {
        tracing::debug!(
            "KDE: downscaling {}x{} to {}x{} (budget {} px)",
            cols,
            rows,
            size.width,
            size.height,
            config.kde_pixel_budget
        );
        let mut planes = Vec::with_capacity(frames.len());
        for frame in frames {
            let mut small = Mat::default();
            imgproc::resize(frame, &mut small, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
            planes.push(frame_bytes(&small)?);
        }
        (size.height, size.width, planes)
    } else {
        (rows, cols, frame_planes(frames)?)
    };

    let kernel = triangular_kernel(config.kde_bandwidth);
    let reach = (config.kde_bandwidth as usize).saturating_sub(1);
    let mut scores = [0u64; KDE_LEVELS];

    let pixels = reduce_stack(&planes, |stack| {
        scores.fill(0);
        for &sample in stack.iter() {
            let q = (sample / 2) as usize;
            let lo = q.saturating_sub(reach);
            let hi = (q + reach).min(KDE_LEVELS - 1);
            let row = &kernel[q * KDE_LEVELS..(q + 1) * KDE_LEVELS];
            for level in lo..=hi {
                scores[level] += row[level];
            }
        }
        let mut best = 0;
        for level in 1..KDE_LEVELS {
            if scores[level] > scores[best] {
                best = level;
            }
        }
        (best * 2) as u8
    });

    let mut density_mode = mat_from_bytes(work_rows, work_cols, &pixels)?;
    if work_size.is_some() {
        let mut full = Mat::default();
        imgproc::resize(
            &density_mode,
            &mut full,
            Size::new(cols, rows),
            0.0,
            0.0,
            imgproc::INTER_CUBIC,
        )?;
        density_mode = full;
    }

    let k = config.smoothing_kernel;
    let mut smoothed = Mat::default();
    imgproc::gaussian_blur_def(&density_mode, &mut smoothed, Size::new(k, k), 0.0)?;
    Ok(smoothed)
}
