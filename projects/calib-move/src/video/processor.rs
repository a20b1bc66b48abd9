use crate::error::MoveResult;
use crate::video::FrameSource;
use indicatif::{ProgressBar, ProgressStyle};
use opencv::core::Mat;
use std::time::{Duration, Instant};

pub struct SamplingStats {
    pub processed_frames: usize,
    pub failed_reads: usize,
    pub duration: Duration,
}

/// A trait for handling sampled frames. This separates the "what to do with a
/// frame" from the "which frames to read and in what order" logic.
///
/// Read failures are handed to the processor, which decides whether they are
/// fatal (returning the error) or tolerated (returning `Ok`).
pub trait FrameProcessor {
    fn process(&mut self, frame_index: usize, frame: MoveResult<Mat>) -> MoveResult<()>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameProcessor.
impl<F> FrameProcessor for F
where
    F: FnMut(usize, MoveResult<Mat>) -> MoveResult<()>,
{
    fn process(&mut self, frame_index: usize, frame: MoveResult<Mat>) -> MoveResult<()> {
        self(frame_index, frame)
    }
}

pub fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg:<32} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(truncate_label(label, 32));
    pb
}

fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() > max_chars {
        let mut short: String = label.chars().take(max_chars - 1).collect();
        short.push('…');
        short
    } else {
        label.to_string()
    }
}

/// Read `frame_indices` in order and feed every result to `processor`.
/// Stops at the first error the processor returns.
pub fn sample_frames<P>(
    source: &mut dyn FrameSource,
    frame_indices: &[usize],
    label: &str,
    mut processor: P,
) -> MoveResult<SamplingStats>
where
    P: FrameProcessor,
{
    let pb = progress_bar(frame_indices.len(), label);
    let start_time = Instant::now();
    let mut processed_frames = 0;
    let mut failed_reads = 0;

    for &frame_index in frame_indices {
        let frame = source.read_frame(frame_index);
        if frame.is_err() {
            failed_reads += 1;
        }
        if let Err(e) = processor.process(frame_index, frame) {
            pb.abandon_with_message(format!("{} failed", truncate_label(label, 25)));
            return Err(e);
        }
        processed_frames += 1;
        pb.inc(1);
    }

    pb.finish();

    Ok(SamplingStats {
        processed_frames,
        failed_reads,
        duration: start_time.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoveError;
    use opencv::core::{Scalar, CV_8UC1};

    struct FlakySource {
        broken: Vec<usize>,
    }

    impl FrameSource for FlakySource {
        fn frame_rate(&self) -> f64 {
            25.0
        }

        fn frame_count(&self) -> usize {
            100
        }

        fn read_frame(&mut self, frame_index: usize) -> MoveResult<Mat> {
            if self.broken.contains(&frame_index) {
                return Err(MoveError::FrameReadError {
                    video: "flaky".to_string(),
                    frame_index,
                });
            }
            Ok(Mat::new_rows_cols_with_default(4, 4, CV_8UC1, Scalar::all(frame_index as f64))?)
        }
    }

    #[test]
    fn test_tolerant_processor_sees_every_index() {
        let mut source = FlakySource { broken: vec![20] };
        let mut seen = Vec::new();
        let stats = sample_frames(&mut source, &[10, 20, 30], "test", |idx: usize, frame: MoveResult<Mat>| -> MoveResult<()> {
            seen.push((idx, frame.is_ok()));
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![(10, true), (20, false), (30, true)]);
        assert_eq!(stats.processed_frames, 3);
        assert_eq!(stats.failed_reads, 1);
    }

    #[test]
    fn test_strict_processor_stops_at_first_failure() {
        let mut source = FlakySource { broken: vec![20] };
        let mut seen = Vec::new();
        let res = sample_frames(&mut source, &[10, 20, 30], "test", |idx: usize, frame: MoveResult<Mat>| -> MoveResult<()> {
            frame?;
            seen.push(idx);
            Ok(())
        });

        assert!(matches!(
            res,
            Err(MoveError::FrameReadError { frame_index: 20, .. })
        ));
        assert_eq!(seen, vec![10]);
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("short", 32), "short");
        assert_eq!(truncate_label("abcdef", 4), "abc…");
    }
}
