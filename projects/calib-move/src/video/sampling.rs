// Evenly spaced frame sampling for the reference and main passes

use crate::window::StaticWindow;

/// `n` evenly spaced values from `start` to `end`, both inclusive.
pub fn evenly_spaced(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| {
                if i == n - 1 {
                    end
                } else {
                    start + (end - start) * i as f64 / (n - 1) as f64
                }
            })
            .collect(),
    }
}

fn to_frame_indices(positions: Vec<f64>, frame_count: usize) -> Vec<usize> {
    let last = frame_count.saturating_sub(1);
    positions
        .into_iter()
        .map(|p| (p.max(0.0) as usize).min(last))
        .collect()
}

/// Frame indices spread over the static window. Truncated toward zero and
/// clamped to the last decodable frame; duplicates are kept.
pub fn window_frame_indices(
    window: &StaticWindow,
    frame_rate: f64,
    frame_count: usize,
    n: usize,
) -> Vec<usize> {
    let positions = evenly_spaced(window.start * frame_rate, window.end * frame_rate, n);
    to_frame_indices(positions, frame_count)
}

/// Frame indices spread over the whole video, first to last frame.
pub fn main_pass_indices(frame_count: usize, n: usize) -> Vec<usize> {
    let last = frame_count.saturating_sub(1) as f64;
    to_frame_indices(evenly_spaced(0.0, last, n), frame_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evenly_spaced_includes_bounds() {
        let v = evenly_spaced(10.0, 50.0, 5);
        assert_eq!(v, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        assert!(evenly_spaced(0.0, 1.0, 0).is_empty());
        assert_eq!(evenly_spaced(3.0, 9.0, 1), vec![3.0]);
    }

    #[test]
    fn test_main_pass_is_ascending_and_in_range() {
        let idx = main_pass_indices(300, 10);
        assert_eq!(idx.len(), 10);
        assert_eq!(idx[0], 0);
        assert_eq!(*idx.last().unwrap(), 299);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_window_indices_truncate_and_clamp() {
        let window = StaticWindow::new(10.0, 50.0);
        assert_eq!(
            window_frame_indices(&window, 30.0, 1800, 5),
            vec![300, 600, 900, 1200, 1500]
        );

        // A window ending at the video end must not sample past the last frame.
        let to_end = StaticWindow::new(0.0, 10.0);
        let idx = window_frame_indices(&to_end, 30.0, 300, 3);
        assert_eq!(idx, vec![0, 150, 299]);

        let fractional = StaticWindow::new(0.0, 1.0);
        assert_eq!(window_frame_indices(&fractional, 29.97, 100, 4), vec![0, 9, 19, 29]);
    }

    #[test]
    fn test_duplicates_are_kept_for_short_videos() {
        let idx = main_pass_indices(3, 6);
        assert_eq!(idx.len(), 6);
        assert_eq!(idx, vec![0, 0, 0, 1, 1, 2]);
    }
}
