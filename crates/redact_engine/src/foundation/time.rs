//! Time management utilities

use std::time::{Duration, Instant};

/// Fixed-window throughput reporting for the per-frame loop.
///
/// Counts frames and reports the cumulative average frame rate once every
/// `window` frames. The report itself is left to the caller (the orchestrator
/// logs it), keeping this type free of I/O.
pub struct ThroughputMeter {
    window: u64,
    start: Instant,
    frames: u64,
}

impl ThroughputMeter {
    /// Create a meter that reports every `window` frames (clamped to >= 1).
    pub fn new(window: u64) -> Self {
        Self {
            window: window.max(1),
            start: Instant::now(),
            frames: 0,
        }
    }

    /// Count one presented frame; returns the average FPS when a report is due.
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        if self.frames % self.window == 0 {
            Some(average_fps(self.frames, self.start.elapsed()))
        } else {
            None
        }
    }

    /// Total frames counted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Cumulative average frame rate over an elapsed wall-clock duration.
fn average_fps(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_average_fps() {
        assert_relative_eq!(
            average_fps(60, Duration::from_secs(2)),
            30.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            average_fps(90, Duration::from_millis(3000)),
            30.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_average_fps_zero_elapsed() {
        assert_eq!(average_fps(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_meter_reports_every_window() {
        let mut meter = ThroughputMeter::new(30);
        let mut reports = 0;
        for _ in 0..90 {
            if meter.tick().is_some() {
                reports += 1;
            }
        }
        assert_eq!(reports, 3);
        assert_eq!(meter.frames(), 90);
    }

    #[test]
    fn test_meter_window_clamped_to_one() {
        let mut meter = ThroughputMeter::new(0);
        assert!(meter.tick().is_some());
        assert!(meter.tick().is_some());
    }
}
