// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mapping the tracker's current calibration target onto the LEDs.
//!
//! There is no local point timer: which LED is lit comes from the target
//! coordinates the tracker announced, and the delay/sampling phase comes
//! from the instant that announcement arrived.

use std::time::Instant;

use gazelab_config::CalibrationConfig;
use gazelab_tracker::CalibrationPointProgress;

/// Target points added to the tracker, in order:
/// bottom-right, bottom-left, top-left, top-right
pub const CORNER_POINTS: [(f64, f64); 4] = [(1.0, 1.0), (0.0, 1.0), (0.0, 0.0), (1.0, 0.0)];

/// Logical calibration target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedTarget {
    /// Index into [`CORNER_POINTS`] (and into `led_order`)
    Corner(usize),
    Center,
}

/// What the LEDs should show right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCommand {
    Off,
    Single(u8),
    All,
}

/// Classify a point by quadrant, or as the center when both coordinates
/// fall within `tolerance` of 0.5. Without coordinates the point number is
/// used (1..=4 follow [`CORNER_POINTS`]).
pub fn target_for(progress: &CalibrationPointProgress, tolerance: f64) -> Option<LedTarget> {
    match (progress.calx, progress.caly) {
        (Some(x), Some(y)) => {
            if (x - 0.5).abs() <= tolerance && (y - 0.5).abs() <= tolerance {
                return Some(LedTarget::Center);
            }
            let right = x >= 0.5;
            let bottom = y >= 0.5;
            let corner = match (right, bottom) {
                (true, true) => 0,
                (false, true) => 1,
                (false, false) => 2,
                (true, false) => 3,
            };
            Some(LedTarget::Corner(corner))
        }
        _ => match progress.pt {
            1..=4 => Some(LedTarget::Corner(progress.pt as usize - 1)),
            _ => None,
        },
    }
}

/// Seconds since the tracker announced the point
pub fn phase_elapsed(progress: &CalibrationPointProgress, now: Instant) -> f64 {
    now.saturating_duration_since(progress.started_at).as_secs_f64()
}

/// Whether the point is still in its pre-sampling delay
pub fn in_delay_phase(progress: &CalibrationPointProgress, now: Instant, delay_s: f64) -> bool {
    phase_elapsed(progress, now) < delay_s
}

/// LED state for the current point. During the delay phase the LED blinks
/// (when enabled); during sampling it is held steady.
pub fn led_command(
    progress: Option<&CalibrationPointProgress>,
    now: Instant,
    config: &CalibrationConfig,
) -> LedCommand {
    let Some(progress) = progress else {
        return LedCommand::Off;
    };
    let lit = match target_for(progress, config.center_tolerance) {
        Some(LedTarget::Center) => LedCommand::All,
        Some(LedTarget::Corner(corner)) => match config.led_order.get(corner) {
            Some(&led) => LedCommand::Single(led),
            None => return LedCommand::Off,
        },
        None => return LedCommand::Off,
    };

    if config.blink_during_delay && in_delay_phase(progress, now, config.point_delay_s) {
        let period = config.effective_blink_period_s();
        let duty = config.effective_blink_duty();
        if phase_elapsed(progress, now) % period >= period * duty {
            return LedCommand::Off;
        }
    }
    lit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn progress(pt: u32, calx: Option<f64>, caly: Option<f64>, started_at: Instant) -> CalibrationPointProgress {
        CalibrationPointProgress {
            pt,
            started_at,
            ended_at: None,
            calx,
            caly,
        }
    }

    fn config() -> CalibrationConfig {
        CalibrationConfig {
            led_order: vec![3, 2, 1, 0],
            point_delay_s: 2.0,
            blink_period_s: 0.6,
            blink_duty: 0.5,
            ..CalibrationConfig::default()
        }
    }

    #[test]
    fn test_quadrants_follow_corner_order() {
        let t = Instant::now();
        for (i, (x, y)) in CORNER_POINTS.iter().enumerate() {
            let p = progress(9, Some(*x), Some(*y), t);
            assert_eq!(target_for(&p, 0.15), Some(LedTarget::Corner(i)));
        }
        let center = progress(5, Some(0.6), Some(0.4), t);
        assert_eq!(target_for(&center, 0.15), Some(LedTarget::Center));
        let off_center = progress(5, Some(0.7), Some(0.4), t);
        assert_eq!(target_for(&off_center, 0.15), Some(LedTarget::Corner(3)));
    }

    #[test]
    fn test_point_number_fallback() {
        let t = Instant::now();
        assert_eq!(target_for(&progress(2, None, None, t), 0.15), Some(LedTarget::Corner(1)));
        assert_eq!(target_for(&progress(5, None, Some(0.5), t), 0.15), None);
    }

    #[test]
    fn test_blinks_in_delay_then_holds() {
        let cfg = config();
        let start = Instant::now();
        let p = progress(1, Some(1.0), Some(1.0), start);
        let at = |ms: u64| led_command(Some(&p), start + Duration::from_millis(ms), &cfg);

        // Bottom-right maps through led_order[0]
        assert_eq!(at(100), LedCommand::Single(3));
        assert_eq!(at(400), LedCommand::Off);
        assert_eq!(at(700), LedCommand::Single(3));
        // Sampling phase: steady regardless of blink position
        assert_eq!(at(2400), LedCommand::Single(3));
        assert_eq!(at(2500), LedCommand::Single(3));
    }

    #[test]
    fn test_no_blink_when_disabled() {
        let cfg = CalibrationConfig {
            blink_during_delay: false,
            ..config()
        };
        let start = Instant::now();
        let p = progress(5, Some(0.5), Some(0.5), start);
        assert_eq!(
            led_command(Some(&p), start + Duration::from_millis(400), &cfg),
            LedCommand::All
        );
    }

    #[test]
    fn test_no_progress_means_off() {
        assert_eq!(led_command(None, Instant::now(), &config()), LedCommand::Off);
    }
}
