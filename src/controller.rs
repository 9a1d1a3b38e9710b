// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Adaptive target-temperature fan controller.
//!
//! Consumes one temperature sample per tick and produces a fan speed
//! percentage that holds the GPU near a target temperature. The controller
//! starts in an aggressive mode and relaxes into a gentle mode once the
//! temperature has settled around the target, switching back as soon as it
//! is disturbed. Small corrections are held back by a hysteresis gate so the
//! fan does not hunt around the setpoint.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default lower fan bound in percent.
pub const DEFAULT_MIN_FAN_PCT: u8 = 30;
/// Default upper fan bound in percent.
pub const DEFAULT_MAX_FAN_PCT: u8 = 100;
/// Default target temperature in degrees Celsius.
pub const DEFAULT_TARGET_C: f64 = 70.0;
/// Range a user-requested target is clamped into.
pub const TARGET_RANGE_C: (f64, f64) = (40.0, 90.0);

/// Clamp a requested target temperature to the supported range.
pub fn clamp_target(target_c: f64) -> f64 {
    target_c.clamp(TARGET_RANGE_C.0, TARGET_RANGE_C.1)
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Gains used while in one control mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeGains {
    /// Percent of fan speed added per °C above target.
    pub over_gain: f64,
    /// Percent of fan speed removed per °C below target.
    pub under_gain: f64,
    /// Smallest adjustment made on any sample, before the decrease factor.
    pub min_step: i32,
    /// Multiplier applied to decreases.
    pub decrease_factor: f64,
}

impl ModeGains {
    pub const AGGRESSIVE: ModeGains = ModeGains {
        over_gain: 2.5,
        under_gain: 1.5,
        min_step: 3,
        decrease_factor: 0.7,
    };

    pub const GENTLE: ModeGains = ModeGains {
        over_gain: 1.5,
        under_gain: 0.8,
        min_step: 1,
        decrease_factor: 0.5,
    };
}

/// Thresholds and gains of the adaptive controller.
///
/// The defaults are hand-tuned values carried over unchanged; they are
/// exposed so a config file can override them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerTuning {
    /// Number of samples kept in the sliding history window.
    pub history_len: usize,
    /// Samples required before stability is evaluated at all.
    pub min_history_for_stability: usize,
    /// A sample is stable only if within this many °C of target...
    pub stable_band_c: f64,
    /// ...and the history spread is below this.
    pub stable_variation_c: f64,
    /// Consecutive stable samples needed to enter gentle mode.
    pub stable_samples_required: u32,
    /// Gentle mode is abandoned beyond this distance from target...
    pub unstable_band_c: f64,
    /// ...or beyond this history spread.
    pub unstable_variation_c: f64,
    /// Multiplier on increases while the temperature is still climbing.
    pub climb_factor: f64,
    /// Minimum change in percent for a new speed to be committed...
    pub commit_min_delta: i32,
    /// ...unless the temperature is further than this from target.
    pub commit_band_c: f64,
    pub aggressive: ModeGains,
    pub gentle: ModeGains,
}

impl Default for ControllerTuning {
    fn default() -> Self {
        Self {
            history_len: 10,
            min_history_for_stability: 4,
            stable_band_c: 3.0,
            stable_variation_c: 2.0,
            stable_samples_required: 6,
            unstable_band_c: 5.0,
            unstable_variation_c: 4.0,
            climb_factor: 1.5,
            commit_min_delta: 2,
            commit_band_c: 3.0,
            aggressive: ModeGains::AGGRESSIVE,
            gentle: ModeGains::GENTLE,
        }
    }
}

impl ModeGains {
    fn validate(&self, mode: &str) -> Result<(), ConfigError> {
        non_negative(&format!("{mode}.over_gain"), self.over_gain)?;
        non_negative(&format!("{mode}.under_gain"), self.under_gain)?;
        if self.min_step < 0 {
            return Err(invalid(&format!("{mode}.min_step"), "must not be negative"));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor <= 1.0) {
            return Err(invalid(
                &format!("{mode}.decrease_factor"),
                "must be within (0, 1]",
            ));
        }
        Ok(())
    }
}

impl ControllerTuning {
    /// Reject values that would stall or invert the control law.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_len == 0 {
            return Err(invalid("history_len", "must be at least 1"));
        }
        if self.min_history_for_stability == 0 || self.min_history_for_stability > self.history_len
        {
            return Err(invalid(
                "min_history_for_stability",
                "must be between 1 and history_len",
            ));
        }
        if self.stable_samples_required == 0 {
            return Err(invalid("stable_samples_required", "must be at least 1"));
        }
        non_negative("stable_band_c", self.stable_band_c)?;
        non_negative("stable_variation_c", self.stable_variation_c)?;
        non_negative("unstable_band_c", self.unstable_band_c)?;
        non_negative("unstable_variation_c", self.unstable_variation_c)?;
        non_negative("commit_band_c", self.commit_band_c)?;
        if !(self.climb_factor.is_finite() && self.climb_factor >= 1.0) {
            return Err(invalid("climb_factor", "must be at least 1"));
        }
        if self.commit_min_delta < 0 {
            return Err(invalid("commit_min_delta", "must not be negative"));
        }
        self.aggressive.validate("aggressive")?;
        self.gentle.validate("gentle")
    }
}

fn invalid(field: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidTuning {
        field: field.to_string(),
        reason,
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, "must be a finite non-negative number"))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Aggressive,
    Gentle,
}

/// Point-in-time view of the controller, reported in daemon status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub target_c: f64,
    pub min_pct: u8,
    pub max_pct: u8,
    pub last_speed: u8,
    pub mode: ControlMode,
    pub stable_count: u32,
    pub history: Vec<f64>,
}

/// One control session. Create a new controller whenever the target or
/// bounds change; state is never carried across sessions.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    target_c: f64,
    min_pct: i32,
    max_pct: i32,
    tuning: ControllerTuning,
    last_speed: i32,
    history: VecDeque<f64>,
    mode: ControlMode,
    stable_count: u32,
}

impl AdaptiveController {
    pub fn new(target_c: f64, min_pct: u8, max_pct: u8) -> Result<Self, ConfigError> {
        Self::with_tuning(target_c, min_pct, max_pct, ControllerTuning::default())
    }

    pub fn with_tuning(
        target_c: f64,
        min_pct: u8,
        max_pct: u8,
        tuning: ControllerTuning,
    ) -> Result<Self, ConfigError> {
        if min_pct > max_pct || max_pct > 100 {
            return Err(ConfigError::InvalidFanBounds {
                min: min_pct,
                max: max_pct,
            });
        }
        if !target_c.is_finite() {
            return Err(ConfigError::InvalidTarget(target_c));
        }
        tuning.validate()?;

        Ok(Self {
            target_c,
            min_pct: i32::from(min_pct),
            max_pct: i32::from(max_pct),
            tuning,
            last_speed: i32::from(min_pct),
            history: VecDeque::with_capacity(tuning.history_len),
            mode: ControlMode::Aggressive,
            stable_count: 0,
        })
    }

    /// Feed one temperature sample and get the fan speed to command.
    ///
    /// An unavailable (or non-finite) reading returns the last commanded
    /// speed and leaves all state untouched.
    pub fn next_fan_speed(&mut self, reading: Option<f64>) -> u8 {
        let Some(temp_c) = reading.filter(|t| t.is_finite()) else {
            return self.last_speed();
        };

        self.push_sample(temp_c);
        self.update_mode(temp_c);

        let diff = temp_c - self.target_c;
        let gains = self.gains();

        // Steps wider than the fan range land on a bound anyway.
        let span = self.max_pct - self.min_pct;
        let candidate = if diff > 0.0 {
            let mut adjustment = gains.min_step.max(truncate(diff * gains.over_gain));
            if self.is_climbing() {
                adjustment = truncate(f64::from(adjustment) * self.tuning.climb_factor);
            }
            self.max_pct.min(self.last_speed + adjustment.min(span))
        } else {
            let adjustment = gains.min_step.max(truncate(diff.abs() * gains.under_gain));
            let adjustment = truncate(f64::from(adjustment) * gains.decrease_factor);
            self.min_pct.max(self.last_speed - adjustment.min(span))
        };

        if (candidate - self.last_speed).abs() >= self.tuning.commit_min_delta
            || diff.abs() > self.tuning.commit_band_c
        {
            self.last_speed = candidate;
        }

        self.last_speed()
    }

    pub fn target(&self) -> f64 {
        self.target_c
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn last_speed(&self) -> u8 {
        // Always within [min_pct, max_pct] which is a subset of 0..=100.
        self.last_speed.clamp(0, 100) as u8
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    /// Samples in the window, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            target_c: self.target_c,
            min_pct: self.min_pct as u8,
            max_pct: self.max_pct as u8,
            last_speed: self.last_speed(),
            mode: self.mode,
            stable_count: self.stable_count,
            history: self.history().collect(),
        }
    }

    fn gains(&self) -> ModeGains {
        match self.mode {
            ControlMode::Aggressive => self.tuning.aggressive,
            ControlMode::Gentle => self.tuning.gentle,
        }
    }

    fn push_sample(&mut self, temp_c: f64) {
        self.history.push_back(temp_c);
        while self.history.len() > self.tuning.history_len {
            self.history.pop_front();
        }
    }

    /// Latest sample above the one two ticks earlier.
    fn is_climbing(&self) -> bool {
        let n = self.history.len();
        n >= 3 && self.history[n - 1] > self.history[n - 3]
    }

    fn update_mode(&mut self, temp_c: f64) {
        if self.history.len() < self.tuning.min_history_for_stability {
            return;
        }

        let (lo, hi) = self
            .history
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
                (lo.min(t), hi.max(t))
            });
        let variation = hi - lo;
        let distance = (temp_c - self.target_c).abs();

        if distance < self.tuning.stable_band_c && variation < self.tuning.stable_variation_c {
            self.stable_count += 1;
            if self.stable_count >= self.tuning.stable_samples_required
                && self.mode == ControlMode::Aggressive
            {
                self.mode = ControlMode::Gentle;
                log::info!(
                    "Temperature stable around {:.1}°C, switching to gentle control",
                    self.target_c
                );
            }
        } else {
            self.stable_count = 0;
            if self.mode == ControlMode::Gentle
                && (distance > self.tuning.unstable_band_c
                    || variation > self.tuning.unstable_variation_c)
            {
                self.mode = ControlMode::Aggressive;
                log::info!(
                    "Temperature unstable ({temp_c:.1}°C, spread {variation:.1}°C), switching to aggressive control"
                );
            }
        }
    }
}

/// Drop the fractional part, toward zero.
fn truncate(value: f64) -> i32 {
    value.trunc() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdaptiveController {
        AdaptiveController::new(70.0, 30, 100).unwrap()
    }

    /// Alternating 70.5 / 69.5, within the stable band with 1°C of spread.
    fn settle(c: &mut AdaptiveController, ticks: usize) -> Vec<u8> {
        (0..ticks)
            .map(|i| c.next_fan_speed(Some(if i % 2 == 0 { 70.5 } else { 69.5 })))
            .collect()
    }

    #[test]
    fn test_rejects_bad_bounds() {
        assert_eq!(
            AdaptiveController::new(70.0, 80, 40).unwrap_err(),
            ConfigError::InvalidFanBounds { min: 80, max: 40 }
        );
        assert!(AdaptiveController::new(70.0, 30, 101).is_err());
        assert!(AdaptiveController::new(f64::NAN, 30, 100).is_err());
        assert!(AdaptiveController::new(70.0, 50, 50).is_ok());
    }

    #[test]
    fn test_starts_at_min_in_aggressive_mode() {
        let c = controller();
        assert_eq!(c.last_speed(), 30);
        assert_eq!(c.mode(), ControlMode::Aggressive);
        assert_eq!(c.stable_count(), 0);
    }

    #[test]
    fn test_constant_overheat_ramps_to_max() {
        let mut c = controller();
        let speeds: Vec<u8> = (0..8).map(|_| c.next_fan_speed(Some(80.0))).collect();
        assert_eq!(speeds, vec![55, 80, 100, 100, 100, 100, 100, 100]);
        assert!(speeds.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(c.mode(), ControlMode::Aggressive);
    }

    #[test]
    fn test_climbing_temperature_boosts_increase() {
        let mut c = controller();
        assert_eq!(c.next_fan_speed(Some(71.0)), 33);
        assert_eq!(c.next_fan_speed(Some(71.0)), 36);
        // 72 > 71 two samples back: adjustment max(3, 5) * 1.5 = 7
        assert_eq!(c.next_fan_speed(Some(72.0)), 43);
    }

    #[test]
    fn test_decrease_is_damped_and_floored() {
        let mut c = controller();
        c.next_fan_speed(Some(90.0));
        assert_eq!(c.last_speed(), 80);
        // 10°C under: max(3, 15) * 0.7 = 10
        assert_eq!(c.next_fan_speed(Some(60.0)), 70);
        for _ in 0..20 {
            c.next_fan_speed(Some(40.0));
        }
        assert_eq!(c.last_speed(), 30);
    }

    #[test]
    fn test_switches_to_gentle_after_six_stable_samples() {
        let mut c = controller();
        let mut switched_at = Vec::new();
        let mut prev = c.mode();
        for i in 0..20 {
            c.next_fan_speed(Some(if i % 2 == 0 { 70.5 } else { 69.5 }));
            if c.mode() != prev {
                switched_at.push(i + 1);
                prev = c.mode();
            }
        }
        // Stability is first evaluated on sample 4, the sixth stable one is sample 9.
        assert_eq!(switched_at, vec![9]);
        assert_eq!(c.mode(), ControlMode::Gentle);
        assert_eq!(c.stable_count(), 17);
    }

    #[test]
    fn test_wide_alternation_is_never_stable() {
        let mut c = controller();
        for i in 0..20 {
            c.next_fan_speed(Some(if i % 2 == 0 { 68.0 } else { 72.0 }));
        }
        assert_eq!(c.mode(), ControlMode::Aggressive);
        assert_eq!(c.stable_count(), 0);
    }

    #[test]
    fn test_hysteresis_holds_speed_in_gentle_mode() {
        let mut c = controller();
        let speeds = settle(&mut c, 16);
        assert_eq!(&speeds[..9], &[33, 31, 34, 32, 35, 33, 36, 34, 34]);
        // Gentle corrections of 0-1% are below the commit threshold.
        assert!(speeds[8..].iter().all(|&s| s == 34));
    }

    #[test]
    fn test_large_deviation_bypasses_hysteresis() {
        let mut c = controller();
        settle(&mut c, 10);
        assert_eq!(c.mode(), ControlMode::Gentle);
        // 3.5°C under target: max(1, 2) * 0.5 = 1, committed because |diff| > 3
        assert_eq!(c.next_fan_speed(Some(66.5)), 33);
        assert_eq!(c.mode(), ControlMode::Gentle);
    }

    #[test]
    fn test_disturbance_restores_aggressive_mode() {
        let mut c = controller();
        settle(&mut c, 10);
        assert_eq!(c.mode(), ControlMode::Gentle);

        // 4.5 from target and spread 5.0: unstable, back to aggressive
        c.next_fan_speed(Some(74.5));
        assert_eq!(c.mode(), ControlMode::Aggressive);
        assert_eq!(c.stable_count(), 0);
    }

    #[test]
    fn test_mild_instability_stays_gentle_but_resets_counter() {
        let mut c = controller();
        settle(&mut c, 10);
        // Spread 3.0 and 2.5 from target: not stable, not disturbed enough
        c.next_fan_speed(Some(67.5));
        assert_eq!(c.mode(), ControlMode::Gentle);
        assert_eq!(c.stable_count(), 0);
    }

    #[test]
    fn test_unavailable_reading_changes_nothing() {
        let mut c = controller();
        settle(&mut c, 7);
        let before = c.snapshot();

        assert_eq!(c.next_fan_speed(None), before.last_speed);
        assert_eq!(c.next_fan_speed(Some(f64::NAN)), before.last_speed);
        assert_eq!(c.snapshot(), before);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let mut c = controller();
        for i in 0..15 {
            c.next_fan_speed(Some(60.0 + i as f64));
        }
        let history: Vec<f64> = c.history().collect();
        assert_eq!(history.len(), 10);
        assert_eq!(history.first(), Some(&65.0));
        assert_eq!(history.last(), Some(&74.0));
    }

    #[test]
    fn test_custom_tuning_threshold() {
        let tuning = ControllerTuning {
            stable_samples_required: 2,
            ..ControllerTuning::default()
        };
        let mut c = AdaptiveController::with_tuning(70.0, 30, 100, tuning).unwrap();
        settle(&mut c, 5);
        assert_eq!(c.mode(), ControlMode::Gentle);
    }

    #[test]
    fn test_tuning_defaults_fill_missing_fields() {
        let tuning: ControllerTuning = toml::from_str("stable_samples_required = 8").unwrap();
        assert_eq!(tuning.stable_samples_required, 8);
        assert_eq!(tuning.history_len, 10);
        assert_eq!(tuning.gentle, ModeGains::GENTLE);
    }

    #[test]
    fn test_extreme_readings_stay_within_bounds() {
        let mut c = controller();
        assert_eq!(c.next_fan_speed(Some(1.0e12)), 100);
        assert_eq!(c.next_fan_speed(Some(2.0e12)), 100);
        // Climbing boost on top of a saturated step.
        assert_eq!(c.next_fan_speed(Some(f64::MAX)), 100);
        assert_eq!(c.next_fan_speed(Some(-1.0e12)), 30);
        assert_eq!(c.next_fan_speed(Some(-f64::MAX)), 30);
    }

    #[test]
    fn test_narrow_bounds_with_extreme_reading() {
        let mut c = AdaptiveController::new(70.0, 60, 60).unwrap();
        assert_eq!(c.next_fan_speed(Some(1.0e12)), 60);
        assert_eq!(c.next_fan_speed(Some(-1.0e12)), 60);
    }

    #[test]
    fn test_rejects_invalid_tuning() {
        let cases = [
            (
                ControllerTuning {
                    history_len: 0,
                    ..ControllerTuning::default()
                },
                "history_len",
            ),
            (
                ControllerTuning {
                    min_history_for_stability: 11,
                    ..ControllerTuning::default()
                },
                "min_history_for_stability",
            ),
            (
                ControllerTuning {
                    climb_factor: 0.5,
                    ..ControllerTuning::default()
                },
                "climb_factor",
            ),
            (
                ControllerTuning {
                    stable_band_c: f64::NAN,
                    ..ControllerTuning::default()
                },
                "stable_band_c",
            ),
            (
                ControllerTuning {
                    aggressive: ModeGains {
                        min_step: -1,
                        ..ModeGains::AGGRESSIVE
                    },
                    ..ControllerTuning::default()
                },
                "aggressive.min_step",
            ),
            (
                ControllerTuning {
                    gentle: ModeGains {
                        decrease_factor: 0.0,
                        ..ModeGains::GENTLE
                    },
                    ..ControllerTuning::default()
                },
                "gentle.decrease_factor",
            ),
        ];

        for (tuning, field) in cases {
            match AdaptiveController::with_tuning(70.0, 30, 100, tuning) {
                Err(ConfigError::InvalidTuning { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected InvalidTuning for {field}, got {other:?}"),
            }
        }
        assert!(ControllerTuning::default().validate().is_ok());
    }

    #[test]
    fn test_clamp_target() {
        assert_eq!(clamp_target(95.0), 90.0);
        assert_eq!(clamp_target(20.0), 40.0);
        assert_eq!(clamp_target(65.0), 65.0);
    }
}
