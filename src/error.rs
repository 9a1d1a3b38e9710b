// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration errors raised when building curves, controllers and modes.
//!
//! These are reported before a control loop starts and are never recovered
//! internally.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A curve needs at least two points to interpolate between.
    #[error("Curve must have at least 2 points (got {count})")]
    TooFewPoints { count: usize },

    /// NaN or infinite values cannot be ordered.
    #[error("Point {index} has a non-finite temperature or fan speed")]
    NonFinitePoint { index: usize },

    #[error("Invalid fan bounds {min}%-{max}%: need min <= max, both within 0-100")]
    InvalidFanBounds { min: u8, max: u8 },

    #[error("Invalid target temperature {0}")]
    InvalidTarget(f64),

    #[error("Point {index} ({temp_c}°C, {fan_pct}%) out of range: temperature must be 0-110°C, fan speed 0-100%")]
    PointOutOfRange {
        index: usize,
        temp_c: f64,
        fan_pct: f64,
    },

    #[error("Points must have strictly increasing temperatures (point {index})")]
    UnorderedPoints { index: usize },

    /// A controller tuning value is outside what the control law can use.
    #[error("Invalid controller tuning: {field} {reason}")]
    InvalidTuning {
        field: String,
        reason: &'static str,
    },

    #[error("Unknown curve: {0}")]
    UnknownCurve(String),
}
