// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! GPU fan control: static fan curves and an adaptive target-temperature
//! controller, driven through the Linux DRM/hwmon interface by a daemon.

pub mod client;
pub mod config;
pub mod controller;
pub mod curve;
pub mod engine;
pub mod error;
pub mod hwmon;
pub mod protocol;

pub use controller::{AdaptiveController, ControlMode, ControllerTuning};
pub use curve::{ControlPoint, FanCurve};
pub use engine::{Engine, FanMode, FanSink, TemperatureSource};
pub use error::ConfigError;
