// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Messages are newline-delimited JSON. The client sends a [`Request`]
//! and the daemon replies with a [`Response`].

use crate::controller::ControllerSnapshot;
use crate::curve::{ControlPoint, FanCurve};
use crate::engine::FanMode;
use crate::hwmon::GpuStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests (client -> daemon)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Current GPU readings and control state.
    #[serde(rename = "get_status")]
    GetStatus,

    /// Run the fan at a fixed speed.
    #[serde(rename = "set_fixed")]
    SetFixed { speed_pct: u8 },

    /// Return the fan to driver control.
    #[serde(rename = "set_auto")]
    SetAuto,

    /// Follow a configured curve.
    #[serde(rename = "use_curve")]
    UseCurve { curve_name: String },

    /// Hold a target temperature. The target is clamped to 40-90°C.
    #[serde(rename = "set_target")]
    SetTarget {
        target_c: f64,
        min_pct: u8,
        max_pct: u8,
    },

    #[serde(rename = "list_curves")]
    ListCurves,

    /// Create or replace a curve.
    #[serde(rename = "upsert_curve")]
    UpsertCurve {
        name: String,
        points: Vec<ControlPoint>,
    },

    #[serde(rename = "delete_curve")]
    DeleteCurve { name: String },

    /// Save current configuration to disk.
    #[serde(rename = "save_config")]
    SaveConfig,

    /// Reload configuration from disk.
    #[serde(rename = "reload_config")]
    ReloadConfig,
}

// ---------------------------------------------------------------------------
// Responses (daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "status")]
    Status(StatusReport),

    #[serde(rename = "curves")]
    Curves { curves: Vec<FanCurve> },

    /// Operation succeeded.
    #[serde(rename = "ok")]
    Ok { message: String },

    /// Operation failed.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Everything a front-end needs to draw the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// `None` if no controllable GPU was found.
    pub gpu: Option<GpuStatus>,
    pub mode: FanMode,
    /// Last speed the daemon commanded.
    pub commanded_pct: Option<u8>,
    /// Present in target mode.
    pub controller: Option<ControllerSnapshot>,
    pub config_path: String,
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}

/// Decode a message from a JSON string (newline-trimmed).
pub fn decode<'a, T: Deserialize<'a>>(s: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(s.trim())
}
