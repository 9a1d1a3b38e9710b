// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! GPU discovery and control through the DRM/hwmon sysfs interface.
//!
//! Scans `/sys/class/drm/card*/device/hwmon/` for GPUs exposing a PWM fan
//! output (e.g. the `amdgpu` driver), and provides read/write access to the
//! edge temperature sensor and the fan duty cycle.

use crate::engine::{FanSink, TemperatureSource};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DRM_ROOT: &str = "/sys/class/drm";

/// PCI vendor id of AMD/ATI.
pub const AMD_VENDOR_ID: &str = "0x1002";

/// `pwm1_enable` values understood by the amdgpu driver.
pub const PWM_ENABLE_MANUAL: u8 = 1;
pub const PWM_ENABLE_AUTO: u8 = 2;

const DEFAULT_PWM_MAX: u32 = 255;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A discovered GPU with a controllable fan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDevice {
    /// DRM card name, e.g. "card0"
    pub card: String,
    /// hwmon driver name, e.g. "amdgpu"
    pub name: String,
    /// PCI vendor id, e.g. "0x1002"
    pub vendor: Option<String>,
    /// Absolute path to the `temp1_input` file (millidegrees C), if present
    pub temp_path: Option<PathBuf>,
    /// Absolute path to `pwm1`
    pub pwm_path: PathBuf,
    /// Absolute path to `pwm1_enable`
    pub pwm_enable_path: PathBuf,
    /// Absolute path to `fan1_input` (RPM), if present
    pub rpm_path: Option<PathBuf>,
    /// Duty value corresponding to 100%
    pub pwm_max: u32,
}

/// Live readings for the GPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuStatus {
    pub card: String,
    pub name: String,
    /// Edge temperature in degrees Celsius
    pub temp_c: Option<f64>,
    /// Current fan duty as a percentage
    pub fan_pct: Option<u8>,
    /// Raw duty value
    pub pwm: Option<u32>,
    /// 0=off, 1=manual, 2=auto
    pub pwm_enable: Option<u8>,
    pub rpm: Option<u32>,
}

impl GpuDevice {
    pub fn is_amd(&self) -> bool {
        self.vendor.as_deref() == Some(AMD_VENDOR_ID)
    }

    pub fn read_status(&self) -> GpuStatus {
        let pwm = read_parsed::<u32>(&self.pwm_path);
        GpuStatus {
            card: self.card.clone(),
            name: self.name.clone(),
            temp_c: self.read_temperature(),
            fan_pct: pwm.map(|raw| duty_to_percent(raw, self.pwm_max)),
            pwm,
            pwm_enable: read_parsed::<u8>(&self.pwm_enable_path),
            rpm: self.rpm_path.as_deref().and_then(read_parsed::<u32>),
        }
    }

    fn set_pwm_enable(&self, mode: u8) -> io::Result<()> {
        fs::write(&self.pwm_enable_path, format!("{mode}"))
    }
}

impl TemperatureSource for GpuDevice {
    fn read_temperature(&self) -> Option<f64> {
        self.temp_path
            .as_deref()
            .and_then(read_parsed::<i64>)
            .map(|millic| millic as f64 / 1000.0)
    }
}

impl FanSink for GpuDevice {
    /// Put the fan into manual mode and set the duty for `percent`.
    fn write_fan_speed(&self, percent: u8) -> io::Result<()> {
        self.set_pwm_enable(PWM_ENABLE_MANUAL)?;
        fs::write(
            &self.pwm_path,
            format!("{}", percent_to_duty(percent, self.pwm_max)),
        )
    }

    /// Hand the fan back to the driver's automatic control.
    fn restore_automatic(&self) -> io::Result<()> {
        self.set_pwm_enable(PWM_ENABLE_AUTO)
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Scan `/sys/class/drm` and return every GPU with a PWM fan.
pub fn discover_gpus() -> io::Result<Vec<GpuDevice>> {
    discover_gpus_in(Path::new(DRM_ROOT))
}

/// Scan a DRM class directory laid out like `/sys/class/drm`.
pub fn discover_gpus_in(drm_root: &Path) -> io::Result<Vec<GpuDevice>> {
    let mut gpus = Vec::new();

    for entry in fs::read_dir(drm_root)? {
        let entry = entry?;
        let card = entry.file_name().to_string_lossy().to_string();

        // Skip connectors such as "card0-DP-1"
        if !card.starts_with("card") || card.contains('-') {
            continue;
        }

        let device_dir = entry.path().join("device");
        let hwmon_root = device_dir.join("hwmon");
        let Ok(hwmon_entries) = fs::read_dir(&hwmon_root) else {
            continue;
        };

        for hwmon in hwmon_entries {
            let hwmon_dir = hwmon?.path();
            let pwm_path = hwmon_dir.join("pwm1");
            if !pwm_path.exists() {
                log::debug!("{card}: {} has no PWM output", hwmon_dir.display());
                continue;
            }

            gpus.push(GpuDevice {
                card: card.clone(),
                name: read_trimmed(&hwmon_dir.join("name")).unwrap_or_default(),
                vendor: read_trimmed(&device_dir.join("vendor")),
                temp_path: existing(hwmon_dir.join("temp1_input")),
                pwm_path,
                pwm_enable_path: hwmon_dir.join("pwm1_enable"),
                rpm_path: existing(hwmon_dir.join("fan1_input")),
                pwm_max: read_parsed::<u32>(&hwmon_dir.join("pwm1_max"))
                    .filter(|&max| max > 0)
                    .unwrap_or(DEFAULT_PWM_MAX),
            });
            break;
        }
    }

    gpus.sort_by(|a, b| a.card.cmp(&b.card));
    Ok(gpus)
}

/// Pick the GPU to drive: the requested card if given, otherwise the first
/// AMD card, otherwise the first card found.
pub fn select_gpu(gpus: Vec<GpuDevice>, card: Option<&str>) -> Option<GpuDevice> {
    if let Some(card) = card {
        return gpus.into_iter().find(|g| g.card == card);
    }
    match gpus.iter().position(GpuDevice::is_amd) {
        Some(idx) => gpus.into_iter().nth(idx),
        None => gpus.into_iter().next(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Scale a percentage to a duty value in `0..=pwm_max`.
pub fn percent_to_duty(percent: u8, pwm_max: u32) -> u32 {
    let pct = u64::from(percent.min(100));
    ((pct * u64::from(pwm_max) + 50) / 100) as u32
}

pub fn duty_to_percent(duty: u32, pwm_max: u32) -> u8 {
    if pwm_max == 0 {
        return 0;
    }
    let pct = (u64::from(duty.min(pwm_max)) * 100 + u64::from(pwm_max) / 2) / u64::from(pwm_max);
    pct as u8
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_parsed<T: std::str::FromStr>(path: &Path) -> Option<T> {
    read_trimmed(path).and_then(|s| s.parse::<T>().ok())
}
