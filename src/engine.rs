// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The per-tick control step.
//!
//! The daemon polls at a fixed interval. Each tick reads one temperature
//! sample from a [`TemperatureSource`], runs it through the active mode
//! (fixed speed, fan curve, or adaptive target control) and hands the
//! resulting percentage to a [`FanSink`]. Only one mode is active at a time.

use crate::controller::{AdaptiveController, ControllerSnapshot, ControllerTuning};
use crate::curve::FanCurve;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::io;

/// Where temperature samples come from.
pub trait TemperatureSource {
    /// Current temperature in °C, or `None` if it could not be read.
    fn read_temperature(&self) -> Option<f64>;
}

/// Where fan speed commands go.
pub trait FanSink {
    fn write_fan_speed(&self, percent: u8) -> io::Result<()>;
    fn restore_automatic(&self) -> io::Result<()>;
}

/// How the fan should be controlled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum FanMode {
    /// Driver/firmware control -- the engine doesn't touch the fan.
    #[default]
    #[serde(rename = "auto")]
    Auto,

    /// Fixed speed.
    #[serde(rename = "fixed")]
    Fixed { speed_pct: u8 },

    /// Follow a named curve.
    #[serde(rename = "curve")]
    Curve { curve_name: String },

    /// Hold a target temperature with the adaptive controller.
    #[serde(rename = "target")]
    Target {
        target_c: f64,
        min_pct: u8,
        max_pct: u8,
    },
}

impl std::fmt::Display for FanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanMode::Auto => write!(f, "automatic"),
            FanMode::Fixed { speed_pct } => write!(f, "fixed {speed_pct}%"),
            FanMode::Curve { curve_name } => write!(f, "curve '{curve_name}'"),
            FanMode::Target {
                target_c,
                min_pct,
                max_pct,
            } => write!(f, "target {target_c:.0}°C ({min_pct}%-{max_pct}%)"),
        }
    }
}

/// The live state behind a [`FanMode`].
#[derive(Debug, Clone)]
enum ActiveMode {
    Auto,
    Fixed(u8),
    Curve(FanCurve),
    Target(AdaptiveController),
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub temp_c: Option<f64>,
    /// Speed commanded this tick, if any.
    pub commanded_pct: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    mode: FanMode,
    active: ActiveMode,
    last_commanded: Option<u8>,
    /// Whether a fixed or automatic mode has reached the hardware.
    applied: bool,
}

impl Engine {
    /// Build the session for `mode`. A target mode always gets a fresh
    /// controller; a curve mode takes a copy of the named curve.
    pub fn new(
        mode: FanMode,
        curves: &[FanCurve],
        tuning: ControllerTuning,
    ) -> Result<Self, ConfigError> {
        let active = match &mode {
            FanMode::Auto => ActiveMode::Auto,
            FanMode::Fixed { speed_pct } => {
                if *speed_pct > 100 {
                    return Err(ConfigError::InvalidFanBounds {
                        min: *speed_pct,
                        max: *speed_pct,
                    });
                }
                ActiveMode::Fixed(*speed_pct)
            }
            FanMode::Curve { curve_name } => {
                let curve = curves
                    .iter()
                    .find(|c| c.name() == curve_name)
                    .ok_or_else(|| ConfigError::UnknownCurve(curve_name.clone()))?;
                ActiveMode::Curve(curve.clone())
            }
            FanMode::Target {
                target_c,
                min_pct,
                max_pct,
            } => ActiveMode::Target(AdaptiveController::with_tuning(
                *target_c, *min_pct, *max_pct, tuning,
            )?),
        };

        Ok(Self {
            mode,
            active,
            last_commanded: None,
            applied: false,
        })
    }

    /// Driver-controlled session; never fails to build.
    pub fn automatic() -> Self {
        Self {
            mode: FanMode::Auto,
            active: ActiveMode::Auto,
            last_commanded: None,
            applied: false,
        }
    }

    pub fn mode(&self) -> &FanMode {
        &self.mode
    }

    pub fn last_commanded(&self) -> Option<u8> {
        self.last_commanded
    }

    pub fn controller(&self) -> Option<&AdaptiveController> {
        match &self.active {
            ActiveMode::Target(c) => Some(c),
            _ => None,
        }
    }

    pub fn controller_snapshot(&self) -> Option<ControllerSnapshot> {
        self.controller().map(AdaptiveController::snapshot)
    }

    /// Apply the mode when it is first selected. If this fails for a fixed
    /// or automatic mode, [`Engine::tick`] keeps retrying it.
    pub fn activate<F: FanSink>(&mut self, sink: &F) -> io::Result<()> {
        let result = match self.active {
            ActiveMode::Auto => {
                self.last_commanded = None;
                sink.restore_automatic()
            }
            ActiveMode::Fixed(pct) => sink
                .write_fan_speed(pct)
                .map(|()| self.last_commanded = Some(pct)),
            // Curve and target modes write on their first tick.
            ActiveMode::Curve(_) | ActiveMode::Target(_) => Ok(()),
        };
        self.applied = result.is_ok();
        result
    }

    /// Run one control step. Unavailable readings command nothing, leaving
    /// the fan at its previous speed. Write failures are logged and the
    /// next tick simply tries again; this includes a fixed speed or an
    /// automatic restore that did not go through on activation.
    pub fn tick<S: TemperatureSource, F: FanSink>(&mut self, source: &S, sink: &F) -> TickReport {
        let temp_c = source.read_temperature();

        let commanded = match (&mut self.active, temp_c) {
            (ActiveMode::Auto, _) => {
                if !self.applied {
                    match sink.restore_automatic() {
                        Ok(()) => {
                            self.applied = true;
                            log::info!("Restored automatic fan control");
                        }
                        Err(e) => log::error!("Failed to restore automatic fan control: {e}"),
                    }
                }
                None
            }
            (ActiveMode::Fixed(pct), _) => (!self.applied).then_some(*pct),
            (ActiveMode::Curve(_), None) | (ActiveMode::Target(_), None) => {
                log::debug!("Temperature unavailable, holding {:?}", self.last_commanded);
                None
            }
            (ActiveMode::Curve(curve), Some(t)) => Some(curve_percent(curve.speed_for(t))),
            (ActiveMode::Target(controller), Some(t)) => Some(controller.next_fan_speed(Some(t))),
        };

        if let Some(pct) = commanded {
            match sink.write_fan_speed(pct) {
                Ok(()) => {
                    self.applied = true;
                    if self.last_commanded != Some(pct) {
                        log::debug!("Fan speed {pct}% at {:.1}°C", temp_c.unwrap_or_default());
                    }
                    self.last_commanded = Some(pct);
                }
                Err(e) => log::error!("Failed to set fan speed to {pct}%: {e}"),
            }
        }

        TickReport {
            temp_c,
            commanded_pct: commanded,
        }
    }
}

/// Curve output truncated to a whole percentage.
fn curve_percent(speed: f64) -> u8 {
    speed.clamp(0.0, 100.0).trunc() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControlMode;
    use crate::curve::default_curve;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeGpu {
        temp: Cell<Option<f64>>,
        writes: RefCell<Vec<u8>>,
        restored: Cell<bool>,
        restore_calls: Cell<u32>,
        fail_writes: Cell<bool>,
        fail_restore: Cell<bool>,
    }

    impl FakeGpu {
        fn at(temp: f64) -> Self {
            let gpu = Self::default();
            gpu.temp.set(Some(temp));
            gpu
        }
    }

    impl TemperatureSource for FakeGpu {
        fn read_temperature(&self) -> Option<f64> {
            self.temp.get()
        }
    }

    impl FanSink for FakeGpu {
        fn write_fan_speed(&self, percent: u8) -> io::Result<()> {
            if self.fail_writes.get() {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.writes.borrow_mut().push(percent);
            Ok(())
        }

        fn restore_automatic(&self) -> io::Result<()> {
            self.restore_calls.set(self.restore_calls.get() + 1);
            if self.fail_restore.get() {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.restored.set(true);
            Ok(())
        }
    }

    fn engine(mode: FanMode) -> Engine {
        Engine::new(mode, &[default_curve()], ControllerTuning::default()).unwrap()
    }

    #[test]
    fn test_auto_restores_and_never_writes() {
        let gpu = FakeGpu::at(85.0);
        let mut e = engine(FanMode::Auto);
        e.activate(&gpu).unwrap();
        assert!(gpu.restored.get());

        let report = e.tick(&gpu, &gpu);
        assert_eq!(report.temp_c, Some(85.0));
        assert_eq!(report.commanded_pct, None);
        assert!(gpu.writes.borrow().is_empty());
    }

    #[test]
    fn test_fixed_writes_once_on_activation() {
        let gpu = FakeGpu::at(60.0);
        let mut e = engine(FanMode::Fixed { speed_pct: 55 });
        e.activate(&gpu).unwrap();
        e.tick(&gpu, &gpu);
        assert_eq!(*gpu.writes.borrow(), vec![55]);
        assert_eq!(e.last_commanded(), Some(55));
    }

    #[test]
    fn test_fixed_retries_after_failed_activation() {
        let gpu = FakeGpu::at(60.0);
        gpu.fail_writes.set(true);
        let mut e = engine(FanMode::Fixed { speed_pct: 80 });
        assert!(e.activate(&gpu).is_err());
        assert_eq!(e.last_commanded(), None);

        // Still failing: keeps trying each tick.
        assert_eq!(e.tick(&gpu, &gpu).commanded_pct, Some(80));
        assert_eq!(e.last_commanded(), None);

        gpu.fail_writes.set(false);
        for _ in 0..3 {
            e.tick(&gpu, &gpu);
        }
        assert_eq!(*gpu.writes.borrow(), vec![80]);
        assert_eq!(e.last_commanded(), Some(80));
    }

    #[test]
    fn test_auto_retries_after_failed_restore() {
        let gpu = FakeGpu::at(60.0);
        gpu.fail_restore.set(true);
        let mut e = engine(FanMode::Auto);
        assert!(e.activate(&gpu).is_err());
        e.tick(&gpu, &gpu);
        assert_eq!(gpu.restore_calls.get(), 2);

        gpu.fail_restore.set(false);
        e.tick(&gpu, &gpu);
        e.tick(&gpu, &gpu);
        assert!(gpu.restored.get());
        assert_eq!(gpu.restore_calls.get(), 3);
        assert!(gpu.writes.borrow().is_empty());
    }

    #[test]
    fn test_fixed_rejects_over_100() {
        let err = Engine::new(
            FanMode::Fixed { speed_pct: 120 },
            &[],
            ControllerTuning::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_curve_mode_follows_temperature() {
        let gpu = FakeGpu::at(60.0);
        let mut e = engine(FanMode::Curve {
            curve_name: "Default".to_string(),
        });
        assert_eq!(e.tick(&gpu, &gpu).commanded_pct, Some(50));

        gpu.temp.set(Some(75.5));
        assert_eq!(e.tick(&gpu, &gpu).commanded_pct, Some(71));
        assert_eq!(*gpu.writes.borrow(), vec![50, 71]);
    }

    #[test]
    fn test_unknown_curve_is_config_error() {
        let err = Engine::new(
            FanMode::Curve {
                curve_name: "missing".to_string(),
            },
            &[default_curve()],
            ControllerTuning::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownCurve("missing".to_string()));
    }

    #[test]
    fn test_unavailable_reading_holds_speed() {
        let gpu = FakeGpu::at(80.0);
        let mut e = engine(FanMode::Target {
            target_c: 70.0,
            min_pct: 30,
            max_pct: 100,
        });
        assert_eq!(e.tick(&gpu, &gpu).commanded_pct, Some(55));
        let before = e.controller_snapshot();

        gpu.temp.set(None);
        let report = e.tick(&gpu, &gpu);
        assert_eq!(report.commanded_pct, None);
        assert_eq!(e.controller_snapshot(), before);
        assert_eq!(e.last_commanded(), Some(55));
        assert_eq!(gpu.writes.borrow().len(), 1);
    }

    #[test]
    fn test_target_mode_drives_controller() {
        let gpu = FakeGpu::at(80.0);
        let mut e = engine(FanMode::Target {
            target_c: 70.0,
            min_pct: 30,
            max_pct: 90,
        });
        for _ in 0..5 {
            e.tick(&gpu, &gpu);
        }
        assert_eq!(*gpu.writes.borrow(), vec![55, 80, 90, 90, 90]);
        assert_eq!(e.controller().unwrap().mode(), ControlMode::Aggressive);
    }

    #[test]
    fn test_write_failure_keeps_previous_command() {
        let gpu = FakeGpu::at(60.0);
        let mut e = engine(FanMode::Curve {
            curve_name: "Default".to_string(),
        });
        e.tick(&gpu, &gpu);

        gpu.fail_writes.set(true);
        gpu.temp.set(Some(90.0));
        let report = e.tick(&gpu, &gpu);
        assert_eq!(report.commanded_pct, Some(100));
        assert_eq!(e.last_commanded(), Some(50));
    }

    #[test]
    fn test_mode_serde_shape() {
        let mode: FanMode =
            toml::from_str("mode = \"target\"\ntarget_c = 65.0\nmin_pct = 30\nmax_pct = 100")
                .unwrap();
        assert_eq!(
            mode,
            FanMode::Target {
                target_c: 65.0,
                min_pct: 30,
                max_pct: 100
            }
        );
        assert_eq!(mode.to_string(), "target 65°C (30%-100%)");
    }
}
