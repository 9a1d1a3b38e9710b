// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps a temperature reading to a fan speed percentage (0-100).
//! Points are linearly interpolated between defined thresholds and clamped
//! to the first/last point outside the curve's domain.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Speed returned if no bracketing segment is found. Unreachable for a
/// curve built through [`FanCurve::new`].
pub const FALLBACK_SPEED_PCT: f64 = 50.0;

/// Highest temperature a user-edited curve may reference.
pub const MAX_CURVE_TEMP_C: f64 = 110.0;

/// A single point on a fan curve.
///
/// Persisted as a two element array `[temp_c, fan_pct]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct ControlPoint {
    /// Temperature in degrees Celsius
    pub temp_c: f64,
    /// Fan speed in percent (0-100)
    pub fan_pct: f64,
}

impl ControlPoint {
    pub fn new(temp_c: f64, fan_pct: f64) -> Self {
        Self { temp_c, fan_pct }
    }
}

impl From<(f64, f64)> for ControlPoint {
    fn from((temp_c, fan_pct): (f64, f64)) -> Self {
        Self { temp_c, fan_pct }
    }
}

impl From<ControlPoint> for (f64, f64) {
    fn from(p: ControlPoint) -> Self {
        (p.temp_c, p.fan_pct)
    }
}

/// A named fan curve with an ordered list of temperature-to-speed points.
///
/// Curves are immutable once built. Editing a curve means building a new one
/// and replacing the old value, so the sort order can never be invalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveRecord", into = "CurveRecord")]
pub struct FanCurve {
    name: String,
    points: Vec<ControlPoint>,
}

/// On-disk / on-wire shape of a curve: `{"name": ..., "points": [[t, f], ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurveRecord {
    #[serde(default = "default_loaded_name")]
    name: String,
    points: Vec<ControlPoint>,
}

impl TryFrom<CurveRecord> for FanCurve {
    type Error = ConfigError;

    fn try_from(record: CurveRecord) -> Result<Self, Self::Error> {
        FanCurve::new(record.name, record.points)
    }
}

impl From<FanCurve> for CurveRecord {
    fn from(curve: FanCurve) -> Self {
        Self {
            name: curve.name,
            points: curve.points,
        }
    }
}

impl FanCurve {
    /// Build a curve. Points are sorted by temperature; duplicate
    /// temperatures are kept as given (see [`FanCurve::validate`]).
    pub fn new(name: impl Into<String>, mut points: Vec<ControlPoint>) -> Result<Self, ConfigError> {
        if points.len() < 2 {
            return Err(ConfigError::TooFewPoints {
                count: points.len(),
            });
        }
        if let Some(index) = points
            .iter()
            .position(|p| !p.temp_c.is_finite() || !p.fan_pct.is_finite())
        {
            return Err(ConfigError::NonFinitePoint { index });
        }

        points.sort_by(|a, b| a.temp_c.total_cmp(&b.temp_c));
        Ok(Self {
            name: name.into(),
            points,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points in ascending temperature order.
    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    /// Fan speed (percent) for a given temperature.
    ///
    /// - At or below the lowest point: returns the lowest point's speed
    /// - At or above the highest point: returns the highest point's speed
    /// - Between two points: linear interpolation
    pub fn speed_for(&self, temp_c: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return FALLBACK_SPEED_PCT,
        };
        if temp_c <= first.temp_c {
            return first.fan_pct;
        }
        if temp_c >= last.temp_c {
            return last.fan_pct;
        }

        for window in self.points.windows(2) {
            let (lo, hi) = (&window[0], &window[1]);

            if lo.temp_c <= temp_c && temp_c <= hi.temp_c {
                let range_t = hi.temp_c - lo.temp_c;
                if range_t == 0.0 {
                    return lo.fan_pct;
                }
                let frac = (temp_c - lo.temp_c) / range_t;
                return lo.fan_pct + frac * (hi.fan_pct - lo.fan_pct);
            }
        }

        FALLBACK_SPEED_PCT
    }

    /// Strict checks applied to user-edited curves before they are accepted:
    /// temperatures within 0-110°C, speeds within 0-100%, and no two points
    /// sharing a temperature.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, p) in self.points.iter().enumerate() {
            if !(0.0..=MAX_CURVE_TEMP_C).contains(&p.temp_c) || !(0.0..=100.0).contains(&p.fan_pct) {
                return Err(ConfigError::PointOutOfRange {
                    index,
                    temp_c: p.temp_c,
                    fan_pct: p.fan_pct,
                });
            }
            if index > 0 && p.temp_c <= self.points[index - 1].temp_c {
                return Err(ConfigError::UnorderedPoints { index });
            }
        }
        Ok(())
    }
}

fn default_loaded_name() -> String {
    "Loaded".to_string()
}

fn preset(name: &str, points: &[(f64, f64)]) -> FanCurve {
    FanCurve {
        name: name.to_string(),
        points: points.iter().copied().map(ControlPoint::from).collect(),
    }
}

/// The stock curve used when nothing has been saved yet.
pub fn default_curve() -> FanCurve {
    preset(
        "Default",
        &[(30.0, 30.0), (50.0, 40.0), (70.0, 60.0), (80.0, 80.0), (90.0, 100.0)],
    )
}

/// A quiet curve: low speed until 50C, ramp up to full at 90C.
pub fn default_silent_curve() -> FanCurve {
    preset(
        "silent",
        &[(30.0, 20.0), (50.0, 25.0), (70.0, 60.0), (80.0, 80.0), (90.0, 100.0)],
    )
}

/// Always some airflow, aggressive ramp.
pub fn default_performance_curve() -> FanCurve {
    preset(
        "performance",
        &[(30.0, 35.0), (50.0, 50.0), (65.0, 80.0), (75.0, 100.0)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(raw: &[(f64, f64)]) -> Vec<ControlPoint> {
        raw.iter().copied().map(ControlPoint::from).collect()
    }

    #[test]
    fn test_clamps_below_range() {
        let curve = default_curve();
        assert_eq!(curve.speed_for(29.0), 30.0);
        assert_eq!(curve.speed_for(-40.0), 30.0);
        assert_eq!(curve.speed_for(30.0), 30.0);
    }

    #[test]
    fn test_clamps_above_range() {
        let curve = default_curve();
        assert_eq!(curve.speed_for(95.0), 100.0);
        assert_eq!(curve.speed_for(90.0), 100.0);
    }

    #[test]
    fn test_exact_point() {
        let curve = default_curve();
        assert_eq!(curve.speed_for(50.0), 40.0);
        assert_eq!(curve.speed_for(80.0), 80.0);
    }

    #[test]
    fn test_segment_midpoint() {
        let curve = default_curve();
        assert_eq!(curve.speed_for(60.0), 50.0);
        assert_eq!(curve.speed_for(85.0), 90.0);
    }

    #[test]
    fn test_monotonic_over_domain() {
        let curve = default_curve();
        let mut prev = curve.speed_for(0.0);
        let mut t = 0.0;
        while t <= 120.0 {
            let s = curve.speed_for(t);
            assert!(s >= prev, "speed dropped at {t}: {s} < {prev}");
            prev = s;
            t += 0.25;
        }
    }

    #[test]
    fn test_points_sorted_on_construction() {
        let curve = FanCurve::new(
            "unsorted",
            points(&[(80.0, 90.0), (40.0, 30.0), (60.0, 50.0)]),
        )
        .unwrap();
        let temps: Vec<f64> = curve.points().iter().map(|p| p.temp_c).collect();
        assert_eq!(temps, vec![40.0, 60.0, 80.0]);
        assert_eq!(curve.speed_for(70.0), 70.0);
    }

    #[test]
    fn test_too_few_points_rejected() {
        let err = FanCurve::new("bad", points(&[(50.0, 50.0)])).unwrap_err();
        assert_eq!(err, ConfigError::TooFewPoints { count: 1 });
        assert!(FanCurve::new("empty", Vec::new()).is_err());
    }

    #[test]
    fn test_non_finite_point_rejected() {
        let err = FanCurve::new("nan", points(&[(30.0, 30.0), (f64::NAN, 50.0)])).unwrap_err();
        assert_eq!(err, ConfigError::NonFinitePoint { index: 1 });
    }

    #[test]
    fn test_duplicates_kept_but_fail_validation() {
        let curve = FanCurve::new(
            "dup",
            points(&[(30.0, 30.0), (50.0, 40.0), (50.0, 60.0), (90.0, 100.0)]),
        )
        .unwrap();
        assert_eq!(curve.points().len(), 4);
        assert_eq!(curve.validate(), Err(ConfigError::UnorderedPoints { index: 2 }));
    }

    #[test]
    fn test_validation_ranges() {
        assert!(default_curve().validate().is_ok());
        assert!(default_silent_curve().validate().is_ok());
        assert!(default_performance_curve().validate().is_ok());

        let hot = FanCurve::new("hot", points(&[(30.0, 30.0), (120.0, 100.0)])).unwrap();
        assert!(matches!(
            hot.validate(),
            Err(ConfigError::PointOutOfRange { index: 1, .. })
        ));

        let loud = FanCurve::new("loud", points(&[(30.0, 30.0), (90.0, 120.0)])).unwrap();
        assert!(loud.validate().is_err());
    }

    #[test]
    fn test_json_shape_round_trip() {
        let curve = default_curve();
        let json = serde_json::to_string(&curve).unwrap();
        assert!(json.starts_with(r#"{"name":"Default","points":[[30.0,30.0],"#));

        let back: FanCurve = serde_json::from_str(&json).unwrap();
        assert_eq!(back, curve);
    }

    #[test]
    fn test_deserialize_validates_and_sorts() {
        let curve: FanCurve =
            serde_json::from_str(r#"{"points": [[70, 60], [30, 30]]}"#).unwrap();
        assert_eq!(curve.name(), "Loaded");
        assert_eq!(curve.points()[0], ControlPoint::new(30.0, 30.0));

        let short = serde_json::from_str::<FanCurve>(r#"{"name": "x", "points": [[70, 60]]}"#);
        assert!(short.is_err());
    }
}
