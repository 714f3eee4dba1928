use super::patch::PatchedCurve;
use super::spline::CubicSpline;
use crate::ecfopt::QvControl;
use crate::error::SolveError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-width of the quadratic patches, per unit.
pub const QV_PATCH_WIDTH: f64 = 0.0005;
/// Width of the spline shoulder inside each transition region, per unit.
const SPLINE_SHOULDER: f64 = 0.008;
/// Fraction of `Q_max` placed at the spline shoulders.
const SPLINE_MID: f64 = 0.1;

/// Operating region of a Q-V controlled inverter.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum QvRegion {
    /// Low voltage, full reactive injection.
    ClampHigh,
    Region12,
    Deadband,
    Region34,
    /// High voltage, full reactive absorption.
    ClampLow,
}

impl fmt::Display for QvRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QvRegion::ClampHigh => "Qmax",
            QvRegion::Region12 => "Region 1-2",
            QvRegion::Deadband => "Zero",
            QvRegion::Region34 => "Region 3-4",
            QvRegion::ClampLow => "Qmin",
        };
        write!(f, "{}", s)
    }
}

/// Breakpoints `V1..V4` in per unit for a voltage set point.
pub fn setpoint_profile(vset: f64) -> [f64; 4] {
    const PROFILES: [(f64, f64, [f64; 4]); 15] = [
        (0.995, 1.005, [0.98, 0.995, 1.005, 1.02]),
        (1.005, 1.015, [0.99, 1.005, 1.015, 1.03]),
        (1.01, 1.02, [0.995, 1.01, 1.02, 1.035]),
        (1.015, 1.025, [1.0, 1.015, 1.025, 1.04]),
        (1.02, 1.03, [1.005, 1.02, 1.03, 1.045]),
        (1.025, 1.035, [1.01, 1.025, 1.035, 1.05]),
        (1.03, 1.04, [1.015, 1.03, 1.04, 1.055]),
        (1.035, 1.045, [1.02, 1.035, 1.045, 1.06]),
        (1.05, 1.06, [1.035, 1.05, 1.06, 1.075]),
        (1.065, 1.075, [1.05, 1.065, 1.075, 1.09]),
        (1.08, 1.09, [1.065, 1.08, 1.09, 1.15]),
        (0.98, 0.99, [0.965, 0.98, 0.99, 1.005]),
        (0.985, 0.995, [0.97, 0.985, 0.995, 1.01]),
        (0.965, 0.975, [0.95, 0.965, 0.975, 0.99]),
        (1.045, 1.055, [1.03, 1.045, 1.055, 1.07]),
    ];
    for (lo, hi, v) in PROFILES {
        if lo < vset && vset < hi {
            return v;
        }
    }
    let v2 = vset - 0.005;
    let v3 = vset + 0.005;
    [v2 - 0.015, v2, v3, v3 + 0.015]
}

/// Reactive power as a function of sensed per-unit voltage.
#[derive(Debug, Clone)]
pub enum QvCurve {
    Patching(PatchedCurve),
    Spline {
        v: [f64; 4],
        q_max: f64,
        q_min: f64,
        r12: CubicSpline,
        r34: CubicSpline,
    },
    Loop(PatchedCurve),
}

impl QvCurve {
    pub fn new(
        kind: QvControl,
        v: [f64; 4],
        q_max: f64,
        q_min: f64,
        device: &str,
    ) -> Result<Self, SolveError> {
        let knots = [(v[0], q_max), (v[1], 0.0), (v[2], 0.0), (v[3], q_min)];
        Ok(match kind {
            QvControl::Patching => QvCurve::Patching(PatchedCurve::new(&knots, QV_PATCH_WIDTH, device)?),
            QvControl::Loop => QvCurve::Loop(PatchedCurve::new(&knots, 0.0, device)?),
            QvControl::Spline => {
                let sh = SPLINE_SHOULDER / 2.0;
                let q_mid = SPLINE_MID * q_max;
                let fit = |x: [f64; 4], y: [f64; 4]| {
                    CubicSpline::natural(&x, &y)
                        .map_err(|e| SolveError::config(device, format!("Q-V spline: {}", e)))
                };
                QvCurve::Spline {
                    v,
                    q_max,
                    q_min,
                    r12: fit(
                        [v[0], v[0] + sh, v[1] - sh, v[1]],
                        [q_max, q_max - q_mid, q_mid, 0.0],
                    )?,
                    r34: fit(
                        [v[2], v[2] + sh, v[3] - sh, v[3]],
                        [0.0, -q_mid, q_min + q_mid, q_min],
                    )?,
                }
            }
        })
    }

    fn breakpoints(&self) -> ([f64; 4], f64) {
        match self {
            QvCurve::Patching(c) | QvCurve::Loop(c) => {
                let k = c.knots();
                ([k[0].0, k[1].0, k[2].0, k[3].0], c.half_width())
            }
            QvCurve::Spline { v, .. } => (*v, 0.0),
        }
    }

    /// Region containing `v`. Patches belong to the adjacent transition region.
    pub fn region(&self, v: f64) -> QvRegion {
        let ([v1, v2, v3, v4], w) = self.breakpoints();
        if v < v1 - w {
            QvRegion::ClampHigh
        } else if v <= v2 + w {
            QvRegion::Region12
        } else if v < v3 - w {
            QvRegion::Deadband
        } else if v <= v4 + w {
            QvRegion::Region34
        } else {
            QvRegion::ClampLow
        }
    }

    /// `Q`, `dQ/dV` and the region at per-unit voltage `v`.
    pub fn evaluate(&self, v: f64) -> (f64, f64, QvRegion) {
        let region = self.region(v);
        let (q, dq) = match self {
            QvCurve::Patching(c) | QvCurve::Loop(c) => c.eval(v),
            QvCurve::Spline {
                q_max,
                q_min,
                r12,
                r34,
                ..
            } => match region {
                QvRegion::ClampHigh => (*q_max, 0.0),
                QvRegion::Region12 => r12.eval(v),
                QvRegion::Deadband => (0.0, 0.0),
                QvRegion::Region34 => r34.eval(v),
                QvRegion::ClampLow => (*q_min, 0.0),
            },
        };
        (q, dq, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_table_and_fallback() {
        assert_eq!(setpoint_profile(1.0), [0.98, 0.995, 1.005, 1.02]);
        assert_eq!(setpoint_profile(1.01), [0.99, 1.005, 1.015, 1.03]);
        let v = setpoint_profile(0.9);
        assert!((v[1] - 0.895).abs() < 1e-12);
        assert!((v[0] - 0.88).abs() < 1e-12);
        assert!((v[3] - 0.92).abs() < 1e-12);
    }

    #[test]
    fn patched_curve_regions() {
        let c = QvCurve::new(QvControl::Patching, setpoint_profile(1.0), 500.0, -500.0, "pv")
            .unwrap();
        let (q, _, r) = c.evaluate(0.9);
        assert_eq!((q, r), (500.0, QvRegion::ClampHigh));
        let (q, _, r) = c.evaluate(1.0);
        assert_eq!((q, r), (0.0, QvRegion::Deadband));
        let (q, dq, r) = c.evaluate(1.01);
        assert_eq!(r, QvRegion::Region34);
        assert!(q < 0.0 && q > -500.0);
        assert!(dq < 0.0);
        let (q, _, r) = c.evaluate(1.1);
        assert_eq!((q, r), (-500.0, QvRegion::ClampLow));
    }

    #[test]
    fn patch_edges_are_in_transition_regions() {
        let c = QvCurve::new(QvControl::Patching, [0.98, 0.995, 1.005, 1.02], 1.0, -1.0, "pv")
            .unwrap();
        assert_eq!(c.region(0.98 - 0.0004), QvRegion::Region12);
        assert_eq!(c.region(1.02 + 0.0004), QvRegion::Region34);
        assert_eq!(c.region(1.02 + 0.0006), QvRegion::ClampLow);
    }

    #[test]
    fn spline_hits_plateaus_at_breakpoints() {
        let v = [0.98, 0.995, 1.005, 1.02];
        let c = QvCurve::new(QvControl::Spline, v, 200.0, -200.0, "pv").unwrap();
        assert!((c.evaluate(0.98).0 - 200.0).abs() < 1e-9);
        assert!(c.evaluate(0.995).0.abs() < 1e-9);
        assert!((c.evaluate(1.02).0 + 200.0).abs() < 1e-9);
    }

    #[test]
    fn loop_curve_has_kinks() {
        let c = QvCurve::new(QvControl::Loop, [0.98, 0.995, 1.005, 1.02], 150.0, -150.0, "pv")
            .unwrap();
        let (_, d_in, _) = c.evaluate(0.99);
        assert!((d_in + 150.0 / 0.015).abs() < 1e-6);
        assert_eq!(c.evaluate(0.97).1, 0.0);
    }
}
