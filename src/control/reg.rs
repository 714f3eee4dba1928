use super::patch::PatchedCurve;
use crate::case::RegulatorType;
use crate::error::SolveError;

/// Half-width of the regulator ratio patches, per unit.
pub const REG_PATCH_WIDTH: f64 = 0.005;

pub const RATIO_MIN: f64 = 0.9;
pub const RATIO_MAX: f64 = 1.1;

/// Smoothed ratio control `a_R = g(V_sense)` of a step-voltage regulator.
#[derive(Debug, Clone)]
pub struct RatioControl {
    curve: PatchedCurve,
}

impl RatioControl {
    pub fn new(
        v_center: f64,
        v_min: f64,
        v_max: f64,
        step: f64,
        max_taps: i32,
        device: &str,
    ) -> Result<Self, SolveError> {
        let reach = max_taps as f64 / 2.0 * step;
        let v = [v_min - reach, v_center - step, v_center + step, v_max + reach];
        let knots = [(v[0], RATIO_MIN), (v[1], 1.0), (v[2], 1.0), (v[3], RATIO_MAX)];
        Ok(Self {
            curve: PatchedCurve::new(&knots, REG_PATCH_WIDTH, device)?,
        })
    }

    /// Target ratio and its slope at sensed per-unit voltage `v`.
    pub fn eval(&self, v: f64) -> (f64, f64) {
        self.curve.eval(v)
    }

    /// True when `v` lies on one of the outer clamps.
    pub fn clamped(&self, v: f64) -> bool {
        let k = self.curve.knots();
        let w = self.curve.half_width();
        v < k[0].0 - w || v > k[k.len() - 1].0 + w
    }
}

/// Effective ratio of a tap position.
pub fn tap_ratio(kind: RegulatorType, step: f64, tap: i32) -> f64 {
    match kind {
        RegulatorType::A => 1.0 / (1.0 + step * tap as f64),
        RegulatorType::B => 1.0 - step * tap as f64,
    }
}

/// Nearest tap position of a ratio, limited to `±max_taps/2`.
pub fn nearest_tap(kind: RegulatorType, step: f64, max_taps: i32, ratio: f64) -> i32 {
    let raw = match kind {
        RegulatorType::A => (1.0 / ratio - 1.0) / step,
        RegulatorType::B => (1.0 - ratio) / step,
    };
    let lim = max_taps / 2;
    (raw.round() as i32).clamp(-lim, lim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_follows_sensed_voltage() {
        let c = RatioControl::new(1.0, 0.95, 1.05, 0.00625, 32, "reg").unwrap();
        assert_eq!(c.eval(0.5).0, RATIO_MIN);
        assert_eq!(c.eval(1.0).0, 1.0);
        assert_eq!(c.eval(1.5).0, RATIO_MAX);
        assert!(c.eval(0.92).1 > 0.0);
        assert!(c.clamped(0.8));
        assert!(!c.clamped(0.9));
    }

    #[test]
    fn narrow_band_is_a_config_error() {
        assert!(RatioControl::new(1.0, 0.99, 1.01, 0.004, 2, "reg").is_err());
    }

    #[test]
    fn taps_round_trip() {
        for kind in [RegulatorType::A, RegulatorType::B] {
            for tap in [-16, -3, 0, 7, 16] {
                let a = tap_ratio(kind, 0.00625, tap);
                assert_eq!(nearest_tap(kind, 0.00625, 32, a), tap);
            }
        }
        assert_eq!(nearest_tap(RegulatorType::B, 0.00625, 32, 0.5), 16);
    }
}
