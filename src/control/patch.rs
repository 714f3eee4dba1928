use super::polyfix::{polyfix, Fix, Poly};
use crate::error::SolveError;

/// Piecewise-linear curve with flat extensions beyond its first and last
/// knots, optionally rounded at every knot by a quadratic patch of
/// half-width `w` that matches value and slope on both sides.
#[derive(Debug, Clone)]
pub struct PatchedCurve {
    knots: Vec<(f64, f64)>,
    w: f64,
    patches: Vec<Poly>,
}

const PATCH_SAMPLES: usize = 11;

impl PatchedCurve {
    pub fn new(knots: &[(f64, f64)], w: f64, device: &str) -> Result<Self, SolveError> {
        if knots.len() < 2 {
            return Err(SolveError::config(device, "control curve needs two knots"));
        }
        for pair in knots.windows(2) {
            if pair[1].0 - pair[0].0 < 2.0 * w || pair[1].0 <= pair[0].0 {
                return Err(SolveError::config(
                    device,
                    format!(
                        "control breakpoints {:.4} and {:.4} overlap their patches",
                        pair[0].0, pair[1].0
                    ),
                ));
            }
        }

        let mut curve = Self {
            knots: knots.to_vec(),
            w,
            patches: Vec::new(),
        };
        if w > 0.0 {
            for k in 0..knots.len() {
                let (a, b) = (knots[k].0 - w, knots[k].0 + w);
                let (ml, mr) = (curve.slope_left(k), curve.slope_right(k));
                let xs: Vec<f64> = (0..PATCH_SAMPLES)
                    .map(|s| a + (b - a) * s as f64 / (PATCH_SAMPLES - 1) as f64)
                    .collect();
                let ys: Vec<f64> = xs.iter().map(|&x| curve.linear(x).0).collect();
                let fixes = [Fix::value(a, curve.linear(a).0), Fix::slope(a, ml), Fix::slope(b, mr)];
                let poly = polyfix(&xs, &ys, 2, &fixes)
                    .map_err(|e| SolveError::config(device, format!("patch fit failed: {}", e)))?;
                curve.patches.push(poly);
            }
        }
        Ok(curve)
    }

    pub fn knots(&self) -> &[(f64, f64)] {
        &self.knots
    }

    pub fn half_width(&self) -> f64 {
        self.w
    }

    fn slope(&self, seg: usize) -> f64 {
        let (x0, y0) = self.knots[seg];
        let (x1, y1) = self.knots[seg + 1];
        (y1 - y0) / (x1 - x0)
    }

    fn slope_left(&self, k: usize) -> f64 {
        if k == 0 {
            0.0
        } else {
            self.slope(k - 1)
        }
    }

    fn slope_right(&self, k: usize) -> f64 {
        if k + 1 == self.knots.len() {
            0.0
        } else {
            self.slope(k)
        }
    }

    /// Unpatched value and slope.
    pub fn linear(&self, v: f64) -> (f64, f64) {
        let n = self.knots.len();
        if v <= self.knots[0].0 {
            return (self.knots[0].1, 0.0);
        }
        if v >= self.knots[n - 1].0 {
            return (self.knots[n - 1].1, 0.0);
        }
        let seg = (0..n - 1)
            .find(|&s| v < self.knots[s + 1].0)
            .unwrap_or(n - 2);
        let m = self.slope(seg);
        (self.knots[seg].1 + m * (v - self.knots[seg].0), m)
    }

    /// Value and slope, using the patch when `v` lies inside one.
    pub fn eval(&self, v: f64) -> (f64, f64) {
        for (k, poly) in self.patches.iter().enumerate() {
            if (v - self.knots[k].0).abs() <= self.w {
                return poly.eval(v);
            }
        }
        self.linear(v)
    }
}
