use anyhow::{bail, Result};

/// Natural cubic spline through strictly increasing knots.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots; zero at both ends.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn natural(x: &[f64], y: &[f64]) -> Result<Self> {
        let n = x.len();
        if n < 2 || y.len() != n {
            bail!("spline needs at least two knots with matching values");
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            bail!("spline knots must be strictly increasing");
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut m = vec![0.0; n];
        if n > 2 {
            // tridiagonal system for the interior second derivatives
            let k = n - 2;
            let mut diag = vec![0.0; k];
            let mut upper = vec![0.0; k];
            let mut lower = vec![0.0; k];
            let mut rhs = vec![0.0; k];
            for i in 0..k {
                diag[i] = 2.0 * (h[i] + h[i + 1]);
                if i + 1 < k {
                    upper[i] = h[i + 1];
                }
                if i > 0 {
                    lower[i] = h[i];
                }
                rhs[i] = 6.0 * ((y[i + 2] - y[i + 1]) / h[i + 1] - (y[i + 1] - y[i]) / h[i]);
            }
            // Thomas algorithm
            for i in 1..k {
                let w = lower[i] / diag[i - 1];
                diag[i] -= w * upper[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for i in (0..k - 1).rev() {
                m[i + 1] = (rhs[i] - upper[i] * m[i + 2]) / diag[i];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    pub fn lo(&self) -> f64 {
        self.x[0]
    }

    pub fn hi(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    /// Value and slope at `v`; the end cubics are extended outside the knots.
    pub fn eval(&self, v: f64) -> (f64, f64) {
        let n = self.x.len();
        let i = match self.x[1..n - 1].iter().position(|&k| v < k) {
            Some(p) => p,
            None => n - 2,
        };
        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let (y0, y1) = (self.y[i], self.y[i + 1]);
        let (m0, m1) = (self.m[i], self.m[i + 1]);
        let h = x1 - x0;
        let a = x1 - v;
        let b = v - x0;

        let y = m0 * a.powi(3) / (6.0 * h)
            + m1 * b.powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * a
            + (y1 / h - m1 * h / 6.0) * b;
        let dy = -m0 * a * a / (2.0 * h) + m1 * b * b / (2.0 * h) - (y0 / h - m0 * h / 6.0)
            + (y1 / h - m1 * h / 6.0);
        (y, dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_knots() {
        let x = [0.0, 1.0, 2.5, 3.0];
        let y = [1.0, -1.0, 0.5, 2.0];
        let s = CubicSpline::natural(&x, &y).unwrap();
        for (xk, yk) in x.iter().zip(&y) {
            assert!((s.eval(*xk).0 - yk).abs() < 1e-12);
        }
    }

    #[test]
    fn reproduces_straight_line() {
        let s = CubicSpline::natural(&[0.0, 0.3, 0.7, 1.0], &[1.0, 1.6, 2.4, 3.0]).unwrap();
        let (y, dy) = s.eval(0.55);
        assert!((y - 2.1).abs() < 1e-12);
        assert!((dy - 2.0).abs() < 1e-12);
    }

    #[test]
    fn slope_is_continuous_at_knots() {
        let s = CubicSpline::natural(&[0.0, 1.0, 2.0, 3.0], &[0.0, 1.0, 0.0, 1.0]).unwrap();
        let eps = 1e-9;
        for k in [1.0, 2.0] {
            let (_, dl) = s.eval(k - eps);
            let (_, dr) = s.eval(k + eps);
            assert!((dl - dr).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_unsorted_knots() {
        assert!(CubicSpline::natural(&[0.0, 0.0, 1.0], &[0.0, 1.0, 2.0]).is_err());
    }
}
