use crate::linsolve::dense_solve;

use anyhow::{bail, Result};

/// Point constraint on a fitted polynomial: the `deriv`-th derivative at `x`
/// must equal `value`.
#[derive(Debug, Clone, Copy)]
pub struct Fix {
    pub x: f64,
    pub deriv: usize,
    pub value: f64,
}

impl Fix {
    pub fn value(x: f64, value: f64) -> Self {
        Fix { x, deriv: 0, value }
    }

    pub fn slope(x: f64, value: f64) -> Self {
        Fix { x, deriv: 1, value }
    }
}

/// Polynomial in the shifted variable `u = x − origin`, coefficients in
/// ascending powers.
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    pub origin: f64,
    pub coeffs: Vec<f64>,
}

impl Poly {
    /// Value and first derivative at `x`.
    pub fn eval(&self, x: f64) -> (f64, f64) {
        let u = x - self.origin;
        let mut y = 0.0;
        let mut dy = 0.0;
        for (k, &c) in self.coeffs.iter().enumerate().rev() {
            y = y * u + c;
            if k > 0 {
                dy = dy * u + k as f64 * c;
            }
        }
        (y, dy)
    }
}

/// Least-squares polynomial fit of degree `n` through `(x, y)` subject to
/// exact value and derivative constraints.
///
/// The constrained problem `min ‖A·c − y‖²  s.t.  C·c = d` is solved through
/// its KKT system
///
/// ```text
/// | 2AᵀA  Cᵀ | |c|   |2Aᵀy|
/// |  C    0  | |λ| = | d  |
/// ```
///
/// With as many independent constraints as coefficients the fit reduces to
/// interpolation of the constraints.
pub fn polyfix(x: &[f64], y: &[f64], n: usize, fixes: &[Fix]) -> Result<Poly> {
    if x.len() != y.len() {
        bail!("polyfix: {} abscissae but {} ordinates", x.len(), y.len());
    }
    let m = n + 1;
    if fixes.len() > m {
        bail!("polyfix: {} constraints for {} coefficients", fixes.len(), m);
    }
    let origin = fixes.first().map(|f| f.x).or_else(|| x.first().copied()).unwrap_or(0.0);

    let size = m + fixes.len();
    let mut kkt = vec![vec![0.0; size]; size];
    let mut rhs = vec![0.0; size];

    for (&xk, &yk) in x.iter().zip(y) {
        let row = powers_row(xk - origin, m, 0);
        for i in 0..m {
            for j in 0..m {
                kkt[i][j] += 2.0 * row[i] * row[j];
            }
            rhs[i] += 2.0 * row[i] * yk;
        }
    }
    for (k, fix) in fixes.iter().enumerate() {
        let row = powers_row(fix.x - origin, m, fix.deriv);
        for j in 0..m {
            kkt[m + k][j] = row[j];
            kkt[j][m + k] = row[j];
        }
        rhs[m + k] = fix.value;
    }

    let sol = dense_solve(&kkt, &rhs)?;
    Ok(Poly {
        origin,
        coeffs: sol[..m].to_vec(),
    })
}

// d-th derivative of [1, u, u², ...] at u
fn powers_row(u: f64, m: usize, d: usize) -> Vec<f64> {
    (0..m)
        .map(|k| {
            if k < d {
                return 0.0;
            }
            let falling: f64 = (0..d).map(|i| (k - i) as f64).product();
            falling * u.powi((k - d) as i32)
        })
        .collect()
}
