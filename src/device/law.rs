//! Local current laws and their Taylor stamps.
//!
//! A nonlinear device contributes a current `I(x)` over a handful of local
//! unknowns to one or more KCL row pairs. [`stamp_law`] writes the first-order
//! expansion of that current and, in dual mode, the linearized stationarity
//! terms `Σ λ·∂I/∂x` of every local unknown.

use crate::triplet::Triplets;
use num_complex::Complex64;

/// Value, gradient and Hessian of a two-component (real, imaginary) current
/// over `N` local unknowns.
#[derive(Debug, Clone, Copy)]
pub struct CurrentLaw<const N: usize> {
    pub value: [f64; 2],
    pub grad: [[f64; N]; 2],
    pub hess: [[[f64; N]; N]; 2],
}

impl<const N: usize> Default for CurrentLaw<N> {
    fn default() -> Self {
        Self {
            value: [0.0; 2],
            grad: [[0.0; N]; 2],
            hess: [[[0.0; N]; N]; 2],
        }
    }
}

/// A KCL row pair receiving `sign · I`, with the multipliers of those rows.
#[derive(Debug, Clone, Copy)]
pub struct Port {
    pub r: usize,
    pub i: usize,
    pub sign: f64,
    pub dual: Option<(usize, usize)>,
}

impl Port {
    pub fn new(r: usize, i: usize, sign: f64, dual: Option<(usize, usize)>) -> Self {
        Self { r, i, sign, dual }
    }
}

/// Entries written by [`stamp_law`] at most: `(y, j)`.
pub const fn law_nnz(n: usize, ports: usize, stat: usize) -> (usize, usize) {
    (ports * 2 * n + stat * (ports * 2 + n), ports * 2 + stat)
}

/// Stamps `sign·I(x)` into every port and the stationarity rows `stat`.
///
/// Primal rows get `∂I/∂x_j` and `Σ_j ∂I/∂x_j·x_j − I(x)`. The stationarity
/// row of unknown `x_j` gets `∂I/∂x_j` in the multiplier columns and
/// `Σ λ·∂²I/∂x_j∂x_l` in the unknown columns; the right-hand side keeps only
/// the Hessian part because the multiplier terms cancel.
pub fn stamp_law<const N: usize>(
    t: &mut Triplets,
    x: &[f64],
    law: &CurrentLaw<N>,
    vars: &[usize; N],
    ports: &[Port],
    stat: &[Option<usize>; N],
) {
    for port in ports {
        for (k, row) in [port.r, port.i].into_iter().enumerate() {
            let mut hist = 0.0;
            for j in 0..N {
                let d = port.sign * law.grad[k][j];
                t.stamp_y(row, vars[j], d);
                hist += d * x[vars[j]];
            }
            t.stamp_j(row, hist - port.sign * law.value[k]);
        }
    }

    for j in 0..N {
        let s = match stat[j] {
            Some(s) => s,
            None => continue,
        };
        let mut h = [0.0; N];
        for port in ports {
            let (lr, li) = match port.dual {
                Some(d) => d,
                None => continue,
            };
            t.stamp_y(s, lr, port.sign * law.grad[0][j]);
            t.stamp_y(s, li, port.sign * law.grad[1][j]);
            let (lam_r, lam_i) = (x[lr], x[li]);
            for l in 0..N {
                h[l] += port.sign * (lam_r * law.hess[0][j][l] + lam_i * law.hess[1][j][l]);
            }
        }
        let mut hist = 0.0;
        for l in 0..N {
            t.stamp_y(s, vars[l], h[l]);
            hist += h[l] * x[vars[l]];
        }
        t.stamp_j(s, hist);
    }
}

/// Complementary slackness `μ·s = cs_tol` for the affine slack
/// `s = dir·(x − bound)`, stamped as `−μ·s + cs_tol = 0` at row `mu`.
pub fn stamp_complementarity(
    t: &mut Triplets,
    x: &[f64],
    mu: usize,
    var: usize,
    bound: f64,
    dir: f64,
    cs_tol: f64,
) {
    let s = dir * (x[var] - bound);
    t.stamp_y(mu, mu, -s);
    t.stamp_y(mu, var, -x[mu] * dir);
    t.stamp_j(mu, -x[mu] * dir * x[var] - cs_tol);
}

pub const COMPLEMENTARITY_NNZ: (usize, usize) = (2, 1);

/// Real-coordinate Jacobian of `conj(g(v))` for holomorphic `g` with
/// derivative `dg`: rows are (real, imag), columns (vr, vi).
pub fn conj_jacobian(dg: Complex64) -> [[f64; 2]; 2] {
    [[dg.re, -dg.im], [-dg.im, -dg.re]]
}

/// Constant-power current `I = conj(S/v)` over `(vr, vi)`.
///
/// `|v| = 0` yields a zero current with zero derivatives.
pub fn pq_law(p: f64, q: f64, vr: f64, vi: f64) -> CurrentLaw<2> {
    let v = Complex64::new(vr, vi);
    if v.norm_sqr() == 0.0 {
        return CurrentLaw::default();
    }
    let s = Complex64::new(p, q);
    let i = (s / v).conj();
    let dg = -s / (v * v);
    let d2g = 2.0 * s / (v * v * v);

    CurrentLaw {
        value: [i.re, i.im],
        grad: conj_jacobian(dg),
        hess: conj_hessian(d2g),
    }
}

/// Constant-power current with `P` and `Q` as unknowns: `(vr, vi, P, Q)`.
pub fn pq_law_var(p: f64, q: f64, vr: f64, vi: f64) -> CurrentLaw<4> {
    let base = pq_law(p, q, vr, vi);
    let v = Complex64::new(vr, vi);
    if v.norm_sqr() == 0.0 {
        return CurrentLaw::default();
    }
    let mut law = CurrentLaw::<4>::default();
    law.value = base.value;
    for k in 0..2 {
        for a in 0..2 {
            law.grad[k][a] = base.grad[k][a];
            for b in 0..2 {
                law.hess[k][a][b] = base.hess[k][a][b];
            }
        }
    }
    // dI/dP = conj(1/v), dI/dQ = conj(j/v)
    let kp = Complex64::new(1.0, 0.0) / v;
    let kq = Complex64::new(0.0, 1.0) / v;
    for (col, k) in [(2, kp), (3, kq)] {
        law.grad[0][col] = k.conj().re;
        law.grad[1][col] = k.conj().im;
        let jac = conj_jacobian(-k / v);
        for comp in 0..2 {
            for a in 0..2 {
                law.hess[comp][a][col] = jac[comp][a];
                law.hess[comp][col][a] = jac[comp][a];
            }
        }
    }
    law
}

/// Admittance current `I = (G + jB)·v` over `(vr, vi, G, B)`.
pub fn gb_law(g: f64, b: f64, vr: f64, vi: f64) -> CurrentLaw<4> {
    let mut law = CurrentLaw::<4>::default();
    law.value = [g * vr - b * vi, g * vi + b * vr];
    law.grad = [[g, -b, vr, -vi], [b, g, vi, vr]];
    // d2Ir/dvr dG = 1, d2Ir/dvi dB = -1
    law.hess[0][0][2] = 1.0;
    law.hess[0][2][0] = 1.0;
    law.hess[0][1][3] = -1.0;
    law.hess[0][3][1] = -1.0;
    // d2Ii/dvi dG = 1, d2Ii/dvr dB = 1
    law.hess[1][1][2] = 1.0;
    law.hess[1][2][1] = 1.0;
    law.hess[1][0][3] = 1.0;
    law.hess[1][3][0] = 1.0;
    law
}

fn conj_hessian(d2g: Complex64) -> [[[f64; 2]; 2]; 2] {
    let (a, b) = (d2g.re, d2g.im);
    [[[a, -b], [-b, -a]], [[-b, -a], [-a, b]]]
}

/// Re-expresses a law over new unknowns: local unknown `j` becomes
/// `Σ coef·y_k` over the `(k, coef)` pairs of `map(j)`.
pub fn remap<const N: usize, const M: usize>(
    law: &CurrentLaw<N>,
    map: impl Fn(usize) -> Vec<(usize, f64)>,
) -> CurrentLaw<M> {
    let maps: Vec<Vec<(usize, f64)>> = (0..N).map(map).collect();
    let mut out = CurrentLaw::<M>::default();
    out.value = law.value;
    for k in 0..2 {
        for j in 0..N {
            for &(jj, sj) in &maps[j] {
                out.grad[k][jj] += sj * law.grad[k][j];
                for l in 0..N {
                    for &(ll, sl) in &maps[l] {
                        out.hess[k][jj][ll] += sj * sl * law.hess[k][j][l];
                    }
                }
            }
        }
    }
    out
}

/// Re-expresses a law of `v = x_from − x_to` over both terminals. The first
/// `volt` unknowns are voltage differences; the rest follow the expanded
/// voltage block.
pub fn across<const N: usize, const M: usize>(law: &CurrentLaw<N>, volt: usize) -> CurrentLaw<M> {
    remap(law, |j| {
        if j < volt {
            vec![(j, 1.0), (j + volt, -1.0)]
        } else {
            vec![(j + volt, 1.0)]
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assemble::residual;

    /// Central-difference check of a law's gradient and Hessian.
    pub(crate) fn check_law<const N: usize>(
        f: impl Fn(&[f64; N]) -> CurrentLaw<N>,
        x0: [f64; N],
        tol: f64,
    ) {
        let eps = 1e-6;
        let law = f(&x0);
        for j in 0..N {
            let mut xp = x0;
            let mut xm = x0;
            xp[j] += eps;
            xm[j] -= eps;
            let (lp, lm) = (f(&xp), f(&xm));
            for k in 0..2 {
                let fd = (lp.value[k] - lm.value[k]) / (2.0 * eps);
                assert!(
                    (fd - law.grad[k][j]).abs() < tol * (1.0 + fd.abs()),
                    "grad[{}][{}]: fd {} vs {}",
                    k,
                    j,
                    fd,
                    law.grad[k][j]
                );
                for l in 0..N {
                    let fd = (lp.grad[k][l] - lm.grad[k][l]) / (2.0 * eps);
                    assert!(
                        (fd - law.hess[k][l][j]).abs() < tol * (1.0 + fd.abs()),
                        "hess[{}][{}][{}]: fd {} vs {}",
                        k,
                        l,
                        j,
                        fd,
                        law.hess[k][l][j]
                    );
                }
            }
        }
    }

    #[test]
    fn pq_law_matches_closed_form() {
        let (p, q, vr, vi) = (0.5, 0.1, 0.98, -0.05);
        let law = pq_law(p, q, vr, vi);
        let m = vr * vr + vi * vi;
        assert!((law.value[0] - (p * vr + q * vi) / m).abs() < 1e-12);
        assert!((law.value[1] - (p * vi - q * vr) / m).abs() < 1e-12);
        let d_ir_d_vr = -(p * (vr * vr - vi * vi) + 2.0 * q * vr * vi) / (m * m);
        assert!((law.grad[0][0] - d_ir_d_vr).abs() < 1e-12);
        assert!((law.grad[1][1] + d_ir_d_vr).abs() < 1e-12);
        assert!((law.grad[0][1] - law.grad[1][0]).abs() < 1e-12);
        let d2 = 2.0
            * (p * vr.powi(3) + 3.0 * q * vr * vr * vi - 3.0 * p * vr * vi * vi - q * vi.powi(3))
            / m.powi(3);
        assert!((law.hess[0][0][0] - d2).abs() < 1e-10);
    }

    #[test]
    fn pq_law_derivatives_match_finite_differences() {
        check_law(|x: &[f64; 2]| pq_law(1200.0, -300.0, x[0], x[1]), [2380.0, -410.0], 1e-5);
        check_law(
            |x: &[f64; 4]| pq_law_var(x[2], x[3], x[0], x[1]),
            [0.97, 0.12, 0.4, 0.2],
            1e-5,
        );
    }

    #[test]
    fn gb_law_derivatives_match_finite_differences() {
        check_law(|x: &[f64; 4]| gb_law(x[2], x[3], x[0], x[1]), [1.01, -0.2, 0.3, -0.6], 1e-6);
    }

    #[test]
    fn zero_voltage_gives_zero_partials() {
        let law = pq_law(1.0, 1.0, 0.0, 0.0);
        assert_eq!(law.value, [0.0, 0.0]);
        assert_eq!(law.grad, [[0.0; 2]; 2]);
    }

    #[test]
    fn across_expands_difference() {
        let f = |x: &[f64; 4]| -> CurrentLaw<4> {
            across::<2, 4>(&pq_law(0.3, 0.1, x[0] - x[2], x[1] - x[3]), 2)
        };
        check_law(f, [1.0, 0.1, 0.02, -0.01], 1e-5);
        let f6 = |x: &[f64; 6]| -> CurrentLaw<6> {
            across::<4, 6>(&pq_law_var(x[4], x[5], x[0] - x[2], x[1] - x[3]), 2)
        };
        check_law(f6, [1.0, 0.1, 0.02, -0.01, 0.5, 0.2], 1e-5);
    }

    #[test]
    fn taylor_stamp_is_exact_at_the_iterate() {
        // Y·x − J must equal the current itself at the expansion point.
        let x = vec![0.95, -0.1];
        let law = pq_law(0.5, 0.1, x[0], x[1]);
        let mut t = Triplets::with_capacity(8, 4);
        stamp_law(&mut t, &x, &law, &[0, 1], &[Port::new(0, 1, 1.0, None)], &[None, None]);
        let r = residual(&t.to_csr(2), &t.dense_j(2), &x).unwrap();
        for k in 0..2 {
            assert!((r[k] - law.value[k]).abs() < 1e-12);
        }
    }

    #[test]
    fn complementarity_is_exact_at_the_iterate() {
        let x = vec![0.3, 0.02];
        let mut t = Triplets::with_capacity(2, 1);
        stamp_complementarity(&mut t, &x, 1, 0, 0.0, 1.0, 1e-3);
        let r = residual(&t.to_csr(2), &t.dense_j(2), &x).unwrap();
        // residual −μ·s + cs_tol evaluated at x
        assert!((r[1] - (-0.02 * 0.3 + 1e-3)).abs() < 1e-12);
    }
}
