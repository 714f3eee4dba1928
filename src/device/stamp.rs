use crate::index::Terminal;
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Entries written by one [`coupled`] call at most.
pub const COUPLED_NNZ: usize = 16;

/// Current `y·(V_ca − V_cb)` leaving row terminal `ra` and entering `rb`.
/// `None` terminals are ground and contribute nothing.
pub fn coupled(
    t: &mut Triplets,
    ra: Option<Terminal>,
    rb: Option<Terminal>,
    ca: Option<Terminal>,
    cb: Option<Terminal>,
    y: Complex64,
) {
    let (g, b) = (y.re, y.im);
    for (row, rs) in [(ra, 1.0), (rb, -1.0)] {
        let row = match row {
            Some(r) => r,
            None => continue,
        };
        for (col, cs) in [(ca, 1.0), (cb, -1.0)] {
            let col = match col {
                Some(c) => c,
                None => continue,
            };
            let s = rs * cs;
            t.stamp_y(row.vr, col.vr, s * g);
            t.stamp_y(row.vr, col.vi, -s * b);
            t.stamp_y(row.vi, col.vr, s * b);
            t.stamp_y(row.vi, col.vi, s * g);
        }
    }
}

/// Admittance between two terminals.
pub fn admittance(t: &mut Triplets, a: Option<Terminal>, b: Option<Terminal>, y: Complex64) {
    coupled(t, a, b, a, b, y);
}

/// Series admittance between two network terminals.
#[derive(Debug, Clone, Copy)]
pub struct Series {
    pub a: Terminal,
    pub b: Terminal,
    pub y: Complex64,
}

impl Series {
    pub fn stamp(&self, t: &mut Triplets) {
        admittance(t, Some(self.a), Some(self.b), self.y);
    }

    /// Shadow branch `s·(G_h·G + j·B_h·B)` in parallel.
    pub fn stamp_shadow(&self, t: &mut Triplets, s: f64, g_h: f64, b_h: f64) {
        let y = Complex64::new(s * g_h * self.y.re, s * b_h * self.y.im);
        admittance(t, Some(self.a), Some(self.b), y);
    }

    pub fn current(&self, x: &[f64]) -> Complex64 {
        self.y * (super::volt(x, self.a) - super::volt(x, self.b))
    }
}

/// Ideal winding pair with source current `is`: the primary row enforces
/// `V_p+ − V_p− = a·(V_s+ − V_s−)`, the primary KCL rows carry `±is` and the
/// secondary rows `∓a·is`.
#[derive(Debug, Clone, Copy)]
pub struct Winding {
    pub p_pos: Option<Terminal>,
    pub p_neg: Option<Terminal>,
    pub s_pos: Option<Terminal>,
    pub s_neg: Option<Terminal>,
    pub is: Terminal,
}

pub const WINDING_NNZ: usize = 16;

impl Winding {
    /// Fixed-ratio stamps.
    pub fn stamp(&self, t: &mut Triplets, a: f64) {
        let legs = [
            (self.p_pos, 1.0),
            (self.p_neg, -1.0),
            (self.s_pos, -a),
            (self.s_neg, a),
        ];
        for (term, c) in legs {
            if let Some(n) = term {
                t.stamp_y(self.is.vr, n.vr, c);
                t.stamp_y(self.is.vi, n.vi, c);
                t.stamp_y(n.vr, self.is.vr, c);
                t.stamp_y(n.vi, self.is.vi, c);
            }
        }
    }

    /// Primary-side stamps of a winding whose ratio is an unknown; the
    /// ratio-dependent terms go to [`Winding::stamp_ratio`].
    pub fn stamp_primary(&self, t: &mut Triplets) {
        for (term, c) in [(self.p_pos, 1.0), (self.p_neg, -1.0)] {
            if let Some(n) = term {
                t.stamp_y(self.is.vr, n.vr, c);
                t.stamp_y(self.is.vi, n.vi, c);
                t.stamp_y(n.vr, self.is.vr, c);
                t.stamp_y(n.vi, self.is.vi, c);
            }
        }
    }

    /// Bilinear `a·(V_s+ − V_s−)` and `a·is` terms linearized at the iterate
    /// for a ratio unknown at index `ar`.
    pub fn stamp_ratio(&self, t: &mut Triplets, x: &[f64], ar: usize) {
        let a = x[ar];
        let vs = super::volt_or_ground(x, self.s_pos) - super::volt_or_ground(x, self.s_neg);
        let is = super::volt(x, self.is);

        // source rows: −a·vs
        for (term, c) in [(self.s_pos, -1.0), (self.s_neg, 1.0)] {
            if let Some(n) = term {
                t.stamp_y(self.is.vr, n.vr, c * a);
                t.stamp_y(self.is.vi, n.vi, c * a);
            }
        }
        t.stamp_y(self.is.vr, ar, -vs.re);
        t.stamp_y(self.is.vi, ar, -vs.im);
        t.stamp_j(self.is.vr, -a * vs.re);
        t.stamp_j(self.is.vi, -a * vs.im);

        // secondary rows: ∓a·is
        for (term, c) in [(self.s_pos, -1.0), (self.s_neg, 1.0)] {
            if let Some(n) = term {
                t.stamp_y(n.vr, self.is.vr, c * a);
                t.stamp_y(n.vi, self.is.vi, c * a);
                t.stamp_y(n.vr, ar, c * is.re);
                t.stamp_y(n.vi, ar, c * is.im);
                t.stamp_j(n.vr, c * a * is.re);
                t.stamp_j(n.vi, c * a * is.im);
            }
        }
    }

    pub fn current(&self, x: &[f64]) -> Complex64 {
        super::volt(x, self.is)
    }
}

pub const RATIO_NNZ: (usize, usize) = (14, 6);

/// Pins a neutral to zero through the auxiliary pair `g`.
pub fn ground(t: &mut Triplets, n: Terminal, g: Terminal) {
    t.stamp_y(g.vr, n.vr, 1.0);
    t.stamp_y(g.vi, n.vi, 1.0);
    t.stamp_y(n.vr, g.vr, 1.0);
    t.stamp_y(n.vi, g.vi, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linsolve::{DenseLu, LinearSolver};

    fn term(k: usize) -> Terminal {
        Terminal {
            vr: 2 * k,
            vi: 2 * k + 1,
        }
    }

    #[test]
    fn admittance_is_symmetric_and_balanced() {
        let mut t = Triplets::with_capacity(COUPLED_NNZ, 0);
        admittance(&mut t, Some(term(0)), Some(term(1)), Complex64::new(2.0, -5.0));
        let y = t.to_csr(4);
        // each column sums to zero over the four rows
        for c in 0..4 {
            let s: f64 = (0..4).map(|r| y.get(r, c)).sum();
            assert_eq!(s, 0.0);
        }
        assert_eq!(y.get(0, 1), 5.0);
        assert_eq!(y.get(1, 0), -5.0);
    }

    #[test]
    fn winding_transforms_voltage_and_current() {
        // source 100∠0 at node 0 (through a pinned pair), winding 0 → 1 at
        // ratio 4, resistor 2 Ω from node 1 to ground
        let src = term(2);
        let w = Winding {
            p_pos: Some(term(0)),
            p_neg: None,
            s_pos: Some(term(1)),
            s_neg: None,
            is: term(3),
        };
        let mut t = Triplets::with_capacity(64, 4);
        w.stamp(&mut t, 4.0);
        admittance(&mut t, Some(term(1)), None, Complex64::new(0.5, 0.0));
        // source: V0 = 100, KCL row 0 gets the source current
        ground(&mut t, term(0), src);
        t.stamp_j(src.vr, 100.0);

        let x = DenseLu.solve(&t.to_csr(8), &t.dense_j(8)).unwrap();
        assert!((x[2] - 25.0).abs() < 1e-12);
        // load current 12.5 A on the secondary is 3.125 A on the primary
        assert!((w.current(&x).re - 3.125).abs() < 1e-12);
    }

    #[test]
    fn ratio_stamp_is_exact_at_the_iterate() {
        let w = Winding {
            p_pos: Some(term(0)),
            p_neg: None,
            s_pos: Some(term(1)),
            s_neg: Some(term(2)),
            is: term(3),
        };
        let x = vec![1.0, 0.1, 0.9, -0.2, 0.05, 0.01, 3.0, -1.0, 1.02];
        let ar = 8;
        let mut t = Triplets::with_capacity(RATIO_NNZ.0, RATIO_NNZ.1);
        w.stamp_ratio(&mut t, &x, ar);
        let y = t.to_csr(9);
        let j = t.dense_j(9);
        // Y·x − J reproduces the bilinear terms
        let r = crate::assemble::residual(&y, &j, &x).unwrap();
        let vs_re = x[2] - x[4];
        assert!((r[6] - (-x[ar] * vs_re)).abs() < 1e-12);
        assert!((r[2] - (-x[ar] * x[6])).abs() < 1e-12);
        assert!((r[4] - (x[ar] * x[6])).abs() < 1e-12);
    }
}
