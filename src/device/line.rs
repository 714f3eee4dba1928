use super::stamp::{coupled, Series, COUPLED_NNZ};
use super::{volt, DeviceOutput, Element, Nnz};
use crate::case::{cplx, parse_phases, LineData};
use crate::error::SolveError;
use crate::index::{NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Multi-conductor π-section.
#[derive(Debug, Clone)]
pub struct Line {
    name: String,
    phases: Vec<Phase>,
    from: Vec<Terminal>,
    to: Vec<Terminal>,
    /// Series admittance, `inv(Z)`.
    y: Vec<Vec<Complex64>>,
    /// Half of the total shunt admittance.
    y_half: Option<Vec<Vec<Complex64>>>,
}

impl Line {
    pub fn new(data: &LineData, nodes: &NodeRegistry) -> Result<Self, SolveError> {
        let mask = parse_phases(&data.phases, &data.name)?;
        let phases = mask.phases();
        let fb = nodes.get(&data.from, &data.name)?;
        let tb = nodes.get(&data.to, &data.name)?;
        let from = phases
            .iter()
            .map(|&p| fb.require(p, &data.name))
            .collect::<Result<Vec<_>, _>>()?;
        let to = phases
            .iter()
            .map(|&p| tb.require(p, &data.name))
            .collect::<Result<Vec<_>, _>>()?;

        let y = series_admittance(data)?;
        let y_half = data.y_shunt.as_ref().map(|ysh| {
            ysh.iter()
                .map(|row| row.iter().map(|c| cplx(c) / 2.0).collect())
                .collect()
        });

        Ok(Self {
            name: data.name.clone(),
            phases,
            from,
            to,
            y,
            y_half,
        })
    }

    fn n(&self) -> usize {
        self.phases.len()
    }

    /// Series current per phase leaving the from end.
    pub fn series_currents(&self, x: &[f64]) -> Vec<Complex64> {
        (0..self.n())
            .map(|p| {
                (0..self.n())
                    .map(|q| self.y[p][q] * (volt(x, self.from[q]) - volt(x, self.to[q])))
                    .sum()
            })
            .collect()
    }

    fn shunt_current(&self, x: &[f64], p: usize, end: &[Terminal]) -> Complex64 {
        match &self.y_half {
            Some(ysh) => (0..self.n()).map(|q| ysh[p][q] * volt(x, end[q])).sum(),
            None => Complex64::default(),
        }
    }
}

impl Element for Line {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        let n = self.n();
        let shunt = if self.y_half.is_some() { 2 * n * n * 4 } else { 0 };
        Nnz {
            y_lin: n * n * COUPLED_NNZ + shunt,
            y_hom: n * COUPLED_NNZ,
            ..Default::default()
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        let n = self.n();
        for p in 0..n {
            for q in 0..n {
                coupled(
                    t,
                    Some(self.from[p]),
                    Some(self.to[p]),
                    Some(self.from[q]),
                    Some(self.to[q]),
                    self.y[p][q],
                );
            }
        }
        if let Some(ysh) = &self.y_half {
            for end in [&self.from, &self.to] {
                for p in 0..n {
                    for q in 0..n {
                        coupled(t, Some(end[p]), None, Some(end[q]), None, ysh[p][q]);
                    }
                }
            }
        }
    }

    fn stamp_homotopy(&self, t: &mut Triplets, s: f64, g_h: f64, b_h: f64) {
        for p in 0..self.n() {
            Series {
                a: self.from[p],
                b: self.to[p],
                y: self.y[p][p],
            }
            .stamp_shadow(t, s, g_h, b_h);
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let series = self.series_currents(x);
        let mut currents = Vec::with_capacity(self.n());
        let mut power = Complex64::default();
        for (p, &phase) in self.phases.iter().enumerate() {
            let i = series[p] + self.shunt_current(x, p, &self.from);
            power += volt(x, self.from[p]) * i.conj();
            currents.push((phase, i));
        }
        Some(DeviceOutput::Branch { currents, power })
    }
}

/// Series admittance matrix `inv(Z)` of a line.
pub fn series_admittance(data: &LineData) -> Result<Vec<Vec<Complex64>>, SolveError> {
    let z: Vec<Vec<Complex64>> = data
        .z
        .iter()
        .map(|row| row.iter().map(cplx).collect())
        .collect();
    invert(&z).ok_or_else(|| SolveError::config(&data.name, "singular impedance matrix"))
}

/// Gauss-Jordan inverse with partial pivoting.
fn invert(m: &[Vec<Complex64>]) -> Option<Vec<Vec<Complex64>>> {
    let n = m.len();
    let mut a: Vec<Vec<Complex64>> = m.to_vec();
    let mut inv: Vec<Vec<Complex64>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| if i == j { Complex64::new(1.0, 0.0) } else { Complex64::default() })
                .collect()
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].norm().total_cmp(&a[j][col].norm()))?;
        if a[pivot][col].norm() < 1e-14 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let d = a[col][col];
        for j in 0..n {
            a[col][j] /= d;
            inv[col][j] /= d;
        }
        for i in 0..n {
            if i == col {
                continue;
            }
            let f = a[i][col];
            if f == Complex64::default() {
                continue;
            }
            for j in 0..n {
                let (ac, ic) = (a[col][j], inv[col][j]);
                a[i][j] -= f * ac;
                inv[i][j] -= f * ic;
            }
        }
    }
    Some(inv)
}
