use super::stamp::{admittance, Series, Winding, COUPLED_NNZ, WINDING_NNZ};
use super::{volt, DeviceOutput, Element, Nnz};
use crate::case::{cplx, parse_phases, Connection, TransformerData};
use crate::error::SolveError;
use crate::index::{Bus, IndexAllocator, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Weak reference to ground for each terminal of a floating delta
/// secondary, per unit of the winding base admittance.
const DELTA_REFERENCE: f64 = 1e-6;

/// Two-winding or center-tapped transformer built from ideal windings,
/// series branches behind each secondary, and optional magnetizing shunts.
#[derive(Debug, Clone)]
pub struct Transformer {
    name: String,
    windings: Vec<(Phase, Winding, f64)>,
    series: Vec<Series>,
    shunts: Vec<(Terminal, Complex64)>,
    grounded: Vec<usize>,
}

struct Sides<'a> {
    name: &'a str,
    from: &'a Bus,
    to: &'a Bus,
}

impl<'a> Sides<'a> {
    fn p(&self, p: Phase) -> Result<Terminal, SolveError> {
        self.from.require(p, self.name)
    }

    fn s(&self, p: Phase) -> Result<Terminal, SolveError> {
        self.to.require(p, self.name)
    }
}

fn next_phase(p: Phase) -> Phase {
    match p {
        Phase::A => Phase::B,
        Phase::B => Phase::C,
        _ => Phase::A,
    }
}

fn impedance_to_admittance(z: Complex64) -> Option<Complex64> {
    if z.norm() == 0.0 {
        None
    } else {
        Some(z.inv())
    }
}

impl Transformer {
    pub fn new(
        data: &TransformerData,
        nodes: &NodeRegistry,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let sides = Sides {
            name: &data.name,
            from: nodes.get(&data.from, &data.name)?,
            to: nodes.get(&data.to, &data.name)?,
        };
        if data.connection == Connection::CenterTap {
            return Self::center_tap(data, &sides, alloc);
        }

        let mask = parse_phases(&data.phases, &data.name)?;
        let hot = mask.hot();
        if hot.is_empty() {
            return Err(SolveError::config(&data.name, "no hot phases"));
        }
        let delta_pri = matches!(data.connection, Connection::DeltaDelta | Connection::DeltaWye);
        let delta_sec = matches!(data.connection, Connection::DeltaDelta | Connection::WyeDelta);
        if (delta_pri || delta_sec) && hot.len() != 3 {
            return Err(SolveError::config(&data.name, "delta windings need three phases"));
        }

        let sqrt3 = 3f64.sqrt();
        let v_pri = if delta_pri { data.v_primary * sqrt3 } else { data.v_primary };
        let v_sec = if delta_sec { data.v_secondary * sqrt3 } else { data.v_secondary };
        let ratio = v_pri / v_sec;
        let z_base = v_sec * v_sec / data.rating;
        let z = Complex64::new(data.r[0], data.x[0]) * z_base;
        let y = impedance_to_admittance(z);

        let mut xf = Self {
            name: data.name.clone(),
            windings: Vec::new(),
            series: Vec::new(),
            shunts: Vec::new(),
            grounded: Vec::new(),
        };
        if !delta_pri {
            xf.grounded.push(sides.from.id);
        }
        if !delta_sec {
            xf.grounded.push(sides.to.id);
        }

        for &p in &hot {
            let (p_pos, p_neg) = if delta_pri {
                (Some(sides.p(p)?), Some(sides.p(next_phase(p))?))
            } else {
                (Some(sides.p(p)?), sides.from.neutral())
            };
            let to_p = sides.s(p)?;
            let s_neg = if delta_sec {
                Some(sides.s(next_phase(p))?)
            } else {
                sides.to.neutral()
            };
            let s_pos = match y {
                Some(y) => {
                    let inner = alloc.terminal();
                    xf.series.push(Series {
                        a: inner,
                        b: to_p,
                        y,
                    });
                    inner
                }
                None => to_p,
            };
            let w = Winding {
                p_pos,
                p_neg,
                s_pos: Some(s_pos),
                s_neg,
                is: alloc.terminal(),
            };
            xf.windings.push((p, w, ratio));

            if let Some(zs) = data.shunt {
                if let Some(ys) = impedance_to_admittance(cplx(&zs) * z_base) {
                    xf.shunts.push((to_p, ys));
                }
            }
            if delta_sec {
                xf.shunts.push((to_p, Complex64::new(DELTA_REFERENCE / z_base, 0.0)));
            }
        }
        Ok(xf)
    }

    /// Single-phase primary feeding the two halves of a split-phase secondary.
    fn center_tap(
        data: &TransformerData,
        sides: &Sides,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let mask = parse_phases(&data.phases, &data.name)?;
        let pri = match mask.hot().as_slice() {
            [p] => *p,
            _ => {
                return Err(SolveError::config(
                    &data.name,
                    "center-tap primary needs exactly one phase",
                ))
            }
        };
        if !sides.to.triplex {
            return Err(SolveError::config(&data.name, "center-tap secondary must be split-phase"));
        }

        let z_high = data.v_primary * data.v_primary / data.rating;
        let z_low = data.v_secondary * data.v_secondary / data.rating;
        let (z0, z1, z2) = match (data.r.as_slice(), data.x.as_slice()) {
            ([r0, r1, r2, ..], [x0, x1, x2, ..]) => (
                Complex64::new(*r0, *x0) * z_high,
                Complex64::new(*r1, *x1) * z_low,
                Complex64::new(*r2, *x2) * z_low,
            ),
            ([r, ..], [x, ..]) => (
                Complex64::new(0.5 * r, 0.8 * x) * z_high,
                Complex64::new(*r, 0.4 * x) * z_low,
                Complex64::new(*r, 0.4 * x) * z_low,
            ),
            _ => return Err(SolveError::config(&data.name, "missing winding impedance")),
        };

        let mut xf = Self {
            name: data.name.clone(),
            windings: Vec::new(),
            series: Vec::new(),
            shunts: Vec::new(),
            grounded: vec![sides.from.id, sides.to.id],
        };
        let ratio = data.v_primary / data.v_secondary;
        let to_n = sides.s(Phase::N)?;
        let from_p = sides.p(pri)?;

        let mut behind = |z: Complex64, outer: Terminal, xf: &mut Self| -> Terminal {
            match impedance_to_admittance(z) {
                Some(y) => {
                    let inner = alloc.terminal();
                    xf.series.push(Series { a: inner, b: outer, y });
                    inner
                }
                None => outer,
            }
        };
        let ct = behind(z0, from_p, &mut xf);
        let l1 = behind(z1, sides.s(Phase::L1)?, &mut xf);
        let l2 = behind(z2, sides.s(Phase::L2)?, &mut xf);

        let half1 = Winding {
            p_pos: Some(ct),
            p_neg: sides.from.neutral(),
            s_pos: Some(l1),
            s_neg: Some(to_n),
            is: alloc.terminal(),
        };
        let half2 = Winding {
            p_pos: Some(ct),
            p_neg: sides.from.neutral(),
            s_pos: Some(to_n),
            s_neg: Some(l2),
            is: alloc.terminal(),
        };
        xf.windings.push((Phase::L1, half1, ratio));
        xf.windings.push((Phase::L2, half2, ratio));

        if let Some(zs) = data.shunt {
            if let Some(ys) = impedance_to_admittance(cplx(&zs) * z_high) {
                xf.shunts.push((from_p, ys));
            }
        }
        Ok(xf)
    }

    /// Buses whose neutral is grounded by a wye or center-tap winding.
    pub fn grounded_buses(&self) -> &[usize] {
        &self.grounded
    }
}

impl Element for Transformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        Nnz {
            y_lin: self.windings.len() * WINDING_NNZ
                + (self.series.len() + self.shunts.len()) * COUPLED_NNZ,
            y_hom: self.series.len() * COUPLED_NNZ,
            ..Default::default()
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        for (_, w, a) in &self.windings {
            w.stamp(t, *a);
        }
        for s in &self.series {
            s.stamp(t);
        }
        for &(n, y) in &self.shunts {
            admittance(t, Some(n), None, y);
        }
    }

    fn stamp_homotopy(&self, t: &mut Triplets, s: f64, g_h: f64, b_h: f64) {
        for br in &self.series {
            br.stamp_shadow(t, s, g_h, b_h);
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let mut power = Complex64::default();
        let mut currents = Vec::with_capacity(self.windings.len());
        for (p, w, _) in &self.windings {
            let i = w.current(x);
            let v = w.p_pos.map(|n| volt(x, n)).unwrap_or_default()
                - w.p_neg.map(|n| volt(x, n)).unwrap_or_default();
            power += v * i.conj();
            currents.push((*p, i));
        }
        Some(DeviceOutput::Branch { currents, power })
    }
}
