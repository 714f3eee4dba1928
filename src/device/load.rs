use super::law::{across, law_nnz, pq_law, stamp_law, CurrentLaw, Port};
use super::shunt::connection_pairs;
use super::{DeviceOutput, Element, Nnz, StampCtx};
use crate::case::{cplx, LoadData, TriplexLoadData};
use crate::error::SolveError;
use crate::index::{Bus, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Constant power `s` drawn across `pos − neg` (ground when `neg` is none).
#[derive(Debug, Clone, Copy)]
pub struct PqElement {
    pub pos: Terminal,
    pub neg: Option<Terminal>,
    pub pos_dual: Option<Terminal>,
    pub neg_dual: Option<Terminal>,
    pub s: Complex64,
}

fn port(t: Terminal, sign: f64, dual: Option<Terminal>) -> Port {
    Port::new(t.vr, t.vi, sign, dual.map(|d| (d.vr, d.vi)))
}

impl PqElement {
    pub fn new(bus: &Bus, pos: Terminal, neg: Option<Terminal>, s: Complex64) -> Self {
        Self {
            pos,
            neg,
            pos_dual: bus.dual_for(pos),
            neg_dual: neg.and_then(|n| bus.dual_for(n)),
            s,
        }
    }

    pub fn nnz(&self) -> Nnz {
        let stat = if self.pos_dual.is_some() { 1 } else { 0 };
        let (y, j) = match self.neg {
            None => law_nnz(2, 1, 2 * stat),
            Some(_) => law_nnz(4, 2, 4 * stat),
        };
        Nnz {
            y_nl: y,
            j_nl: j,
            ..Default::default()
        }
    }

    pub fn stamp(&self, t: &mut Triplets, x: &[f64], scale: f64) {
        let s = self.s * scale;
        let p = self.pos;
        let pd = self.pos_dual;
        match self.neg {
            None => {
                let law = pq_law(s.re, s.im, x[p.vr], x[p.vi]);
                stamp_law(
                    t,
                    x,
                    &law,
                    &[p.vr, p.vi],
                    &[port(p, 1.0, pd)],
                    &[pd.map(|d| d.vr), pd.map(|d| d.vi)],
                );
            }
            Some(n) => {
                let nd = self.neg_dual;
                let law: CurrentLaw<4> =
                    across(&pq_law(s.re, s.im, x[p.vr] - x[n.vr], x[p.vi] - x[n.vi]), 2);
                stamp_law(
                    t,
                    x,
                    &law,
                    &[p.vr, p.vi, n.vr, n.vi],
                    &[port(p, 1.0, pd), port(n, -1.0, nd)],
                    &[
                        pd.map(|d| d.vr),
                        pd.map(|d| d.vi),
                        nd.map(|d| d.vr),
                        nd.map(|d| d.vi),
                    ],
                );
            }
        }
    }
}

/// Constant-power wye or delta load scaled by the load factor.
#[derive(Debug, Clone)]
pub struct Load {
    name: String,
    elements: Vec<PqElement>,
}

impl Load {
    pub fn new(data: &LoadData, nodes: &NodeRegistry) -> Result<Self, SolveError> {
        let bus = nodes.get(&data.bus, &data.name)?;
        let pairs = connection_pairs(bus, &data.phases, data.connection, &data.name)?;
        if data.power.len() < pairs.len() {
            return Err(SolveError::config(
                &data.name,
                format!("{} powers given for {} elements", data.power.len(), pairs.len()),
            ));
        }
        let elements = pairs
            .into_iter()
            .zip(&data.power)
            .map(|((a, b), s)| PqElement::new(bus, a, b, cplx(s)))
            .collect();
        Ok(Self {
            name: data.name.clone(),
            elements,
        })
    }
}

fn sum_nnz(elements: &[PqElement]) -> Nnz {
    let mut nnz = Nnz::default();
    for e in elements {
        nnz += e.nnz();
    }
    nnz
}

fn drawn(elements: &[PqElement], lf: f64) -> DeviceOutput {
    DeviceOutput::Power {
        power: elements.iter().map(|e| e.s * lf).sum(),
    }
}

impl Element for Load {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        sum_nnz(&self.elements)
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        for e in &self.elements {
            e.stamp(t, ctx.x, ctx.lf);
        }
    }

    fn output(&self, _x: &[f64], lf: f64) -> Option<DeviceOutput> {
        Some(drawn(&self.elements, lf))
    }
}

/// Split-phase load: `L1–N`, `L2–N` and `L1–L2` elements.
#[derive(Debug, Clone)]
pub struct TriplexLoad {
    name: String,
    elements: Vec<PqElement>,
}

impl TriplexLoad {
    pub fn new(data: &TriplexLoadData, nodes: &NodeRegistry) -> Result<Self, SolveError> {
        let bus = nodes.get(&data.bus, &data.name)?;
        if !bus.triplex {
            return Err(SolveError::config(&data.name, format!("bus {} is not split-phase", bus.name)));
        }
        let l1 = bus.require(Phase::L1, &data.name)?;
        let l2 = bus.require(Phase::L2, &data.name)?;
        let n = bus.neutral();
        let elements = [(l1, n, data.s1), (l2, n, data.s2), (l1, Some(l2), data.s12)]
            .into_iter()
            .filter(|(_, _, s)| s[0] != 0.0 || s[1] != 0.0)
            .map(|(a, b, s)| PqElement::new(bus, a, b, cplx(&s)))
            .collect();
        Ok(Self {
            name: data.name.clone(),
            elements,
        })
    }
}

impl Element for TriplexLoad {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        sum_nnz(&self.elements)
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        for e in &self.elements {
            e.stamp(t, ctx.x, ctx.lf);
        }
    }

    fn output(&self, _x: &[f64], lf: f64) -> Option<DeviceOutput> {
        Some(drawn(&self.elements, lf))
    }
}
