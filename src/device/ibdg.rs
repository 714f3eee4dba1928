use super::law::{law_nnz, remap, stamp_law, CurrentLaw, Port};
use super::{volt, DeviceOutput, Element, Nnz, StampCtx};
use crate::case::{cplx, IbdgData, IbdgKind, Resource};
use crate::control::{setpoint_profile, QvCurve, QvRegion};
use crate::ecfopt::QvControl;
use crate::error::SolveError;
use crate::index::{IndexAllocator, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;
use std::f64::consts::PI;

/// Local unknowns: `Vr, Vi` of phases A, B, C and `Q3`.
const NV: usize = 7;
const Q3: usize = 6;

type Grad = [Complex64; NV];
type Hess = [[Complex64; NV]; NV];

fn alpha_op() -> Complex64 {
    Complex64::from_polar(1.0, 2.0 * PI / 3.0)
}

/// Partials of the phase-A positive and negative sequence voltages with
/// respect to the local unknowns.
fn sequence_partials() -> (Grad, Grad) {
    let a = alpha_op();
    let third = 1.0 / 3.0;
    let cp = [Complex64::new(third, 0.0), a * third, a * a * third];
    let cn = [Complex64::new(third, 0.0), a * a * third, a * third];
    let mut ep = [Complex64::default(); NV];
    let mut en = [Complex64::default(); NV];
    let j = Complex64::i();
    for q in 0..3 {
        ep[2 * q] = cp[q];
        ep[2 * q + 1] = j * cp[q];
        en[2 * q] = cn[q];
        en[2 * q + 1] = j * cn[q];
    }
    (ep, en)
}

/// Rotation from the phase-A sequence voltage to phase `p`.
fn rotation(p: usize) -> (Complex64, Complex64) {
    let a = alpha_op();
    let one = Complex64::new(1.0, 0.0);
    match p {
        0 => (one, one),
        1 => (a * a, a),
        _ => (a, a * a),
    }
}

/// `c·s/m` with `c` and `s` affine and `m` quadratic in the local unknowns.
#[allow(clippy::too_many_arguments)]
fn quotient(
    c: Complex64,
    dc: &Grad,
    s: Complex64,
    ds: &Grad,
    m: f64,
    dm: &[f64; NV],
    d2m: &[[f64; NV]; NV],
) -> (Complex64, Grad, Hess) {
    let mut grad = [Complex64::default(); NV];
    let mut hess = [[Complex64::default(); NV]; NV];
    let (m2, m3) = (m * m, m * m * m);
    for a in 0..NV {
        grad[a] = dc[a] * s / m + c * ds[a] / m - c * s * dm[a] / m2;
        for b in 0..NV {
            hess[a][b] = (dc[a] * ds[b] + dc[b] * ds[a]) / m
                - (dc[a] * dm[b] + dc[b] * dm[a]) * s / m2
                - c * (ds[a] * dm[b] + ds[b] * dm[a]) / m2
                - c * s * d2m[a][b] / m2
                + 2.0 * c * s * dm[a] * dm[b] / m3;
        }
    }
    (c * s / m, grad, hess)
}

/// Inverter current law parameters; `p3` already carries the resource
/// multiplier.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IbdgLaw {
    pub kind: IbdgKind,
    pub p3: f64,
    pub alpha: Complex64,
    pub beta: Complex64,
    pub k1: f64,
    pub k2: f64,
}

impl IbdgLaw {
    /// Current drawn from phase `p` (the negative of the injection) over
    /// the local unknowns `y`.
    pub fn phase_law(&self, y: &[f64; NV], p: usize) -> CurrentLaw<NV> {
        let (ep, en) = sequence_partials();
        let (rp, rn) = rotation(p);
        let mut vp = Complex64::default();
        let mut vn = Complex64::default();
        for j in 0..6 {
            vp += ep[j] * y[j];
            vn += en[j] * y[j];
        }

        let cp = -self.alpha * self.p3 / 3.0;
        let dcq = self.alpha * Complex64::i() / 3.0;
        let cq = dcq * y[Q3];
        let terms = match self.kind {
            IbdgKind::Bpsc => vec![(cp + cq, dcq, 1.0, 0.0)],
            IbdgKind::Pnsc => vec![(cp + cq, dcq, 1.0, -1.0)],
            IbdgKind::Fpnsc => vec![
                (cp, Complex64::default(), self.k1, 1.0 - self.k1),
                (cq, dcq, self.k2, 1.0 - self.k2),
            ],
        };

        let mut value = Complex64::default();
        let mut grad = [Complex64::default(); NV];
        let mut hess = [[Complex64::default(); NV]; NV];
        for (c, dq, wp, wn) in terms {
            let mut ds = [Complex64::default(); NV];
            let mut dm = [0.0; NV];
            let mut d2m = [[0.0; NV]; NV];
            for j in 0..6 {
                ds[j] = wp * rp * ep[j] + wn * rn * en[j];
                dm[j] = 2.0 * (wp * (vp.conj() * ep[j]).re + wn * (vn.conj() * en[j]).re);
                for l in 0..6 {
                    d2m[j][l] = 2.0
                        * (wp * (ep[j].conj() * ep[l]).re + wn * (en[j].conj() * en[l]).re);
                }
            }
            let s = wp * rp * vp + wn * rn * vn;
            let m = wp * vp.norm_sqr() + wn * vn.norm_sqr();
            if m.abs() < f64::EPSILON {
                continue;
            }
            let mut dc = [Complex64::default(); NV];
            dc[Q3] = dq;
            let (v, g, h) = quotient(c, &dc, s, &ds, m, &dm, &d2m);
            value += v;
            for a in 0..NV {
                grad[a] += g[a];
                for b in 0..NV {
                    hess[a][b] += h[a][b];
                }
            }
        }

        // admittance part β·V_p
        value += self.beta * Complex64::new(y[2 * p], y[2 * p + 1]);
        grad[2 * p] += self.beta;
        grad[2 * p + 1] += self.beta * Complex64::i();

        let mut law = CurrentLaw::<NV>::default();
        law.value = [value.re, value.im];
        for a in 0..NV {
            law.grad[0][a] = grad[a].re;
            law.grad[1][a] = grad[a].im;
            for b in 0..NV {
                law.hess[0][a][b] = hess[a][b].re;
                law.hess[1][a][b] = hess[a][b].im;
            }
        }
        law
    }
}

/// Squared magnitudes of the positive and negative sequence voltages.
fn sequence_magnitudes(y: &[f64; NV]) -> (f64, f64) {
    let (ep, en) = sequence_partials();
    let mut vp = Complex64::default();
    let mut vn = Complex64::default();
    for j in 0..6 {
        vp += ep[j] * y[j];
        vn += en[j] * y[j];
    }
    (vp.norm_sqr(), vn.norm_sqr())
}

#[derive(Debug, Clone)]
struct QvState {
    q3: usize,
    curve: QvCurve,
    sense: Terminal,
    vnom: f64,
    q_max: f64,
    q_min: f64,
    h_init: f64,
    region: QvRegion,
}

/// Three-phase inverter-based generator.
#[derive(Debug, Clone)]
pub struct Ibdg {
    name: String,
    resource: Resource,
    p3: f64,
    q3: f64,
    scale: f64,
    law: IbdgLaw,
    phases: [Terminal; 3],
    neutral: Option<Terminal>,
    /// Multipliers of the phase and neutral rows under dual stamping.
    duals: Option<[Terminal; 3]>,
    neutral_dual: Option<Terminal>,
    qv: Option<QvState>,
}

impl Ibdg {
    pub fn new(
        data: &IbdgData,
        kind: QvControl,
        nodes: &NodeRegistry,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let name = data.name.as_str();
        if alloc.stamp_dual() && data.vset.is_some() {
            return Err(SolveError::config(
                name,
                "Q-V controlled inverters do not support dual stamping",
            ));
        }
        let bus = nodes.get(&data.bus, name)?;
        let phases = [
            bus.require(Phase::A, name)?,
            bus.require(Phase::B, name)?,
            bus.require(Phase::C, name)?,
        ];
        let duals = match (bus.dual(Phase::A), bus.dual(Phase::B), bus.dual(Phase::C)) {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };

        let qv = match data.vset {
            None => None,
            Some(vset) => {
                let sense_phase = Phase::from_char(data.sense_phase).ok_or_else(|| {
                    SolveError::config(name, format!("invalid sense phase {}", data.sense_phase))
                })?;
                let q_max = if data.q3 != 0.0 {
                    2.0 * data.q3.abs()
                } else {
                    data.p3 / 2.0
                };
                let curve = QvCurve::new(kind, setpoint_profile(vset), q_max, -q_max, name)?;
                let region = curve.region(1.0);
                Some(QvState {
                    q3: alloc.next(),
                    curve,
                    sense: bus.require(sense_phase, name)?,
                    vnom: bus.vnom,
                    q_max,
                    q_min: -q_max,
                    h_init: data.h_init,
                    region,
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            resource: data.resource,
            p3: data.p3,
            q3: data.q3,
            scale: 1.0,
            law: IbdgLaw {
                kind: data.kind,
                p3: data.p3,
                alpha: cplx(&data.alpha),
                beta: cplx(&data.beta),
                k1: 1.0,
                k2: 1.0,
            },
            phases,
            neutral: bus.neutral(),
            duals,
            neutral_dual: bus.dual(Phase::N),
            qv,
        })
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Per-period multiplier of the scheduled active power.
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
        self.law.p3 = self.p3 * scale;
    }

    pub fn region(&self) -> Option<QvRegion> {
        self.qv.as_ref().map(|q| q.region)
    }

    fn local(&self, x: &[f64]) -> [f64; NV] {
        let mut y = [0.0; NV];
        for (k, t) in self.phases.iter().enumerate() {
            y[2 * k] = x[t.vr];
            y[2 * k + 1] = x[t.vi];
        }
        y[Q3] = match &self.qv {
            Some(q) => x[q.q3],
            None => self.q3,
        };
        y
    }

    fn ports(&self, k: usize) -> Vec<Port> {
        let t = self.phases[k];
        let dual = self.duals.map(|d| (d[k].vr, d[k].vi));
        let mut ports = vec![Port::new(t.vr, t.vi, 1.0, dual)];
        if let Some(n) = self.neutral {
            let nd = self.neutral_dual.map(|d| (d.vr, d.vi));
            ports.push(Port::new(n.vr, n.vi, -1.0, nd));
        }
        ports
    }

    fn stamp_q3(&self, t: &mut Triplets, ctx: &StampCtx, q: &QvState) {
        t.stamp_y(q.q3, q.q3, 1.0);
        let h_bound = 1.0 + (q.h_init + 1.0) * (1.0 - ctx.h);
        match q.region {
            QvRegion::ClampHigh => t.stamp_j(q.q3, q.q_max * h_bound),
            QvRegion::ClampLow => t.stamp_j(q.q3, q.q_min * h_bound),
            QvRegion::Deadband => {}
            QvRegion::Region12 | QvRegion::Region34 => {
                let (vr, vi) = (ctx.x[q.sense.vr], ctx.x[q.sense.vi]);
                let vm = (vr * vr + vi * vi).sqrt();
                if vm == 0.0 {
                    return;
                }
                let (g, dg_pu, _) = q.curve.evaluate(vm / q.vnom);
                let dg = dg_pu / q.vnom;
                t.stamp_y(q.q3, q.sense.vr, -dg * vr / vm);
                t.stamp_y(q.q3, q.sense.vi, -dg * vi / vm);
                t.stamp_j(q.q3, g - dg * vm);
            }
        }
    }
}

impl Element for Ibdg {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        let ports = if self.neutral.is_some() { 2 } else { 1 };
        let (y, j) = match self.duals {
            Some(_) => law_nnz(6, ports, 6),
            None => law_nnz(NV, ports, 0),
        };
        let mut nnz = Nnz {
            y_nl: 3 * y,
            j_nl: 3 * j,
            ..Default::default()
        };
        if self.qv.is_some() {
            nnz.y_nl += 3;
            nnz.j_nl += 1;
        }
        nnz
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        let y = self.local(ctx.x);
        let mut vars = [0; 6];
        for (k, p) in self.phases.iter().enumerate() {
            vars[2 * k] = p.vr;
            vars[2 * k + 1] = p.vi;
        }
        for k in 0..3 {
            let law = self.law.phase_law(&y, k);
            let ports = self.ports(k);
            match &self.qv {
                Some(q) => {
                    let mut all = [0; NV];
                    all[..6].copy_from_slice(&vars);
                    all[Q3] = q.q3;
                    stamp_law(t, ctx.x, &law, &all, &ports, &[None; NV]);
                }
                None => {
                    let fixed: CurrentLaw<6> =
                        remap(&law, |j| if j < 6 { vec![(j, 1.0)] } else { Vec::new() });
                    let mut stat = [None; 6];
                    if let Some(d) = self.duals {
                        for (m, dm) in d.iter().enumerate() {
                            stat[2 * m] = Some(dm.vr);
                            stat[2 * m + 1] = Some(dm.vi);
                        }
                    }
                    stamp_law(t, ctx.x, &fixed, &vars, &ports, &stat);
                }
            }
        }
        if let Some(q) = &self.qv {
            self.stamp_q3(t, ctx, q);
        }
    }

    fn update_state(&mut self, x: &[f64]) -> bool {
        if self.law.kind == IbdgKind::Fpnsc {
            let (vp2, vn2) = sequence_magnitudes(&self.local(x));
            self.law.k1 = if (vp2 - vn2).abs() <= 1e-9 * vp2 {
                1.0
            } else {
                vp2 / (vp2 - vn2)
            };
            self.law.k2 = if vp2 + vn2 > 0.0 { vp2 / (vp2 + vn2) } else { 1.0 };
        }

        let q = match &mut self.qv {
            Some(q) => q,
            None => return false,
        };
        let v = volt(x, q.sense).norm() / q.vnom;
        let region = q.curve.region(v);
        if region == q.region {
            return false;
        }
        log::debug!("{}: {} -> {} at {:.5} pu", self.name, q.region, region, v);
        q.region = region;
        true
    }

    fn init(&self, x: &mut [f64]) {
        if let Some(q) = &self.qv {
            x[q.q3] = self.q3;
        }
    }

    fn tracked(&self, out: &mut Vec<usize>) {
        if let Some(q) = &self.qv {
            out.push(q.q3);
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let y = self.local(x);
        let currents = Phase::ABC
            .iter()
            .enumerate()
            .map(|(k, &p)| {
                let law = self.law.phase_law(&y, k);
                (p, -Complex64::new(law.value[0], law.value[1]))
            })
            .collect();
        Some(DeviceOutput::Ibdg {
            q3: y[Q3],
            region: self.region(),
            currents,
        })
    }
}
