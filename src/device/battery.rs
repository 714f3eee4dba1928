use super::law::{
    across, law_nnz, pq_law_var, remap, stamp_complementarity, stamp_law, CurrentLaw, Port,
    COMPLEMENTARITY_NNZ,
};
use super::{Bound, DeviceOutput, Element, LimitClass, Nnz, StampCtx};
use crate::case::{parse_phases, BatteryData};
use crate::error::SolveError;
use crate::index::{IndexAllocator, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

/// Initial value of bounded primals and multipliers.
const INTERIOR: f64 = 1e-3;

/// Parameters of one period's solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryPeriod {
    /// Energy price of the period.
    pub price: f64,
    /// State of charge at the end of the previous period.
    pub b_prev: f64,
    /// Multiplier of the next period's dynamics row.
    pub lb_next: f64,
}

#[derive(Debug, Clone, Copy)]
struct BatteryPhase {
    v: Terminal,
    lam: Terminal,
    pch: usize,
    pd: usize,
    mu_ch: usize,
    mu_d: usize,
    mu_ch_up: usize,
    mu_d_up: usize,
}

/// Storage unit of a multi-period run: per-phase charge and discharge
/// powers, one state of charge and the optimality rows coupling them.
#[derive(Debug, Clone)]
pub struct Battery {
    name: String,
    phases: Vec<BatteryPhase>,
    neutral: Option<(Terminal, Terminal)>,
    b: usize,
    lam_b: usize,
    mu_b: usize,
    mu_b_up: usize,
    b_max: f64,
    b_init: f64,
    p_max: f64,
    m_ch: f64,
    m_d: f64,
    c_ch: f64,
    c_d: f64,
    period: BatteryPeriod,
}

impl Battery {
    pub fn new(
        data: &BatteryData,
        nodes: &NodeRegistry,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let name = data.name.as_str();
        let bus = nodes.get(&data.bus, name)?;
        if bus.triplex {
            return Err(SolveError::config(
                name,
                "batteries at split-phase buses are not supported",
            ));
        }
        if !(data.b_max > 0.0 && data.p_max > 0.0) {
            return Err(SolveError::config(name, "capacity and power limit must be positive"));
        }
        let need_dual = |p: Phase| {
            bus.dual(p)
                .ok_or_else(|| SolveError::config(name, "batteries need dual stamping"))
        };

        let neutral = match bus.neutral() {
            Some(n) => Some((n, need_dual(Phase::N)?)),
            None => None,
        };
        let mut phases = Vec::new();
        for p in parse_phases(&data.phases, name)?.hot() {
            phases.push(BatteryPhase {
                v: bus.require(p, name)?,
                lam: need_dual(p)?,
                pch: alloc.next(),
                pd: alloc.next(),
                mu_ch: alloc.next(),
                mu_d: alloc.next(),
                mu_ch_up: alloc.next(),
                mu_d_up: alloc.next(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            phases,
            neutral,
            b: alloc.next(),
            lam_b: alloc.next(),
            mu_b: alloc.next(),
            mu_b_up: alloc.next(),
            b_max: data.b_max,
            b_init: data.b_init,
            p_max: data.p_max,
            m_ch: data.m_ch,
            m_d: data.m_d,
            c_ch: data.c_ch,
            c_d: data.c_d,
            period: BatteryPeriod {
                price: 1.0,
                b_prev: data.b_init,
                lb_next: 0.0,
            },
        })
    }

    pub fn set_period(&mut self, period: BatteryPeriod) {
        self.period = period;
    }

    pub fn b_init(&self) -> f64 {
        self.b_init
    }

    pub fn soc(&self, x: &[f64]) -> f64 {
        x[self.b]
    }

    /// Multiplier of the dynamics row.
    pub fn dual(&self, x: &[f64]) -> f64 {
        x[self.lam_b]
    }

    /// Residual of `B − B_prev − M_ch·ΣP_ch + M_d·ΣP_d`.
    pub fn dynamics_residual(&self, x: &[f64]) -> f64 {
        let mut r = x[self.b] - self.period.b_prev;
        for ph in &self.phases {
            r += -self.m_ch * x[ph.pch] + self.m_d * x[ph.pd];
        }
        r
    }

    fn law_nnz(&self) -> (usize, usize) {
        match self.neutral {
            Some(_) => law_nnz(6, 2, 6),
            None => law_nnz(4, 1, 4),
        }
    }

    fn stamp_phase(&self, t: &mut Triplets, x: &[f64], ph: &BatteryPhase) {
        let p = x[ph.pch] - x[ph.pd];
        let port = Port::new(ph.v.vr, ph.v.vi, 1.0, Some((ph.lam.vr, ph.lam.vi)));
        match self.neutral {
            None => {
                let law = pq_law_var(p, 0.0, x[ph.v.vr], x[ph.v.vi]);
                let law: CurrentLaw<4> = remap(&law, |j| match j {
                    0 | 1 => vec![(j, 1.0)],
                    2 => vec![(2, 1.0), (3, -1.0)],
                    _ => Vec::new(),
                });
                stamp_law(
                    t,
                    x,
                    &law,
                    &[ph.v.vr, ph.v.vi, ph.pch, ph.pd],
                    &[port],
                    &[Some(ph.lam.vr), Some(ph.lam.vi), Some(ph.pch), Some(ph.pd)],
                );
            }
            Some((n, ln)) => {
                let vr = x[ph.v.vr] - x[n.vr];
                let vi = x[ph.v.vi] - x[n.vi];
                let law: CurrentLaw<6> = across(&pq_law_var(p, 0.0, vr, vi), 2);
                let law: CurrentLaw<6> = remap(&law, |j| match j {
                    0..=3 => vec![(j, 1.0)],
                    4 => vec![(4, 1.0), (5, -1.0)],
                    _ => Vec::new(),
                });
                stamp_law(
                    t,
                    x,
                    &law,
                    &[ph.v.vr, ph.v.vi, n.vr, n.vi, ph.pch, ph.pd],
                    &[port, Port::new(n.vr, n.vi, -1.0, Some((ln.vr, ln.vi)))],
                    &[
                        Some(ph.lam.vr),
                        Some(ph.lam.vi),
                        Some(ln.vr),
                        Some(ln.vi),
                        Some(ph.pch),
                        Some(ph.pd),
                    ],
                );
            }
        }
    }
}

impl Element for Battery {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        let n = self.phases.len();
        let (ly, lj) = self.law_nnz();
        Nnz {
            y_lin: 1 + 8 * n + 3,
            j_lin: 0,
            y_hom: 0,
            y_nl: n * ly + (4 * n + 2) * COMPLEMENTARITY_NNZ.0,
            j_nl: n * (lj + 2) + 2 + (4 * n + 2) * COMPLEMENTARITY_NNZ.1,
        }
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        // B − M_ch·ΣP_ch + M_d·ΣP_d = B_prev
        t.stamp_y(self.lam_b, self.b, 1.0);
        for ph in &self.phases {
            t.stamp_y(self.lam_b, ph.pch, -self.m_ch);
            t.stamp_y(self.lam_b, ph.pd, self.m_d);

            t.stamp_y(ph.pch, self.lam_b, -self.m_ch);
            t.stamp_y(ph.pch, ph.mu_ch, -1.0);
            t.stamp_y(ph.pch, ph.mu_ch_up, 1.0);

            t.stamp_y(ph.pd, self.lam_b, self.m_d);
            t.stamp_y(ph.pd, ph.mu_d, -1.0);
            t.stamp_y(ph.pd, ph.mu_d_up, 1.0);
        }
        t.stamp_y(self.b, self.lam_b, 1.0);
        t.stamp_y(self.b, self.mu_b, -1.0);
        t.stamp_y(self.b, self.mu_b_up, 1.0);
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        let x = ctx.x;
        let price = self.period.price;
        t.stamp_j(self.lam_b, self.period.b_prev);
        t.stamp_j(self.b, self.period.lb_next);
        for ph in &self.phases {
            self.stamp_phase(t, x, ph);
            t.stamp_j(ph.pch, -price * self.c_ch);
            t.stamp_j(ph.pd, -price * self.c_d);

            stamp_complementarity(t, x, ph.mu_ch, ph.pch, 0.0, 1.0, ctx.cs_tol);
            stamp_complementarity(t, x, ph.mu_d, ph.pd, 0.0, 1.0, ctx.cs_tol);
            stamp_complementarity(t, x, ph.mu_ch_up, ph.pch, self.p_max, -1.0, ctx.cs_tol);
            stamp_complementarity(t, x, ph.mu_d_up, ph.pd, self.p_max, -1.0, ctx.cs_tol);
        }
        stamp_complementarity(t, x, self.mu_b, self.b, 0.0, 1.0, ctx.cs_tol);
        stamp_complementarity(t, x, self.mu_b_up, self.b, self.b_max, -1.0, ctx.cs_tol);
    }

    fn init(&self, x: &mut [f64]) {
        for ph in &self.phases {
            for i in [ph.pch, ph.pd, ph.mu_ch, ph.mu_d, ph.mu_ch_up, ph.mu_d_up] {
                x[i] = INTERIOR;
            }
        }
        let margin = INTERIOR * self.b_max;
        x[self.b] = self.period.b_prev.max(margin).min(self.b_max - margin);
        x[self.mu_b] = INTERIOR;
        x[self.mu_b_up] = INTERIOR;
    }

    fn bounds(&self, out: &mut Vec<Bound>) {
        for ph in &self.phases {
            out.push(Bound::lower(ph.pch, LimitClass::Primal));
            out.push(Bound::lower(ph.pd, LimitClass::Primal));
            out.push(Bound::upper(ph.pch, self.p_max));
            out.push(Bound::upper(ph.pd, self.p_max));
            for mu in [ph.mu_ch, ph.mu_d, ph.mu_ch_up, ph.mu_d_up] {
                out.push(Bound::lower(mu, LimitClass::Dual));
            }
        }
        out.push(Bound::lower(self.b, LimitClass::Primal));
        out.push(Bound::upper(self.b, self.b_max));
        out.push(Bound::lower(self.mu_b, LimitClass::Dual));
        out.push(Bound::lower(self.mu_b_up, LimitClass::Dual));
    }

    fn tracked(&self, out: &mut Vec<usize>) {
        out.push(self.b);
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        Some(DeviceOutput::Battery {
            soc: x[self.b],
            charge: self.phases.iter().map(|p| x[p.pch]).collect(),
            discharge: self.phases.iter().map(|p| x[p.pd]).collect(),
            dual: x[self.lam_b],
        })
    }
}
