use super::law::{
    gb_law, law_nnz, pq_law_var, remap, stamp_complementarity, stamp_law, CurrentLaw, Port,
    COMPLEMENTARITY_NNZ,
};
use super::{Bound, DeviceOutput, Element, LimitClass, Nnz, StampCtx};
use crate::ecfopt::{Objective, SourceType};
use crate::error::SolveError;
use crate::index::{Bus, IndexAllocator, Phase, Terminal};
use crate::triplet::Triplets;

use num_complex::Complex64;

/// Initial value of split primals and their multipliers.
const SPLIT_INIT: f64 = 1e-3;

/// Primals of one infeasibility source: the pair `(Ir, Ii)`, `(P, Q)` or
/// `(G, B)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceVars {
    /// Free pair under the quadratic objective.
    Free { u: [usize; 2] },
    /// `u = u⁺ − u⁻` with `u± ≥ 0` and their lower-bound multipliers, under
    /// the absolute-value objective.
    Split {
        pos: [usize; 2],
        neg: [usize; 2],
        mu_pos: [usize; 2],
        mu_neg: [usize; 2],
    },
}

impl SourceVars {
    fn new(obj: Objective, alloc: &mut IndexAllocator) -> Self {
        let mut pair = || [alloc.next(), alloc.next()];
        match obj {
            Objective::L2 => SourceVars::Free { u: pair() },
            Objective::L1 => SourceVars::Split {
                pos: pair(),
                neg: pair(),
                mu_pos: pair(),
                mu_neg: pair(),
            },
        }
    }

    pub fn values(&self, x: &[f64]) -> [f64; 2] {
        match self {
            SourceVars::Free { u } => [x[u[0]], x[u[1]]],
            SourceVars::Split { pos, neg, .. } => {
                [x[pos[0]] - x[neg[0]], x[pos[1]] - x[neg[1]]]
            }
        }
    }
}

/// Auxiliary injection at one bus phase with the stationarity rows of its
/// primals. Requires dual stamping.
#[derive(Debug, Clone)]
pub struct InfeasSource {
    name: String,
    bus: usize,
    phase: Phase,
    v: Terminal,
    lam: Terminal,
    source: SourceType,
    weight: f64,
    vars: SourceVars,
}

impl InfeasSource {
    pub fn new(
        bus: &Bus,
        phase: Phase,
        source: SourceType,
        obj: Objective,
        weight: f64,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let name = format!("{}_{}_infeas", bus.name, phase);
        let v = bus.require(phase, &name)?;
        let lam = bus.dual(phase).ok_or_else(|| {
            SolveError::config(&name, "infeasibility sources need dual stamping")
        })?;
        // neutral sources are always current injections
        let source = if phase == Phase::N {
            SourceType::Current
        } else {
            source
        };
        Ok(Self {
            name,
            bus: bus.id,
            phase,
            v,
            lam,
            source,
            weight,
            vars: SourceVars::new(obj, alloc),
        })
    }

    pub fn bus(&self) -> usize {
        self.bus
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn vars(&self) -> SourceVars {
        self.vars
    }

    fn law(&self, x: &[f64]) -> CurrentLaw<4> {
        let [a, b] = self.vars.values(x);
        let (vr, vi) = (x[self.v.vr], x[self.v.vi]);
        match self.source {
            SourceType::PQ => pq_law_var(a, b, vr, vi),
            SourceType::GB => gb_law(a, b, vr, vi),
            SourceType::Current => {
                let mut law = CurrentLaw::<4>::default();
                law.value = [-a, -b];
                law.grad[0][2] = -1.0;
                law.grad[1][3] = -1.0;
                law
            }
        }
    }

    /// Injected current at the iterate.
    pub fn current(&self, x: &[f64]) -> Complex64 {
        let law = self.law(x);
        -Complex64::new(law.value[0], law.value[1])
    }

    fn port(&self) -> Port {
        Port::new(
            self.v.vr,
            self.v.vi,
            1.0,
            Some((self.lam.vr, self.lam.vi)),
        )
    }
}

impl Element for InfeasSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        let mut nnz = Nnz::default();
        let split = matches!(self.vars, SourceVars::Split { .. });
        match (self.source, split) {
            (SourceType::Current, false) => nnz.y_lin += 6,
            (SourceType::Current, true) => nnz.y_lin += 12,
            (_, false) => {
                nnz.y_lin += 2;
                let (y, j) = law_nnz(4, 1, 4);
                nnz.y_nl += y;
                nnz.j_nl += j;
            }
            (_, true) => {
                let (y, j) = law_nnz(6, 1, 6);
                nnz.y_nl += y;
                nnz.j_nl += j;
            }
        }
        if split {
            nnz.y_lin += 4;
            nnz.j_lin += 4;
            nnz.y_nl += 4 * COMPLEMENTARITY_NNZ.0;
            nnz.j_nl += 4 * COMPLEMENTARITY_NNZ.1;
        }
        nnz
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        let rows = [self.v.vr, self.v.vi];
        let lam = [self.lam.vr, self.lam.vi];
        let c = self.weight;
        match self.vars {
            SourceVars::Free { u } => {
                for k in 0..2 {
                    t.stamp_y(u[k], u[k], c);
                    if self.source == SourceType::Current {
                        t.stamp_y(rows[k], u[k], -1.0);
                        t.stamp_y(u[k], lam[k], -1.0);
                    }
                }
            }
            SourceVars::Split {
                pos,
                neg,
                mu_pos,
                mu_neg,
            } => {
                for k in 0..2 {
                    // c ∓ λ·(∂I/∂u) − μ = 0
                    t.stamp_y(pos[k], mu_pos[k], -1.0);
                    t.stamp_y(neg[k], mu_neg[k], -1.0);
                    t.stamp_j(pos[k], -c);
                    t.stamp_j(neg[k], -c);
                    if self.source == SourceType::Current {
                        t.stamp_y(rows[k], pos[k], -1.0);
                        t.stamp_y(rows[k], neg[k], 1.0);
                        t.stamp_y(pos[k], lam[k], -1.0);
                        t.stamp_y(neg[k], lam[k], 1.0);
                    }
                }
            }
        }
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        let x = ctx.x;
        if self.source != SourceType::Current {
            let law = self.law(x);
            let v = [self.v.vr, self.v.vi];
            let l = [Some(self.lam.vr), Some(self.lam.vi)];
            match self.vars {
                SourceVars::Free { u } => {
                    stamp_law(
                        t,
                        x,
                        &law,
                        &[v[0], v[1], u[0], u[1]],
                        &[self.port()],
                        &[l[0], l[1], Some(u[0]), Some(u[1])],
                    );
                }
                SourceVars::Split { pos, neg, .. } => {
                    let split: CurrentLaw<6> = remap(&law, |j| match j {
                        0 | 1 => vec![(j, 1.0)],
                        2 => vec![(2, 1.0), (3, -1.0)],
                        _ => vec![(4, 1.0), (5, -1.0)],
                    });
                    let vars = [v[0], v[1], pos[0], neg[0], pos[1], neg[1]];
                    stamp_law(
                        t,
                        x,
                        &split,
                        &vars,
                        &[self.port()],
                        &[l[0], l[1], Some(vars[2]), Some(vars[3]), Some(vars[4]), Some(vars[5])],
                    );
                }
            }
        }
        if let SourceVars::Split {
            pos,
            neg,
            mu_pos,
            mu_neg,
        } = self.vars
        {
            for k in 0..2 {
                stamp_complementarity(t, x, mu_pos[k], pos[k], 0.0, 1.0, ctx.cs_tol);
                stamp_complementarity(t, x, mu_neg[k], neg[k], 0.0, 1.0, ctx.cs_tol);
            }
        }
    }

    fn init(&self, x: &mut [f64]) {
        if let SourceVars::Split {
            pos,
            neg,
            mu_pos,
            mu_neg,
        } = self.vars
        {
            for i in pos.iter().chain(&neg).chain(&mu_pos).chain(&mu_neg) {
                x[*i] = SPLIT_INIT;
            }
        }
    }

    fn bounds(&self, out: &mut Vec<Bound>) {
        if let SourceVars::Split {
            pos,
            neg,
            mu_pos,
            mu_neg,
        } = self.vars
        {
            for k in 0..2 {
                out.push(Bound::lower(pos[k], LimitClass::Primal));
                out.push(Bound::lower(neg[k], LimitClass::Primal));
                out.push(Bound::lower(mu_pos[k], LimitClass::Dual));
                out.push(Bound::lower(mu_neg[k], LimitClass::Dual));
            }
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        Some(DeviceOutput::Infeasibility {
            phase: self.phase,
            current: self.current(x),
            values: self.vars.values(x).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{NodeRegistry, PhaseMask};

    fn setup(obj: Objective, source: SourceType) -> (InfeasSource, IndexAllocator) {
        let mut alloc = IndexAllocator::new(true);
        let mut reg = NodeRegistry::default();
        reg.add(&mut alloc, "n1", PhaseMask::ABCN, false, 2401.0, false)
            .unwrap();
        let bus = reg.get("n1", "test").unwrap().clone();
        let src = InfeasSource::new(&bus, Phase::A, source, obj, 1.0, &mut alloc).unwrap();
        (src, alloc)
    }

    #[test]
    fn sources_need_duals() {
        let mut alloc = IndexAllocator::new(false);
        let mut reg = NodeRegistry::default();
        reg.add(&mut alloc, "n1", PhaseMask::ABCN, false, 2401.0, false)
            .unwrap();
        let bus = reg.get("n1", "test").unwrap();
        let err = InfeasSource::new(bus, Phase::A, SourceType::Current, Objective::L2, 1.0, &mut alloc);
        assert!(matches!(err, Err(SolveError::Config { .. })));
    }

    #[test]
    fn neutral_sources_inject_current() {
        let mut alloc = IndexAllocator::new(true);
        let mut reg = NodeRegistry::default();
        reg.add(&mut alloc, "n1", PhaseMask::ABCN, false, 2401.0, false)
            .unwrap();
        let bus = reg.get("n1", "test").unwrap();
        let src = InfeasSource::new(bus, Phase::N, SourceType::PQ, Objective::L2, 1.0, &mut alloc)
            .unwrap();
        assert_eq!(src.source, SourceType::Current);
    }

    #[test]
    fn split_stamps_stay_within_reservation() {
        for source in [SourceType::Current, SourceType::PQ, SourceType::GB] {
            let (src, alloc) = setup(Objective::L1, source);
            let mut x = vec![0.0; alloc.len()];
            src.init(&mut x);
            x[src.v.vr] = 2401.0;
            x[src.v.vi] = -3.0;
            x[src.lam.vr] = 0.2;
            x[src.lam.vi] = -0.1;
            let nnz = src.nnz();
            let mut lin = Triplets::with_capacity(nnz.y_lin, nnz.j_lin);
            src.stamp_linear(&mut lin);
            let mut nl = Triplets::with_capacity(nnz.y_nl, nnz.j_nl);
            let ctx = StampCtx {
                x: &x,
                lf: 1.0,
                h: 1.0,
                cs_tol: 1e-6,
            };
            src.stamp_nonlinear(&mut nl, &ctx);
            assert!(!lin.overflowed() && !nl.overflowed(), "{:?}", source);
            let mut bounds = Vec::new();
            src.bounds(&mut bounds);
            assert_eq!(bounds.len(), 8);
        }
    }

    #[test]
    fn current_source_injects_its_primals() {
        let (src, alloc) = setup(Objective::L2, SourceType::Current);
        let mut x = vec![0.0; alloc.len()];
        if let SourceVars::Free { u } = src.vars() {
            x[u[0]] = 3.0;
            x[u[1]] = -1.0;
        }
        assert_eq!(src.current(&x), Complex64::new(3.0, -1.0));
    }
}
