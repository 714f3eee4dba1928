use super::stamp::{Series, Winding, COUPLED_NNZ, RATIO_NNZ, WINDING_NNZ};
use super::{volt, DeviceOutput, Element, Nnz, StampCtx};
use crate::case::{cplx, parse_phases, RegulatorData, RegulatorType, TapControl};
use crate::control::reg::{nearest_tap, tap_ratio};
use crate::control::RatioControl;
use crate::error::SolveError;
use crate::index::{IndexAllocator, NodeRegistry, Phase, Terminal};
use crate::triplet::Triplets;

#[derive(Debug, Clone)]
struct RegPhase {
    phase: Phase,
    winding: Winding,
    series: Option<Series>,
    ratio: Ratio,
}

#[derive(Debug, Clone, Copy)]
enum Ratio {
    Fixed(f64),
    /// Ratio and sensed per-unit voltage magnitude as unknowns.
    Controlled {
        ar: usize,
        vmag: usize,
        sense: Terminal,
        base: f64,
    },
}

/// Wye-connected step-voltage regulator, one ideal winding per phase with
/// `V_from = a_R·V_to`.
#[derive(Debug, Clone)]
pub struct Regulator {
    name: String,
    kind: RegulatorType,
    step: f64,
    max_taps: i32,
    control: Option<RatioControl>,
    phases: Vec<RegPhase>,
    grounded: Vec<usize>,
}

impl Regulator {
    pub fn new(
        data: &RegulatorData,
        nodes: &NodeRegistry,
        alloc: &mut IndexAllocator,
    ) -> Result<Self, SolveError> {
        let from = nodes.get(&data.from, &data.name)?;
        let to = nodes.get(&data.to, &data.name)?;
        let hot = parse_phases(&data.phases, &data.name)?.hot();

        let control = match data.control {
            TapControl::Fixed => None,
            TapControl::Patching => {
                if alloc.stamp_dual() {
                    return Err(SolveError::config(
                        &data.name,
                        "controlled regulators do not support dual stamping",
                    ));
                }
                Some(RatioControl::new(
                    data.v_band_center,
                    data.v_min,
                    data.v_max,
                    data.step,
                    data.max_taps,
                    &data.name,
                )?)
            }
        };
        let y = data
            .z
            .map(|z| cplx(&z))
            .filter(|z| z.norm() > 0.0)
            .map(|z| z.inv());

        let mut phases = Vec::with_capacity(hot.len());
        for (k, &p) in hot.iter().enumerate() {
            let to_p = to.require(p, &data.name)?;
            let (s_pos, series) = match y {
                Some(y) => {
                    let inner = alloc.terminal();
                    (inner, Some(Series { a: inner, b: to_p, y }))
                }
                None => (to_p, None),
            };
            let winding = Winding {
                p_pos: Some(from.require(p, &data.name)?),
                p_neg: from.neutral(),
                s_pos: Some(s_pos),
                s_neg: to.neutral(),
                is: alloc.terminal(),
            };
            let ratio = match control {
                None => {
                    let tap = data.taps.get(k).copied().unwrap_or(0);
                    Ratio::Fixed(tap_ratio(data.reg_type, data.step, tap))
                }
                Some(_) => Ratio::Controlled {
                    ar: alloc.next(),
                    vmag: alloc.next(),
                    sense: to_p,
                    base: data.pt_base.unwrap_or(to.vnom),
                },
            };
            phases.push(RegPhase {
                phase: p,
                winding,
                series,
                ratio,
            });
        }

        Ok(Self {
            name: data.name.clone(),
            kind: data.reg_type,
            step: data.step,
            max_taps: data.max_taps,
            control,
            phases,
            grounded: vec![from.id, to.id],
        })
    }

    pub fn grounded_buses(&self) -> &[usize] {
        &self.grounded
    }

    fn ratio(&self, x: &[f64], ph: &RegPhase) -> f64 {
        match ph.ratio {
            Ratio::Fixed(a) => a,
            Ratio::Controlled { ar, .. } => x[ar],
        }
    }
}

impl Element for Regulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn nnz(&self) -> Nnz {
        let mut nnz = Nnz::default();
        for ph in &self.phases {
            nnz.y_lin += WINDING_NNZ;
            if ph.series.is_some() {
                nnz.y_lin += COUPLED_NNZ;
                nnz.y_hom += COUPLED_NNZ;
            }
            if let Ratio::Controlled { .. } = ph.ratio {
                nnz.y_nl += RATIO_NNZ.0 + 3 + 2;
                nnz.j_nl += RATIO_NNZ.1 + 2;
            }
        }
        nnz
    }

    fn stamp_linear(&self, t: &mut Triplets) {
        for ph in &self.phases {
            match ph.ratio {
                Ratio::Fixed(a) => ph.winding.stamp(t, a),
                Ratio::Controlled { .. } => ph.winding.stamp_primary(t),
            }
            if let Some(s) = &ph.series {
                s.stamp(t);
            }
        }
    }

    fn stamp_homotopy(&self, t: &mut Triplets, s: f64, g_h: f64, b_h: f64) {
        for ph in &self.phases {
            if let Some(br) = &ph.series {
                br.stamp_shadow(t, s, g_h, b_h);
            }
        }
    }

    fn stamp_nonlinear(&self, t: &mut Triplets, ctx: &StampCtx) {
        let control = match &self.control {
            Some(c) => c,
            None => return,
        };
        let x = ctx.x;
        let s = 1.0 - ctx.h;
        for ph in &self.phases {
            let (ar, vmag, sense, base) = match ph.ratio {
                Ratio::Controlled {
                    ar,
                    vmag,
                    sense,
                    base,
                } => (ar, vmag, sense, base),
                Ratio::Fixed(_) => continue,
            };
            ph.winding.stamp_ratio(t, x, ar);

            // sensed magnitude: (Vr² + Vi²)/base² − Vmag² = 0
            let (vr, vi, vm) = (x[sense.vr], x[sense.vi], x[vmag]);
            let b2 = base * base;
            t.stamp_y(vmag, sense.vr, 2.0 * vr / b2);
            t.stamp_y(vmag, sense.vi, 2.0 * vi / b2);
            t.stamp_y(vmag, vmag, -2.0 * vm);
            t.stamp_j(vmag, (vr * vr + vi * vi) / b2 - vm * vm);

            // a_R = g(Vmag), relaxed toward 1 while s > 0
            let (g, dg) = control.eval(vm);
            let (g, dg) = (g + s * (1.0 - g), (1.0 - s) * dg);
            t.stamp_y(ar, ar, 1.0);
            t.stamp_y(ar, vmag, -dg);
            t.stamp_j(ar, g - dg * vm);
        }
    }

    fn init(&self, x: &mut [f64]) {
        for ph in &self.phases {
            if let Ratio::Controlled { ar, vmag, .. } = ph.ratio {
                x[ar] = 1.0;
                x[vmag] = 1.0;
            }
        }
    }

    fn tracked(&self, out: &mut Vec<usize>) {
        for ph in &self.phases {
            if let Ratio::Controlled { ar, .. } = ph.ratio {
                out.push(ar);
            }
        }
    }

    fn output(&self, x: &[f64], _lf: f64) -> Option<DeviceOutput> {
        let mut ratios = Vec::with_capacity(self.phases.len());
        let mut taps = Vec::with_capacity(self.phases.len());
        let mut clamped = false;
        for ph in &self.phases {
            let a = self.ratio(x, ph);
            ratios.push((ph.phase, a));
            taps.push((ph.phase, nearest_tap(self.kind, self.step, self.max_taps, a)));
            if let (Some(c), Ratio::Controlled { sense, base, .. }) = (&self.control, ph.ratio) {
                clamped |= c.clamped(volt(x, sense).norm() / base);
            }
        }
        Some(DeviceOutput::Regulator {
            ratios,
            taps,
            clamped,
        })
    }
}
