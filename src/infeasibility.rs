//! Infeasibility objective and the normalized per-bus report.

use crate::build::CaseContext;
use crate::device::Device;
use crate::ecfopt::Objective;

use std::collections::BTreeMap;

/// Apparent power base of the normalized currents.
pub const S_BASE: f64 = 10e6;
/// Normalized currents below this are reported as zero.
const REPORT_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfeasReport {
    /// `½‖u‖²` under L2 or `Σ|u|` under L1 over every source primal.
    pub objective: f64,
    /// Largest injected current magnitude per bus over `I_base`.
    pub normalized: BTreeMap<String, f64>,
}

impl InfeasReport {
    /// Bus with the largest normalized injection, if any is nonzero.
    pub fn worst(&self) -> Option<(&str, f64)> {
        self.normalized
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, &v)| (k.as_str(), v))
    }

    pub fn is_feasible(&self) -> bool {
        self.worst().is_none()
    }
}

/// Base current `S_base/(√3·V_LL)` of a bus with line-to-ground nominal `vnom`.
pub fn base_current(vnom: f64) -> f64 {
    let v_ll = 3.0_f64.sqrt() * vnom;
    S_BASE / (3.0_f64.sqrt() * v_ll)
}

/// Evaluates the infeasibility objective and injections at `x`.
pub fn infeasibility_report(ctx: &CaseContext, x: &[f64], obj: Objective) -> InfeasReport {
    let mut report = InfeasReport::default();
    for bus in ctx.nodes.buses() {
        report.normalized.insert(bus.name.clone(), 0.0);
    }

    for d in &ctx.devices {
        let src = match d {
            Device::Infeas(s) => s,
            _ => continue,
        };
        let u = src.vars().values(x);
        report.objective += match obj {
            Objective::L2 => 0.5 * (u[0] * u[0] + u[1] * u[1]),
            Objective::L1 => u[0].abs() + u[1].abs(),
        };

        let bus = ctx.nodes.bus(src.bus());
        let i_pu = src.current(x).norm() / base_current(bus.vnom);
        if let Some(v) = report.normalized.get_mut(&bus.name) {
            *v = v.max(i_pu);
        }
    }

    for v in report.normalized.values_mut() {
        if *v < REPORT_FLOOR {
            *v = 0.0;
        }
    }
    match report.worst() {
        Some((bus, v)) => log::info!(
            "infeasibility objective {:.4e}, largest injection {:.4e} p.u. at {}",
            report.objective,
            v,
            bus
        ),
        None => log::info!("case is feasible (objective {:.4e})", report.objective),
    }
    report
}
