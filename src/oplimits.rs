use crate::ecfsoln::EcfSolution;

use std::collections::BTreeMap;

pub const V_LOW: f64 = 0.95;
pub const V_HIGH: f64 = 1.05;

/// A phase voltage outside the operating band.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageViolation {
    pub bus: String,
    pub phase: String,
    pub pu: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpLimits {
    pub violations: Vec<VoltageViolation>,
    /// `max|V_p − V_avg|/V_avg` of every three-phase bus.
    pub unbalance: BTreeMap<String, f64>,
}

impl OpLimits {
    pub fn max_unbalance(&self) -> f64 {
        self.unbalance.values().fold(0.0, |m, &u| m.max(u))
    }
}

/// Checks phase voltage magnitudes against `[0.95, 1.05]` p.u. and computes
/// voltage unbalance at buses with all of A, B and C.
pub fn check_limits(soln: &EcfSolution) -> OpLimits {
    let mut out = OpLimits::default();
    for (bus, phases) in &soln.voltages {
        let vnom = match soln.vnom.get(bus) {
            Some(&v) if v > 0.0 => v,
            _ => continue,
        };
        let mut abc = Vec::with_capacity(3);
        for (phase, v) in phases {
            if phase == "N" {
                continue;
            }
            let pu = v[0].hypot(v[1]) / vnom;
            if !(V_LOW..=V_HIGH).contains(&pu) {
                out.violations.push(VoltageViolation {
                    bus: bus.clone(),
                    phase: phase.clone(),
                    pu,
                });
            }
            if matches!(phase.as_str(), "A" | "B" | "C") {
                abc.push(pu);
            }
        }
        if abc.len() == 3 {
            let avg = abc.iter().sum::<f64>() / 3.0;
            if avg > 0.0 {
                let dev = abc.iter().fold(0.0_f64, |m, v| m.max((v - avg).abs()));
                out.unbalance.insert(bus.clone(), dev / avg);
            }
        }
    }
    for v in &out.violations {
        log::warn!("voltage {:.4} p.u. at {} {} outside limits", v.pu, v.bus, v.phase);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::WarmStart;
    use crate::error::SolveStatus;

    fn soln(phases: &[(&str, f64, f64)]) -> EcfSolution {
        let vnom = 1000.0;
        let mut voltages = WarmStart::new();
        let mut bus = BTreeMap::new();
        for &(p, pu, deg) in phases {
            let v = num_complex::Complex64::from_polar(pu * vnom, deg.to_radians());
            bus.insert(p.to_string(), [v.re, v.im]);
        }
        voltages.insert("b1".to_string(), bus);
        EcfSolution {
            case: "limits".into(),
            status: SolveStatus::Converged,
            iterations: 1,
            steps: 1,
            error: 0.0,
            residual: 0.0,
            load_factor: 1.0,
            voltages,
            vnom: [("b1".to_string(), vnom)].into_iter().collect(),
            violations: BTreeMap::new(),
            devices: Vec::new(),
            x: Vec::new(),
        }
    }

    #[test]
    fn band_edges_are_inside() {
        let s = soln(&[("A", 0.95, 0.0), ("B", 1.05, 0.0), ("C", 1.0, 120.0), ("N", 0.0, 0.0)]);
        let limits = check_limits(&s);
        assert!(limits.violations.is_empty());
    }

    #[test]
    fn low_phase_is_reported_with_unbalance() {
        let s = soln(&[("A", 0.9, 0.0), ("B", 1.0, -120.0), ("C", 1.0, 120.0)]);
        let limits = check_limits(&s);
        assert_eq!(limits.violations.len(), 1);
        assert_eq!(limits.violations[0].phase, "A");
        assert!((limits.violations[0].pu - 0.9).abs() < 1e-12);

        // average 29/30, largest deviation 1/15
        let expected = (1.0 / 15.0) / (29.0 / 30.0);
        assert!((limits.max_unbalance() - expected).abs() < 1e-12);
    }

    #[test]
    fn two_phase_bus_has_no_unbalance() {
        let s = soln(&[("A", 1.0, 0.0), ("B", 1.0, -120.0)]);
        assert!(check_limits(&s).unbalance.is_empty());
    }
}
