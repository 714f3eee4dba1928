use crate::build::CaseContext;
use crate::case::{phase_key, WarmStart};
use crate::device::{Device, DeviceOutput};
use crate::error::SolveStatus;
use crate::index::Phase;
use crate::newton::NewtonOutcome;

use num_complex::Complex64;
use std::collections::BTreeMap;

/// Computed output of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub kind: &'static str,
    pub name: String,
    pub output: DeviceOutput,
}

/// Solution of a single solve: bus voltages, device outputs and the
/// convergence record.
#[derive(Debug, Clone)]
pub struct EcfSolution {
    pub case: String,
    pub status: SolveStatus,
    pub iterations: usize,
    pub steps: usize,
    pub error: f64,
    pub residual: f64,
    pub load_factor: f64,
    /// Voltages by bus and phase, in the warm-start layout.
    pub voltages: WarmStart,
    /// Nominal line-to-ground voltage of each bus.
    pub vnom: BTreeMap<String, f64>,
    /// Largest current mismatch over the voltage rows of each bus.
    pub violations: BTreeMap<String, f64>,
    pub devices: Vec<DeviceRecord>,
    /// Final iterate.
    pub x: Vec<f64>,
}

impl EcfSolution {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn voltage(&self, bus: &str, phase: &str) -> Option<Complex64> {
        self.voltages
            .get(bus)
            .and_then(|p| p.get(phase))
            .map(|v| Complex64::new(v[0], v[1]))
    }

    /// Voltage magnitude in per unit of the bus nominal.
    pub fn magnitude_pu(&self, bus: &str, phase: &str) -> Option<f64> {
        let vnom = *self.vnom.get(bus)?;
        self.voltage(bus, phase).map(|v| v.norm() / vnom)
    }

    pub fn output(&self, name: &str) -> Option<&DeviceOutput> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .map(|d| &d.output)
    }

    /// Complex power supplied by all slack sources.
    pub fn slack_power(&self) -> Complex64 {
        self.devices
            .iter()
            .filter(|d| d.kind == "slack")
            .filter_map(|d| match d.output {
                DeviceOutput::Power { power } => Some(-power),
                _ => None,
            })
            .sum()
    }

    /// Largest per-bus current mismatch.
    pub fn max_violation(&self) -> f64 {
        self.violations.values().fold(0.0, |m, &v| m.max(v))
    }
}

/// Collects the solution record of a solve.
pub fn ecfsoln(ctx: &CaseContext, case: &str, out: &NewtonOutcome, lf: f64) -> EcfSolution {
    let x = &out.x;
    let mut voltages = WarmStart::new();
    let mut vnom = BTreeMap::new();
    let mut violations = BTreeMap::new();

    for bus in ctx.nodes.buses() {
        let mut phases = BTreeMap::new();
        let mut worst: f64 = 0.0;
        for p in Phase::ALL {
            let t = match bus.terminal(p) {
                Some(t) => t,
                None => continue,
            };
            phases.insert(phase_key(p, bus.triplex), [x[t.vr], x[t.vi]]);
            // stationarity rows of the bus voltages sit at their dual indices
            let rows = bus.dual(p).unwrap_or(t);
            for r in [t.vr, t.vi, rows.vr, rows.vi] {
                if let Some(v) = out.residuals.get(r) {
                    worst = worst.max(v.abs());
                }
            }
        }
        voltages.insert(bus.name.clone(), phases);
        vnom.insert(bus.name.clone(), bus.vnom);
        violations.insert(bus.name.clone(), worst);
    }

    let devices = ctx
        .devices
        .iter()
        .filter_map(|d| {
            d.output(x, lf).map(|output| DeviceRecord {
                kind: d.kind(),
                name: d.name().to_string(),
                output,
            })
        })
        .collect();

    for d in &ctx.devices {
        if let Device::Switch(_) = d {
            if let Some(DeviceOutput::Switch { blown: true, .. }) = d.output(x, lf) {
                log::warn!("fuse {} blown", d.name());
            }
        }
    }

    EcfSolution {
        case: case.to_string(),
        status: out.status,
        iterations: out.iterations,
        steps: out.steps,
        error: out.error,
        residual: out.residual,
        load_factor: lf,
        voltages,
        vnom,
        violations,
        devices,
        x: x.clone(),
    }
}
